//! Batch verification: N captures judged in a single request.
//!
//! The request enumerates every capture (inline text for transcripts, a
//! file path for images) and asks for a per-capture verdict array plus
//! an aggregate summary. The same fail-closed rule as single
//! verification applies: an unparseable reply marks every capture
//! uncertain rather than silently dropping any.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::judge::{BatchReport, JudgeClient, JudgeReply};

/// Verdict for one capture in a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Pass,
    Fail,
    Uncertain,
}

/// Per-capture verification outcome
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureVerdict {
    pub capture_path: PathBuf,
    pub status: BatchStatus,
    pub evidence: String,
    pub task_items_verified: Vec<String>,
    pub issues: Vec<String>,
}

/// Aggregate result of a batch verification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub uncertain: usize,
    pub issues: Vec<String>,
    pub verdicts: Vec<CaptureVerdict>,
    pub summary: String,
    pub recommendation: String,
    pub raw_response: String,
}

impl BatchOutcome {
    /// Fail-closed outcome: every capture marked uncertain
    fn all_uncertain(paths: &[PathBuf], issue: &str, raw: String) -> Self {
        Self {
            total: paths.len(),
            passed: 0,
            failed: 0,
            uncertain: paths.len(),
            issues: vec![issue.to_string()],
            verdicts: paths
                .iter()
                .map(|path| CaptureVerdict {
                    capture_path: path.clone(),
                    status: BatchStatus::Uncertain,
                    evidence: String::new(),
                    task_items_verified: Vec::new(),
                    issues: Vec::new(),
                })
                .collect(),
            summary: issue.to_string(),
            recommendation: String::new(),
            raw_response: raw,
        }
    }
}

/// Verifies multiple captures against task criteria in one judge call.
pub struct BatchVerifier {
    judge: JudgeClient,
    task_items: Vec<String>,
    acceptance_criteria: Option<String>,
}

impl BatchVerifier {
    pub fn new(judge: JudgeClient) -> Self {
        Self {
            judge,
            task_items: Vec::new(),
            acceptance_criteria: None,
        }
    }

    pub fn task_items(mut self, items: Vec<String>) -> Self {
        self.task_items = items;
        self
    }

    pub fn acceptance_criteria(mut self, criteria: impl Into<String>) -> Self {
        self.acceptance_criteria = Some(criteria.into());
        self
    }

    /// Judge all `capture_paths` in a single request.
    pub fn verify_batch(&self, capture_paths: &[PathBuf], detailed: bool) -> BatchOutcome {
        if capture_paths.is_empty() {
            return BatchOutcome {
                total: 0,
                passed: 0,
                failed: 0,
                uncertain: 0,
                issues: Vec::new(),
                verdicts: Vec::new(),
                summary: "No captures to verify".to_string(),
                recommendation: String::new(),
                raw_response: String::new(),
            };
        }

        let prompt = self.build_prompt(capture_paths, detailed);
        let response = match self.judge.ask(&prompt) {
            Ok(response) => response,
            Err(e) => {
                return BatchOutcome::all_uncertain(
                    capture_paths,
                    &format!("Judge call failed: {}", e),
                    String::new(),
                );
            }
        };

        match crate::judge::parse_reply::<BatchReport>(&response) {
            JudgeReply::Parsed(report) => reduce_batch(report, capture_paths, response),
            JudgeReply::Unparseable(raw) => BatchOutcome::all_uncertain(
                capture_paths,
                "Verification failed - could not parse judge response",
                raw,
            ),
        }
    }

    fn build_prompt(&self, capture_paths: &[PathBuf], detailed: bool) -> String {
        let items_text = if self.task_items.is_empty() {
            "No specific items".to_string()
        } else {
            self.task_items
                .iter()
                .map(|item| format!("- {}", item))
                .collect::<Vec<_>>()
                .join("\n")
        };
        let criteria_text = self
            .acceptance_criteria
            .as_deref()
            .unwrap_or("Verify the captures show expected behavior");

        let mut capture_refs = Vec::new();
        for (i, path) in capture_paths.iter().enumerate() {
            capture_refs.push(describe_capture(i + 1, path));
        }

        let detail_request = if detailed {
            "For each capture, provide a detailed per-capture entry in the details array."
        } else {
            "Provide a summary of all captures."
        };

        format!(
            r#"You are verifying {count} captures against task criteria.

## Task Items to Verify
{items_text}

## Acceptance Criteria
{criteria_text}

## Captures
They may represent a user flow (sequential steps), multiple states of one feature, or different features.

{captures}

## Instructions
{detail_request}

Respond with valid JSON in this format:
```json
{{
  "summary": {{
    "total": {count},
    "passed": 0,
    "failed": 0,
    "uncertain": 0,
    "overall_status": "pass|fail|partial",
    "issues": ["issues found across all captures"]
  }},
  "details": [
    {{"image_index": 1, "status": "pass|fail|uncertain", "evidence": "what you observed", "task_items_verified": [], "issues": []}}
  ],
  "recommendation": "brief recommendation for next steps"
}}
```
"#,
            count = capture_paths.len(),
            items_text = items_text,
            criteria_text = criteria_text,
            captures = capture_refs.join("\n\n"),
            detail_request = detail_request,
        )
    }
}

/// Render one capture reference: inline text for transcripts, a path
/// reference for images.
fn describe_capture(index: usize, path: &Path) -> String {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "txt" | "ansi" | "html" | "log" => match std::fs::read_to_string(path) {
            Ok(content) => {
                let mut content = content;
                if content.len() > 2000 {
                    content.truncate(2000);
                    content.push_str("\n... [truncated]");
                }
                format!("Capture {}:\n```\n{}\n```", index, content)
            }
            Err(_) => format!("Capture {}: [unreadable file at {}]", index, path.display()),
        },
        _ => format!(
            "Capture {}: [image at {} - use the Read tool to view it]",
            index,
            path.display()
        ),
    }
}

fn reduce_batch(report: BatchReport, capture_paths: &[PathBuf], raw: String) -> BatchOutcome {
    let verdicts = report
        .details
        .iter()
        .map(|detail| {
            let status = match detail.status.to_lowercase().as_str() {
                "pass" => BatchStatus::Pass,
                "fail" => BatchStatus::Fail,
                _ => BatchStatus::Uncertain,
            };
            let path = detail
                .image_index
                .checked_sub(1)
                .and_then(|i| capture_paths.get(i))
                .cloned()
                .unwrap_or_default();
            CaptureVerdict {
                capture_path: path,
                status,
                evidence: detail.evidence.clone(),
                task_items_verified: detail.task_items_verified.clone(),
                issues: detail.issues.clone(),
            }
        })
        .collect();

    let mut summary = format!("Overall: {}", report.summary.overall_status);
    if !report.recommendation.is_empty() {
        summary.push_str(&format!("\nRecommendation: {}", report.recommendation));
    }

    BatchOutcome {
        total: report.summary.total.max(capture_paths.len()),
        passed: report.summary.passed,
        failed: report.summary.failed,
        uncertain: report.summary.uncertain,
        issues: report.summary.issues,
        verdicts,
        summary,
        recommendation: report.recommendation,
        raw_response: raw,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::judge::{JudgeConfig, parse_reply};

    fn paths(n: usize) -> Vec<PathBuf> {
        (0..n).map(|i| PathBuf::from(format!("/tmp/cap_{}.png", i))).collect()
    }

    #[test]
    fn empty_batch_is_trivially_done() {
        let verifier = BatchVerifier::new(JudgeClient::new(JudgeConfig::new("unused")));
        let outcome = verifier.verify_batch(&[], false);
        assert_eq!(outcome.total, 0);
        assert_eq!(outcome.summary, "No captures to verify");
    }

    #[test]
    fn unparseable_reply_marks_all_uncertain() {
        let outcome = match parse_reply::<BatchReport>("no json here") {
            JudgeReply::Parsed(_) => panic!("must not parse"),
            JudgeReply::Unparseable(raw) => BatchOutcome::all_uncertain(
                &paths(3),
                "Verification failed - could not parse judge response",
                raw,
            ),
        };
        assert_eq!(outcome.uncertain, 3);
        assert_eq!(outcome.verdicts.len(), 3);
        assert!(outcome
            .verdicts
            .iter()
            .all(|v| v.status == BatchStatus::Uncertain));
    }

    #[test]
    fn reduce_maps_indices_to_paths() {
        let capture_paths = paths(2);
        let response = r#"```json
{
  "summary": {"total": 2, "passed": 1, "failed": 1, "uncertain": 0, "overall_status": "partial", "issues": ["button misaligned"]},
  "details": [
    {"image_index": 1, "status": "pass", "evidence": "fine"},
    {"image_index": 2, "status": "fail", "evidence": "broken", "issues": ["misaligned"]}
  ],
  "recommendation": "fix the second screen"
}
```"#;
        let report = match parse_reply::<BatchReport>(response) {
            JudgeReply::Parsed(report) => report,
            JudgeReply::Unparseable(raw) => panic!("expected parse, got {}", raw),
        };
        let outcome = reduce_batch(report, &capture_paths, response.to_string());
        assert_eq!(outcome.passed, 1);
        assert_eq!(outcome.failed, 1);
        assert_eq!(outcome.verdicts[0].capture_path, capture_paths[0]);
        assert_eq!(outcome.verdicts[1].status, BatchStatus::Fail);
        assert!(outcome.summary.contains("partial"));
    }

    #[test]
    fn prompt_lists_every_capture() {
        let verifier = BatchVerifier::new(JudgeClient::new(JudgeConfig::new("unused")))
            .task_items(vec!["item A".to_string()])
            .acceptance_criteria("flows complete");
        let prompt = verifier.build_prompt(&paths(2), true);
        assert!(prompt.contains("Capture 1"));
        assert!(prompt.contains("Capture 2"));
        assert!(prompt.contains("item A"));
        assert!(prompt.contains("flows complete"));
    }
}
