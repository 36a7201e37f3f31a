//! Verification orchestrator: turns a task descriptor plus a checklist
//! into a judged verdict.
//!
//! Flow: recover the application profile from the task text (fail fast
//! when none is recoverable), capture one evidence artifact through the
//! matching adapter, send the checklist and the evidence reference to
//! the judge, and reduce the reply into completed/failed/uncertain item
//! sets. Response parsing is fail-closed: an unparseable reply marks
//! every requested item failed and surfaces the raw text.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::capture::{
    CaptureAdapter, CaptureOptions, CaptureResult, NativeWindowAdapter, ProcessOutputAdapter,
    select_adapter,
};
use crate::checklist::{self, AppKind, AppProfile};
use crate::config;
use crate::judge::{JudgeClient, JudgeReply, VerdictReport, VerdictStatus};
use crate::session::Session;

/// Result of one verification run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationResult {
    /// Whether the judge confirmed every item
    pub success: bool,
    /// Items judged complete, in the judge's order
    pub completed_items: Vec<String>,
    /// Items judged not complete, in the judge's order
    pub failed_items: Vec<String>,
    /// Items the judge could not decide; counted as failures for
    /// `success` but reported separately
    pub uncertain_items: Vec<String>,
    /// Raw judge response text
    pub judge_response: String,
    /// Evidence artifact backing the verdict
    pub evidence_path: Option<PathBuf>,
}

impl VerificationResult {
    /// A run that failed before or during judging: every requested item
    /// is reported failed, nothing is guessed.
    pub fn failed_all(items: &[String], response: impl Into<String>) -> Self {
        Self {
            success: false,
            completed_items: Vec::new(),
            failed_items: items.to_vec(),
            uncertain_items: Vec::new(),
            judge_response: response.into(),
            evidence_path: None,
        }
    }

    fn with_evidence(mut self, path: Option<PathBuf>) -> Self {
        self.evidence_path = path;
        self
    }
}

/// The verification orchestrator.
pub struct Orchestrator {
    judge: JudgeClient,
    /// Name used for evidence files and session directories
    project: String,
}

impl Orchestrator {
    pub fn new(judge: JudgeClient) -> Self {
        Self {
            judge,
            project: "verify".to_string(),
        }
    }

    pub fn project(mut self, name: impl Into<String>) -> Self {
        self.project = name.into();
        self
    }

    pub fn judge(&self) -> &JudgeClient {
        &self.judge
    }

    /// Verify `items` against the application described in `task_text`.
    pub fn verify(
        &self,
        task_text: &str,
        items: &[String],
        acceptance_criteria: Option<&str>,
    ) -> VerificationResult {
        // 1. Recover the application profile, failing fast without
        // consuming further resources
        let Some(profile) = checklist::detect_app_profile(task_text) else {
            return VerificationResult::failed_all(
                items,
                "Could not detect application type. Add [webapp]: URL, [gui]: command, or \
                 [tui]: command to the task file.",
            );
        };

        // 2. One evidence artifact at a deterministic path
        let session = Session::with_name(&self.project).keep(true);
        if let Err(e) = session.init() {
            return VerificationResult::failed_all(
                items,
                format!("Failed to prepare evidence directory: {}", e),
            );
        }

        let capture = match self.capture_evidence(&profile, &session) {
            Ok(capture) => capture,
            Err(message) => return VerificationResult::failed_all(items, message),
        };
        if !capture.success {
            return VerificationResult::failed_all(
                items,
                format!(
                    "Capture failed: {}",
                    capture.error.as_deref().unwrap_or("unknown capture error")
                ),
            )
            .with_evidence(capture.content_path.clone());
        }

        // 3.-4. Judge request and reply
        let prompt = build_verdict_prompt(&profile, items, acceptance_criteria, &capture);
        let reply = match self.judge.ask_parsed::<VerdictReport>(&prompt) {
            Ok(reply) => reply,
            Err(e) => {
                return VerificationResult::failed_all(items, format!("Error: {}", e))
                    .with_evidence(capture.content_path.clone());
            }
        };

        // 5.-6. Reduce, fail-closed on an unparseable reply
        let evidence_path = capture.content_path.clone();
        match reply {
            JudgeReply::Parsed(report) => {
                reduce_report(&report).with_evidence(evidence_path)
            }
            JudgeReply::Unparseable(raw) => {
                VerificationResult::failed_all(items, raw).with_evidence(evidence_path)
            }
        }
    }

    /// Parse a task file and verify its pending checklist items.
    pub fn verify_task_file(&self, path: impl AsRef<std::path::Path>) -> std::io::Result<VerificationResult> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let task = checklist::parse_task_str(&content);
        let items = task.pending_texts();
        if items.is_empty() {
            return Ok(VerificationResult {
                success: true,
                completed_items: Vec::new(),
                failed_items: Vec::new(),
                uncertain_items: Vec::new(),
                judge_response: "No pending checklist items to verify.".to_string(),
                evidence_path: None,
            });
        }
        Ok(self.verify(&content, &items, task.acceptance_criteria.as_deref()))
    }

    /// Capture the evidence artifact for an application profile.
    ///
    /// Web targets route through the adapter preference order; GUI
    /// targets use the native-window adapter; terminal applications are
    /// captured as text transcripts via the process-output adapter so
    /// the evidence can travel inline in the judge request.
    fn capture_evidence(
        &self,
        profile: &AppProfile,
        session: &Session,
    ) -> Result<CaptureResult, String> {
        let target = profile.target().ok_or_else(|| match profile.kind {
            AppKind::Web => {
                "Webapp detected but no URL found. Add [webapp]: http://your-url to the task file."
                    .to_string()
            }
            AppKind::Gui => {
                "GUI detected but no command or window title found. Add [gui]: command and \
                 [window_title]: title to the task file."
                    .to_string()
            }
            AppKind::Terminal => {
                "Terminal app detected but no command found. Add [tui]: your-command to the \
                 task file."
                    .to_string()
            }
        })?;

        let defaults = &config::get().defaults;
        let options = CaptureOptions::default()
            .output_dir(&session.dir)
            .size(profile.width, profile.height)
            .wait_before(profile.wait_seconds)
            .timeout(defaults.capture_timeout);
        let options = CaptureOptions {
            output_name: Some(format!(
                "{}_{}",
                self.project,
                chrono::Utc::now().format("%Y%m%d_%H%M%S_%3f")
            )),
            ..options
        };

        let result = match profile.kind {
            AppKind::Web => {
                let mut adapter = select_adapter(&target, options);
                adapter.capture(&target, None)
            }
            AppKind::Gui => {
                let mut adapter = NativeWindowAdapter::new(options);
                let result = adapter.capture(&target, None);
                adapter.end_session();
                result
            }
            AppKind::Terminal => {
                let mut adapter = ProcessOutputAdapter::new(options);
                adapter.capture(&target, None)
            }
        };
        Ok(result)
    }
}

/// Reduce a parsed verdict report into item sets, preserving the
/// judge's ordering.
fn reduce_report(report: &VerdictReport) -> VerificationResult {
    let mut completed = Vec::new();
    let mut failed = Vec::new();
    let mut uncertain = Vec::new();

    for verdict in &report.results {
        match verdict.status {
            VerdictStatus::Completed => completed.push(verdict.task.clone()),
            VerdictStatus::NotCompleted => failed.push(verdict.task.clone()),
            VerdictStatus::Uncertain => uncertain.push(verdict.task.clone()),
        }
    }

    let success = report.all_completed && failed.is_empty() && uncertain.is_empty();

    VerificationResult {
        success,
        completed_items: completed,
        failed_items: failed,
        uncertain_items: uncertain,
        judge_response: if report.summary.is_empty() {
            serde_json::to_string(report).unwrap_or_default()
        } else {
            report.summary.clone()
        },
        evidence_path: None,
    }
}

/// Build the verdict request: checklist verbatim, criteria if supplied,
/// and the evidence reference (inline text for transcripts, a file path
/// for images; image bytes are never embedded).
fn build_verdict_prompt(
    profile: &AppProfile,
    items: &[String],
    acceptance_criteria: Option<&str>,
    capture: &CaptureResult,
) -> String {
    let items_list = items
        .iter()
        .map(|item| format!("- {}", item))
        .collect::<Vec<_>>()
        .join("\n");

    let criteria_section = acceptance_criteria
        .map(|criteria| format!("\n## Acceptance Criteria\n{}\n", criteria))
        .unwrap_or_default();

    let evidence_section = if capture.kind.is_textual() {
        let transcript = capture.content_text.as_deref().unwrap_or("");
        format!(
            "## Terminal Output\n```\n{}\n```\n\nAnalyze the terminal output above.",
            transcript
        )
    } else {
        let path = capture
            .content_path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        format!(
            "## Screenshot\nThe screenshot is saved at: {}\nUse the Read tool to view this \
             image file before answering.",
            path
        )
    };

    format!(
        r#"You are verifying whether tasks have been completed based on visual evidence.

## Application Type
{app_kind}

## Tasks to Verify
{items_list}
{criteria_section}
## Instructions
For each task decide COMPLETED, NOT_COMPLETED, or UNCERTAIN from the evidence alone.

{evidence_section}

Respond in this exact JSON format:
```json
{{
  "results": [
    {{"task": "task description", "status": "COMPLETED|NOT_COMPLETED|UNCERTAIN", "evidence": "what you observed"}}
  ],
  "summary": "brief overall assessment",
  "all_completed": true/false
}}
```
"#,
        app_kind = profile.kind.to_string().to_uppercase(),
        items_list = items_list,
        criteria_section = criteria_section,
        evidence_section = evidence_section,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::CaptureKind;
    use crate::judge::{ItemVerdict, JudgeConfig};
    use pretty_assertions::assert_eq;

    fn report(statuses: &[(&str, VerdictStatus)], all_completed: bool) -> VerdictReport {
        VerdictReport {
            results: statuses
                .iter()
                .map(|(task, status)| ItemVerdict {
                    task: task.to_string(),
                    status: *status,
                    evidence: String::new(),
                })
                .collect(),
            summary: "summary".to_string(),
            all_completed,
        }
    }

    #[test]
    fn reduce_partitions_in_judge_order() {
        let report = report(
            &[
                ("b", VerdictStatus::NotCompleted),
                ("a", VerdictStatus::Completed),
                ("c", VerdictStatus::Uncertain),
            ],
            false,
        );
        let result = reduce_report(&report);
        assert_eq!(result.completed_items, vec!["a"]);
        assert_eq!(result.failed_items, vec!["b"]);
        assert_eq!(result.uncertain_items, vec!["c"]);
        assert!(!result.success);
    }

    #[test]
    fn uncertain_items_block_success() {
        let report = report(&[("a", VerdictStatus::Uncertain)], true);
        let result = reduce_report(&report);
        assert!(!result.success);
        assert_eq!(result.uncertain_items, vec!["a"]);
    }

    #[test]
    fn all_completed_report_succeeds() {
        let report = report(&[("a", VerdictStatus::Completed)], true);
        let result = reduce_report(&report);
        assert!(result.success);
        assert_eq!(result.completed_items, vec!["a"]);
        assert!(result.failed_items.is_empty());
    }

    #[test]
    fn unknown_app_kind_fails_fast() {
        let orchestrator = Orchestrator::new(JudgeClient::new(JudgeConfig::new("unused")));
        let items = vec!["item one".to_string()];
        let result = orchestrator.verify("just some prose about refactoring", &items, None);
        assert!(!result.success);
        assert_eq!(result.failed_items, items);
        assert!(result.completed_items.is_empty());
        assert!(result.judge_response.contains("Could not detect application type"));
        assert!(result.evidence_path.is_none());
    }

    #[test]
    fn web_profile_without_url_reports_guidance() {
        let orchestrator = Orchestrator::new(JudgeClient::new(JudgeConfig::new("unused")));
        let items = vec!["item".to_string()];
        // Heuristic web detection without a parseable URL
        let result = orchestrator.verify("open the page in a browser", &items, None);
        assert!(!result.success);
        assert!(result.judge_response.contains("[webapp]"));
    }

    #[test]
    fn prompt_inlines_text_evidence() {
        let profile = AppProfile {
            kind: AppKind::Terminal,
            url: None,
            command: Some("echo hi".to_string()),
            window_title: None,
            width: 1280,
            height: 720,
            wait_seconds: 0.0,
        };
        let capture = CaptureResult::text(CaptureKind::Text, "--- STDOUT ---\nhi");
        let prompt = build_verdict_prompt(&profile, &["see hi".to_string()], None, &capture);
        assert!(prompt.contains("--- STDOUT ---"));
        assert!(prompt.contains("- see hi"));
        assert!(prompt.contains("TUI"));
    }

    #[test]
    fn prompt_references_image_by_path_only() {
        let profile = AppProfile {
            kind: AppKind::Web,
            url: Some("http://localhost:3000".to_string()),
            command: None,
            window_title: None,
            width: 1280,
            height: 720,
            wait_seconds: 0.0,
        };
        let capture = CaptureResult::file(CaptureKind::Screenshot, "/tmp/evidence.png");
        let prompt = build_verdict_prompt(
            &profile,
            &["Login button is visible".to_string()],
            Some("Contrast must pass."),
            &capture,
        );
        assert!(prompt.contains("/tmp/evidence.png"));
        assert!(prompt.contains("Acceptance Criteria"));
        assert!(prompt.contains("WEBAPP"));
    }
}
