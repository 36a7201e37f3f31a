//! Auto-fix loop: bounded repair cycle around the verification
//! orchestrator.
//!
//! State machine per iteration: Verifying -> Proposing -> Applying ->
//! Verifying, terminating on success, on the attempt bound, when no
//! proposal can be obtained, or when a proposal's confidence is below
//! the policy threshold. Low-confidence or underspecified proposals are
//! never applied, and a proposed span that only matches after
//! whitespace normalization is rejected without touching the file.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use crate::config::FixPolicy;
use crate::judge::{FixProposal, JudgeClient, JudgeReply};
use crate::verify::{Orchestrator, VerificationResult};

/// How many recently-edited files are shown to the judge
const MAX_CONTEXT_FILES: usize = 5;
/// Per-file content cap in the analysis prompt
const MAX_FILE_CHARS: usize = 10_000;

/// Record of one fix attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixAttempt {
    pub issue: String,
    pub file_path: String,
    pub line_number: Option<u32>,
    pub original_code: String,
    pub fixed_code: String,
    /// Whether the edit was written to disk
    pub applied: bool,
    /// Whether the re-verification after this attempt passed
    pub succeeded: bool,
    pub verification_after: Option<VerificationResult>,
}

/// Result of the whole auto-fix workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixOutcome {
    pub issues_found: Vec<String>,
    /// Every attempt made, in chronological order
    pub attempts: Vec<FixAttempt>,
    pub all_fixed: bool,
    pub final_verification: Option<VerificationResult>,
    /// Every evidence artifact produced along the way, oldest first
    pub evidence: Vec<PathBuf>,
    /// Why the loop stopped
    pub stop_reason: String,
}

/// Why a proposed edit could not be applied
#[derive(Debug, PartialEq, Eq)]
pub enum ApplyError {
    /// Target file does not exist under the project root
    FileMissing(PathBuf),
    /// Proposed original span is absent from the file
    SpanNotFound,
    /// The span matches only after whitespace normalization; writing a
    /// normalized replacement risks corrupting unrelated formatting
    WhitespaceMismatch,
    /// I/O failure while reading or writing the file
    Io(String),
}

impl std::fmt::Display for ApplyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApplyError::FileMissing(path) => write!(f, "file not found: {}", path.display()),
            ApplyError::SpanNotFound => write!(f, "original code not found in file"),
            ApplyError::WhitespaceMismatch => {
                write!(f, "original code found only with different whitespace; not applied")
            }
            ApplyError::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl std::error::Error for ApplyError {}

/// Apply a proposed span replacement to a file.
///
/// The original span must match verbatim; only the first occurrence is
/// replaced. A whitespace-normalized match is detection-only: the file
/// is left byte-for-byte unchanged and the attempt fails.
pub fn apply_fix(
    project_root: &Path,
    file_path: &str,
    original_code: &str,
    fixed_code: &str,
) -> Result<(), ApplyError> {
    let full_path = project_root.join(file_path);
    if !full_path.exists() {
        return Err(ApplyError::FileMissing(full_path));
    }

    let content =
        std::fs::read_to_string(&full_path).map_err(|e| ApplyError::Io(e.to_string()))?;

    if !content.contains(original_code) {
        let normalized_original = normalize_whitespace(original_code);
        let normalized_content = normalize_whitespace(&content);
        if normalized_content.contains(&normalized_original) {
            return Err(ApplyError::WhitespaceMismatch);
        }
        return Err(ApplyError::SpanNotFound);
    }

    let new_content = content.replacen(original_code, fixed_code, 1);
    std::fs::write(&full_path, new_content).map_err(|e| ApplyError::Io(e.to_string()))?;
    Ok(())
}

fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Drives the bounded repair cycle.
pub struct AutoFixer {
    project_root: PathBuf,
    judge: JudgeClient,
    policy: FixPolicy,
}

impl AutoFixer {
    pub fn new(project_root: impl Into<PathBuf>, judge: JudgeClient) -> Self {
        Self {
            project_root: project_root.into(),
            judge,
            policy: crate::config::get().fix.clone(),
        }
    }

    pub fn policy(mut self, policy: FixPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Run the full workflow: verify, and while failing, propose, apply,
    /// and re-verify up to the attempt bound.
    pub fn run(
        &self,
        orchestrator: &Orchestrator,
        task_text: &str,
        items: &[String],
        acceptance_criteria: Option<&str>,
        edited_files: &[String],
    ) -> FixOutcome {
        let mut evidence = Vec::new();

        let mut verification = orchestrator.verify(task_text, items, acceptance_criteria);
        if let Some(path) = &verification.evidence_path {
            evidence.push(path.clone());
        }

        if verification.success {
            return FixOutcome {
                issues_found: Vec::new(),
                attempts: Vec::new(),
                all_fixed: true,
                final_verification: Some(verification),
                evidence,
                stop_reason: "verification passed".to_string(),
            };
        }

        let mut issues_found = verification.failed_items.clone();
        issues_found.extend(verification.uncertain_items.iter().cloned());
        if issues_found.is_empty() {
            issues_found.push("Visual verification failed - see evidence".to_string());
        }

        let mut attempts: Vec<FixAttempt> = Vec::new();
        let mut stop_reason = String::new();

        while (attempts.len() as u32) < self.policy.max_attempts && !verification.success {
            let issue_text = if verification.judge_response.is_empty() {
                issues_found.join("; ")
            } else {
                verification.judge_response.clone()
            };

            // Proposing
            let proposal = match self.propose(&verification, &issue_text, edited_files) {
                Some(proposal) => proposal,
                None => {
                    stop_reason = "no fix proposal could be obtained".to_string();
                    break;
                }
            };
            let Some(file_to_fix) = proposal.file_to_fix.clone() else {
                stop_reason = "judge did not identify a file to fix".to_string();
                break;
            };
            if proposal.confidence < self.policy.min_confidence {
                stop_reason = format!(
                    "proposal confidence {:.2} below threshold {:.2}",
                    proposal.confidence, self.policy.min_confidence
                );
                break;
            }

            // Applying
            let mut attempt = FixAttempt {
                issue: proposal.issue_identified.clone(),
                file_path: file_to_fix.clone(),
                line_number: proposal.line_number,
                original_code: proposal.original_code.clone(),
                fixed_code: proposal.fixed_code.clone(),
                applied: false,
                succeeded: false,
                verification_after: None,
            };

            if attempt.original_code.is_empty() || attempt.fixed_code.is_empty() {
                attempts.push(attempt);
                stop_reason = "proposal omitted the code spans".to_string();
                break;
            }

            match apply_fix(
                &self.project_root,
                &file_to_fix,
                &attempt.original_code,
                &attempt.fixed_code,
            ) {
                Ok(()) => {
                    attempt.applied = true;
                    // Let any hot-reload mechanism pick up the change
                    thread::sleep(Duration::from_millis(self.policy.reload_delay_ms));

                    verification = orchestrator.verify(task_text, items, acceptance_criteria);
                    if let Some(path) = &verification.evidence_path {
                        evidence.push(path.clone());
                    }
                    attempt.succeeded = verification.success;
                    attempt.verification_after = Some(verification.clone());
                }
                Err(e) => {
                    eprintln!("Warning: fix not applied to {}: {}", file_to_fix, e);
                }
            }

            attempts.push(attempt);
        }

        if stop_reason.is_empty() {
            stop_reason = if verification.success {
                "verification passed after fixes".to_string()
            } else {
                format!("attempt bound of {} reached", self.policy.max_attempts)
            };
        }

        FixOutcome {
            issues_found,
            attempts,
            all_fixed: verification.success,
            final_verification: Some(verification),
            evidence,
            stop_reason,
        }
    }

    /// Ask the judge to analyze the failing evidence and propose one
    /// file+span replacement.
    fn propose(
        &self,
        verification: &VerificationResult,
        issue_text: &str,
        edited_files: &[String],
    ) -> Option<FixProposal> {
        let prompt = self.build_analysis_prompt(verification, issue_text, edited_files);
        match self.judge.ask_parsed::<FixProposal>(&prompt) {
            Ok(JudgeReply::Parsed(proposal)) => Some(proposal),
            Ok(JudgeReply::Unparseable(_)) | Err(_) => None,
        }
    }

    fn build_analysis_prompt(
        &self,
        verification: &VerificationResult,
        issue_text: &str,
        edited_files: &[String],
    ) -> String {
        let mut files_section = String::new();
        for file_path in edited_files.iter().take(MAX_CONTEXT_FILES) {
            let full_path = self.project_root.join(file_path);
            let Ok(mut content) = std::fs::read_to_string(&full_path) else {
                continue;
            };
            if content.len() > MAX_FILE_CHARS {
                content.truncate(MAX_FILE_CHARS);
                content.push_str("\n... (truncated)");
            }
            files_section.push_str(&format!("\n### {}\n```\n{}\n```\n", file_path, content));
        }

        let evidence_section = verification
            .evidence_path
            .as_ref()
            .map(|path| {
                format!(
                    "## Evidence\nThe capture showing the issue is at: {}\nUse the Read tool to view it.\n",
                    path.display()
                )
            })
            .unwrap_or_default();

        format!(
            r#"You are debugging a visual issue in a UI application.

## Issue Description
{issue_text}

{evidence_section}
## Recently Edited Files
These files were recently edited and may contain the bug:
{files_section}

## Task
Identify which file and span contains the bug and propose a specific code fix.

Respond in this JSON format:
```json
{{
  "issue_identified": "specific description of what's wrong",
  "root_cause": "why this is happening",
  "file_to_fix": "path/to/file",
  "line_number": 42,
  "original_code": "the exact code that needs changing",
  "fixed_code": "the corrected code",
  "confidence": 0.0,
  "explanation": "why this fix should work"
}}
```

If you cannot determine a fix, set "file_to_fix" to null and "confidence" to 0.0.
"#,
            issue_text = issue_text,
            evidence_section = evidence_section,
            files_section = files_section,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    const SOURCE: &str = "fn greet() {\n    println!(\"hello\");\n}\n";

    fn project_with_file(content: &str) -> (TempDir, PathBuf) {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("src_main.rs");
        std::fs::write(&file, content).unwrap();
        (dir, file)
    }

    #[test]
    fn apply_fix_replaces_first_occurrence_only() {
        let (dir, file) = project_with_file("let a = 1;\nlet a = 1;\n");
        apply_fix(dir.path(), "src_main.rs", "let a = 1;", "let a = 2;").unwrap();
        let content = std::fs::read_to_string(&file).unwrap();
        assert_eq!(content, "let a = 2;\nlet a = 1;\n");
    }

    #[test]
    fn apply_fix_missing_file() {
        let dir = TempDir::new().unwrap();
        let err = apply_fix(dir.path(), "nope.rs", "a", "b").unwrap_err();
        assert!(matches!(err, ApplyError::FileMissing(_)));
    }

    #[test]
    fn apply_fix_span_not_found() {
        let (dir, file) = project_with_file(SOURCE);
        let err = apply_fix(dir.path(), "src_main.rs", "fn missing()", "x").unwrap_err();
        assert_eq!(err, ApplyError::SpanNotFound);
        assert_eq!(std::fs::read_to_string(&file).unwrap(), SOURCE);
    }

    #[test]
    fn whitespace_mismatch_is_detected_but_never_written() {
        let (dir, file) = project_with_file(SOURCE);
        // Same tokens, different whitespace
        let err = apply_fix(
            dir.path(),
            "src_main.rs",
            "fn greet() { println!(\"hello\"); }",
            "fn greet() { println!(\"hi\"); }",
        )
        .unwrap_err();
        assert_eq!(err, ApplyError::WhitespaceMismatch);
        // Byte-for-byte unchanged
        assert_eq!(std::fs::read_to_string(&file).unwrap(), SOURCE);
    }

    #[test]
    fn normalize_collapses_all_whitespace() {
        assert_eq!(
            normalize_whitespace("a\n  b\t c"),
            "a b c"
        );
    }
}
