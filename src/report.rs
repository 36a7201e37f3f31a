//! Report formatting for verification runs, fix outcomes, baselines,
//! and comparisons. Markdown-flavored text aimed at terminals and task
//! logs.

use crate::baseline::{BaselineEntry, ComparisonOutcome};
use crate::fix::FixOutcome;
use crate::trigger::TriggerDecision;
use crate::verify::{BatchOutcome, VerificationResult};

/// Format a single verification result
pub fn format_verification(result: &VerificationResult) -> String {
    let mut lines = vec!["## Verification Result".to_string(), String::new()];
    lines.push(format!(
        "**Status**: {}",
        if result.success { "PASSED" } else { "FAILED" }
    ));

    if !result.completed_items.is_empty() {
        lines.push("\n### Completed Items".to_string());
        for item in &result.completed_items {
            lines.push(format!("- [x] {}", item));
        }
    }
    if !result.failed_items.is_empty() {
        lines.push("\n### Failed Items".to_string());
        for item in &result.failed_items {
            lines.push(format!("- [ ] {}", item));
        }
    }
    if !result.uncertain_items.is_empty() {
        lines.push("\n### Uncertain Items".to_string());
        for item in &result.uncertain_items {
            lines.push(format!("- [?] {}", item));
        }
    }

    if let Some(path) = &result.evidence_path {
        lines.push(format!("\n**Evidence**: {}", path.display()));
    }
    if !result.judge_response.is_empty() {
        lines.push(format!("\n### Judge Response\n{}", result.judge_response));
    }

    lines.join("\n")
}

/// Format an auto-fix outcome, listing every attempt in order
pub fn format_fix_outcome(outcome: &FixOutcome) -> String {
    let mut lines = vec!["## Auto-Fix Result".to_string(), String::new()];
    lines.push(format!(
        "**Status**: {}",
        if outcome.all_fixed { "ALL FIXED" } else { "ISSUES REMAIN" }
    ));
    lines.push(format!("**Stopped because**: {}", outcome.stop_reason));

    if !outcome.issues_found.is_empty() {
        lines.push("\n### Issues Found".to_string());
        for issue in &outcome.issues_found {
            lines.push(format!("- {}", issue));
        }
    }

    if !outcome.attempts.is_empty() {
        lines.push("\n### Fix Attempts".to_string());
        for (i, attempt) in outcome.attempts.iter().enumerate() {
            let marker = if attempt.succeeded {
                "fixed"
            } else if attempt.applied {
                "applied, still failing"
            } else {
                "not applied"
            };
            lines.push(format!("\n#### Attempt {} ({})", i + 1, marker));
            lines.push(format!("**Issue**: {}", attempt.issue));
            lines.push(format!(
                "**File**: {}:{}",
                attempt.file_path,
                attempt
                    .line_number
                    .map(|n| n.to_string())
                    .unwrap_or_else(|| "?".to_string())
            ));
            if !attempt.original_code.is_empty() && !attempt.fixed_code.is_empty() {
                lines.push("**Change**:".to_string());
                lines.push("```diff".to_string());
                for line in attempt.original_code.lines() {
                    lines.push(format!("- {}", line));
                }
                for line in attempt.fixed_code.lines() {
                    lines.push(format!("+ {}", line));
                }
                lines.push("```".to_string());
            }
        }
    }

    if !outcome.evidence.is_empty() {
        lines.push("\n### Evidence".to_string());
        for path in &outcome.evidence {
            lines.push(format!("- {}", path.display()));
        }
    }

    lines.join("\n")
}

/// Format the baseline list as a table
pub fn format_baseline_list(baselines: &[BaselineEntry]) -> String {
    if baselines.is_empty() {
        return "No baselines saved.".to_string();
    }

    let mut lines = vec![
        "## Saved Baselines".to_string(),
        String::new(),
        "| Name | Type | Created | Description |".to_string(),
        "|------|------|---------|-------------|".to_string(),
    ];

    for baseline in baselines {
        let created = baseline.created.get(..10).unwrap_or("unknown");
        let description = baseline.description.as_deref().unwrap_or("-");
        lines.push(format!(
            "| {} | {} | {} | {} |",
            baseline.name, baseline.app_type, created, description
        ));
    }

    lines.join("\n")
}

/// Format a baseline comparison result
pub fn format_comparison(result: &ComparisonOutcome) -> String {
    let mut lines = vec!["## Comparison Result".to_string(), String::new()];
    lines.push(format!(
        "**Status**: {}",
        if result.matches { "MATCH" } else { "MISMATCH" }
    ));
    lines.push(format!("**Similarity**: {:.1}%", result.similarity_score * 100.0));
    lines.push(format!("**Baseline**: {}", result.baseline_path.display()));
    lines.push(format!("**Current**: {}", result.current_path.display()));

    if !result.differences.is_empty() {
        lines.push("\n### Differences Found".to_string());
        for diff in &result.differences {
            lines.push(format!("- {}", diff));
        }
    }
    if !result.suggested_fixes.is_empty() {
        lines.push("\n### Suggested Fixes".to_string());
        for fix in &result.suggested_fixes {
            lines.push(format!("- {}", fix));
        }
    }
    if !result.analysis.is_empty() {
        lines.push(format!("\n### Analysis\n{}", result.analysis));
    }

    lines.join("\n")
}

/// Format a batch verification outcome
pub fn format_batch(outcome: &BatchOutcome) -> String {
    let mut lines = vec!["## Batch Verification".to_string(), String::new()];
    lines.push(format!(
        "**Totals**: {} captured, {} passed, {} failed, {} uncertain",
        outcome.total, outcome.passed, outcome.failed, outcome.uncertain
    ));

    if !outcome.issues.is_empty() {
        lines.push("\n### Issues".to_string());
        for issue in &outcome.issues {
            lines.push(format!("- {}", issue));
        }
    }
    for verdict in &outcome.verdicts {
        lines.push(format!(
            "- {:?}: {}",
            verdict.status,
            verdict.capture_path.display()
        ));
    }
    if !outcome.summary.is_empty() {
        lines.push(format!("\n{}", outcome.summary));
    }

    lines.join("\n")
}

/// Format a trigger decision
pub fn format_trigger(decision: &TriggerDecision) -> String {
    let mut lines = vec!["## Verification Trigger Check".to_string(), String::new()];
    lines.push(format!("**Should verify**: {}", decision.should_verify));
    lines.push(format!("**Phase**: {}", decision.phase));
    lines.push(format!("**Progress**: {:.1}%", decision.progress));
    if !decision.reasons.is_empty() {
        lines.push("\n### Triggers".to_string());
        for reason in &decision.reasons {
            lines.push(format!("- {}", reason));
        }
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verify::VerificationResult;

    #[test]
    fn verification_report_lists_all_sections() {
        let result = VerificationResult {
            success: false,
            completed_items: vec!["a".to_string()],
            failed_items: vec!["b".to_string()],
            uncertain_items: vec!["c".to_string()],
            judge_response: "partial".to_string(),
            evidence_path: Some("/tmp/e.png".into()),
        };
        let report = format_verification(&result);
        assert!(report.contains("FAILED"));
        assert!(report.contains("- [x] a"));
        assert!(report.contains("- [ ] b"));
        assert!(report.contains("- [?] c"));
        assert!(report.contains("/tmp/e.png"));
    }

    #[test]
    fn empty_baseline_list_message() {
        assert_eq!(format_baseline_list(&[]), "No baselines saved.");
    }
}
