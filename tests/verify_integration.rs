//! Integration tests for the verification orchestrator and the auto-fix
//! loop, driven end-to-end against a stub judge CLI.
#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use uiproof::config::FixPolicy;
use uiproof::fix::AutoFixer;
use uiproof::judge::{JudgeClient, JudgeConfig};
use uiproof::verify::Orchestrator;

/// Write a stub judge that answers fix-analysis prompts from one canned
/// file and verification prompts from another.
fn write_stub_judge(dir: &Path, verdict: &str, proposal: Option<&str>) -> PathBuf {
    let verdict_path = dir.join("verdict.txt");
    fs::write(&verdict_path, verdict).unwrap();

    let proposal_path = dir.join("proposal.txt");
    fs::write(&proposal_path, proposal.unwrap_or("")).unwrap();

    let script_path = dir.join("stub-judge.sh");
    let script = format!(
        "#!/bin/sh\ncase \"$*\" in\n  *\"debugging a visual issue\"*) cat '{}' ;;\n  *) cat '{}' ;;\nesac\n",
        proposal_path.display(),
        verdict_path.display()
    );
    fs::write(&script_path, script).unwrap();
    let mut perms = fs::metadata(&script_path).unwrap().permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&script_path, perms).unwrap();
    script_path
}

fn orchestrator_with(stub: &Path, project: &str) -> Orchestrator {
    let judge = JudgeClient::new(
        JudgeConfig::new(stub.display().to_string())
            .model("stub")
            .timeout(30),
    );
    Orchestrator::new(judge).project(project)
}

const COMPLETED_VERDICT: &str = r#"Assessment follows.
```json
{
  "results": [
    {"task": "Greeting is printed", "status": "COMPLETED", "evidence": "transcript shows greeting"}
  ],
  "summary": "everything present",
  "all_completed": true
}
```"#;

const FAILING_VERDICT: &str = r#"```json
{
  "results": [
    {"task": "Greeting is printed", "status": "NOT_COMPLETED", "evidence": "greeting missing"}
  ],
  "summary": "greeting missing",
  "all_completed": false
}
```"#;

const TASK: &str = "# Greeting check\n\n[tui]: echo hello-world\n\n- [ ] Greeting is printed\n";

#[test]
fn verify_passes_when_judge_confirms_every_item() {
    let dir = TempDir::new().unwrap();
    let stub = write_stub_judge(dir.path(), COMPLETED_VERDICT, None);
    let orchestrator = orchestrator_with(&stub, "itest-pass");

    let items = vec!["Greeting is printed".to_string()];
    let result = orchestrator.verify(TASK, &items, None);

    assert!(result.success, "judge response: {}", result.judge_response);
    assert_eq!(result.completed_items, items);
    assert!(result.failed_items.is_empty());
    assert!(result.evidence_path.is_some());
    let evidence = result.evidence_path.unwrap();
    assert!(evidence.exists());
    assert!(fs::read_to_string(&evidence).unwrap().contains("hello-world"));
}

#[test]
fn verify_fails_closed_on_unparseable_judge_reply() {
    let dir = TempDir::new().unwrap();
    let stub = write_stub_judge(dir.path(), "Looks pretty good to me overall!", None);
    let orchestrator = orchestrator_with(&stub, "itest-unparseable");

    let items = vec![
        "Greeting is printed".to_string(),
        "Exit code is zero".to_string(),
    ];
    let result = orchestrator.verify(TASK, &items, None);

    assert!(!result.success);
    assert!(result.completed_items.is_empty());
    // Identity, not a subset or superset
    assert_eq!(result.failed_items, items);
    assert!(result.judge_response.contains("Looks pretty good"));
}

#[test]
fn verify_without_recoverable_app_kind_fails_fast() {
    let dir = TempDir::new().unwrap();
    let stub = write_stub_judge(dir.path(), COMPLETED_VERDICT, None);
    let orchestrator = orchestrator_with(&stub, "itest-no-app");

    let items = vec!["anything".to_string()];
    let result = orchestrator.verify("tidy up the code structure", &items, None);

    assert!(!result.success);
    assert_eq!(result.failed_items, items);
    assert!(result.judge_response.contains("Could not detect application type"));
}

fn fix_policy() -> FixPolicy {
    FixPolicy {
        max_attempts: 3,
        min_confidence: 0.5,
        reload_delay_ms: 0,
    }
}

fn proposal(confidence: f64) -> String {
    format!(
        r#"```json
{{
  "issue_identified": "greeting color wrong",
  "root_cause": "hardcoded value",
  "file_to_fix": "style.css",
  "line_number": 1,
  "original_code": "color: red;",
  "fixed_code": "color: blue;",
  "confidence": {},
  "explanation": "swap the color"
}}
```"#,
        confidence
    )
}

#[test]
fn auto_fix_stops_at_attempt_bound_when_never_fixed() {
    let dir = TempDir::new().unwrap();
    let project = TempDir::new().unwrap();
    fs::write(project.path().join("style.css"), "color: red;\n").unwrap();

    let stub = write_stub_judge(dir.path(), FAILING_VERDICT, Some(&proposal(0.9)));
    let judge = JudgeClient::new(
        JudgeConfig::new(stub.display().to_string())
            .model("stub")
            .timeout(30),
    );
    let orchestrator = Orchestrator::new(judge.clone()).project("fixloop");
    let fixer = AutoFixer::new(project.path(), judge).policy(fix_policy());

    let items = vec!["Greeting is printed".to_string()];
    let outcome = fixer.run(&orchestrator, TASK, &items, None, &["style.css".to_string()]);

    assert!(!outcome.all_fixed);
    assert_eq!(outcome.attempts.len(), 3);
    // First attempt applied the span; later ones could not find it again
    assert!(outcome.attempts[0].applied);
    assert!(!outcome.attempts[0].succeeded);
    assert!(outcome.stop_reason.contains("attempt bound"));
    assert_eq!(
        fs::read_to_string(project.path().join("style.css")).unwrap(),
        "color: blue;\n"
    );
}

#[test]
fn auto_fix_confidence_gate_blocks_low_confidence_proposals() {
    let dir = TempDir::new().unwrap();
    let project = TempDir::new().unwrap();
    let css = project.path().join("style.css");
    fs::write(&css, "color: red;\n").unwrap();

    let stub = write_stub_judge(dir.path(), FAILING_VERDICT, Some(&proposal(0.4)));
    let judge = JudgeClient::new(
        JudgeConfig::new(stub.display().to_string())
            .model("stub")
            .timeout(30),
    );
    let orchestrator = Orchestrator::new(judge.clone()).project("gate");
    let fixer = AutoFixer::new(project.path(), judge).policy(fix_policy());

    let items = vec!["Greeting is printed".to_string()];
    let outcome = fixer.run(&orchestrator, TASK, &items, None, &["style.css".to_string()]);

    assert!(!outcome.all_fixed);
    // The low-confidence proposal is never applied and no file mutates
    assert!(outcome.attempts.is_empty());
    assert!(outcome.stop_reason.contains("below threshold"));
    assert_eq!(fs::read_to_string(&css).unwrap(), "color: red;\n");
}

#[test]
fn auto_fix_short_circuits_when_verification_passes() {
    let dir = TempDir::new().unwrap();
    let project = TempDir::new().unwrap();

    let stub = write_stub_judge(dir.path(), COMPLETED_VERDICT, None);
    let judge = JudgeClient::new(
        JudgeConfig::new(stub.display().to_string())
            .model("stub")
            .timeout(30),
    );
    let orchestrator = Orchestrator::new(judge.clone()).project("clean");
    let fixer = AutoFixer::new(project.path(), judge).policy(fix_policy());

    let items = vec!["Greeting is printed".to_string()];
    let outcome = fixer.run(&orchestrator, TASK, &items, None, &[]);

    assert!(outcome.all_fixed);
    assert!(outcome.attempts.is_empty());
    assert_eq!(outcome.evidence.len(), 1);
}
