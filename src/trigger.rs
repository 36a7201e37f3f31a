//! Todo/phase trigger: decides, from an externally supplied task list,
//! whether verification should run now.
//!
//! This is a pure function layer: no I/O and no judge calls. All four
//! trigger rules are evaluated and every matching reason is collected,
//! not just the first.

use serde::{Deserialize, Serialize};

/// Status values of an externally tracked todo item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TodoStatus {
    Pending,
    InProgress,
    Completed,
}

/// Work phases derived from todo text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Implementation,
    Testing,
    Verification,
    Build,
    Deploy,
    Review,
    Unknown,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Phase::Implementation => "implementation",
            Phase::Testing => "testing",
            Phase::Verification => "verification",
            Phase::Build => "build",
            Phase::Deploy => "deploy",
            Phase::Review => "review",
            Phase::Unknown => "unknown",
        };
        write!(f, "{}", name)
    }
}

/// Keywords that indicate a todo needs visual verification on completion
const VERIFICATION_KEYWORDS: &[&str] = &[
    "verify", "test", "check", "validate", "confirm", "ensure", "build", "run", "deploy",
    "launch", "render", "display", "ui", "visual", "screenshot", "appearance", "layout",
];

/// Keyword table mapping todo text to a phase; first matching phase wins
const PHASE_KEYWORDS: &[(Phase, &[&str])] = &[
    (Phase::Implementation, &["implement", "create", "add", "write", "code", "develop"]),
    (Phase::Testing, &["test", "spec", "unit", "integration", "e2e"]),
    (Phase::Verification, &["verify", "check", "validate", "confirm"]),
    (Phase::Build, &["build", "compile", "bundle", "package"]),
    (Phase::Deploy, &["deploy", "release", "publish", "ship"]),
    (Phase::Review, &["review", "pr", "merge", "commit"]),
];

/// Phases whose completion triggers verification on their own
const HIGH_PRIORITY_PHASES: &[Phase] = &[Phase::Build, Phase::Testing, Phase::Deploy];

/// One externally tracked todo item
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TodoItem {
    pub content: String,
    pub status: TodoStatus,
    #[serde(skip, default = "unknown_phase")]
    pub phase: Phase,
    #[serde(skip, default)]
    pub requires_verification: bool,
}

fn unknown_phase() -> Phase {
    Phase::Unknown
}

impl TodoItem {
    pub fn new(content: impl Into<String>, status: TodoStatus) -> Self {
        let content = content.into();
        let phase = detect_phase(&content);
        let requires_verification = requires_verification(&content);
        Self {
            content,
            status,
            phase,
            requires_verification,
        }
    }
}

/// Derive the phase tag for a todo's text; first matching phase wins,
/// unmatched text maps to the unknown phase.
pub fn detect_phase(content: &str) -> Phase {
    let lower = content.to_lowercase();
    for (phase, keywords) in PHASE_KEYWORDS {
        if keywords.iter().any(|kw| lower.contains(kw)) {
            return *phase;
        }
    }
    Phase::Unknown
}

/// Whether completing this todo should trigger verification
pub fn requires_verification(content: &str) -> bool {
    let lower = content.to_lowercase();
    VERIFICATION_KEYWORDS.iter().any(|kw| lower.contains(kw))
}

/// Decision returned by [`should_verify`]
#[derive(Debug, Clone)]
pub struct TriggerDecision {
    pub should_verify: bool,
    /// Every matched trigger reason, in rule order
    pub reasons: Vec<String>,
    /// Phase of the in-progress (or most recently completed) item
    pub phase: Phase,
    /// Completion percentage of the whole list
    pub progress: f64,
}

/// Evaluate whether the orchestrator should run now.
///
/// All rules are checked and all matching reasons collected:
/// (a) every item in the current phase is complete,
/// (b) a verification-requiring item is complete,
/// (c) every item in a high-priority phase (build/test/deploy) is
///     complete,
/// (d) all items overall are complete.
pub fn should_verify(todos: &[TodoItem]) -> TriggerDecision {
    if todos.is_empty() {
        return TriggerDecision {
            should_verify: false,
            reasons: vec!["No todos found".to_string()],
            phase: Phase::Unknown,
            progress: 0.0,
        };
    }

    let completed: Vec<&TodoItem> = todos
        .iter()
        .filter(|t| t.status == TodoStatus::Completed)
        .collect();
    let in_progress: Vec<&TodoItem> = todos
        .iter()
        .filter(|t| t.status == TodoStatus::InProgress)
        .collect();

    let current_phase = in_progress
        .first()
        .map(|t| t.phase)
        .or_else(|| completed.last().map(|t| t.phase))
        .unwrap_or(Phase::Unknown);

    let mut reasons = Vec::new();

    // (a) phase boundary: every item sharing the current phase is complete
    let phase_items: Vec<&TodoItem> = todos.iter().filter(|t| t.phase == current_phase).collect();
    if !phase_items.is_empty()
        && phase_items.iter().all(|t| t.status == TodoStatus::Completed)
    {
        reasons.push(format!("Phase '{}' completed", current_phase));
    }

    // (b) a verification-requiring todo just completed
    for todo in &completed {
        if todo.requires_verification {
            reasons.push(format!(
                "Verification todo completed: {}",
                truncate(&todo.content, 50)
            ));
        }
    }

    // (c) high-priority phase fully complete
    for phase in HIGH_PRIORITY_PHASES {
        let items: Vec<&TodoItem> = todos.iter().filter(|t| t.phase == *phase).collect();
        if !items.is_empty() && items.iter().all(|t| t.status == TodoStatus::Completed) {
            reasons.push(format!("High-priority phase '{}' completed", phase));
        }
    }

    // (d) everything done: final verification
    if completed.len() == todos.len() {
        reasons.push("All todos completed - final verification".to_string());
    }

    TriggerDecision {
        should_verify: !reasons.is_empty(),
        reasons,
        phase: current_phase,
        progress: completed.len() as f64 / todos.len() as f64 * 100.0,
    }
}

/// Parse todos from free text: markdown checkbox lists and, when
/// present, a JSON `{"todos": [...]}` document.
pub fn parse_todos_from_text(text: &str) -> Vec<TodoItem> {
    let mut todos: Vec<TodoItem> = Vec::new();

    // JSON form produced by task-tracking tools
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(text) {
        let list = value
            .get("todos")
            .and_then(|v| v.as_array())
            .cloned()
            .or_else(|| value.as_array().cloned());
        if let Some(list) = list {
            for entry in list {
                let Some(content) = entry.get("content").and_then(|v| v.as_str()) else {
                    continue;
                };
                let status = match entry.get("status").and_then(|v| v.as_str()) {
                    Some("completed") => TodoStatus::Completed,
                    Some("in_progress") => TodoStatus::InProgress,
                    _ => TodoStatus::Pending,
                };
                todos.push(TodoItem::new(content, status));
            }
            return todos;
        }
    }

    // Markdown checkbox form
    for line in text.lines() {
        if let Some((item_text, completed)) = crate::checklist::parse_checklist_line(line) {
            let status = if completed {
                TodoStatus::Completed
            } else {
                TodoStatus::Pending
            };
            if !todos.iter().any(|t| t.content == item_text) {
                todos.push(TodoItem::new(item_text, status));
            }
        }
    }

    todos
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        text.chars().take(max).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn done(content: &str) -> TodoItem {
        TodoItem::new(content, TodoStatus::Completed)
    }

    fn pending(content: &str) -> TodoItem {
        TodoItem::new(content, TodoStatus::Pending)
    }

    #[test]
    fn phase_detection_first_match_wins() {
        assert_eq!(detect_phase("Implement login form"), Phase::Implementation);
        assert_eq!(detect_phase("Run integration tests"), Phase::Testing);
        assert_eq!(detect_phase("compile the bundle"), Phase::Build);
        assert_eq!(detect_phase("ponder the architecture"), Phase::Unknown);
    }

    #[test]
    fn empty_list_does_not_trigger() {
        let decision = should_verify(&[]);
        assert!(!decision.should_verify);
        assert_eq!(decision.phase, Phase::Unknown);
    }

    #[test]
    fn completed_build_phase_triggers_with_phase_reason() {
        let todos = vec![done("Build the release bundle"), done("Compile assets")];
        let decision = should_verify(&todos);
        assert!(decision.should_verify);
        assert!(
            decision.reasons.iter().any(|r| r.contains("'build'")),
            "reasons: {:?}",
            decision.reasons
        );
    }

    #[test]
    fn all_matching_reasons_are_collected() {
        let todos = vec![done("Build the app"), done("Verify UI renders correctly")];
        let decision = should_verify(&todos);
        // Phase boundary, verification todos, high-priority phase, and
        // the all-complete rule all fire here
        assert!(decision.reasons.len() >= 3, "reasons: {:?}", decision.reasons);
        assert!((decision.progress - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn incomplete_phase_does_not_trigger_boundary() {
        let todos = vec![
            done("Implement login form"),
            TodoItem::new("Implement signup form", TodoStatus::InProgress),
        ];
        let decision = should_verify(&todos);
        assert!(!decision
            .reasons
            .iter()
            .any(|r| r.starts_with("Phase 'implementation'")));
        assert_eq!(decision.phase, Phase::Implementation);
    }

    #[test]
    fn pending_unrelated_items_keep_progress_partial() {
        let todos = vec![done("write docs chapter"), pending("draft roadmap")];
        let decision = should_verify(&todos);
        assert!((decision.progress - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn parses_markdown_todos() {
        let todos = parse_todos_from_text("- [x] Build the app\n- [ ] Verify the layout\n");
        assert_eq!(todos.len(), 2);
        assert_eq!(todos[0].status, TodoStatus::Completed);
        assert_eq!(todos[1].status, TodoStatus::Pending);
        assert!(todos[1].requires_verification);
    }

    #[test]
    fn parses_json_todos() {
        let text = r#"{"todos": [
            {"content": "Build the app", "status": "completed"},
            {"content": "Ship it", "status": "in_progress"}
        ]}"#;
        let todos = parse_todos_from_text(text);
        assert_eq!(todos.len(), 2);
        assert_eq!(todos[0].phase, Phase::Build);
        assert_eq!(todos[1].status, TodoStatus::InProgress);
    }

    #[test]
    fn decision_is_deterministic() {
        let todos = vec![done("Build it"), pending("Polish it")];
        let first = should_verify(&todos);
        let second = should_verify(&todos);
        assert_eq!(first.should_verify, second.should_verify);
        assert_eq!(first.reasons, second.reasons);
    }
}
