//! Task-file parsing: the application descriptor, acceptance criteria,
//! and the bracket-checkbox checklist.
//!
//! A task file declares the application under test with one marker line:
//! `[webapp]: <url>`, `[gui]: <command>` (plus optional
//! `[window_title]: <title>`), or `[tui]: <command>`. An
//! `## Acceptance Criteria` section supplies free-text criteria, and
//! `- [ ]` / `- [x]` lines form the checklist.

use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::config;

/// Kind of application a task verifies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppKind {
    Web,
    Gui,
    Terminal,
}

impl std::fmt::Display for AppKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AppKind::Web => "webapp",
            AppKind::Gui => "gui",
            AppKind::Terminal => "tui",
        };
        write!(f, "{}", name)
    }
}

/// Launch parameters recovered from a task descriptor
#[derive(Debug, Clone, PartialEq)]
pub struct AppProfile {
    pub kind: AppKind,
    pub url: Option<String>,
    pub command: Option<String>,
    pub window_title: Option<String>,
    pub width: u32,
    pub height: u32,
    pub wait_seconds: f64,
}

impl AppProfile {
    fn new(kind: AppKind) -> Self {
        let defaults = &config::get().defaults;
        Self {
            kind,
            url: None,
            command: None,
            window_title: None,
            width: defaults.viewport_width,
            height: defaults.viewport_height,
            wait_seconds: 2.0,
        }
    }

    /// The capture target string for this application
    pub fn target(&self) -> Option<String> {
        match self.kind {
            AppKind::Web => self.url.clone(),
            AppKind::Gui => match (&self.command, &self.window_title) {
                (Some(cmd), Some(title)) => Some(format!("gui:{}|{}", cmd, title)),
                (None, Some(title)) => Some(format!("window:{}", title)),
                (Some(cmd), None) => Some(cmd.clone()),
                (None, None) => None,
            },
            AppKind::Terminal => self.command.clone(),
        }
    }
}

fn marker_regexes() -> &'static (Regex, Regex, Regex, Regex) {
    static REGEXES: OnceLock<(Regex, Regex, Regex, Regex)> = OnceLock::new();
    REGEXES.get_or_init(|| {
        (
            Regex::new(r"(?im)^\s*\[webapp\]:\s*(https?://\S+)").unwrap(),
            Regex::new(r"(?im)^\s*\[gui\]:\s*(.+)$").unwrap(),
            Regex::new(r"(?im)^\s*\[window_title\]:\s*(.+)$").unwrap(),
            Regex::new(r"(?im)^\s*\[tui\]:\s*(.+)$").unwrap(),
        )
    })
}

/// Detect the application under test from task text.
///
/// Explicit markers win; without one, loose content heuristics are
/// applied. Returns `None` when no kind is recoverable.
pub fn detect_app_profile(text: &str) -> Option<AppProfile> {
    let (webapp_re, gui_re, title_re, tui_re) = marker_regexes();

    if let Some(caps) = webapp_re.captures(text) {
        let mut profile = AppProfile::new(AppKind::Web);
        profile.url = Some(caps[1].trim().to_string());
        return Some(profile);
    }

    if let Some(caps) = gui_re.captures(text) {
        let mut profile = AppProfile::new(AppKind::Gui);
        profile.command = Some(caps[1].trim().to_string());
        if let Some(title) = title_re.captures(text) {
            profile.window_title = Some(title[1].trim().to_string());
        }
        return Some(profile);
    }

    if let Some(caps) = tui_re.captures(text) {
        let mut profile = AppProfile::new(AppKind::Terminal);
        profile.command = Some(caps[1].trim().to_string());
        return Some(profile);
    }

    // No marker: fall back to content heuristics
    let lower = text.to_lowercase();
    if ["localhost", "http://", "https://", "browser", "webpage"]
        .iter()
        .any(|kw| lower.contains(kw))
    {
        let mut profile = AppProfile::new(AppKind::Web);
        static URL_RE: OnceLock<Regex> = OnceLock::new();
        let url_re = URL_RE.get_or_init(|| Regex::new(r"(https?://[^\s)]+)").unwrap());
        profile.url = url_re.captures(text).map(|c| c[1].to_string());
        return Some(profile);
    }
    if ["terminal", "console", "command line", "tui"]
        .iter()
        .any(|kw| lower.contains(kw))
    {
        return Some(AppProfile::new(AppKind::Terminal));
    }
    if [".exe", "window", "gui", "desktop"]
        .iter()
        .any(|kw| lower.contains(kw))
    {
        return Some(AppProfile::new(AppKind::Gui));
    }

    None
}

/// One checklist line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecklistItem {
    pub text: String,
    pub completed: bool,
    /// 1-based line number in the source file
    pub line_number: usize,
}

/// A parsed task file
#[derive(Debug, Clone)]
pub struct TaskFile {
    pub path: Option<PathBuf>,
    pub title: Option<String>,
    pub app: Option<AppProfile>,
    pub acceptance_criteria: Option<String>,
    pub items: Vec<ChecklistItem>,
}

impl TaskFile {
    pub fn total_items(&self) -> usize {
        self.items.len()
    }

    pub fn completed_items(&self) -> usize {
        self.items.iter().filter(|i| i.completed).count()
    }

    pub fn remaining_items(&self) -> usize {
        self.total_items() - self.completed_items()
    }

    pub fn progress_percent(&self) -> f64 {
        if self.items.is_empty() {
            return 0.0;
        }
        self.completed_items() as f64 / self.total_items() as f64 * 100.0
    }

    /// Texts of the items still unchecked
    pub fn pending_texts(&self) -> Vec<String> {
        self.items
            .iter()
            .filter(|i| !i.completed)
            .map(|i| i.text.clone())
            .collect()
    }
}

/// Parse one checklist line; returns (text, completed) or None
pub fn parse_checklist_line(line: &str) -> Option<(String, bool)> {
    let trimmed = line.trim_start();
    let rest = trimmed
        .strip_prefix("- [")
        .or_else(|| trimmed.strip_prefix("* ["))?;
    let mut chars = rest.chars();
    let mark = chars.next()?;
    if chars.next()? != ']' {
        return None;
    }
    let completed = matches!(mark, 'x' | 'X');
    if !completed && mark != ' ' {
        return None;
    }
    let text = chars.as_str().trim().to_string();
    if text.is_empty() {
        return None;
    }
    Some((text, completed))
}

/// Parse task text into its structured form
pub fn parse_task_str(content: &str) -> TaskFile {
    let mut title = None;
    let mut items = Vec::new();
    let mut criteria_lines: Vec<&str> = Vec::new();
    let mut in_criteria = false;

    for (idx, line) in content.lines().enumerate() {
        let trimmed = line.trim();

        if let Some(heading) = trimmed.strip_prefix("## ") {
            in_criteria = heading.eq_ignore_ascii_case("acceptance criteria");
            continue;
        }
        if trimmed.starts_with('#') {
            if title.is_none() {
                title = Some(trimmed.trim_start_matches('#').trim().to_string());
            }
            in_criteria = false;
            continue;
        }

        if let Some((text, completed)) = parse_checklist_line(line) {
            items.push(ChecklistItem {
                text,
                completed,
                line_number: idx + 1,
            });
            continue;
        }

        if in_criteria && !trimmed.is_empty() {
            criteria_lines.push(trimmed);
        }
    }

    TaskFile {
        path: None,
        title,
        app: detect_app_profile(content),
        acceptance_criteria: if criteria_lines.is_empty() {
            None
        } else {
            Some(criteria_lines.join("\n"))
        },
        items,
    }
}

/// Parse a task file from disk
pub fn parse_task_file(path: impl AsRef<Path>) -> std::io::Result<TaskFile> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)?;
    let mut task = parse_task_str(&content);
    task.path = Some(path.to_path_buf());
    Ok(task)
}

/// Mark the checklist item at `line_number` (1-based) complete, in place.
/// Returns whether the line was an unchecked item and got flipped.
pub fn mark_item_complete(path: impl AsRef<Path>, line_number: usize) -> std::io::Result<bool> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)?;
    let mut lines: Vec<String> = content.lines().map(|l| l.to_string()).collect();

    let Some(line) = lines.get_mut(line_number.saturating_sub(1)) else {
        return Ok(false);
    };
    let Some(pos) = line.find("- [ ]") else {
        return Ok(false);
    };
    line.replace_range(pos..pos + 5, "- [x]");

    let trailing_newline = content.ends_with('\n');
    let mut rebuilt = lines.join("\n");
    if trailing_newline {
        rebuilt.push('\n');
    }
    std::fs::write(path, rebuilt)?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const TASK: &str = "# Login page polish

[webapp]: http://localhost:3000

## Checklist
- [ ] Login button is visible
- [x] Page title reads Welcome
- [ ] Error banner is hidden

## Acceptance Criteria
All interactive elements are reachable by keyboard.
Colors meet contrast guidelines.
";

    #[test]
    fn parses_items_and_criteria() {
        let task = parse_task_str(TASK);
        assert_eq!(task.title.as_deref(), Some("Login page polish"));
        assert_eq!(task.total_items(), 3);
        assert_eq!(task.completed_items(), 1);
        assert_eq!(task.remaining_items(), 2);
        assert_eq!(
            task.pending_texts(),
            vec!["Login button is visible", "Error banner is hidden"]
        );
        assert!(task
            .acceptance_criteria
            .as_deref()
            .unwrap()
            .contains("contrast guidelines"));
    }

    #[test]
    fn detects_webapp_marker() {
        let profile = detect_app_profile(TASK).unwrap();
        assert_eq!(profile.kind, AppKind::Web);
        assert_eq!(profile.url.as_deref(), Some("http://localhost:3000"));
        assert_eq!(profile.target().as_deref(), Some("http://localhost:3000"));
    }

    #[test]
    fn detects_gui_marker_with_window_title() {
        let text = "[gui]: myapp --debug\n[window_title]: Main Editor\n";
        let profile = detect_app_profile(text).unwrap();
        assert_eq!(profile.kind, AppKind::Gui);
        assert_eq!(profile.command.as_deref(), Some("myapp --debug"));
        assert_eq!(profile.window_title.as_deref(), Some("Main Editor"));
        assert_eq!(
            profile.target().as_deref(),
            Some("gui:myapp --debug|Main Editor")
        );
    }

    #[test]
    fn detects_tui_marker() {
        let profile = detect_app_profile("[tui]: cargo run --example demo").unwrap();
        assert_eq!(profile.kind, AppKind::Terminal);
        assert_eq!(profile.command.as_deref(), Some("cargo run --example demo"));
    }

    #[test]
    fn falls_back_to_content_heuristics() {
        let profile = detect_app_profile("Check the page at http://localhost:8080/admin").unwrap();
        assert_eq!(profile.kind, AppKind::Web);
        assert_eq!(profile.url.as_deref(), Some("http://localhost:8080/admin"));

        assert!(detect_app_profile("refactor the parser module").is_none());
    }

    #[test]
    fn checklist_line_forms() {
        assert_eq!(
            parse_checklist_line("- [ ] do a thing"),
            Some(("do a thing".to_string(), false))
        );
        assert_eq!(
            parse_checklist_line("  - [x] done thing"),
            Some(("done thing".to_string(), true))
        );
        assert_eq!(parse_checklist_line("- [?] weird"), None);
        assert_eq!(parse_checklist_line("plain line"), None);
        assert_eq!(parse_checklist_line("- [ ]"), None);
    }

    #[test]
    fn mark_item_complete_flips_checkbox_in_place() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("task.md");
        std::fs::write(&path, TASK).unwrap();

        let task = parse_task_file(&path).unwrap();
        let first_pending = task.items.iter().find(|i| !i.completed).unwrap();
        assert!(mark_item_complete(&path, first_pending.line_number).unwrap());

        let reparsed = parse_task_file(&path).unwrap();
        assert_eq!(reparsed.completed_items(), 2);

        // Flipping an already-complete line is a no-op
        assert!(!mark_item_complete(&path, first_pending.line_number).unwrap());
    }
}
