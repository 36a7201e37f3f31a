//! Target classification and adapter selection.
//!
//! `classify` is a total, pure function over opaque target strings; it
//! never touches the filesystem or network, so a missing dependency can
//! never change what kind a target is, only which variant
//! `select_adapter` instantiates for it.

use super::adapter::CaptureAdapter;
use super::browser::BrowserSessionAdapter;
use super::headless::HeadlessShotAdapter;
use super::process::ProcessOutputAdapter;
use super::term::{TerminalAdapter, TerminalMode};
use super::types::CaptureOptions;
use super::window::NativeWindowAdapter;

/// Markers in a command line that identify a terminal-UI program
const TUI_LIBRARY_MARKERS: &[&str] = &["ratatui", "crossterm", "termion", "ncurses", "cursive"];

/// Classification of an opaque target string
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetKind {
    /// URL served over HTTP(S)
    Web,
    /// Desktop window, addressed by title or launched executable
    NativeWindow,
    /// Terminal-UI program needing a rendered capture
    TerminalProgram,
    /// Anything else: run it and capture the output
    ShellCommand,
}

impl std::fmt::Display for TargetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TargetKind::Web => "web",
            TargetKind::NativeWindow => "native-window",
            TargetKind::TerminalProgram => "terminal-program",
            TargetKind::ShellCommand => "shell-command",
        };
        write!(f, "{}", name)
    }
}

/// Classify a target string into exactly one [`TargetKind`].
///
/// Total and deterministic: every input maps to one kind, shell command
/// being the catch-all.
pub fn classify(target: &str) -> TargetKind {
    let trimmed = target.trim();
    let lower = trimmed.to_lowercase();

    if lower.starts_with("http://") || lower.starts_with("https://") {
        return TargetKind::Web;
    }
    if lower.starts_with("localhost:") || lower.starts_with("127.0.0.1:") {
        return TargetKind::Web;
    }

    if lower.starts_with("window:") || lower.starts_with("gui:") || lower.ends_with(".exe") {
        return TargetKind::NativeWindow;
    }

    if lower.starts_with("tui:") {
        return TargetKind::TerminalProgram;
    }
    if TUI_LIBRARY_MARKERS.iter().any(|m| lower.contains(m)) {
        return TargetKind::TerminalProgram;
    }

    TargetKind::ShellCommand
}

/// Instantiate the adapter variant for `target`.
///
/// Web targets prefer the browser-session variant when its automation
/// engine is installed; otherwise they fall back to the one-shot
/// headless-browser variant. The availability check happens here, at
/// selection time, never during classification.
pub fn select_adapter(target: &str, options: CaptureOptions) -> Box<dyn CaptureAdapter> {
    match classify(target) {
        TargetKind::Web => {
            if BrowserSessionAdapter::engine_available() {
                Box::new(BrowserSessionAdapter::new(options))
            } else {
                Box::new(HeadlessShotAdapter::new(options))
            }
        }
        TargetKind::NativeWindow => Box::new(NativeWindowAdapter::new(options)),
        TargetKind::TerminalProgram => {
            Box::new(TerminalAdapter::new(options, TerminalMode::Rendered))
        }
        TargetKind::ShellCommand => Box::new(ProcessOutputAdapter::new(options)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_web_targets() {
        assert_eq!(classify("http://localhost:3000"), TargetKind::Web);
        assert_eq!(classify("https://example.com/page"), TargetKind::Web);
        assert_eq!(classify("localhost:8080/health"), TargetKind::Web);
        assert_eq!(classify("127.0.0.1:3000"), TargetKind::Web);
    }

    #[test]
    fn classify_native_window_targets() {
        assert_eq!(classify("window:My App"), TargetKind::NativeWindow);
        assert_eq!(classify("notepad.exe"), TargetKind::NativeWindow);
        assert_eq!(classify("gui:myapp --flag|Main Window"), TargetKind::NativeWindow);
    }

    #[test]
    fn classify_terminal_targets() {
        assert_eq!(classify("tui:cargo run"), TargetKind::TerminalProgram);
        assert_eq!(classify("cargo run -p my-ratatui-app"), TargetKind::TerminalProgram);
    }

    #[test]
    fn classify_defaults_to_shell_command() {
        assert_eq!(classify("npm test"), TargetKind::ShellCommand);
        assert_eq!(classify("echo hello"), TargetKind::ShellCommand);
        assert_eq!(classify(""), TargetKind::ShellCommand);
        assert_eq!(classify("   "), TargetKind::ShellCommand);
    }

    #[test]
    fn classify_is_deterministic() {
        let inputs = [
            "http://a",
            "window:x",
            "tui:top",
            "ls -la",
            "строка",
            "\u{0}weird\u{7f}",
        ];
        for input in inputs {
            assert_eq!(classify(input), classify(input));
        }
    }

    #[test]
    fn select_adapter_matches_classification() {
        let opts = CaptureOptions::default();
        assert_eq!(select_adapter("echo hi", opts.clone()).source(), "process");
        assert_eq!(select_adapter("window:x", opts.clone()).source(), "window");
        assert_eq!(select_adapter("tui:top", opts).source(), "terminal");
    }
}
