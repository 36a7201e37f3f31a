// Core value types for the capture subsystem

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Kind of content produced by a capture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureKind {
    /// Image file (PNG)
    Screenshot,
    /// Plain text output
    Text,
    /// Terminal output with ANSI escape codes preserved
    Ansi,
    /// HTML/DOM snapshot
    Dom,
}

impl CaptureKind {
    /// File extension used when the content is written to disk
    pub fn extension(&self) -> &'static str {
        match self {
            CaptureKind::Screenshot => "png",
            CaptureKind::Text => "txt",
            CaptureKind::Ansi => "ansi",
            CaptureKind::Dom => "html",
        }
    }

    /// Whether the content is textual and can be inlined into a judge request
    pub fn is_textual(&self) -> bool {
        matches!(self, CaptureKind::Text | CaptureKind::Ansi | CaptureKind::Dom)
    }
}

impl std::fmt::Display for CaptureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CaptureKind::Screenshot => "screenshot",
            CaptureKind::Text => "text",
            CaptureKind::Ansi => "ansi",
            CaptureKind::Dom => "dom",
        };
        write!(f, "{}", name)
    }
}

/// Options for a single capture call.
///
/// Immutable per call; adapters fall back to these defaults when a call
/// supplies no override.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureOptions {
    /// Directory where capture files are written
    pub output_dir: PathBuf,

    /// Explicit output file stem (timestamped name generated if absent)
    pub output_name: Option<String>,

    /// Viewport width in pixels
    pub width: u32,

    /// Viewport height in pixels
    pub height: u32,

    /// Seconds to wait before capturing
    pub wait_before: f64,

    /// Seconds to wait after capturing
    pub wait_after: f64,

    /// Overall timeout in seconds for the capture call
    pub timeout: f64,

    /// Capture the full page rather than the viewport (web only)
    pub full_page: bool,

    /// CSS selector scoping event targets (web only)
    pub selector: Option<String>,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("./captures"),
            output_name: None,
            width: 1280,
            height: 720,
            wait_before: 0.5,
            wait_after: 0.0,
            timeout: 30.0,
            full_page: false,
            selector: None,
        }
    }
}

impl CaptureOptions {
    /// Check the option invariants: positive timeout and non-zero dimensions
    pub fn validate(&self) -> Result<(), CaptureError> {
        if self.timeout <= 0.0 {
            return Err(CaptureError::Internal(format!(
                "timeout must be positive, got {}",
                self.timeout
            )));
        }
        if self.width == 0 || self.height == 0 {
            return Err(CaptureError::Internal(format!(
                "dimensions must be non-zero, got {}x{}",
                self.width, self.height
            )));
        }
        Ok(())
    }

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    pub fn size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn timeout(mut self, seconds: f64) -> Self {
        self.timeout = seconds;
        self
    }

    pub fn wait_before(mut self, seconds: f64) -> Self {
        self.wait_before = seconds;
        self
    }
}

/// Outcome of one capture call.
///
/// Created once per call and immutable afterwards; adapters append a copy
/// to their in-memory history for the duration of a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureResult {
    /// Whether the capture succeeded
    pub success: bool,

    /// Kind of content produced
    pub kind: CaptureKind,

    /// Path to the captured file, if one was written
    pub content_path: Option<PathBuf>,

    /// Inline textual content (text/ANSI captures)
    pub content_text: Option<String>,

    /// Creation timestamp
    pub timestamp: DateTime<Utc>,

    /// Event that triggered this capture, if any
    pub event: Option<String>,

    /// Free-form metadata
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,

    /// Failure reason; present iff `success` is false
    pub error: Option<String>,
}

impl CaptureResult {
    /// Successful capture backed by a file on disk
    pub fn file(kind: CaptureKind, path: impl Into<PathBuf>) -> Self {
        Self {
            success: true,
            kind,
            content_path: Some(path.into()),
            content_text: None,
            timestamp: Utc::now(),
            event: None,
            metadata: serde_json::Map::new(),
            error: None,
        }
    }

    /// Successful capture carrying inline text (optionally also persisted)
    pub fn text(kind: CaptureKind, text: impl Into<String>) -> Self {
        Self {
            success: true,
            kind,
            content_path: None,
            content_text: Some(text.into()),
            timestamp: Utc::now(),
            event: None,
            metadata: serde_json::Map::new(),
            error: None,
        }
    }

    /// Failed capture with a reason
    pub fn failed(kind: CaptureKind, error: impl std::fmt::Display) -> Self {
        Self {
            success: false,
            kind,
            content_path: None,
            content_text: None,
            timestamp: Utc::now(),
            event: None,
            metadata: serde_json::Map::new(),
            error: Some(error.to_string()),
        }
    }

    pub fn with_event(mut self, event: impl Into<String>) -> Self {
        self.event = Some(event.into());
        self
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.content_path = Some(path.into());
        self
    }

    pub fn with_meta(mut self, key: &str, value: serde_json::Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }

    /// Location of the evidence: the file path if present, otherwise none
    pub fn evidence_path(&self) -> Option<&PathBuf> {
        self.content_path.as_ref()
    }
}

/// Result type for capture operations
pub type CaptureOutcome<T> = Result<T, CaptureError>;

/// Failure taxonomy shared by every adapter variant.
///
/// These are expected failure modes and are surfaced as
/// `CaptureResult.error` text rather than propagated as faults.
#[derive(Debug)]
pub enum CaptureError {
    /// Required external binary or engine is not installed
    MechanismUnavailable(String),
    /// Window, URL, or command could not be resolved
    TargetNotFound(String),
    /// An external call exceeded its deadline
    Timeout(String),
    /// Any other failure, wrapped as a message
    Internal(String),
    /// I/O error
    Io(std::io::Error),
}

impl std::fmt::Display for CaptureError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CaptureError::MechanismUnavailable(msg) => {
                write!(f, "no capture mechanism available: {}", msg)
            }
            CaptureError::TargetNotFound(msg) => write!(f, "target not found: {}", msg),
            CaptureError::Timeout(msg) => write!(f, "timeout: {}", msg),
            CaptureError::Internal(msg) => write!(f, "capture error: {}", msg),
            CaptureError::Io(err) => write!(f, "I/O error: {}", err),
        }
    }
}

impl std::error::Error for CaptureError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CaptureError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for CaptureError {
    fn from(err: std::io::Error) -> Self {
        CaptureError::Io(err)
    }
}

impl From<image::ImageError> for CaptureError {
    fn from(err: image::ImageError) -> Self {
        CaptureError::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_validate_rejects_zero_timeout() {
        let opts = CaptureOptions::default().timeout(0.0);
        assert!(opts.validate().is_err());
    }

    #[test]
    fn options_validate_rejects_zero_dimensions() {
        let opts = CaptureOptions::default().size(0, 720);
        assert!(opts.validate().is_err());
        let opts = CaptureOptions::default().size(1280, 0);
        assert!(opts.validate().is_err());
    }

    #[test]
    fn options_validate_accepts_defaults() {
        assert!(CaptureOptions::default().validate().is_ok());
    }

    #[test]
    fn failed_result_carries_error() {
        let result = CaptureResult::failed(CaptureKind::Text, "boom");
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("boom"));
        assert!(result.content_path.is_none());
        assert!(result.content_text.is_none());
    }

    #[test]
    fn successful_result_has_no_error() {
        let result = CaptureResult::file(CaptureKind::Screenshot, "/tmp/a.png");
        assert!(result.success);
        assert!(result.error.is_none());
        assert!(result.content_path.is_some());
    }

    #[test]
    fn capture_kind_extensions() {
        assert_eq!(CaptureKind::Screenshot.extension(), "png");
        assert_eq!(CaptureKind::Text.extension(), "txt");
        assert_eq!(CaptureKind::Ansi.extension(), "ansi");
        assert!(CaptureKind::Ansi.is_textual());
        assert!(!CaptureKind::Screenshot.is_textual());
    }
}
