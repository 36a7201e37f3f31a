//! uiproof - automated visual verification with LLM judging.
//!
//! This crate provides:
//! - A polymorphic capture layer over web pages (DevTools or headless
//!   subprocess), native windows, terminal programs (PTY + VT100
//!   rendering), and shell commands
//! - A target router choosing the right backend from an opaque target
//!   string
//! - A verification orchestrator that judges captures against a
//!   checklist through an external LLM CLI
//! - A bounded auto-fix loop proposing and applying source edits until
//!   verification passes or the attempt budget runs out
//! - A baseline store for regression comparison
//!
//! # Example
//!
//! ```rust,no_run
//! use uiproof::capture::{CaptureAdapter, CaptureOptions, select_adapter};
//!
//! let mut adapter = select_adapter("http://localhost:3000", CaptureOptions::default());
//! let result = adapter.capture("http://localhost:3000", None);
//! println!("captured: {:?}", result.content_path);
//! ```

pub mod baseline;
pub mod capture;
pub mod checklist;
pub mod config;
pub mod fix;
pub mod judge;
pub mod report;
pub mod session;
pub mod trigger;
pub mod verify;

// Re-export the capture contract and backends
pub use capture::{
    CaptureAdapter, CaptureError, CaptureKind, CaptureOptions, CaptureResult, CaptureStore,
    EventStep, TargetKind, TerminalMode, TerminalSize, classify, select_adapter,
};

// Re-export the verification layer
pub use verify::{BatchOutcome, BatchVerifier, Orchestrator, VerificationResult};

// Re-export the judge contract
pub use judge::{JudgeClient, JudgeConfig, JudgeReply};

// Re-export the repair loop
pub use fix::{AutoFixer, FixAttempt, FixOutcome, apply_fix};

// Re-export baseline management
pub use baseline::{BaselineEntry, BaselineStore, ComparisonOutcome};

// Re-export the trigger layer
pub use trigger::{TodoItem, TodoStatus, TriggerDecision, should_verify};

// Re-export session management
pub use session::{Session, cleanup_old_sessions, list_sessions};
