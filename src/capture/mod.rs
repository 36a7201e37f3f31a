//! Capture subsystem: the adapter contract, its backend variants, the
//! target router, and the capture store.

pub mod adapter;
pub mod browser;
pub mod headless;
pub mod process;
pub mod router;
pub mod store;
pub mod term;
pub mod types;
pub mod window;

pub use adapter::{AdapterCore, CaptureAdapter, EventStep};
pub use browser::BrowserSessionAdapter;
pub use headless::HeadlessShotAdapter;
pub use process::ProcessOutputAdapter;
pub use router::{TargetKind, classify, select_adapter};
pub use store::{CaptureRecord, CaptureStore, StoreError};
pub use term::{PtySurface, TerminalAdapter, TerminalMode, TerminalSize};
pub use types::{CaptureError, CaptureKind, CaptureOptions, CaptureOutcome, CaptureResult};
pub use window::NativeWindowAdapter;
