//! Verification layer: the single-run orchestrator and the batch
//! verifier.

pub mod batch;
pub mod orchestrator;

pub use batch::{BatchOutcome, BatchStatus, BatchVerifier, CaptureVerdict};
pub use orchestrator::{Orchestrator, VerificationResult};
