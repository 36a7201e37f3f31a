//! Shared capture-adapter contract.
//!
//! Every capture backend implements [`CaptureAdapter`] so the router and
//! the verification orchestrator can treat web pages, native windows,
//! terminal programs, and shell commands uniformly:
//! - `capture`: one capture of current state, never panicking for
//!   expected failures (missing binary, unreachable target, timeout)
//! - `capture_on_event`: perform an action, then capture; variants that
//!   cannot act degrade to a plain `capture`
//! - `capture_sequence`: ordered event captures with optional
//!   stop-on-failure
//! - `start_session` / `end_session`: optional persistent context
//! - `can_handle`: fast, side-effect-free target predicate

use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use super::types::{CaptureKind, CaptureOptions, CaptureResult};

/// One step of an event-driven capture sequence.
///
/// The `event` string is interpreted per adapter variant (`click`,
/// `navigate`, `input`, `wait`, `hover`, `scroll`, `key`, `screenshot`).
#[derive(Debug, Clone, Default)]
pub struct EventStep {
    /// Event name
    pub event: String,
    /// Selector, key name, or `selector=value` payload for the event
    pub selector: Option<String>,
    /// Abort the remainder of the sequence if this step fails
    pub stop_on_fail: bool,
    /// Seconds to pause after this step before the next one
    pub wait_after: Option<f64>,
}

impl EventStep {
    pub fn new(event: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            ..Default::default()
        }
    }

    pub fn with_selector(mut self, selector: impl Into<String>) -> Self {
        self.selector = Some(selector.into());
        self
    }

    pub fn stop_on_fail(mut self) -> Self {
        self.stop_on_fail = true;
        self
    }

    /// Parse a compact step description: `event`, `event:selector`, or
    /// `event:selector!` (trailing `!` requests stop-on-fail).
    pub fn parse(spec: &str) -> Self {
        let (body, stop) = match spec.strip_suffix('!') {
            Some(rest) => (rest, true),
            None => (spec, false),
        };
        let (event, selector) = match body.split_once(':') {
            Some((event, selector)) => (event.trim(), Some(selector.trim().to_string())),
            None => (body.trim(), None),
        };
        Self {
            event: event.to_string(),
            selector: selector.filter(|s| !s.is_empty()),
            stop_on_fail: stop,
            wait_after: None,
        }
    }
}

/// State shared by every adapter variant: the active options, the
/// session flag, and the capture history for the current session.
#[derive(Debug, Default)]
pub struct AdapterCore {
    pub options: CaptureOptions,
    pub session_active: bool,
    history: Vec<CaptureResult>,
}

impl AdapterCore {
    pub fn new(options: CaptureOptions) -> Self {
        Self {
            options,
            session_active: false,
            history: Vec::new(),
        }
    }

    /// Append a result to the history and hand it back to the caller.
    /// Every performed capture is recorded exactly once, success or not.
    pub fn record(&mut self, result: CaptureResult) -> CaptureResult {
        self.history.push(result.clone());
        result
    }

    pub fn history(&self) -> &[CaptureResult] {
        &self.history
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    /// Resolve the output path for the next capture file, creating the
    /// output directory if needed.
    pub fn output_path(&self, prefix: &str, kind: CaptureKind) -> std::io::Result<PathBuf> {
        std::fs::create_dir_all(&self.options.output_dir)?;
        let stem = match &self.options.output_name {
            Some(name) => name.clone(),
            None => format!(
                "{}_{}",
                prefix,
                chrono::Utc::now().format("%Y%m%d_%H%M%S_%3f")
            ),
        };
        Ok(self
            .options
            .output_dir
            .join(format!("{}.{}", stem, kind.extension())))
    }
}

/// The polymorphic capture contract implemented by every backend variant.
pub trait CaptureAdapter {
    /// Short identifier for this variant (e.g. "browser", "process")
    fn source(&self) -> &'static str;

    /// Kind of content this variant produces by default
    fn capture_kind(&self) -> CaptureKind;

    /// Shared adapter state
    fn core(&self) -> &AdapterCore;

    /// Shared adapter state, mutable
    fn core_mut(&mut self) -> &mut AdapterCore;

    /// Capture the current state of `target`.
    ///
    /// Expected failure modes map to a `CaptureResult` with
    /// `success == false` and a non-empty error; this method does not
    /// panic for unreachable targets or missing binaries. The result is
    /// appended to the adapter's history.
    fn capture(&mut self, target: &str, options: Option<&CaptureOptions>) -> CaptureResult;

    /// Perform `step` against `target`, then capture.
    ///
    /// The default degrades gracefully to a plain capture for variants
    /// that cannot act on their target.
    fn capture_on_event(
        &mut self,
        target: &str,
        step: &EventStep,
        options: Option<&CaptureOptions>,
    ) -> CaptureResult {
        self.capture(target, options)
    }

    /// Execute an ordered list of event captures.
    ///
    /// Order and cardinality are preserved: with no `stop_on_fail`, N
    /// steps produce exactly N results and the history grows by exactly
    /// N. A failing step with `stop_on_fail` short-circuits the rest.
    fn capture_sequence(
        &mut self,
        target: &str,
        steps: &[EventStep],
        options: Option<&CaptureOptions>,
    ) -> Vec<CaptureResult> {
        let mut results = Vec::with_capacity(steps.len());
        for step in steps {
            let result = self.capture_on_event(target, step, options);
            let bail = !result.success && step.stop_on_fail;
            results.push(result);
            if bail {
                break;
            }
            if let Some(secs) = step.wait_after {
                if secs > 0.0 {
                    thread::sleep(Duration::from_secs_f64(secs));
                }
            }
        }
        results
    }

    /// Start a persistent capture context for `target`.
    ///
    /// The default is a flag flip for variants without a meaningful
    /// session. Returns whether the session is usable.
    fn start_session(&mut self, _target: &str) -> bool {
        self.core_mut().session_active = true;
        true
    }

    /// End the session, release every externally visible resource this
    /// adapter created, and return the accumulated history.
    ///
    /// Calling without a prior `start_session`, or twice in a row, is a
    /// no-op that returns the unchanged history.
    fn end_session(&mut self) -> Vec<CaptureResult> {
        self.core_mut().session_active = false;
        self.core().history().to_vec()
    }

    /// Whether this adapter can handle `target`.
    ///
    /// Pure string inspection only; no network or process calls.
    fn can_handle(&self, target: &str) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::types::CaptureKind;

    /// Minimal adapter whose captures alternate success/failure on demand
    struct ScriptedAdapter {
        core: AdapterCore,
        outcomes: Vec<bool>,
        call: usize,
    }

    impl ScriptedAdapter {
        fn new(outcomes: Vec<bool>) -> Self {
            Self {
                core: AdapterCore::new(CaptureOptions::default()),
                outcomes,
                call: 0,
            }
        }
    }

    impl CaptureAdapter for ScriptedAdapter {
        fn source(&self) -> &'static str {
            "scripted"
        }

        fn capture_kind(&self) -> CaptureKind {
            CaptureKind::Text
        }

        fn core(&self) -> &AdapterCore {
            &self.core
        }

        fn core_mut(&mut self) -> &mut AdapterCore {
            &mut self.core
        }

        fn capture(&mut self, _target: &str, _options: Option<&CaptureOptions>) -> CaptureResult {
            let ok = self.outcomes.get(self.call).copied().unwrap_or(true);
            self.call += 1;
            let result = if ok {
                CaptureResult::text(CaptureKind::Text, "ok")
            } else {
                CaptureResult::failed(CaptureKind::Text, "scripted failure")
            };
            self.core.record(result)
        }

        fn can_handle(&self, _target: &str) -> bool {
            true
        }
    }

    fn steps(n: usize) -> Vec<EventStep> {
        (0..n).map(|_| EventStep::new("screenshot")).collect()
    }

    #[test]
    fn sequence_preserves_order_and_cardinality() {
        let mut adapter = ScriptedAdapter::new(vec![true; 4]);
        let results = adapter.capture_sequence("target", &steps(4), None);
        assert_eq!(results.len(), 4);
        assert_eq!(adapter.core().history().len(), 4);
    }

    #[test]
    fn stop_on_fail_short_circuits() {
        let mut adapter = ScriptedAdapter::new(vec![true, false, true]);
        let mut seq = steps(3);
        seq[1].stop_on_fail = true;
        let results = adapter.capture_sequence("target", &seq, None);
        assert_eq!(results.len(), 2);
        assert!(results[0].success);
        assert!(!results[1].success);
        assert_eq!(adapter.core().history().len(), 2);
    }

    #[test]
    fn failing_step_without_stop_continues() {
        let mut adapter = ScriptedAdapter::new(vec![true, false, true]);
        let results = adapter.capture_sequence("target", &steps(3), None);
        assert_eq!(results.len(), 3);
    }

    #[test]
    fn end_session_without_start_is_safe() {
        let mut adapter = ScriptedAdapter::new(vec![]);
        let history = adapter.end_session();
        assert!(history.is_empty());
    }

    #[test]
    fn end_session_twice_is_idempotent() {
        let mut adapter = ScriptedAdapter::new(vec![true]);
        adapter.start_session("target");
        adapter.capture("target", None);
        let first = adapter.end_session();
        let second = adapter.end_session();
        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 1);
    }

    #[test]
    fn event_step_parse_forms() {
        let plain = EventStep::parse("screenshot");
        assert_eq!(plain.event, "screenshot");
        assert!(plain.selector.is_none());
        assert!(!plain.stop_on_fail);

        let with_selector = EventStep::parse("click:#submit");
        assert_eq!(with_selector.event, "click");
        assert_eq!(with_selector.selector.as_deref(), Some("#submit"));

        let stopping = EventStep::parse("input:#email=me@example.com!");
        assert_eq!(stopping.event, "input");
        assert_eq!(stopping.selector.as_deref(), Some("#email=me@example.com"));
        assert!(stopping.stop_on_fail);
    }
}
