//! Browser-session adapter: a live headless-Chrome page driven through
//! the DevTools protocol.
//!
//! Preferred variant for web targets when a Chrome/Chromium binary is
//! installed. A session keeps one page alive across captures so event
//! sequences (click, input, navigate, ...) observe accumulated page
//! state; one-shot calls without a session spin up and tear down a full
//! browser context per call: more latency, no cross-call contamination.
//!
//! Each event is followed by a short settle delay before the screenshot
//! so captures are not taken mid-transition.

use headless_chrome::protocol::cdp::Page;
use headless_chrome::{Browser, LaunchOptions, Tab};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use super::adapter::{AdapterCore, CaptureAdapter, EventStep};
use super::types::{CaptureError, CaptureKind, CaptureOptions, CaptureResult};

/// Delay between an event and its screenshot, letting the render settle
const EVENT_SETTLE: Duration = Duration::from_millis(300);

/// Capture adapter holding a live browser page.
pub struct BrowserSessionAdapter {
    core: AdapterCore,
    engine_available: bool,
    session: Option<BrowserSession>,
}

struct BrowserSession {
    // Dropping the Browser terminates the chrome process
    _browser: Browser,
    tab: Arc<Tab>,
}

impl BrowserSessionAdapter {
    pub fn new(options: CaptureOptions) -> Self {
        Self {
            core: AdapterCore::new(options),
            engine_available: Self::engine_available(),
            session: None,
        }
    }

    /// Whether the automation engine can run (a Chrome binary exists).
    /// Checked at adapter-selection time, never during classification.
    pub fn engine_available() -> bool {
        headless_chrome::browser::default_executable().is_ok()
    }

    fn launch(opts: &CaptureOptions) -> Result<BrowserSession, CaptureError> {
        let launch = LaunchOptions::default_builder()
            .headless(true)
            .window_size(Some((opts.width, opts.height)))
            .idle_browser_timeout(Duration::from_secs_f64(opts.timeout.max(30.0)))
            .build()
            .map_err(|e| CaptureError::Internal(format!("bad launch options: {}", e)))?;

        let browser = Browser::new(launch).map_err(|e| {
            CaptureError::MechanismUnavailable(format!("failed to launch browser: {}", e))
        })?;
        let tab = browser
            .new_tab()
            .map_err(|e| CaptureError::Internal(format!("failed to open tab: {}", e)))?;
        tab.set_default_timeout(Duration::from_secs_f64(opts.timeout));

        Ok(BrowserSession {
            _browser: browser,
            tab,
        })
    }

    fn navigate(tab: &Tab, url: &str) -> Result<(), CaptureError> {
        tab.navigate_to(url)
            .map_err(|e| CaptureError::TargetNotFound(format!("navigation to {} failed: {}", url, e)))?;
        tab.wait_until_navigated().map_err(|e| {
            CaptureError::Timeout(format!("page {} did not finish loading: {}", url, e))
        })?;
        Ok(())
    }

    fn screenshot(
        &self,
        tab: &Tab,
        opts: &CaptureOptions,
    ) -> Result<CaptureResult, CaptureError> {
        let clip = if opts.full_page {
            full_page_viewport(tab)
        } else {
            None
        };
        let png = tab
            .capture_screenshot(Page::CaptureScreenshotFormatOption::Png, None, clip, true)
            .map_err(|e| CaptureError::Internal(format!("screenshot failed: {}", e)))?;

        let path = self.core.output_path("web", CaptureKind::Screenshot)?;
        std::fs::write(&path, &png)?;

        Ok(CaptureResult::file(CaptureKind::Screenshot, &path)
            .with_meta("url", serde_json::Value::String(tab.get_url()))
            .with_meta("width", serde_json::json!(opts.width))
            .with_meta("height", serde_json::json!(opts.height))
            .with_meta("full_page", serde_json::Value::Bool(opts.full_page)))
    }

    fn capture_inner(&mut self, target: &str, options: Option<&CaptureOptions>) -> CaptureResult {
        let opts = options.cloned().unwrap_or_else(|| self.core.options.clone());
        if let Err(e) = opts.validate() {
            return CaptureResult::failed(CaptureKind::Screenshot, e);
        }
        if !self.engine_available {
            return CaptureResult::failed(
                CaptureKind::Screenshot,
                CaptureError::MechanismUnavailable("no Chrome/Chromium binary found".to_string()),
            );
        }

        if let Some(session) = &self.session {
            // Session capture: reuse the live page
            if session.tab.get_url() != target {
                if let Err(e) = Self::navigate(&session.tab, target) {
                    return CaptureResult::failed(CaptureKind::Screenshot, e);
                }
            }
            if opts.wait_before > 0.0 {
                thread::sleep(Duration::from_secs_f64(opts.wait_before));
            }
            let tab = session.tab.clone();
            return match self.screenshot(&tab, &opts) {
                Ok(result) => result,
                Err(e) => CaptureResult::failed(CaptureKind::Screenshot, e),
            };
        }

        // One-shot capture: full context up and down within this call
        let session = match Self::launch(&opts) {
            Ok(session) => session,
            Err(e) => return CaptureResult::failed(CaptureKind::Screenshot, e),
        };
        if let Err(e) = Self::navigate(&session.tab, target) {
            return CaptureResult::failed(CaptureKind::Screenshot, e);
        }
        if opts.wait_before > 0.0 {
            thread::sleep(Duration::from_secs_f64(opts.wait_before));
        }
        match self.screenshot(&session.tab, &opts) {
            Ok(result) => result,
            Err(e) => CaptureResult::failed(CaptureKind::Screenshot, e),
        }
    }

    /// Interpret one page event. Returns the event label recorded on the
    /// capture.
    fn perform_event(tab: &Tab, step: &EventStep) -> Result<String, CaptureError> {
        let selector = step.selector.as_deref();
        match (step.event.as_str(), selector) {
            ("click", Some(sel)) => {
                tab.wait_for_element(sel)
                    .and_then(|element| element.click().map(|_| ()))
                    .map_err(|e| {
                        CaptureError::TargetNotFound(format!("click {} failed: {}", sel, e))
                    })?;
                Ok(format!("click:{}", sel))
            }
            ("navigate", Some(url)) => {
                Self::navigate(tab, url)?;
                Ok(format!("navigate:{}", url))
            }
            ("navigate", None) => {
                tab.wait_until_navigated().map_err(|e| {
                    CaptureError::Timeout(format!("navigation wait failed: {}", e))
                })?;
                Ok("navigate:current".to_string())
            }
            ("input", Some(payload)) => {
                // Payload format: "selector=value"; bare selector just focuses
                match payload.split_once('=') {
                    Some((sel, value)) => {
                        tab.wait_for_element(sel)
                            .and_then(|element| {
                                element.click()?;
                                element.type_into(value).map(|_| ())
                            })
                            .map_err(|e| {
                                CaptureError::TargetNotFound(format!(
                                    "input into {} failed: {}",
                                    sel, e
                                ))
                            })?;
                        Ok(format!("input:{}", sel))
                    }
                    None => {
                        tab.wait_for_element(payload)
                            .and_then(|element| element.click().map(|_| ()))
                            .map_err(|e| {
                                CaptureError::TargetNotFound(format!(
                                    "focus {} failed: {}",
                                    payload, e
                                ))
                            })?;
                        Ok(format!("focus:{}", payload))
                    }
                }
            }
            ("wait", sel) => {
                let secs = sel.and_then(|s| s.parse::<f64>().ok()).unwrap_or(1.0);
                thread::sleep(Duration::from_secs_f64(secs));
                Ok(format!("wait:{}s", secs))
            }
            ("hover", Some(sel)) => {
                tab.wait_for_element(sel)
                    .and_then(|element| element.move_mouse_over().map(|_| ()))
                    .map_err(|e| {
                        CaptureError::TargetNotFound(format!("hover {} failed: {}", sel, e))
                    })?;
                Ok(format!("hover:{}", sel))
            }
            ("scroll", Some(sel)) => {
                tab.wait_for_element(sel)
                    .and_then(|element| element.scroll_into_view().map(|_| ()))
                    .map_err(|e| {
                        CaptureError::TargetNotFound(format!("scroll {} failed: {}", sel, e))
                    })?;
                Ok(format!("scroll:{}", sel))
            }
            _ => Ok(step.event.clone()),
        }
    }
}

impl CaptureAdapter for BrowserSessionAdapter {
    fn source(&self) -> &'static str {
        "browser"
    }

    fn capture_kind(&self) -> CaptureKind {
        CaptureKind::Screenshot
    }

    fn core(&self) -> &AdapterCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut AdapterCore {
        &mut self.core
    }

    fn capture(&mut self, target: &str, options: Option<&CaptureOptions>) -> CaptureResult {
        let result = self.capture_inner(target, options);
        self.core.record(result)
    }

    fn capture_on_event(
        &mut self,
        target: &str,
        step: &EventStep,
        options: Option<&CaptureOptions>,
    ) -> CaptureResult {
        let opts = options.cloned().unwrap_or_else(|| self.core.options.clone());
        if let Err(e) = opts.validate() {
            let result = CaptureResult::failed(CaptureKind::Screenshot, e);
            return self.core.record(result);
        }

        // Event capture needs a live page; start one implicitly
        if self.session.is_none() && !self.start_session(target) {
            let result = CaptureResult::failed(
                CaptureKind::Screenshot,
                CaptureError::MechanismUnavailable(format!(
                    "could not open a browser session for {}",
                    target
                )),
            );
            return self.core.record(result);
        }

        let tab = match &self.session {
            Some(session) => session.tab.clone(),
            None => {
                let result = CaptureResult::failed(
                    CaptureKind::Screenshot,
                    CaptureError::Internal("browser session missing".to_string()),
                );
                return self.core.record(result);
            }
        };

        let result = match Self::perform_event(&tab, step) {
            Ok(event_label) => {
                thread::sleep(EVENT_SETTLE);
                match self.screenshot(&tab, &opts) {
                    Ok(result) => result.with_event(event_label),
                    Err(e) => CaptureResult::failed(CaptureKind::Screenshot, e)
                        .with_event(step.event.clone()),
                }
            }
            Err(e) => CaptureResult::failed(CaptureKind::Screenshot, e)
                .with_event(step.event.clone()),
        };
        self.core.record(result)
    }

    fn start_session(&mut self, target: &str) -> bool {
        if self.session.is_some() {
            return true;
        }
        if !self.engine_available {
            return false;
        }
        let opts = self.core.options.clone();
        match Self::launch(&opts).and_then(|session| {
            Self::navigate(&session.tab, target)?;
            Ok(session)
        }) {
            Ok(session) => {
                self.session = Some(session);
                self.core.session_active = true;
                true
            }
            Err(e) => {
                eprintln!("Warning: failed to start browser session: {}", e);
                // Launch may have partially succeeded; dropping the session
                // value tears the context down
                self.core.session_active = false;
                false
            }
        }
    }

    fn end_session(&mut self) -> Vec<CaptureResult> {
        // Dropping the session closes the tab and kills the browser
        self.session.take();
        self.core.session_active = false;
        self.core.history().to_vec()
    }

    fn can_handle(&self, target: &str) -> bool {
        self.engine_available
            && (target.starts_with("http://") || target.starts_with("https://"))
    }
}

/// Compute a clip covering the whole document for full-page screenshots.
/// Falls back to the viewport when layout metrics are unavailable.
fn full_page_viewport(tab: &Tab) -> Option<Page::Viewport> {
    let metrics = tab.call_method(Page::GetLayoutMetrics(None)).ok()?;
    let content = metrics.css_content_size;
    Some(Page::Viewport {
        x: 0.0,
        y: 0.0,
        width: content.width,
        height: content.height,
        scale: 1.0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn can_handle_requires_web_scheme() {
        let mut adapter = BrowserSessionAdapter::new(CaptureOptions::default());
        adapter.engine_available = true;
        assert!(adapter.can_handle("https://example.com"));
        assert!(!adapter.can_handle("window:Editor"));
        assert!(!adapter.can_handle("cargo test"));
    }

    #[test]
    fn missing_engine_fails_closed() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut adapter = BrowserSessionAdapter::new(
            CaptureOptions::default()
                .output_dir(dir.path())
                .wait_before(0.0),
        );
        adapter.engine_available = false;
        let result = adapter.capture("http://localhost:1", None);
        assert!(!result.success);
        assert!(result
            .error
            .as_deref()
            .unwrap()
            .contains("no capture mechanism available"));
    }

    #[test]
    fn end_session_without_start_returns_empty_history() {
        let mut adapter = BrowserSessionAdapter::new(CaptureOptions::default());
        let history = adapter.end_session();
        assert!(history.is_empty());
    }
}
