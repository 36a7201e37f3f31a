//! One-shot headless-browser adapter.
//!
//! Fallback for web targets when the DevTools automation engine cannot
//! run: invokes an installed Chrome/Chromium/Edge binary with its
//! `--screenshot` flag. The browser paints the page and exits; no window
//! is ever shown. This variant cannot act on the page, so event captures
//! degrade to plain captures.

use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use super::adapter::{AdapterCore, CaptureAdapter};
use super::types::{CaptureError, CaptureKind, CaptureOptions, CaptureResult};

/// Executable names probed for a usable browser, in preference order
const BROWSER_CANDIDATES: &[&str] = &[
    "chromium",
    "chromium-browser",
    "google-chrome",
    "google-chrome-stable",
    "chrome",
    "msedge",
    "microsoft-edge",
];

/// Locate an installed browser binary on PATH
pub fn find_browser() -> Option<PathBuf> {
    BROWSER_CANDIDATES
        .iter()
        .find_map(|name| which::which(name).ok())
}

/// Capture adapter using a headless browser subprocess.
pub struct HeadlessShotAdapter {
    core: AdapterCore,
    browser: Option<PathBuf>,
}

impl HeadlessShotAdapter {
    pub fn new(options: CaptureOptions) -> Self {
        Self {
            core: AdapterCore::new(options),
            browser: find_browser(),
        }
    }

    fn capture_inner(&self, target: &str, options: Option<&CaptureOptions>) -> CaptureResult {
        let opts = options.cloned().unwrap_or_else(|| self.core.options.clone());
        if let Err(e) = opts.validate() {
            return CaptureResult::failed(CaptureKind::Screenshot, e);
        }

        let browser = match &self.browser {
            Some(path) => path.clone(),
            None => {
                return CaptureResult::failed(
                    CaptureKind::Screenshot,
                    CaptureError::MechanismUnavailable(
                        "no Chrome/Chromium/Edge binary on PATH".to_string(),
                    ),
                );
            }
        };

        let output_path = match self.core.output_path("web", CaptureKind::Screenshot) {
            Ok(path) => path,
            Err(e) => return CaptureResult::failed(CaptureKind::Screenshot, CaptureError::Io(e)),
        };

        if opts.wait_before > 0.0 {
            thread::sleep(Duration::from_secs_f64(opts.wait_before));
        }

        let mut child = match Command::new(&browser)
            .arg("--headless=new")
            .arg("--disable-gpu")
            .arg("--no-sandbox")
            .arg("--hide-scrollbars")
            .arg(format!("--window-size={},{}", opts.width, opts.height))
            .arg(format!("--screenshot={}", output_path.display()))
            .arg(target)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                return CaptureResult::failed(
                    CaptureKind::Screenshot,
                    CaptureError::Internal(format!(
                        "failed to launch {}: {}",
                        browser.display(),
                        e
                    )),
                );
            }
        };

        // Bounded wait for the browser to paint and exit
        let deadline = Instant::now() + Duration::from_secs_f64(opts.timeout);
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break Some(status),
                Ok(None) => {
                    if Instant::now() >= deadline {
                        let _ = child.kill();
                        let _ = child.wait();
                        break None;
                    }
                    thread::sleep(Duration::from_millis(50));
                }
                Err(_) => {
                    let _ = child.kill();
                    let _ = child.wait();
                    break None;
                }
            }
        };

        if status.is_none() {
            return CaptureResult::failed(
                CaptureKind::Screenshot,
                CaptureError::Timeout(format!(
                    "browser did not finish within {:.0}s for {}",
                    opts.timeout, target
                )),
            );
        }

        if !output_path.exists() {
            return CaptureResult::failed(
                CaptureKind::Screenshot,
                CaptureError::TargetNotFound(format!(
                    "browser produced no screenshot for {}",
                    target
                )),
            );
        }

        CaptureResult::file(CaptureKind::Screenshot, &output_path)
            .with_meta("url", serde_json::Value::String(target.to_string()))
            .with_meta(
                "browser",
                serde_json::Value::String(browser.display().to_string()),
            )
            .with_meta("width", serde_json::json!(opts.width))
            .with_meta("height", serde_json::json!(opts.height))
    }
}

impl CaptureAdapter for HeadlessShotAdapter {
    fn source(&self) -> &'static str {
        "headless"
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

    fn can_handle(&self, target: &str) -> bool {
        target.starts_with("http://") || target.starts_with("https://")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::adapter::EventStep;

    #[test]
    fn can_handle_web_targets_only() {
        let adapter = HeadlessShotAdapter::new(CaptureOptions::default());
        assert!(adapter.can_handle("http://localhost:3000"));
        assert!(adapter.can_handle("https://example.com"));
        assert!(!adapter.can_handle("echo hello"));
    }

    #[test]
    fn missing_browser_reports_mechanism_unavailable() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut adapter = HeadlessShotAdapter::new(
            CaptureOptions::default()
                .output_dir(dir.path())
                .wait_before(0.0),
        );
        adapter.browser = None;
        let result = adapter.capture("http://localhost:1", None);
        assert!(!result.success);
        assert!(result
            .error
            .as_deref()
            .unwrap()
            .contains("no capture mechanism available"));
        assert_eq!(adapter.core().history().len(), 1);
    }

    #[test]
    fn event_capture_degrades_to_plain_capture() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut adapter = HeadlessShotAdapter::new(
            CaptureOptions::default()
                .output_dir(dir.path())
                .wait_before(0.0),
        );
        adapter.browser = None;
        let step = EventStep::new("click").with_selector("#button");
        let result = adapter.capture_on_event("http://localhost:1", &step, None);
        // Degraded path still records exactly one history entry
        assert!(!result.success);
        assert_eq!(adapter.core().history().len(), 1);
    }
}
