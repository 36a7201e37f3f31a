//! Process-output adapter: runs shell commands and captures their
//! stdout/stderr as a formatted transcript.
//!
//! This is the default variant for anything the router cannot classify
//! more specifically, and the capture path the orchestrator uses for
//! terminal applications that only need a textual transcript.

use std::io::Read;
use std::process::{Command, Stdio};
use std::sync::mpsc::{self, Receiver};
use std::thread;
use std::time::{Duration, Instant};

use super::adapter::{AdapterCore, CaptureAdapter, EventStep};
use super::types::{CaptureError, CaptureKind, CaptureOptions, CaptureResult};

/// Outcome of running one command to completion or timeout
struct CommandRun {
    exit_code: Option<i32>,
    transcript: String,
    duration: Duration,
    timed_out: bool,
}

/// Capture adapter for command-line tools.
///
/// Runs the target as a shell command, waits for completion (or the
/// configured timeout), and writes a transcript with stdout, stderr,
/// exit code, and wall-clock duration. On timeout, partial output is
/// preserved and labeled.
pub struct ProcessOutputAdapter {
    core: AdapterCore,
}

impl ProcessOutputAdapter {
    pub fn new(options: CaptureOptions) -> Self {
        Self {
            core: AdapterCore::new(options),
        }
    }

    fn run_command(command: &str, timeout: Duration) -> Result<CommandRun, CaptureError> {
        let start = Instant::now();

        let mut child = shell_command(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    CaptureError::MechanismUnavailable(format!("shell not found: {}", e))
                }
                _ => CaptureError::TargetNotFound(format!(
                    "failed to spawn '{}': {}",
                    command, e
                )),
            })?;

        // Reader threads stream chunks over channels so a timeout kill
        // never blocks on a grandchild still holding the pipe open
        let stdout_rx = drain_pipe(child.stdout.take());
        let stderr_rx = drain_pipe(child.stderr.take());
        let mut stdout_buf = Vec::new();
        let mut stderr_buf = Vec::new();

        // Poll for exit until the deadline, then kill
        let mut timed_out = false;
        let status = loop {
            pump(&stdout_rx, &mut stdout_buf);
            pump(&stderr_rx, &mut stderr_buf);
            match child.try_wait() {
                Ok(Some(status)) => break Some(status),
                Ok(None) => {
                    if start.elapsed() >= timeout {
                        timed_out = true;
                        let _ = child.kill();
                        let _ = child.wait();
                        break None;
                    }
                    thread::sleep(Duration::from_millis(25));
                }
                Err(e) => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(CaptureError::Internal(format!(
                        "failed to poll '{}': {}",
                        command, e
                    )));
                }
            }
        };

        // Final drain: until the readers hit EOF, or briefly when a
        // lingering grandchild keeps the pipe open after a kill
        let drain_deadline = Instant::now() + Duration::from_millis(200);
        drain_remaining(&stdout_rx, &mut stdout_buf, drain_deadline);
        drain_remaining(&stderr_rx, &mut stderr_buf, drain_deadline);

        let duration = start.elapsed();
        let stdout = finish_text(stdout_buf);
        let stderr = finish_text(stderr_buf);
        let exit_code = status.and_then(|s| s.code());

        let mut parts = Vec::new();
        if timed_out {
            parts.push("--- TIMEOUT ---".to_string());
        }
        if !stdout.is_empty() {
            parts.push(if timed_out {
                "--- PARTIAL STDOUT ---".to_string()
            } else {
                "--- STDOUT ---".to_string()
            });
            parts.push(stdout);
        }
        if !stderr.is_empty() {
            parts.push(if timed_out {
                "--- PARTIAL STDERR ---".to_string()
            } else {
                "--- STDERR ---".to_string()
            });
            parts.push(stderr);
        }
        if timed_out {
            parts.push(format!("--- TIMED OUT AFTER: {:.2}s ---", duration.as_secs_f64()));
        } else {
            parts.push(format!("--- EXIT CODE: {} ---", exit_code.unwrap_or(-1)));
            parts.push(format!("--- DURATION: {:.2}s ---", duration.as_secs_f64()));
        }

        Ok(CommandRun {
            exit_code,
            transcript: parts.join("\n"),
            duration,
            timed_out,
        })
    }

    fn capture_inner(
        &mut self,
        target: &str,
        options: Option<&CaptureOptions>,
    ) -> CaptureResult {
        let opts = options.cloned().unwrap_or_else(|| self.core.options.clone());
        if let Err(e) = opts.validate() {
            return CaptureResult::failed(CaptureKind::Text, e);
        }

        let command = target.strip_prefix("cli:").unwrap_or(target);

        if opts.wait_before > 0.0 {
            thread::sleep(Duration::from_secs_f64(opts.wait_before));
        }

        let run = match Self::run_command(command, Duration::from_secs_f64(opts.timeout)) {
            Ok(run) => run,
            Err(e) => return CaptureResult::failed(CaptureKind::Text, e),
        };

        let output_path = match self.core.output_path("process", CaptureKind::Text) {
            Ok(path) => path,
            Err(e) => return CaptureResult::failed(CaptureKind::Text, CaptureError::Io(e)),
        };
        if let Err(e) = std::fs::write(&output_path, &run.transcript) {
            return CaptureResult::failed(CaptureKind::Text, CaptureError::Io(e));
        }

        let succeeded = !run.timed_out && run.exit_code == Some(0);
        let mut result = if succeeded {
            CaptureResult::text(CaptureKind::Text, run.transcript.clone()).with_path(&output_path)
        } else {
            let reason = if run.timed_out {
                CaptureError::Timeout(format!(
                    "'{}' exceeded {:.0}s",
                    command, opts.timeout
                ))
                .to_string()
            } else {
                format!("'{}' exited with code {}", command, run.exit_code.unwrap_or(-1))
            };
            let mut failed = CaptureResult::failed(CaptureKind::Text, reason);
            failed.content_text = Some(run.transcript.clone());
            failed.content_path = Some(output_path.clone());
            failed
        };

        result = result
            .with_meta("command", serde_json::Value::String(command.to_string()))
            .with_meta(
                "duration_seconds",
                serde_json::json!(run.duration.as_secs_f64()),
            )
            .with_meta("timed_out", serde_json::Value::Bool(run.timed_out));
        if let Some(code) = run.exit_code {
            result = result.with_meta("exit_code", serde_json::json!(code));
        }

        result
    }
}

impl CaptureAdapter for ProcessOutputAdapter {
    fn source(&self) -> &'static str {
        "process"
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

    fn capture(&mut self, target: &str, options: Option<&CaptureOptions>) -> CaptureResult {
        let result = self.capture_inner(target, options);
        self.core.record(result)
    }

    /// Process events: `complete` runs to completion, `output:<text>`
    /// additionally requires the text in the transcript, `timeout:<secs>`
    /// caps the run at a shorter deadline. Anything else degrades to a
    /// plain capture.
    fn capture_on_event(
        &mut self,
        target: &str,
        step: &EventStep,
        options: Option<&CaptureOptions>,
    ) -> CaptureResult {
        match step.event.as_str() {
            "output" => {
                let expected = step.selector.clone().unwrap_or_default();
                let mut result = self.capture(target, options);
                if result.success && !expected.is_empty() {
                    let found = result
                        .content_text
                        .as_deref()
                        .map(|text| text.contains(&expected))
                        .unwrap_or(false);
                    result.metadata.insert(
                        "output_check".to_string(),
                        serde_json::Value::String(
                            if found { "found" } else { "not_found" }.to_string(),
                        ),
                    );
                    if !found {
                        result.success = false;
                        result.error =
                            Some(format!("expected output '{}' not found", expected));
                    }
                }
                result.with_event(format!("output:{}", expected))
            }
            "timeout" => {
                let secs = step
                    .selector
                    .as_deref()
                    .and_then(|s| s.parse::<f64>().ok())
                    .unwrap_or(5.0);
                let opts = options
                    .cloned()
                    .unwrap_or_else(|| self.core.options.clone())
                    .timeout(secs);
                self.capture(target, Some(&opts))
                    .with_event(format!("timeout:{}", secs))
            }
            _ => self.capture(target, options).with_event(step.event.clone()),
        }
    }

    fn can_handle(&self, _target: &str) -> bool {
        // The process adapter is the universal fallback
        true
    }
}

fn shell_command(command: &str) -> Command {
    #[cfg(windows)]
    {
        let mut cmd = Command::new("cmd");
        cmd.arg("/C").arg(command);
        cmd
    }
    #[cfg(not(windows))]
    {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command);
        cmd
    }
}

/// Stream a pipe's chunks over a channel from a reader thread
fn drain_pipe<R: Read + Send + 'static>(pipe: Option<R>) -> Option<Receiver<Vec<u8>>> {
    pipe.map(|mut reader| {
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let mut buf = [0u8; 4096];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        if tx.send(buf[..n].to_vec()).is_err() {
                            break;
                        }
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(_) => break,
                }
            }
        });
        rx
    })
}

/// Move every pending chunk into the buffer without blocking
fn pump(rx: &Option<Receiver<Vec<u8>>>, buf: &mut Vec<u8>) {
    if let Some(rx) = rx {
        while let Ok(chunk) = rx.try_recv() {
            buf.extend_from_slice(&chunk);
        }
    }
}

/// Drain until the reader disconnects (EOF) or the deadline passes
fn drain_remaining(rx: &Option<Receiver<Vec<u8>>>, buf: &mut Vec<u8>, deadline: Instant) {
    let Some(rx) = rx else { return };
    loop {
        match rx.recv_timeout(Duration::from_millis(20)) {
            Ok(chunk) => buf.extend_from_slice(&chunk),
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
            Err(mpsc::RecvTimeoutError::Timeout) => {
                if Instant::now() >= deadline {
                    break;
                }
            }
        }
    }
}

fn finish_text(buf: Vec<u8>) -> String {
    String::from_utf8_lossy(&buf)
        .trim_end_matches('\n')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn adapter_in(dir: &TempDir) -> ProcessOutputAdapter {
        let opts = CaptureOptions::default()
            .output_dir(dir.path())
            .wait_before(0.0)
            .timeout(10.0);
        ProcessOutputAdapter::new(opts)
    }

    #[test]
    #[cfg(unix)]
    fn captures_stdout_and_exit_code() {
        let dir = TempDir::new().unwrap();
        let mut adapter = adapter_in(&dir);
        let result = adapter.capture("echo hello", None);

        assert!(result.success, "error: {:?}", result.error);
        let text = result.content_text.as_deref().unwrap();
        assert!(text.contains("hello"));
        assert!(text.contains("EXIT CODE: 0"));
        assert!(text.contains("DURATION:"));
        assert_eq!(result.metadata.get("exit_code"), Some(&serde_json::json!(0)));
        assert!(result.content_path.as_ref().unwrap().exists());
    }

    #[test]
    #[cfg(unix)]
    fn nonzero_exit_is_a_failed_capture_with_transcript() {
        let dir = TempDir::new().unwrap();
        let mut adapter = adapter_in(&dir);
        let result = adapter.capture("exit 1", None);

        assert!(!result.success);
        assert!(result.error.as_deref().unwrap().contains("code 1"));
        assert_eq!(result.metadata.get("exit_code"), Some(&serde_json::json!(1)));
        assert!(result
            .content_text
            .as_deref()
            .unwrap()
            .contains("EXIT CODE: 1"));
    }

    #[test]
    #[cfg(unix)]
    fn timeout_preserves_partial_output() {
        let dir = TempDir::new().unwrap();
        let mut adapter = adapter_in(&dir);
        let opts = CaptureOptions::default()
            .output_dir(dir.path())
            .wait_before(0.0)
            .timeout(1.0);
        let result = adapter.capture("echo partial; sleep 30", Some(&opts));

        assert!(!result.success);
        assert!(result.error.as_deref().unwrap().contains("timeout"));
        let text = result.content_text.as_deref().unwrap();
        assert!(text.contains("TIMEOUT"));
        assert!(text.contains("partial"));
        assert_eq!(
            result.metadata.get("timed_out"),
            Some(&serde_json::Value::Bool(true))
        );
    }

    #[test]
    #[cfg(unix)]
    fn output_event_checks_expected_text() {
        let dir = TempDir::new().unwrap();
        let mut adapter = adapter_in(&dir);

        let found = adapter.capture_on_event(
            "echo ready",
            &EventStep::new("output").with_selector("ready"),
            None,
        );
        assert!(found.success);

        let missing = adapter.capture_on_event(
            "echo ready",
            &EventStep::new("output").with_selector("absent-marker"),
            None,
        );
        assert!(!missing.success);
    }

    #[test]
    fn invalid_options_fail_without_running() {
        let dir = TempDir::new().unwrap();
        let mut adapter = adapter_in(&dir);
        let opts = CaptureOptions::default().output_dir(dir.path()).timeout(0.0);
        let result = adapter.capture("echo never", Some(&opts));
        assert!(!result.success);
        assert!(result.error.is_some());
    }

    #[test]
    #[cfg(unix)]
    fn history_records_every_capture() {
        let dir = TempDir::new().unwrap();
        let mut adapter = adapter_in(&dir);
        adapter.capture("echo one", None);
        adapter.capture("exit 3", None);
        assert_eq!(adapter.core().history().len(), 2);
    }
}
