//! Native-window adapter: capture a desktop application's top-level
//! window by title, without the window being focused or foreground.
//!
//! The OS facility that renders an unfocused window is platform-specific
//! and treated as an opaque "capture window by identity" capability:
//! - Windows: a PowerShell PrintWindow snippet
//! - X11: `xdotool` to resolve the window id, `import` to grab it
//! Missing tooling degrades to a `no capture mechanism available`
//! failure, never a crash.
//!
//! Launched processes are recorded in a cleanup list that is walked in
//! reverse on `end_session` and on drop, so partial setup failure still
//! releases whatever was created.

use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use super::adapter::{AdapterCore, CaptureAdapter, EventStep};
use super::types::{CaptureError, CaptureKind, CaptureOptions, CaptureResult};

/// Parsed form of a native-window target string
#[derive(Debug, Clone, PartialEq, Eq)]
struct WindowTarget {
    /// Command to launch, if the target asks for a launch
    command: Option<String>,
    /// Window title to capture
    title: Option<String>,
}

impl WindowTarget {
    /// `window:<title>`, `gui:<command>|<title>`, or an executable path
    fn parse(target: &str) -> Self {
        if let Some(title) = target.strip_prefix("window:") {
            return Self {
                command: None,
                title: Some(title.trim().to_string()),
            };
        }
        if let Some(rest) = target.strip_prefix("gui:") {
            let mut parts = rest.splitn(2, '|');
            let command = parts.next().map(|s| s.trim().to_string());
            let title = parts.next().map(|s| s.trim().to_string());
            return Self {
                command: command.filter(|s| !s.is_empty()),
                title: title.filter(|s| !s.is_empty()),
            };
        }
        // Bare executable: derive the window title from the file stem
        let title = Path::new(target)
            .file_stem()
            .map(|s| s.to_string_lossy().to_string());
        Self {
            command: Some(target.trim().to_string()),
            title,
        }
    }
}

/// Capture adapter for desktop GUI applications.
pub struct NativeWindowAdapter {
    core: AdapterCore,
    /// Processes this adapter launched, released in reverse order
    launched: Vec<Child>,
}

impl NativeWindowAdapter {
    pub fn new(options: CaptureOptions) -> Self {
        Self {
            core: AdapterCore::new(options),
            launched: Vec::new(),
        }
    }

    /// Launch the application without stealing input focus
    fn launch(&mut self, command: &str) -> Result<(), CaptureError> {
        let mut words = command.split_whitespace();
        let program = words
            .next()
            .ok_or_else(|| CaptureError::TargetNotFound("empty launch command".to_string()))?;
        let args: Vec<&str> = words.collect();

        let child = spawn_unfocused(program, &args).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                CaptureError::TargetNotFound(format!("executable '{}' not found", program))
            }
            _ => CaptureError::Internal(format!("failed to launch '{}': {}", program, e)),
        })?;
        self.launched.push(child);
        Ok(())
    }

    fn capture_inner(&mut self, target: &str, options: Option<&CaptureOptions>) -> CaptureResult {
        let opts = options.cloned().unwrap_or_else(|| self.core.options.clone());
        if let Err(e) = opts.validate() {
            return CaptureResult::failed(CaptureKind::Screenshot, e);
        }

        let parsed = WindowTarget::parse(target);

        // A fresh launch only happens outside an active session; inside a
        // session the process from start_session is reused
        if let Some(command) = &parsed.command {
            if !self.core.session_active || self.launched.is_empty() {
                if let Err(e) = self.launch(command) {
                    return CaptureResult::failed(CaptureKind::Screenshot, e);
                }
                // Give the window time to appear
                let warmup = if opts.wait_before > 0.0 { opts.wait_before } else { 2.0 };
                thread::sleep(Duration::from_secs_f64(warmup));
            }
        } else if opts.wait_before > 0.0 {
            thread::sleep(Duration::from_secs_f64(opts.wait_before));
        }

        let title = match &parsed.title {
            Some(title) if !title.is_empty() => title.clone(),
            _ => {
                return CaptureResult::failed(
                    CaptureKind::Screenshot,
                    CaptureError::TargetNotFound(
                        "no window title to capture; use window:<title> or gui:<command>|<title>"
                            .to_string(),
                    ),
                );
            }
        };

        let output_path = match self.core.output_path("window", CaptureKind::Screenshot) {
            Ok(path) => path,
            Err(e) => return CaptureResult::failed(CaptureKind::Screenshot, CaptureError::Io(e)),
        };

        match capture_window_by_title(&title, &output_path, Duration::from_secs_f64(opts.timeout))
        {
            Ok(()) => CaptureResult::file(CaptureKind::Screenshot, &output_path)
                .with_meta("window_title", serde_json::Value::String(title))
                .with_meta(
                    "command",
                    parsed
                        .command
                        .map(serde_json::Value::String)
                        .unwrap_or(serde_json::Value::Null),
                ),
            Err(e) => CaptureResult::failed(CaptureKind::Screenshot, e),
        }
    }

    /// Terminate every launched process, newest first
    fn release_processes(&mut self) {
        while let Some(mut child) = self.launched.pop() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

impl CaptureAdapter for NativeWindowAdapter {
    fn source(&self) -> &'static str {
        "window"
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

    /// Window events: only `wait:<secs>` is meaningful; everything else
    /// degrades to a plain capture.
    fn capture_on_event(
        &mut self,
        target: &str,
        step: &EventStep,
        options: Option<&CaptureOptions>,
    ) -> CaptureResult {
        if step.event == "wait" {
            let secs = step
                .selector
                .as_deref()
                .and_then(|s| s.parse::<f64>().ok())
                .unwrap_or(1.0);
            thread::sleep(Duration::from_secs_f64(secs));
            return self
                .capture(target, options)
                .with_event(format!("wait:{}", secs));
        }
        self.capture(target, options).with_event(step.event.clone())
    }

    fn start_session(&mut self, target: &str) -> bool {
        let parsed = WindowTarget::parse(target);
        if let Some(command) = &parsed.command {
            if let Err(e) = self.launch(command) {
                eprintln!("Warning: failed to start window session: {}", e);
                // Partial setup is still torn down
                self.release_processes();
                self.core.session_active = false;
                return false;
            }
        }
        self.core.session_active = true;
        true
    }

    fn end_session(&mut self) -> Vec<CaptureResult> {
        self.release_processes();
        self.core.session_active = false;
        self.core.history().to_vec()
    }

    fn can_handle(&self, target: &str) -> bool {
        let lower = target.to_lowercase();
        lower.starts_with("window:") || lower.starts_with("gui:") || lower.ends_with(".exe")
    }
}

impl Drop for NativeWindowAdapter {
    fn drop(&mut self) {
        self.release_processes();
    }
}

/// Spawn a process without giving it input focus
fn spawn_unfocused(program: &str, args: &[&str]) -> std::io::Result<Child> {
    #[cfg(windows)]
    {
        // `start /min` shows the window minimized without activating it
        let mut cmd = Command::new("cmd");
        cmd.arg("/C").arg("start").arg("/min").arg(program);
        cmd.args(args);
        cmd.stdout(Stdio::null()).stderr(Stdio::null()).spawn()
    }
    #[cfg(not(windows))]
    {
        let mut cmd = Command::new(program);
        cmd.args(args);
        cmd.stdout(Stdio::null()).stderr(Stdio::null()).spawn()
    }
}

/// Capture the contents of the window whose title contains `title`.
///
/// Works even when the window is not in the foreground; requires the
/// platform capture tooling to be present.
fn capture_window_by_title(
    title: &str,
    output_path: &Path,
    timeout: Duration,
) -> Result<(), CaptureError> {
    #[cfg(windows)]
    {
        capture_window_windows(title, output_path, timeout)
    }
    #[cfg(not(windows))]
    {
        capture_window_x11(title, output_path, timeout)
    }
}

#[cfg(not(windows))]
fn capture_window_x11(
    title: &str,
    output_path: &Path,
    timeout: Duration,
) -> Result<(), CaptureError> {
    let xdotool = which::which("xdotool").map_err(|_| {
        CaptureError::MechanismUnavailable("xdotool is not installed".to_string())
    })?;
    let import = which::which("import").map_err(|_| {
        CaptureError::MechanismUnavailable("ImageMagick 'import' is not installed".to_string())
    })?;

    let mut search = Command::new(&xdotool);
    search.arg("search").arg("--name").arg(title);
    let output = run_with_deadline(&mut search, timeout)?
        .ok_or_else(|| CaptureError::Timeout(format!("window search for '{}' timed out", title)))?;
    let ids = String::from_utf8_lossy(&output.stdout);
    let window_id = ids
        .lines()
        .next()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| {
            CaptureError::TargetNotFound(format!("no window matching '{}'", title))
        })?
        .to_string();

    let mut grab = Command::new(&import);
    grab.arg("-window").arg(&window_id).arg(output_path);
    let grabbed = run_with_deadline(&mut grab, timeout)?
        .ok_or_else(|| CaptureError::Timeout(format!("capture of '{}' timed out", title)))?;
    if !grabbed.status.success() || !output_path.exists() {
        return Err(CaptureError::Internal(format!(
            "window capture of '{}' failed: {}",
            title,
            String::from_utf8_lossy(&grabbed.stderr).trim()
        )));
    }
    Ok(())
}

#[cfg(windows)]
fn capture_window_windows(
    title: &str,
    output_path: &Path,
    timeout: Duration,
) -> Result<(), CaptureError> {
    let script = format!(
        r#"
Add-Type -AssemblyName System.Drawing
$sig = '[DllImport("user32.dll")] public static extern bool PrintWindow(IntPtr hWnd, IntPtr hdcBlt, uint nFlags);
[DllImport("user32.dll")] public static extern bool GetWindowRect(IntPtr hWnd, out System.Drawing.Rectangle rect);'
$win32 = Add-Type -MemberDefinition $sig -Name Win32Capture -PassThru
$proc = Get-Process | Where-Object {{ $_.MainWindowTitle -like '*{title}*' }} | Select-Object -First 1
if (-not $proc) {{ Write-Output 'WINDOW_NOT_FOUND'; exit 1 }}
$hwnd = $proc.MainWindowHandle
$rect = New-Object System.Drawing.Rectangle
[void]$win32::GetWindowRect($hwnd, [ref]$rect)
$w = $rect.Width - $rect.X; $h = $rect.Height - $rect.Y
if ($w -le 0 -or $h -le 0) {{ Write-Output 'CAPTURE_FAILED'; exit 1 }}
$bmp = New-Object System.Drawing.Bitmap $w, $h
$gfx = [System.Drawing.Graphics]::FromImage($bmp)
$hdc = $gfx.GetHdc()
[void]$win32::PrintWindow($hwnd, $hdc, 2)
$gfx.ReleaseHdc($hdc)
$bmp.Save('{output}')
Write-Output 'SUCCESS'
"#,
        title = title.replace('\'', "''"),
        output = output_path.display().to_string().replace('\'', "''"),
    );

    let mut cmd = Command::new("powershell");
    cmd.arg("-NoProfile").arg("-Command").arg(&script);
    let output = run_with_deadline(&mut cmd, timeout)?
        .ok_or_else(|| CaptureError::Timeout(format!("capture of '{}' timed out", title)))?;
    let stdout = String::from_utf8_lossy(&output.stdout);
    if stdout.contains("WINDOW_NOT_FOUND") {
        return Err(CaptureError::TargetNotFound(format!(
            "no window matching '{}'",
            title
        )));
    }
    if !stdout.contains("SUCCESS") || !output_path.exists() {
        return Err(CaptureError::Internal(format!(
            "window capture of '{}' failed: {}",
            title,
            stdout.trim()
        )));
    }
    Ok(())
}

/// Run a command with a deadline; `None` means the deadline expired and
/// the process was killed.
fn run_with_deadline(
    cmd: &mut Command,
    timeout: Duration,
) -> Result<Option<std::process::Output>, CaptureError> {
    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| CaptureError::Internal(format!("failed to spawn capture tool: {}", e)))?;

    let deadline = Instant::now() + timeout;
    loop {
        match child.try_wait() {
            Ok(Some(_)) => {
                let output = child
                    .wait_with_output()
                    .map_err(|e| CaptureError::Internal(e.to_string()))?;
                return Ok(Some(output));
            }
            Ok(None) => {
                if Instant::now() >= deadline {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Ok(None);
                }
                thread::sleep(Duration::from_millis(25));
            }
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(CaptureError::Internal(e.to_string()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_window_title_target() {
        let parsed = WindowTarget::parse("window:My Editor");
        assert_eq!(parsed.command, None);
        assert_eq!(parsed.title.as_deref(), Some("My Editor"));
    }

    #[test]
    fn parses_gui_command_with_title() {
        let parsed = WindowTarget::parse("gui:myapp --flag|Main Window");
        assert_eq!(parsed.command.as_deref(), Some("myapp --flag"));
        assert_eq!(parsed.title.as_deref(), Some("Main Window"));
    }

    #[test]
    fn parses_bare_executable() {
        let parsed = WindowTarget::parse("notepad.exe");
        assert_eq!(parsed.command.as_deref(), Some("notepad.exe"));
        assert_eq!(parsed.title.as_deref(), Some("notepad"));
    }

    #[test]
    fn capture_without_title_fails_cleanly() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut adapter = NativeWindowAdapter::new(
            CaptureOptions::default()
                .output_dir(dir.path())
                .wait_before(0.0),
        );
        let result = adapter.capture("gui:|", None);
        assert!(!result.success);
        assert!(result.error.as_deref().unwrap().contains("target not found"));
        assert_eq!(adapter.core().history().len(), 1);
    }

    #[test]
    fn end_session_without_start_is_safe() {
        let mut adapter = NativeWindowAdapter::new(CaptureOptions::default());
        assert!(adapter.end_session().is_empty());
        assert!(adapter.end_session().is_empty());
    }

    #[test]
    fn can_handle_window_targets() {
        let adapter = NativeWindowAdapter::new(CaptureOptions::default());
        assert!(adapter.can_handle("window:Title"));
        assert!(adapter.can_handle("gui:app|Title"));
        assert!(adapter.can_handle("app.exe"));
        assert!(!adapter.can_handle("http://x"));
    }
}
