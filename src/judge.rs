//! Judge client: talks to the external LLM CLI that turns captures plus
//! checklists into verdicts.
//!
//! The judge is a black box behind a stable contract: the request is
//! free text (checklist, criteria, and either an inline transcript or a
//! file-path reference to an image (image bytes are never embedded),
//! the response must contain one fenced ```json block of the documented
//! shape. Parsing is fail-closed: a response without a parseable block
//! of the expected shape is returned as [`JudgeReply::Unparseable`] and
//! callers must handle that arm; a partial verdict is never guessed
//! from unstructured text.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::process::{Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::config;

/// Result type for judge transport operations
pub type JudgeResult<T> = Result<T, JudgeError>;

/// Errors from invoking the judge CLI
#[derive(Debug)]
pub enum JudgeError {
    /// The judge binary is not installed or not on PATH
    NotFound(String),
    /// The judge did not answer within the deadline
    Timeout(Duration),
    /// The judge produced no output at all
    EmptyResponse,
    /// IO error while talking to the judge process
    Io(std::io::Error),
}

impl std::fmt::Display for JudgeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JudgeError::NotFound(bin) => {
                write!(f, "judge CLI '{}' not found; ensure it is on PATH", bin)
            }
            JudgeError::Timeout(d) => write!(f, "judge timed out after {:?}", d),
            JudgeError::EmptyResponse => write!(f, "judge returned no output"),
            JudgeError::Io(e) => write!(f, "judge I/O error: {}", e),
        }
    }
}

impl std::error::Error for JudgeError {}

impl From<std::io::Error> for JudgeError {
    fn from(e: std::io::Error) -> Self {
        JudgeError::Io(e)
    }
}

/// Configuration for the judge client
#[derive(Debug, Clone)]
pub struct JudgeConfig {
    /// Binary name or path of the judge CLI
    pub bin: String,
    /// Model name passed via `--model`
    pub model: String,
    /// Call timeout (seconds)
    pub timeout: u64,
}

impl Default for JudgeConfig {
    fn default() -> Self {
        let cfg = config::get();
        Self {
            bin: cfg.judge.bin.clone(),
            model: cfg.judge.model.clone(),
            timeout: cfg.judge.timeout,
        }
    }
}

impl JudgeConfig {
    pub fn new(bin: impl Into<String>) -> Self {
        Self {
            bin: bin.into(),
            ..Default::default()
        }
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn timeout(mut self, seconds: u64) -> Self {
        self.timeout = seconds;
        self
    }
}

/// Outcome of parsing a judge response against an expected schema.
///
/// Both arms must be handled; `Unparseable` carries the raw response for
/// human diagnosis.
#[derive(Debug, Clone)]
pub enum JudgeReply<T> {
    Parsed(T),
    Unparseable(String),
}

impl<T> JudgeReply<T> {
    pub fn is_parsed(&self) -> bool {
        matches!(self, JudgeReply::Parsed(_))
    }
}

/// Client for the external judge CLI.
#[derive(Debug, Clone, Default)]
pub struct JudgeClient {
    pub config: JudgeConfig,
}

impl JudgeClient {
    pub fn new(config: JudgeConfig) -> Self {
        Self { config }
    }

    /// Send one free-text request to the judge and return its raw reply.
    ///
    /// The call is bounded by the configured timeout; on expiry the
    /// judge process is killed and a timeout error returned.
    pub fn ask(&self, prompt: &str) -> JudgeResult<String> {
        let mut child = Command::new(&self.config.bin)
            .arg("-p")
            .arg(prompt)
            .arg("--output-format")
            .arg("text")
            .arg("--model")
            .arg(&self.config.model)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => JudgeError::NotFound(self.config.bin.clone()),
                _ => JudgeError::Io(e),
            })?;

        let stdout = read_to_string_thread(child.stdout.take());
        let stderr = read_to_string_thread(child.stderr.take());

        let timeout = Duration::from_secs(self.config.timeout);
        let deadline = Instant::now() + timeout;
        loop {
            match child.try_wait() {
                Ok(Some(_)) => break,
                Ok(None) => {
                    if Instant::now() >= deadline {
                        let _ = child.kill();
                        let _ = child.wait();
                        return Err(JudgeError::Timeout(timeout));
                    }
                    thread::sleep(Duration::from_millis(50));
                }
                Err(e) => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(JudgeError::Io(e));
                }
            }
        }

        let out = join_reader(stdout);
        let err = join_reader(stderr);

        let response = out.trim().to_string();
        if response.is_empty() {
            let err = err.trim();
            if err.is_empty() {
                return Err(JudgeError::EmptyResponse);
            }
            return Ok(format!("Error: {}", err));
        }
        Ok(response)
    }

    /// Ask the judge and parse the fenced JSON block in its reply.
    pub fn ask_parsed<T: DeserializeOwned>(&self, prompt: &str) -> JudgeResult<JudgeReply<T>> {
        let response = self.ask(prompt)?;
        Ok(parse_reply(&response))
    }
}

/// Extract the contents of the first fenced ```json block, falling back
/// to the whole text when no fence is present.
pub fn extract_json_block(response: &str) -> &str {
    if let Some(start) = response.find("```json") {
        let body = &response[start + "```json".len()..];
        if let Some(end) = body.find("```") {
            return body[..end].trim();
        }
        return body.trim();
    }
    response.trim()
}

/// Parse a judge response against an expected schema. Fail-closed:
/// anything that does not deserialize becomes `Unparseable` with the raw
/// text preserved.
pub fn parse_reply<T: DeserializeOwned>(response: &str) -> JudgeReply<T> {
    let block = extract_json_block(response);
    match serde_json::from_str::<T>(block) {
        Ok(value) => JudgeReply::Parsed(value),
        Err(_) => JudgeReply::Unparseable(response.to_string()),
    }
}

// ============================================================================
// Response schemas
// ============================================================================

/// Per-item verdict classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerdictStatus {
    #[serde(rename = "COMPLETED")]
    Completed,
    #[serde(rename = "NOT_COMPLETED")]
    NotCompleted,
    #[serde(rename = "UNCERTAIN")]
    Uncertain,
}

/// One checklist item's verdict
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemVerdict {
    pub task: String,
    pub status: VerdictStatus,
    #[serde(default)]
    pub evidence: String,
}

/// Expected verdict response for a checklist verification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerdictReport {
    pub results: Vec<ItemVerdict>,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub all_completed: bool,
}

/// Expected response for a fix proposal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixProposal {
    #[serde(default)]
    pub issue_identified: String,
    #[serde(default)]
    pub root_cause: String,
    #[serde(default)]
    pub file_to_fix: Option<String>,
    #[serde(default)]
    pub line_number: Option<u32>,
    #[serde(default)]
    pub original_code: String,
    #[serde(default)]
    pub fixed_code: String,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub explanation: String,
}

/// Expected response for a baseline comparison
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonReport {
    pub matches: bool,
    #[serde(default)]
    pub similarity_score: f64,
    #[serde(default)]
    pub differences: Vec<String>,
    #[serde(default)]
    pub analysis: String,
    #[serde(default)]
    pub suggested_fixes: Vec<String>,
}

/// Aggregate counts in a batch response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total: usize,
    #[serde(default)]
    pub passed: usize,
    #[serde(default)]
    pub failed: usize,
    #[serde(default)]
    pub uncertain: usize,
    #[serde(default)]
    pub overall_status: String,
    #[serde(default)]
    pub issues: Vec<String>,
}

/// Per-capture entry of a detailed batch response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchDetail {
    pub image_index: usize,
    pub status: String,
    #[serde(default)]
    pub evidence: String,
    #[serde(default)]
    pub task_items_verified: Vec<String>,
    #[serde(default)]
    pub issues: Vec<String>,
}

/// Expected response for a batch verification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    pub summary: BatchSummary,
    #[serde(default)]
    pub details: Vec<BatchDetail>,
    #[serde(default)]
    pub recommendation: String,
}

fn read_to_string_thread<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<String>> {
    pipe.map(|mut reader| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = reader.read_to_end(&mut buf);
            String::from_utf8_lossy(&buf).into_owned()
        })
    })
}

fn join_reader(handle: Option<JoinHandle<String>>) -> String {
    handle.and_then(|h| h.join().ok()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn extract_json_block_with_fence() {
        let response = "Some preamble\n```json\n{\"a\": 1}\n```\ntrailing";
        assert_eq!(extract_json_block(response), "{\"a\": 1}");
    }

    #[test]
    fn extract_json_block_without_fence_returns_whole() {
        assert_eq!(extract_json_block("  {\"a\": 1} "), "{\"a\": 1}");
    }

    #[test]
    fn extract_json_block_unterminated_fence() {
        let response = "```json\n{\"a\": 1}";
        assert_eq!(extract_json_block(response), "{\"a\": 1}");
    }

    #[test]
    fn parse_reply_verdict_report() {
        let response = r#"Here is my assessment:
```json
{
  "results": [
    {"task": "Login button is visible", "status": "COMPLETED", "evidence": "button present"}
  ],
  "summary": "looks good",
  "all_completed": true
}
```"#;
        match parse_reply::<VerdictReport>(response) {
            JudgeReply::Parsed(report) => {
                assert!(report.all_completed);
                assert_eq!(report.results.len(), 1);
                assert_eq!(report.results[0].status, VerdictStatus::Completed);
            }
            JudgeReply::Unparseable(_) => panic!("expected parsed reply"),
        }
    }

    #[test]
    fn parse_reply_fails_closed_on_prose() {
        let reply = parse_reply::<VerdictReport>("The login button looks fine to me.");
        match reply {
            JudgeReply::Unparseable(raw) => assert!(raw.contains("login button")),
            JudgeReply::Parsed(_) => panic!("prose must not parse"),
        }
    }

    #[test]
    fn parse_reply_fails_closed_on_wrong_shape() {
        let reply = parse_reply::<VerdictReport>("```json\n{\"unexpected\": true}\n```");
        assert!(!reply.is_parsed());
    }

    #[test]
    fn fix_proposal_defaults_for_omitted_fields() {
        let reply = parse_reply::<FixProposal>(
            "```json\n{\"issue_identified\": \"x\", \"file_to_fix\": null, \"confidence\": 0.0}\n```",
        );
        match reply {
            JudgeReply::Parsed(proposal) => {
                assert!(proposal.file_to_fix.is_none());
                assert_eq!(proposal.confidence, 0.0);
                assert!(proposal.original_code.is_empty());
            }
            JudgeReply::Unparseable(_) => panic!("expected parsed proposal"),
        }
    }

    #[test]
    fn judge_config_builder() {
        let config = JudgeConfig::new("stub-judge").model("test-model").timeout(7);
        assert_eq!(config.bin, "stub-judge");
        assert_eq!(config.model, "test-model");
        assert_eq!(config.timeout, 7);
    }

    #[test]
    fn missing_judge_binary_is_reported() {
        let client = JudgeClient::new(JudgeConfig::new("definitely-not-a-judge-bin").timeout(5));
        match client.ask("hello") {
            Err(JudgeError::NotFound(bin)) => assert!(bin.contains("definitely-not-a-judge-bin")),
            other => panic!("expected NotFound, got {:?}", other.map(|_| ())),
        }
    }
}
