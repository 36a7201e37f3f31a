//! Baseline store: named reference captures per project, used for
//! regression comparison.
//!
//! Baselines live under `.uiproof/baselines/` with a JSON manifest as
//! the single source of truth. The manifest is loaded fully per
//! operation and rewritten atomically by replacement on every mutation;
//! an upsert removes any prior entry of the same name within the same
//! rewrite, so no reader ever observes the name missing between steps.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::capture::{
    CaptureAdapter, CaptureKind, CaptureOptions, NativeWindowAdapter, ProcessOutputAdapter,
    select_adapter,
};
use crate::checklist::{AppKind, AppProfile};
use crate::judge::{ComparisonReport, JudgeClient, JudgeError, JudgeReply};

/// Manifest schema version
const MANIFEST_VERSION: &str = "1.0";

/// A single baseline entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaselineEntry {
    /// Unique key within the project
    pub name: String,
    /// Backing file name under the baseline directory
    pub file: String,
    /// Creation timestamp (RFC 3339)
    pub created: String,
    /// Application kind: webapp, gui, or tui
    pub app_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Manifest {
    version: String,
    baselines: Vec<BaselineEntry>,
}

impl Default for Manifest {
    fn default() -> Self {
        Self {
            version: MANIFEST_VERSION.to_string(),
            baselines: Vec::new(),
        }
    }
}

/// Result of comparing current state to a baseline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonOutcome {
    pub matches: bool,
    pub similarity_score: f64,
    pub differences: Vec<String>,
    pub analysis: String,
    pub suggested_fixes: Vec<String>,
    pub baseline_path: PathBuf,
    pub current_path: PathBuf,
}

/// Error type for baseline operations
#[derive(Debug)]
pub enum BaselineError {
    /// No baseline with the requested name
    NotFound(String),
    /// The (re)capture of current state failed
    CaptureFailed(String),
    /// The application profile is missing a required launch parameter
    InvalidProfile(String),
    /// Judge transport failure
    Judge(JudgeError),
    /// I/O error
    Io(std::io::Error),
    /// Manifest (de)serialization error
    Serialization(serde_json::Error),
}

impl std::fmt::Display for BaselineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BaselineError::NotFound(name) => write!(f, "baseline '{}' not found", name),
            BaselineError::CaptureFailed(msg) => write!(f, "capture failed: {}", msg),
            BaselineError::InvalidProfile(msg) => write!(f, "invalid profile: {}", msg),
            BaselineError::Judge(e) => write!(f, "judge error: {}", e),
            BaselineError::Io(e) => write!(f, "I/O error: {}", e),
            BaselineError::Serialization(e) => write!(f, "manifest error: {}", e),
        }
    }
}

impl std::error::Error for BaselineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BaselineError::Judge(e) => Some(e),
            BaselineError::Io(e) => Some(e),
            BaselineError::Serialization(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for BaselineError {
    fn from(e: std::io::Error) -> Self {
        BaselineError::Io(e)
    }
}

impl From<serde_json::Error> for BaselineError {
    fn from(e: serde_json::Error) -> Self {
        BaselineError::Serialization(e)
    }
}

impl From<JudgeError> for BaselineError {
    fn from(e: JudgeError) -> Self {
        BaselineError::Judge(e)
    }
}

/// Manages baseline captures for one project.
pub struct BaselineStore {
    baselines_dir: PathBuf,
    manifest_path: PathBuf,
    judge: JudgeClient,
}

impl BaselineStore {
    /// Open the baseline store for `project_root`
    pub fn open(project_root: impl Into<PathBuf>, judge: JudgeClient) -> Result<Self, BaselineError> {
        let baselines_dir = project_root.into().join(".uiproof").join("baselines");
        std::fs::create_dir_all(&baselines_dir)?;
        let manifest_path = baselines_dir.join("manifest.json");
        Ok(Self {
            baselines_dir,
            manifest_path,
            judge,
        })
    }

    pub fn baselines_dir(&self) -> &Path {
        &self.baselines_dir
    }

    fn load_manifest(&self) -> Manifest {
        if self.manifest_path.exists() {
            if let Ok(raw) = std::fs::read_to_string(&self.manifest_path) {
                if let Ok(manifest) = serde_json::from_str::<Manifest>(&raw) {
                    return manifest;
                }
            }
        }
        Manifest::default()
    }

    /// Rewrite the manifest atomically by replacement
    fn save_manifest(&self, manifest: &Manifest) -> Result<(), BaselineError> {
        let json = serde_json::to_string_pretty(manifest)?;
        let tmp = self.manifest_path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.manifest_path)?;
        Ok(())
    }

    /// List all saved baselines
    pub fn list(&self) -> Vec<BaselineEntry> {
        self.load_manifest().baselines
    }

    /// Get a baseline by name
    pub fn get(&self, name: &str) -> Option<BaselineEntry> {
        self.load_manifest()
            .baselines
            .into_iter()
            .find(|b| b.name == name)
    }

    /// Capture current state and save it as the named baseline.
    /// Last-write-wins: a prior entry of the same name is replaced in a
    /// single manifest rewrite.
    pub fn save(
        &self,
        name: &str,
        profile: &AppProfile,
        description: Option<&str>,
    ) -> Result<BaselineEntry, BaselineError> {
        let kind = baseline_capture_kind(profile.kind);
        let filename = format!("{}_{}.{}", name, Utc::now().timestamp(), kind.extension());
        let dest = self.baselines_dir.join(&filename);

        self.capture_to(profile, &dest)?;

        let entry = BaselineEntry {
            name: name.to_string(),
            file: filename,
            created: Utc::now().to_rfc3339(),
            app_type: profile.kind.to_string(),
            url: profile.url.clone(),
            command: profile.command.clone(),
            description: description.map(|s| s.to_string()),
            width: profile.width,
            height: profile.height,
        };

        let mut manifest = self.load_manifest();
        manifest.baselines.retain(|b| b.name != name);
        manifest.baselines.push(entry.clone());
        self.save_manifest(&manifest)?;

        Ok(entry)
    }

    /// Compare current state to the named baseline.
    ///
    /// When `current` is not supplied, fresh state is captured with the
    /// baseline's recorded parameters. Unparseable judge replies fail
    /// closed with a mismatch result carrying the raw text.
    pub fn compare(
        &self,
        name: &str,
        current: Option<&Path>,
    ) -> Result<ComparisonOutcome, BaselineError> {
        let entry = self
            .get(name)
            .ok_or_else(|| BaselineError::NotFound(name.to_string()))?;
        let baseline_path = self.baselines_dir.join(&entry.file);

        let current_path = match current {
            Some(path) => path.to_path_buf(),
            None => {
                let profile = profile_from_entry(&entry)?;
                let kind = baseline_capture_kind(profile.kind);
                let dest = self.baselines_dir.join(format!(
                    "current_{}_{}.{}",
                    name,
                    Utc::now().timestamp(),
                    kind.extension()
                ));
                self.capture_to(&profile, &dest)?;
                dest
            }
        };

        let prompt = build_compare_prompt(&entry, &baseline_path, &current_path)?;
        let response = self.judge.ask(&prompt)?;

        match crate::judge::parse_reply::<ComparisonReport>(&response) {
            JudgeReply::Parsed(report) => Ok(ComparisonOutcome {
                matches: report.matches,
                similarity_score: report.similarity_score,
                differences: report.differences,
                analysis: report.analysis,
                suggested_fixes: report.suggested_fixes,
                baseline_path,
                current_path,
            }),
            JudgeReply::Unparseable(raw) => Ok(ComparisonOutcome {
                matches: false,
                similarity_score: 0.0,
                differences: vec!["Could not parse comparison result".to_string()],
                analysis: raw,
                suggested_fixes: Vec::new(),
                baseline_path,
                current_path,
            }),
        }
    }

    /// Delete the named baseline and its backing file. Removing the
    /// file is idempotent; returns false if the name was never present.
    pub fn delete(&self, name: &str) -> Result<bool, BaselineError> {
        let Some(entry) = self.get(name) else {
            return Ok(false);
        };

        let file_path = self.baselines_dir.join(&entry.file);
        if file_path.exists() {
            std::fs::remove_file(&file_path)?;
        }

        let mut manifest = self.load_manifest();
        manifest.baselines.retain(|b| b.name != name);
        self.save_manifest(&manifest)?;

        Ok(true)
    }

    /// Capture the profile's current state into `dest`
    fn capture_to(&self, profile: &AppProfile, dest: &Path) -> Result<(), BaselineError> {
        let target = profile.target().ok_or_else(|| {
            BaselineError::InvalidProfile(format!(
                "{} baseline needs a URL or command",
                profile.kind
            ))
        })?;

        let stem = dest
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "baseline".to_string());
        let options = CaptureOptions {
            output_dir: self.baselines_dir.clone(),
            output_name: Some(stem),
            ..CaptureOptions::default().size(profile.width, profile.height)
        };

        let result = match profile.kind {
            AppKind::Web => {
                let mut adapter = select_adapter(&target, options);
                adapter.capture(&target, None)
            }
            AppKind::Gui => {
                let mut adapter = NativeWindowAdapter::new(options);
                let result = adapter.capture(&target, None);
                adapter.end_session();
                result
            }
            AppKind::Terminal => {
                let mut adapter = ProcessOutputAdapter::new(options);
                adapter.capture(&target, None)
            }
        };

        if !result.success {
            return Err(BaselineError::CaptureFailed(
                result.error.unwrap_or_else(|| "unknown capture error".to_string()),
            ));
        }
        // Adapters name files themselves; move the artifact into place
        // when the requested destination differs
        if let Some(produced) = &result.content_path {
            if produced != dest {
                std::fs::rename(produced, dest)?;
            }
        }
        Ok(())
    }
}

fn baseline_capture_kind(kind: AppKind) -> CaptureKind {
    match kind {
        AppKind::Terminal => CaptureKind::Text,
        _ => CaptureKind::Screenshot,
    }
}

fn profile_from_entry(entry: &BaselineEntry) -> Result<AppProfile, BaselineError> {
    let kind = match entry.app_type.as_str() {
        "webapp" => AppKind::Web,
        "gui" => AppKind::Gui,
        "tui" => AppKind::Terminal,
        other => {
            return Err(BaselineError::InvalidProfile(format!(
                "unknown app_type '{}'",
                other
            )));
        }
    };
    Ok(AppProfile {
        kind,
        url: entry.url.clone(),
        command: entry.command.clone(),
        window_title: None,
        width: entry.width,
        height: entry.height,
        wait_seconds: 2.0,
    })
}

/// Build the comparison request: inline text for terminal baselines,
/// path references for images.
fn build_compare_prompt(
    entry: &BaselineEntry,
    baseline_path: &Path,
    current_path: &Path,
) -> Result<String, BaselineError> {
    let response_format = r#"Respond in this JSON format:
```json
{
  "matches": true,
  "similarity_score": 0.0,
  "differences": ["list of differences found"],
  "analysis": "detailed analysis of what changed",
  "suggested_fixes": ["code fixes if regressions found"]
}
```"#;

    if entry.app_type == "tui" {
        let baseline_content = std::fs::read_to_string(baseline_path)?;
        let current_content = std::fs::read_to_string(current_path)?;
        Ok(format!(
            "Compare these two terminal outputs and identify any differences.\n\n\
             ## Baseline Output (Expected)\n```\n{}\n```\n\n\
             ## Current Output\n```\n{}\n```\n\n{}",
            baseline_content, current_content, response_format
        ))
    } else {
        Ok(format!(
            "Compare two screenshots to detect visual regressions.\n\n\
             Baseline screenshot (expected state): {}\n\
             Current screenshot: {}\n\n\
             Use the Read tool to view both images, then analyze layout, \
             missing elements, colors, fonts, and spacing.\n\n{}",
            baseline_path.display(),
            current_path.display(),
            response_format
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::judge::JudgeConfig;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> BaselineStore {
        BaselineStore::open(dir.path(), JudgeClient::new(JudgeConfig::new("unused"))).unwrap()
    }

    fn terminal_profile(command: &str) -> AppProfile {
        AppProfile {
            kind: AppKind::Terminal,
            url: None,
            command: Some(command.to_string()),
            window_title: None,
            width: 1280,
            height: 720,
            wait_seconds: 0.0,
        }
    }

    #[test]
    #[cfg(unix)]
    fn save_creates_entry_and_backing_file() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let entry = store
            .save("smoke", &terminal_profile("echo baseline"), Some("first"))
            .unwrap();

        assert_eq!(entry.name, "smoke");
        assert_eq!(entry.app_type, "tui");
        assert!(store.baselines_dir().join(&entry.file).exists());
        assert_eq!(store.list().len(), 1);
    }

    #[test]
    #[cfg(unix)]
    fn save_is_last_write_wins_with_single_entry() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store
            .save("x", &terminal_profile("echo one"), None)
            .unwrap();
        let second = store
            .save("x", &terminal_profile("echo two"), None)
            .unwrap();

        let entries: Vec<BaselineEntry> = store
            .list()
            .into_iter()
            .filter(|b| b.name == "x")
            .collect();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].file, second.file);
        assert_eq!(entries[0].command.as_deref(), Some("echo two"));
    }

    #[test]
    #[cfg(unix)]
    fn delete_removes_entry_and_file_idempotently() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let entry = store
            .save("gone", &terminal_profile("echo bye"), None)
            .unwrap();
        let backing = store.baselines_dir().join(&entry.file);

        assert!(store.delete("gone").unwrap());
        assert!(!backing.exists());
        assert!(store.get("gone").is_none());
        // Second delete reports absence without erroring
        assert!(!store.delete("gone").unwrap());
    }

    #[test]
    fn compare_unknown_name_errors() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        match store.compare("missing", None) {
            Err(BaselineError::NotFound(name)) => assert_eq!(name, "missing"),
            other => panic!("expected NotFound, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn manifest_roundtrips_schema() {
        let manifest = Manifest {
            version: MANIFEST_VERSION.to_string(),
            baselines: vec![BaselineEntry {
                name: "n".to_string(),
                file: "n_1.png".to_string(),
                created: "2026-01-01T00:00:00Z".to_string(),
                app_type: "webapp".to_string(),
                url: Some("http://localhost:1".to_string()),
                command: None,
                description: None,
                width: 1280,
                height: 720,
            }],
        };
        let json = serde_json::to_string(&manifest).unwrap();
        assert!(json.contains("\"version\":\"1.0\""));
        let back: Manifest = serde_json::from_str(&json).unwrap();
        assert_eq!(back.baselines[0].name, "n");
    }
}
