//! Durable registry of accepted captures.
//!
//! External producers (event-capture scripts, manual screenshots, a
//! watched directory) push files in; the store copies them under its own
//! directory, assigns a content-addressed id, and tracks verification
//! state in a JSON metadata document. The store is an explicitly
//! constructed instance; there is no process-wide singleton.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Metadata for one accepted capture
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureRecord {
    pub id: String,
    pub original_path: String,
    pub stored_path: String,
    #[serde(default)]
    pub event: String,
    #[serde(default)]
    pub description: String,
    pub timestamp: DateTime<Utc>,
    /// Producer tag: external, browser, process, ...
    #[serde(default = "default_source")]
    pub source: String,
    #[serde(default)]
    pub verified: bool,
    #[serde(default)]
    pub verification_result: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub custom: serde_json::Map<String, serde_json::Value>,
}

fn default_source() -> String {
    "external".to_string()
}

/// Error type for capture-store operations
#[derive(Debug)]
pub enum StoreError {
    /// The pushed file does not exist
    Missing(PathBuf),
    /// I/O error
    Io(std::io::Error),
    /// Metadata (de)serialization error
    Serialization(serde_json::Error),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Missing(path) => write!(f, "capture file not found: {}", path.display()),
            StoreError::Io(err) => write!(f, "I/O error: {}", err),
            StoreError::Serialization(err) => write!(f, "metadata error: {}", err),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Io(err) => Some(err),
            StoreError::Serialization(err) => Some(err),
            StoreError::Missing(_) => None,
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Io(err)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err)
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreDocument {
    captures: Vec<CaptureRecord>,
    #[serde(default)]
    updated: Option<DateTime<Utc>>,
}

/// File-backed capture store.
pub struct CaptureStore {
    base_dir: PathBuf,
    metadata_path: PathBuf,
    records: BTreeMap<String, CaptureRecord>,
}

impl CaptureStore {
    /// Open (or create) a store rooted at `base_dir`
    pub fn open(base_dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let base_dir = base_dir.into();
        std::fs::create_dir_all(&base_dir)?;
        let metadata_path = base_dir.join("captures.json");

        let mut records = BTreeMap::new();
        if metadata_path.exists() {
            let raw = std::fs::read_to_string(&metadata_path)?;
            if let Ok(doc) = serde_json::from_str::<StoreDocument>(&raw) {
                for record in doc.captures {
                    records.insert(record.id.clone(), record);
                }
            }
        }

        Ok(Self {
            base_dir,
            metadata_path,
            records,
        })
    }

    fn persist(&self) -> Result<(), StoreError> {
        let doc = StoreDocument {
            captures: self.records.values().cloned().collect(),
            updated: Some(Utc::now()),
        };
        let json = serde_json::to_string_pretty(&doc)?;
        let tmp = self.metadata_path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.metadata_path)?;
        Ok(())
    }

    /// Content-addressed id for a pushed capture
    fn generate_id(path: &Path) -> String {
        let mut hasher = Sha256::new();
        hasher.update(path.to_string_lossy().as_bytes());
        hasher.update(Utc::now().timestamp_micros().to_le_bytes());
        let digest = hasher.finalize();
        hex::encode(&digest[..6])
    }

    /// Accept a capture file into the store, copying it under the store
    /// directory and recording metadata.
    pub fn add(
        &mut self,
        path: impl AsRef<Path>,
        event: &str,
        description: &str,
        source: &str,
        tags: Vec<String>,
    ) -> Result<CaptureRecord, StoreError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(StoreError::Missing(path.to_path_buf()));
        }

        let id = Self::generate_id(path);
        let ext = path
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();
        let dest_name = format!("{}_{}{}", id, Utc::now().timestamp(), ext);
        let dest = self.base_dir.join(&dest_name);
        std::fs::copy(path, &dest)?;

        let record = CaptureRecord {
            id: id.clone(),
            original_path: path
                .canonicalize()
                .unwrap_or_else(|_| path.to_path_buf())
                .display()
                .to_string(),
            stored_path: dest.display().to_string(),
            event: event.to_string(),
            description: description.to_string(),
            timestamp: Utc::now(),
            source: source.to_string(),
            verified: false,
            verification_result: None,
            tags,
            custom: serde_json::Map::new(),
        };

        self.records.insert(id, record.clone());
        self.persist()?;
        Ok(record)
    }

    /// Import every not-yet-seen file from a watched directory
    pub fn sweep(&mut self, dir: impl AsRef<Path>, source: &str) -> Result<usize, StoreError> {
        let dir = dir.as_ref();
        if !dir.exists() {
            return Ok(0);
        }
        let known: Vec<String> = self
            .records
            .values()
            .map(|r| r.original_path.clone())
            .collect();

        let mut imported = 0;
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let canonical = path
                .canonicalize()
                .unwrap_or_else(|_| path.clone())
                .display()
                .to_string();
            if known.contains(&canonical) {
                continue;
            }
            self.add(&path, "swept", "", source, Vec::new())?;
            imported += 1;
        }
        Ok(imported)
    }

    pub fn get(&self, id: &str) -> Option<&CaptureRecord> {
        self.records.get(id)
    }

    pub fn all(&self) -> Vec<&CaptureRecord> {
        self.records.values().collect()
    }

    /// Captures not yet verified
    pub fn pending(&self) -> Vec<&CaptureRecord> {
        self.records.values().filter(|r| !r.verified).collect()
    }

    pub fn by_tag(&self, tag: &str) -> Vec<&CaptureRecord> {
        self.records
            .values()
            .filter(|r| r.tags.iter().any(|t| t == tag))
            .collect()
    }

    pub fn by_source(&self, source: &str) -> Vec<&CaptureRecord> {
        self.records
            .values()
            .filter(|r| r.source == source)
            .collect()
    }

    /// Stored file paths of every capture, oldest first
    pub fn paths(&self) -> Vec<PathBuf> {
        let mut records: Vec<&CaptureRecord> = self.records.values().collect();
        records.sort_by_key(|r| r.timestamp);
        records.iter().map(|r| PathBuf::from(&r.stored_path)).collect()
    }

    /// Record the verdict for a capture
    pub fn mark_verified(&mut self, id: &str, result: &str) -> Result<bool, StoreError> {
        match self.records.get_mut(id) {
            Some(record) => {
                record.verified = true;
                record.verification_result = Some(result.to_string());
                self.persist()?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Delete a capture and its backing file; absent ids return false
    pub fn delete(&mut self, id: &str) -> Result<bool, StoreError> {
        match self.records.remove(id) {
            Some(record) => {
                let path = PathBuf::from(&record.stored_path);
                if path.exists() {
                    std::fs::remove_file(&path)?;
                }
                self.persist()?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Remove every capture and backing file
    pub fn clear(&mut self) -> Result<usize, StoreError> {
        let count = self.records.len();
        for record in self.records.values() {
            let path = PathBuf::from(&record.stored_path);
            if path.exists() {
                let _ = std::fs::remove_file(&path);
            }
        }
        self.records.clear();
        self.persist()?;
        Ok(count)
    }
}
