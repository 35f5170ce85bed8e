//! Project state and generated-file persistence.
//!
//! Both stores are keyed-blob collaborators: no transactions, last-write-wins
//! per key. [`FsStore`] lays projects out as
//! `<root>/<account>/<project>/<path>/<name>` with three reserved management
//! keys at the project root; [`MemoryStore`] backs tests.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::manifest::{FileManifest, FunctionCallChart};

/// Reserved key: human-readable chart rendering.
pub const CHART_FILE: &str = "function_call_chart.txt";
/// Reserved key: parsed file manifest JSON.
pub const MANIFEST_FILE: &str = "code_structure.json";
/// Reserved key: serialized project state.
pub const STATE_FILE: &str = "project_data.json";

/// Management keys excluded from file listings.
pub const RESERVED_FILES: [&str; 3] = [CHART_FILE, MANIFEST_FILE, STATE_FILE];

/// Identity of a project: both parts are opaque strings supplied by the
/// caller. Passed explicitly through every pipeline call - there is no
/// process-wide current project.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProjectKey {
    pub account: String,
    pub project: String,
}

impl ProjectKey {
    pub fn new(account: impl Into<String>, project: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            project: project.into(),
        }
    }
}

/// Everything the pipeline knows about one project.
///
/// `last_model_response` is the untouched text of the most recent chart-stage
/// call; the derived chart and manifest are reproducible by re-running the
/// extractor over it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProjectState {
    pub description: String,
    pub flowchart: String,
    #[serde(default)]
    pub last_model_response: Option<String>,
    #[serde(default)]
    pub function_call_chart: Option<FunctionCallChart>,
    #[serde(default)]
    pub file_manifest: Option<FileManifest>,
}

impl ProjectState {
    pub fn new(description: impl Into<String>, flowchart: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            flowchart: flowchart.into(),
            last_model_response: None,
            function_call_chart: None,
            file_manifest: None,
        }
    }

    /// Whether a chart has been requested for this project before.
    pub fn has_prior_request(&self) -> bool {
        self.last_model_response.is_some()
    }
}

/// A (path, name) pair identifying one generated file within a project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRef {
    pub path: String,
    pub fname: String,
}

impl FileRef {
    /// Stable identity within one project: `path/fname`, or just `fname` at
    /// the project root. Same form as the manifest entry identity.
    pub fn file_id(&self) -> String {
        let path = self.path.trim_matches('/');
        if path.is_empty() {
            self.fname.clone()
        } else {
            format!("{}/{}", path, self.fname)
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("invalid store key: {0}")]
    InvalidKey(String),
}

/// Project state store: keyed by (account, project), no transactions,
/// last-write-wins.
#[async_trait]
pub trait ProjectStore: Send + Sync {
    async fn get(&self, key: &ProjectKey) -> Result<Option<ProjectState>, StoreError>;
    async fn put(&self, key: &ProjectKey, state: &ProjectState) -> Result<(), StoreError>;
}

/// Generated-file store. `list` excludes the reserved management keys.
#[async_trait]
pub trait FileStore: Send + Sync {
    async fn write(
        &self,
        key: &ProjectKey,
        path: &str,
        name: &str,
        content: &str,
    ) -> Result<(), StoreError>;

    async fn read(
        &self,
        key: &ProjectKey,
        path: &str,
        name: &str,
    ) -> Result<Option<String>, StoreError>;

    async fn list(&self, key: &ProjectKey) -> Result<Vec<FileRef>, StoreError>;
}

// =============================================================================
// FILESYSTEM STORE
// =============================================================================

/// Filesystem-backed store rooted at a directory.
#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn project_dir(&self, key: &ProjectKey) -> Result<PathBuf, StoreError> {
        check_component(&key.account)?;
        check_component(&key.project)?;
        Ok(self.root.join(&key.account).join(&key.project))
    }

    fn file_path(&self, key: &ProjectKey, path: &str, name: &str) -> Result<PathBuf, StoreError> {
        check_relative(path)?;
        check_component(name)?;
        let mut full = self.project_dir(key)?;
        let path = path.trim_matches('/');
        if !path.is_empty() {
            full = full.join(path);
        }
        Ok(full.join(name))
    }
}

/// Account/project/file names must be single, non-traversing components.
fn check_component(s: &str) -> Result<(), StoreError> {
    if s.is_empty() || s == ".." || s.contains('/') || s.contains('\\') {
        return Err(StoreError::InvalidKey(s.to_string()));
    }
    Ok(())
}

/// Relative directories may nest but never escape the project.
fn check_relative(path: &str) -> Result<(), StoreError> {
    if path.starts_with('/') || path.contains('\\') {
        return Err(StoreError::InvalidKey(path.to_string()));
    }
    if Path::new(path)
        .components()
        .any(|c| c.as_os_str() == "..")
    {
        return Err(StoreError::InvalidKey(path.to_string()));
    }
    Ok(())
}

#[async_trait]
impl ProjectStore for FsStore {
    async fn get(&self, key: &ProjectKey) -> Result<Option<ProjectState>, StoreError> {
        let path = self.project_dir(key)?.join(STATE_FILE);
        match tokio::fs::read_to_string(&path).await {
            Ok(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, key: &ProjectKey, state: &ProjectState) -> Result<(), StoreError> {
        let dir = self.project_dir(key)?;
        tokio::fs::create_dir_all(&dir).await?;
        let raw = serde_json::to_string(state)?;
        tokio::fs::write(dir.join(STATE_FILE), raw).await?;
        Ok(())
    }
}

#[async_trait]
impl FileStore for FsStore {
    async fn write(
        &self,
        key: &ProjectKey,
        path: &str,
        name: &str,
        content: &str,
    ) -> Result<(), StoreError> {
        let full = self.file_path(key, path, name)?;
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&full, content).await?;
        Ok(())
    }

    async fn read(
        &self,
        key: &ProjectKey,
        path: &str,
        name: &str,
    ) -> Result<Option<String>, StoreError> {
        let full = self.file_path(key, path, name)?;
        match tokio::fs::read_to_string(&full).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, key: &ProjectKey) -> Result<Vec<FileRef>, StoreError> {
        let root = self.project_dir(key)?;
        if !root.exists() {
            return Ok(Vec::new());
        }

        let mut files = Vec::new();
        let mut pending = vec![root.clone()];
        while let Some(dir) = pending.pop() {
            let mut entries = tokio::fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let entry_path = entry.path();
                if entry.file_type().await?.is_dir() {
                    pending.push(entry_path);
                    continue;
                }
                let fname = entry.file_name().to_string_lossy().to_string();
                let rel_dir = entry_path
                    .parent()
                    .and_then(|p| p.strip_prefix(&root).ok())
                    .map(|p| p.to_string_lossy().to_string())
                    .unwrap_or_default();
                if rel_dir.is_empty() && RESERVED_FILES.contains(&fname.as_str()) {
                    continue;
                }
                files.push(FileRef {
                    path: rel_dir,
                    fname,
                });
            }
        }
        files.sort_by(|a, b| (&a.path, &a.fname).cmp(&(&b.path, &b.fname)));
        Ok(files)
    }
}

// =============================================================================
// IN-MEMORY STORE
// =============================================================================

/// In-memory store for tests and ephemeral runs.
#[derive(Default)]
pub struct MemoryStore {
    states: Mutex<HashMap<ProjectKey, ProjectState>>,
    files: Mutex<HashMap<(ProjectKey, String, String), String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProjectStore for MemoryStore {
    async fn get(&self, key: &ProjectKey) -> Result<Option<ProjectState>, StoreError> {
        Ok(self.states.lock().expect("poisoned").get(key).cloned())
    }

    async fn put(&self, key: &ProjectKey, state: &ProjectState) -> Result<(), StoreError> {
        self.states
            .lock()
            .expect("poisoned")
            .insert(key.clone(), state.clone());
        Ok(())
    }
}

#[async_trait]
impl FileStore for MemoryStore {
    async fn write(
        &self,
        key: &ProjectKey,
        path: &str,
        name: &str,
        content: &str,
    ) -> Result<(), StoreError> {
        check_relative(path)?;
        check_component(name)?;
        self.files.lock().expect("poisoned").insert(
            (
                key.clone(),
                path.trim_matches('/').to_string(),
                name.to_string(),
            ),
            content.to_string(),
        );
        Ok(())
    }

    async fn read(
        &self,
        key: &ProjectKey,
        path: &str,
        name: &str,
    ) -> Result<Option<String>, StoreError> {
        Ok(self
            .files
            .lock()
            .expect("poisoned")
            .get(&(
                key.clone(),
                path.trim_matches('/').to_string(),
                name.to_string(),
            ))
            .cloned())
    }

    async fn list(&self, key: &ProjectKey) -> Result<Vec<FileRef>, StoreError> {
        let files = self.files.lock().expect("poisoned");
        let mut refs: Vec<FileRef> = files
            .keys()
            .filter(|(k, _, name)| k == key && !RESERVED_FILES.contains(&name.as_str()))
            .map(|(_, path, name)| FileRef {
                path: path.clone(),
                fname: name.clone(),
            })
            .collect();
        refs.sort_by(|a, b| (&a.path, &a.fname).cmp(&(&b.path, &b.fname)));
        Ok(refs)
    }
}
