//! Persisted supervisor state.
//!
//! A single JSON document at `<hunDir>/state.json` holds the project
//! registry, per-project runtime records, the active project, and the mode.
//! Every mutation rewrites the whole document atomically (temp file plus
//! rename) under an advisory file lock, so readers observe either the
//! previous valid document or the new one.

use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    fs::{self, OpenOptions},
    io::Write,
    path::PathBuf,
    sync::Mutex,
};
use strum_macros::{AsRefStr, Display};

use crate::error::StateError;
use crate::runtime;

/// Current schema version of the state document.
pub const SCHEMA_VERSION: u32 = 2;

/// Supervisor mode: one project on its base ports, or several with offsets.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, Display, Default,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Mode {
    /// Exactly one project occupying its declared base ports.
    Focus,
    /// Several projects coexisting via per-project port offsets.
    #[default]
    Multitask,
}

/// Lifecycle status of a project runtime record.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, Display, Default,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ProjectStatus {
    /// All services were started and the project has not been stopped.
    Running,
    /// The project was stopped cleanly.
    #[default]
    Stopped,
    /// Every service exited without being asked to.
    Crashed,
}

/// Lifecycle status of a single service row.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, Display, Default,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ServiceStatus {
    /// The child process is running.
    Running,
    /// The child was stopped intentionally.
    #[default]
    Stopped,
    /// The child exited without being asked to.
    Crashed,
}

/// Persisted row for one service of a running project.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ServiceRecord {
    /// PID of the child process; 0 when stopped.
    #[serde(default)]
    pub pid: u32,
    /// Actual port the service is bound to (offset applied).
    #[serde(default)]
    pub port: u16,
    /// Current lifecycle status.
    #[serde(default)]
    pub status: ServiceStatus,
}

/// Persisted runtime record for one project.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProjectRecord {
    /// Current lifecycle status.
    #[serde(default)]
    pub status: ProjectStatus,
    /// Allocated port offset; 0 in focus mode.
    #[serde(default)]
    pub offset: u16,
    /// Project directory, stored redundantly for recovery robustness.
    #[serde(default)]
    pub path: String,
    /// UTC timestamp of the last successful start.
    #[serde(default)]
    pub started_at: String,
    /// Per-service runtime rows.
    #[serde(default)]
    pub services: HashMap<String, ServiceRecord>,
    /// Runtime-inferred base ports, pre-offset, applied on later starts.
    #[serde(default)]
    pub port_overrides: HashMap<String, u16>,
    /// Git branch captured when the project was last stopped.
    #[serde(default)]
    pub git_branch: String,
    /// Opaque note attached by clients.
    #[serde(default)]
    pub last_note: String,
}

/// The whole persisted document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateDoc {
    /// Document schema version.
    pub schema_version: u32,
    /// Current supervisor mode.
    #[serde(default)]
    pub mode: Mode,
    /// Name of the active project; may be empty.
    #[serde(default)]
    pub active_project: String,
    /// Runtime records keyed by project name.
    #[serde(default)]
    pub projects: HashMap<String, ProjectRecord>,
    /// Registry of known projects: name to absolute directory path.
    #[serde(default)]
    pub registry: HashMap<String, String>,
}

impl Default for StateDoc {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            mode: Mode::Multitask,
            active_project: String::new(),
            projects: HashMap::new(),
            registry: HashMap::new(),
        }
    }
}

/// Store guarding the persisted document behind a dedicated lock.
///
/// Mutations are load-modify-save cycles under an advisory file lock, so
/// the supervisor and short-lived CLI invocations (registry add/remove) can
/// share the document without clobbering each other. All reads hand out
/// deep copies; consumers never alias the live document.
pub struct StateStore {
    cache: Mutex<StateDoc>,
    path: PathBuf,
}

impl StateStore {
    /// Opens the store, loading `state.json` if present.
    ///
    /// A missing file yields the default document. Documents written by
    /// older builds are upgraded to the current schema in memory; documents
    /// from newer builds are rejected.
    pub fn open() -> Result<Self, StateError> {
        let path = runtime::state_path();
        let doc = if path.exists() {
            let raw = fs::read_to_string(&path)?;
            let mut doc: StateDoc = serde_json::from_str(&raw)?;
            if doc.schema_version > SCHEMA_VERSION {
                return Err(StateError::UnsupportedSchema(doc.schema_version));
            }
            doc.schema_version = SCHEMA_VERSION;
            doc
        } else {
            StateDoc::default()
        };

        Ok(Self {
            cache: Mutex::new(doc),
            path,
        })
    }

    /// Reads the document from disk, ignoring unreadable or foreign files.
    fn load_disk(&self) -> Option<StateDoc> {
        let raw = fs::read_to_string(&self.path).ok()?;
        let mut doc: StateDoc = serde_json::from_str(&raw).ok()?;
        if doc.schema_version > SCHEMA_VERSION {
            return None;
        }
        doc.schema_version = SCHEMA_VERSION;
        Some(doc)
    }

    /// Returns a deep copy of the current document, refreshed from disk
    /// when possible so registry changes from other processes are seen.
    pub fn snapshot(&self) -> StateDoc {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(disk) = self.load_disk() {
            *cache = disk;
        }
        cache.clone()
    }

    /// Applies `mutate` to the freshest document and persists the result
    /// atomically (temp file + rename) under the file lock.
    pub fn update<F>(&self, mutate: F) -> Result<(), StateError>
    where
        F: FnOnce(&mut StateDoc),
    {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let lock_path = self.path.with_extension("json.lock");
        let lock_file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)?;
        lock_file.lock_exclusive()?;

        let result = (|| -> Result<(), StateError> {
            let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(disk) = self.load_disk() {
                *cache = disk;
            }
            mutate(&mut cache);

            let payload = serde_json::to_vec_pretty(&*cache)?;
            let tmp_path = self.path.with_extension("json.tmp");
            let mut tmp = fs::File::create(&tmp_path)?;
            tmp.write_all(&payload)?;
            tmp.sync_all()?;
            fs::rename(&tmp_path, &self.path)?;
            Ok(())
        })();

        let _ = fs2::FileExt::unlock(&lock_file);
        result
    }
}
