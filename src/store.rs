//! User identities and their environment version counters.
//!
//! The lifecycle only reads a user and writes back the counter; everything
//! else about users belongs to whatever owns the store.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    /// Used as the commit author
    pub name: String,
    /// Version of the last persisted environment snapshot
    #[serde(default)]
    pub container_version: u64,
}

/// Lookup and version-counter persistence for users.
///
/// Implementations must be Send + Sync to allow sharing via Arc<dyn VersionStore>.
pub trait VersionStore: Send + Sync {
    /// Return the user, or None if no such user exists
    fn get_user(&self, id: &str) -> Result<Option<User>>;

    /// Persist a new version counter for an existing user
    fn set_version_counter(&self, id: &str, version: u64) -> Result<()>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct UserFile {
    #[serde(default)]
    users: BTreeMap<String, StoredUser>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredUser {
    name: String,
    #[serde(default)]
    container_version: u64,
}

/// Version store backed by a single JSON file.
///
/// Every write rewrites the whole file through a temp file in the same
/// directory followed by a rename, so readers never see a torn file.
pub struct JsonVersionStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonVersionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<UserFile> {
        if !self.path.exists() {
            return Ok(UserFile::default());
        }
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read user store {}", self.path.display()))?;
        if contents.trim().is_empty() {
            return Ok(UserFile::default());
        }
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse user store {}", self.path.display()))
    }

    fn write(&self, file: &UserFile) -> Result<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create store directory {}", dir.display()))?;

        let json = serde_json::to_string_pretty(file).context("Failed to serialize user store")?;
        let mut tmp = tempfile::NamedTempFile::new_in(&dir)
            .context("Failed to create temporary store file")?;
        tmp.write_all(json.as_bytes())
            .context("Failed to write temporary store file")?;
        tmp.persist(&self.path)
            .with_context(|| format!("Failed to replace user store {}", self.path.display()))?;
        Ok(())
    }

    /// Create or rename a user. An existing user keeps their version counter.
    pub fn upsert_user(&self, id: &str, name: &str) -> Result<User> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut file = self.read()?;
        let entry = file
            .users
            .entry(id.to_string())
            .and_modify(|u| u.name = name.to_string())
            .or_insert_with(|| StoredUser {
                name: name.to_string(),
                container_version: 0,
            })
            .clone();
        self.write(&file)?;
        debug!(user_id = id, version = entry.container_version, "store:upsert");
        Ok(User {
            id: id.to_string(),
            name: entry.name,
            container_version: entry.container_version,
        })
    }
}

impl VersionStore for JsonVersionStore {
    fn get_user(&self, id: &str) -> Result<Option<User>> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let file = self.read()?;
        Ok(file.users.get(id).map(|u| User {
            id: id.to_string(),
            name: u.name.clone(),
            container_version: u.container_version,
        }))
    }

    fn set_version_counter(&self, id: &str, version: u64) -> Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut file = self.read()?;
        let user = file
            .users
            .get_mut(id)
            .with_context(|| format!("Cannot set version for unknown user {id}"))?;
        user.container_version = version;
        self.write(&file)?;
        debug!(user_id = id, version, "store:set version");
        Ok(())
    }
}
