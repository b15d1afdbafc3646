//! Container runtime abstraction.
//!
//! The lifecycle and orchestrators only ever talk to these traits, so the
//! Docker/Podman CLI backend can be swapped for an in-memory one in tests.

mod docker;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::error::PullError;
use crate::payload::ContentCategory;

pub use docker::DockerRuntime;

/// Reference to one running container instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentHandle {
    /// Runtime-assigned container id
    pub id: String,
    /// Runtime-assigned container name, used for exec/cp/inspect
    pub name: String,
    /// Image the instance was started from
    pub image: String,
}

/// What came back from executing a payload inside a sandbox.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub success: bool,
    /// Combined stdout and stderr
    pub output: String,
}

/// Remote image storage.
pub trait ImageRegistry: Send + Sync {
    /// Pull `repository:tag`, returning the local image reference
    fn pull(&self, repository: &str, tag: &str) -> std::result::Result<String, PullError>;

    /// Push `repository:tag` to the remote registry
    fn push(&self, repository: &str, tag: &str) -> Result<()>;
}

/// Container instance lifecycle primitives.
pub trait Runtime: Send + Sync {
    /// Returns the name of this backend (e.g., "docker", "podman")
    fn name(&self) -> &'static str;

    /// Start a detached instance of `image`
    fn run_detached(&self, image: &str) -> Result<EnvironmentHandle>;

    /// Snapshot the instance's filesystem as `repository:tag`
    fn commit(
        &self,
        handle: &EnvironmentHandle,
        repository: &str,
        author: &str,
        tag: &str,
    ) -> Result<()>;

    /// Remove the instance, killing it first when `force` is set
    fn remove(&self, handle: &EnvironmentHandle, force: bool) -> Result<()>;

    /// Whether the named instance exists and reports status "running"
    fn is_running(&self, name: &str) -> Result<bool>;
}

/// File transfer, execution and heartbeat inside a running instance.
pub trait SandboxIo: Send + Sync {
    /// Copy the uploaded file `file_id` into the instance as `file_name`.
    /// Ok(false) means the copy was attempted and failed.
    fn copy_file(&self, instance: &str, file_id: &str, file_name: &str) -> Result<bool>;

    /// Execute a previously copied file according to its category
    fn execute(
        &self,
        instance: &str,
        file_name: &str,
        category: ContentCategory,
    ) -> Result<ExecOutput>;

    /// Read the in-sandbox heartbeat signal, None if absent
    fn probe_heartbeat(&self, instance: &str) -> Result<Option<String>>;
}
