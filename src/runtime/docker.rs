//! Docker/Podman CLI backend.

use anyhow::{Context, Result, anyhow};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};

use super::{EnvironmentHandle, ExecOutput, ImageRegistry, Runtime, SandboxIo};
use crate::cmd::{self, Cmd};
use crate::config::{Config, ContainerRuntime, TimeoutConfig};
use crate::error::PullError;
use crate::payload::ContentCategory;

/// stderr fragments that mean the requested image does not exist remotely.
const NOT_FOUND_MARKERS: &[&str] = &[
    "not found",
    "manifest unknown",
    "pull access denied",
    "repository does not exist",
    "name unknown",
];

/// stderr fragments that mean the registry or daemon could not be reached.
const UNAVAILABLE_MARKERS: &[&str] = &[
    "cannot connect",
    "connection refused",
    "timeout",
    "no such host",
    "tls handshake",
    "service unavailable",
    "network is unreachable",
    "i/o timeout",
];

/// Sort a failed pull into NotFound / Unavailable / Other by its stderr.
fn classify_pull_failure(reference: &str, stderr: &str) -> PullError {
    let lower = stderr.to_lowercase();
    if NOT_FOUND_MARKERS.iter().any(|m| lower.contains(m)) {
        return PullError::NotFound(reference.to_string());
    }
    if UNAVAILABLE_MARKERS.iter().any(|m| lower.contains(m)) {
        return PullError::Unavailable(stderr.trim().to_string());
    }
    PullError::Other(anyhow!("pull {} failed: {}", reference, stderr.trim()))
}

/// Arguments after the runtime binary for executing `path` inside `instance`.
fn exec_args(instance: &str, path: &str, category: ContentCategory) -> Vec<String> {
    let mut args = vec!["exec".to_string(), instance.to_string()];
    match category {
        ContentCategory::Python => {
            args.push("python3".to_string());
            args.push(path.to_string());
        }
        ContentCategory::Bash => {
            args.push("bash".to_string());
            args.push(path.to_string());
        }
        ContentCategory::Other => {
            // The path is passed as $0 so it never needs shell quoting
            args.push("sh".to_string());
            args.push("-c".to_string());
            args.push(r#"chmod +x "$0" && exec "$0""#.to_string());
            args.push(path.to_string());
        }
    }
    args
}

/// Host path of an uploaded file. None unless `file_id` is a plain relative
/// path that stays inside `uploads_dir`.
fn upload_source(uploads_dir: &Path, file_id: &str) -> Option<PathBuf> {
    let id = Path::new(file_id);
    let mut components = id.components().peekable();
    components.peek()?;
    if components.all(|c| matches!(c, Component::Normal(_))) {
        Some(uploads_dir.join(id))
    } else {
        None
    }
}

fn sandbox_path(sandbox_dir: &str, file_name: &str) -> String {
    format!("{}/{}", sandbox_dir.trim_end_matches('/'), file_name)
}

/// Drives containers through the `docker` (or `podman`) CLI.
pub struct DockerRuntime {
    kind: ContainerRuntime,
    binary: String,
    timeouts: TimeoutConfig,
    uploads_dir: PathBuf,
    sandbox_dir: String,
    heartbeat_path: String,
}

impl DockerRuntime {
    /// Build a backend from config, failing if the runtime binary is not on PATH.
    pub fn from_config(config: &Config) -> Result<Self> {
        let kind = config.runtime();
        let binary = which::which(kind.binary())
            .with_context(|| format!("{} not found on PATH", kind.binary()))?;
        debug!(binary = %binary.display(), "docker:runtime located");
        Ok(Self {
            kind,
            binary: binary.to_string_lossy().into_owned(),
            timeouts: config.timeouts.clone(),
            uploads_dir: config.uploads_dir(),
            sandbox_dir: config.sandbox_dir().to_string(),
            heartbeat_path: config.heartbeat_path().to_string(),
        })
    }

    fn cmd(&self) -> Cmd<'_> {
        Cmd::new(&self.binary)
    }
}

impl ImageRegistry for DockerRuntime {
    fn pull(&self, repository: &str, tag: &str) -> std::result::Result<String, PullError> {
        let reference = format!("{}:{}", repository, tag);
        info!(reference = %reference, "docker:pull start");

        let output = match self
            .cmd()
            .args(&["pull", &reference])
            .timeout(self.timeouts.pull())
            .output()
        {
            Ok(output) => output,
            Err(e) if cmd::is_timeout(&e) => return Err(PullError::Unavailable(e.to_string())),
            Err(e) => return Err(PullError::Other(e)),
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            debug!(reference = %reference, stderr = %stderr.trim(), "docker:pull failure");
            return Err(classify_pull_failure(&reference, &stderr));
        }

        info!(reference = %reference, "docker:pull done");
        Ok(reference)
    }

    fn push(&self, repository: &str, tag: &str) -> Result<()> {
        let reference = format!("{}:{}", repository, tag);
        info!(reference = %reference, "docker:push start");
        self.cmd()
            .args(&["push", &reference])
            .timeout(self.timeouts.push())
            .run()
            .with_context(|| format!("Failed to push {}", reference))?;
        info!(reference = %reference, "docker:push done");
        Ok(())
    }
}

impl Runtime for DockerRuntime {
    fn name(&self) -> &'static str {
        self.kind.binary()
    }

    fn run_detached(&self, image: &str) -> Result<EnvironmentHandle> {
        let id = self
            .cmd()
            .args(&["run", "-d", image])
            .timeout(self.timeouts.run())
            .run_and_capture_stdout()
            .with_context(|| format!("Failed to start container from {}", image))?;

        let name = match self
            .cmd()
            .args(&["inspect", "--format", "{{.Name}}", &id])
            .timeout(self.timeouts.probe())
            .run_and_capture_stdout()
        {
            Ok(name) => name.trim_start_matches('/').to_string(),
            Err(e) => {
                // No handle escapes on this path, so nobody else can remove it
                if let Err(rm) = self
                    .cmd()
                    .args(&["rm", "-f", &id])
                    .timeout(self.timeouts.run())
                    .run()
                {
                    warn!(id = %id, error = ?rm, "docker:run cleanup failed, container may be leaked");
                }
                return Err(e.context(format!("Failed to inspect container {}", id)));
            }
        };

        debug!(id = %id, name = %name, image, "docker:run done");
        Ok(EnvironmentHandle {
            id,
            name,
            image: image.to_string(),
        })
    }

    fn commit(
        &self,
        handle: &EnvironmentHandle,
        repository: &str,
        author: &str,
        tag: &str,
    ) -> Result<()> {
        let reference = format!("{}:{}", repository, tag);
        self.cmd()
            .args(&["commit", "--author", author, &handle.id, &reference])
            .timeout(self.timeouts.commit())
            .run()
            .with_context(|| format!("Failed to commit {} as {}", handle.name, reference))?;
        debug!(name = %handle.name, reference = %reference, "docker:commit done");
        Ok(())
    }

    fn remove(&self, handle: &EnvironmentHandle, force: bool) -> Result<()> {
        let mut cmd = self.cmd().arg("rm");
        if force {
            cmd = cmd.arg("-f");
        }
        cmd.arg(&handle.id)
            .timeout(self.timeouts.run())
            .run()
            .with_context(|| format!("Failed to remove container {}", handle.name))?;
        debug!(name = %handle.name, force, "docker:rm done");
        Ok(())
    }

    fn is_running(&self, name: &str) -> Result<bool> {
        let output = self
            .cmd()
            .args(&["inspect", "--format", "{{.State.Status}}", name])
            .timeout(self.timeouts.probe())
            .output()?;
        if !output.status.success() {
            // No such container
            return Ok(false);
        }
        let status = String::from_utf8_lossy(&output.stdout);
        Ok(status.trim() == "running")
    }
}

impl SandboxIo for DockerRuntime {
    fn copy_file(&self, instance: &str, file_id: &str, file_name: &str) -> Result<bool> {
        let Some(source) = upload_source(&self.uploads_dir, file_id) else {
            warn!(file_id, "docker:cp rejected file id outside uploads directory");
            return Ok(false);
        };
        if !source.is_file() {
            warn!(file_id, source = %source.display(), "docker:cp source missing");
            return Ok(false);
        }

        let made_dir = self
            .cmd()
            .args(&["exec", instance, "mkdir", "-p", &self.sandbox_dir])
            .timeout(self.timeouts.run())
            .run_as_check()?;
        if !made_dir {
            return Ok(false);
        }

        let source = source.to_string_lossy();
        let target = format!(
            "{}:{}",
            instance,
            sandbox_path(&self.sandbox_dir, file_name)
        );
        self.cmd()
            .args(&["cp", &source, &target])
            .timeout(self.timeouts.run())
            .run_as_check()
    }

    fn execute(
        &self,
        instance: &str,
        file_name: &str,
        category: ContentCategory,
    ) -> Result<ExecOutput> {
        let path = sandbox_path(&self.sandbox_dir, file_name);
        let args = exec_args(instance, &path, category);
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();

        let output = self
            .cmd()
            .args(&arg_refs)
            .timeout(self.timeouts.exec())
            .output()?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(ExecOutput {
            success: output.status.success(),
            output: combined,
        })
    }

    fn probe_heartbeat(&self, instance: &str) -> Result<Option<String>> {
        let output = self
            .cmd()
            .args(&["exec", instance, "cat", &self.heartbeat_path])
            .timeout(self.timeouts.probe())
            .output()?;
        if !output.status.success() {
            return Ok(None);
        }
        let beat = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok(Some(beat).filter(|b| !b.is_empty()))
    }
}
