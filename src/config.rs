use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Baseline image every fresh environment starts from.
const DEFAULT_BASELINE_IMAGE: &str = "rubyshadows/heartbeat:v1";

/// Registry namespace that per-user repositories live under.
const DEFAULT_NAMESPACE: &str = "rubyshadows";

const DEFAULT_LISTEN: &str = "127.0.0.1:7878";

/// Container runtime binary used for every adapter call
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ContainerRuntime {
    /// Docker (default)
    #[default]
    Docker,
    /// Podman
    Podman,
}

impl ContainerRuntime {
    pub fn binary(&self) -> &'static str {
        match self {
            ContainerRuntime::Docker => "docker",
            ContainerRuntime::Podman => "podman",
        }
    }
}

/// Per-call timeouts for the container runtime, in seconds
#[derive(Debug, Deserialize, Serialize, Default, Clone)]
pub struct TimeoutConfig {
    /// Image pull. Default: 300
    #[serde(default)]
    pub pull: Option<u64>,
    /// Image push. Default: 300
    #[serde(default)]
    pub push: Option<u64>,
    /// Container commit. Default: 120
    #[serde(default)]
    pub commit: Option<u64>,
    /// Starting a container, removing it, copying files in. Default: 60
    #[serde(default)]
    pub run: Option<u64>,
    /// Executing a payload inside a container. Default: 60
    #[serde(default)]
    pub exec: Option<u64>,
    /// Status and heartbeat probes. Default: 10
    #[serde(default)]
    pub probe: Option<u64>,
}

impl TimeoutConfig {
    pub fn pull(&self) -> Duration {
        Duration::from_secs(self.pull.unwrap_or(300))
    }

    pub fn push(&self) -> Duration {
        Duration::from_secs(self.push.unwrap_or(300))
    }

    pub fn commit(&self) -> Duration {
        Duration::from_secs(self.commit.unwrap_or(120))
    }

    pub fn run(&self) -> Duration {
        Duration::from_secs(self.run.unwrap_or(60))
    }

    pub fn exec(&self) -> Duration {
        Duration::from_secs(self.exec.unwrap_or(60))
    }

    pub fn probe(&self) -> Duration {
        Duration::from_secs(self.probe.unwrap_or(10))
    }

    fn merge(self, project: Self) -> Self {
        Self {
            pull: project.pull.or(self.pull),
            push: project.push.or(self.push),
            commit: project.commit.or(self.commit),
            run: project.run.or(self.run),
            exec: project.exec.or(self.exec),
            probe: project.probe.or(self.probe),
        }
    }
}

/// Configuration for nestbox, read from config.yaml / .nestbox.yaml
#[derive(Debug, Deserialize, Serialize, Default, Clone)]
pub struct Config {
    /// Container runtime. Default: docker
    #[serde(default)]
    pub runtime: Option<ContainerRuntime>,

    /// Registry namespace for per-user repositories. Default: "rubyshadows"
    #[serde(default)]
    pub namespace: Option<String>,

    /// Image used for fresh environments and trials
    #[serde(default)]
    pub baseline_image: Option<String>,

    /// JSON file holding users and their container versions
    #[serde(default)]
    pub store_path: Option<PathBuf>,

    /// Host directory where uploaded payloads are stored, one file per file id
    #[serde(default)]
    pub uploads_dir: Option<PathBuf>,

    /// Directory inside the container that payloads are copied to. Default: /sandbox
    #[serde(default)]
    pub sandbox_dir: Option<String>,

    /// File inside the container whose contents are the heartbeat. Default: /heart
    #[serde(default)]
    pub heartbeat_path: Option<String>,

    /// Address the request server binds to. Default: 127.0.0.1:7878
    #[serde(default)]
    pub listen: Option<String>,

    /// Adapter call timeouts
    #[serde(default)]
    pub timeouts: TimeoutConfig,
}

impl Config {
    /// Load and merge global and project configurations.
    pub fn load() -> anyhow::Result<Self> {
        debug!("config:loading");
        let global_config = Self::load_global()?.unwrap_or_default();
        let project_config = Self::load_project()?.unwrap_or_default();
        let config = global_config.merge(project_config);
        debug!(
            runtime = ?config.runtime(),
            namespace = config.namespace(),
            baseline = config.baseline_image(),
            "config:loaded"
        );
        Ok(config)
    }

    /// Load configuration from a specific path.
    pub fn load_from_path(path: &Path) -> anyhow::Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        debug!(path = %path.display(), "config:reading file");
        let contents = fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&contents)
            .map_err(|e| anyhow::anyhow!("Failed to parse config at {}: {}", path.display(), e))?;
        Ok(Some(config))
    }

    /// Load the global configuration file from the XDG config directory.
    fn load_global() -> anyhow::Result<Option<Self>> {
        if let Some(home_dir) = home::home_dir() {
            let xdg_config_path = home_dir.join(".config/nestbox/config.yaml");
            if xdg_config_path.exists() {
                return Self::load_from_path(&xdg_config_path);
            }
            let xdg_config_path_yml = home_dir.join(".config/nestbox/config.yml");
            if xdg_config_path_yml.exists() {
                return Self::load_from_path(&xdg_config_path_yml);
            }
        }
        Ok(None)
    }

    /// Load `.nestbox.yaml` (or `.yml`) from the current directory.
    fn load_project() -> anyhow::Result<Option<Self>> {
        let cwd = std::env::current_dir().unwrap_or_default();
        for name in [".nestbox.yaml", ".nestbox.yml"] {
            let path = cwd.join(name);
            if path.exists() {
                return Self::load_from_path(&path);
            }
        }
        Ok(None)
    }

    /// Merge a project config into a global config. Project config takes precedence.
    fn merge(self, project: Self) -> Self {
        Self {
            runtime: project.runtime.or(self.runtime),
            namespace: project.namespace.or(self.namespace),
            baseline_image: project.baseline_image.or(self.baseline_image),
            store_path: project.store_path.or(self.store_path),
            uploads_dir: project.uploads_dir.or(self.uploads_dir),
            sandbox_dir: project.sandbox_dir.or(self.sandbox_dir),
            heartbeat_path: project.heartbeat_path.or(self.heartbeat_path),
            listen: project.listen.or(self.listen),
            timeouts: self.timeouts.merge(project.timeouts),
        }
    }

    pub fn runtime(&self) -> ContainerRuntime {
        self.runtime.unwrap_or_default()
    }

    pub fn namespace(&self) -> &str {
        self.namespace.as_deref().unwrap_or(DEFAULT_NAMESPACE)
    }

    pub fn baseline_image(&self) -> &str {
        self.baseline_image
            .as_deref()
            .unwrap_or(DEFAULT_BASELINE_IMAGE)
    }

    /// Repository path for a user's environment images: `<namespace>/<user_id>`.
    pub fn repository_for(&self, user_id: &str) -> String {
        format!("{}/{}", self.namespace(), user_id)
    }

    pub fn store_path(&self) -> PathBuf {
        self.store_path
            .clone()
            .unwrap_or_else(|| state_dir().join("users.json"))
    }

    pub fn uploads_dir(&self) -> PathBuf {
        self.uploads_dir
            .clone()
            .unwrap_or_else(|| state_dir().join("uploads"))
    }

    pub fn sandbox_dir(&self) -> &str {
        self.sandbox_dir.as_deref().unwrap_or("/sandbox")
    }

    pub fn heartbeat_path(&self) -> &str {
        self.heartbeat_path.as_deref().unwrap_or("/heart")
    }

    pub fn listen(&self) -> &str {
        self.listen.as_deref().unwrap_or(DEFAULT_LISTEN)
    }
}

/// `$XDG_STATE_HOME/nestbox`, falling back to `~/.local/state/nestbox`, then `./.nestbox`.
pub fn state_dir() -> PathBuf {
    if let Ok(state_home) = std::env::var("XDG_STATE_HOME")
        && !state_home.is_empty()
    {
        return PathBuf::from(state_home).join("nestbox");
    }

    if let Some(home_dir) = home::home_dir() {
        return home_dir.join(".local").join("state").join("nestbox");
    }

    PathBuf::from(".nestbox")
}
