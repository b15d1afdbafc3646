//! Per-user sandbox environments: lifecycle, execution and trials.
//!
//! [`Nest`] wires the three components to one shared
//! [`EnvironmentRegistry`] and one set of runtime collaborators.

mod execution;
mod lifecycle;
mod registry;
mod score;
mod trial;

use anyhow::Result;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

use crate::config::Config;
use crate::runtime::{DockerRuntime, ImageRegistry, Runtime, SandboxIo};
use crate::store::{JsonVersionStore, VersionStore};

pub use execution::{ExecutionOrchestrator, ExecutionResult};
pub use lifecycle::{DiscardOutcome, LifecycleManager, PersistOutcome};
pub use registry::EnvironmentRegistry;
pub use score::{Liveness, TrialScore};
pub use trial::TrialOrchestrator;

/// Everything a request handler needs, shared across connection threads.
pub struct Nest {
    pub registry: Arc<EnvironmentRegistry>,
    pub lifecycle: LifecycleManager,
    pub execution: ExecutionOrchestrator,
    pub trials: TrialOrchestrator,
    closing: AtomicBool,
}

impl Nest {
    /// Assemble from explicit collaborators.
    pub fn new(
        config: &Config,
        store: Arc<dyn VersionStore>,
        images: Arc<dyn ImageRegistry>,
        runtime: Arc<dyn Runtime>,
        sandbox: Arc<dyn SandboxIo>,
    ) -> Self {
        let registry = Arc::new(EnvironmentRegistry::new());
        debug!(runtime = runtime.name(), "nest:created");
        Self {
            lifecycle: LifecycleManager::new(
                config,
                Arc::clone(&registry),
                store,
                images,
                Arc::clone(&runtime),
            ),
            execution: ExecutionOrchestrator::new(
                Arc::clone(&registry),
                Arc::clone(&runtime),
                Arc::clone(&sandbox),
            ),
            trials: TrialOrchestrator::new(config.baseline_image(), runtime, sandbox),
            registry,
            closing: AtomicBool::new(false),
        }
    }

    /// Whether [`shutdown`](Self::shutdown) has started. Request handlers
    /// refuse to create environments or run payloads once it has.
    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    /// Stop accepting new work and discard every live environment.
    ///
    /// Repeats until the registry is empty, so an acquire that was already
    /// in flight when shutdown began is discarded too once it registers.
    pub fn shutdown(&self) -> usize {
        self.closing.store(true, Ordering::SeqCst);
        let mut discarded = 0;
        loop {
            discarded += self.lifecycle.shutdown();
            if self.registry.is_empty() {
                break;
            }
            debug!(remaining = self.registry.len(), "nest:shutdown another pass");
        }
        info!(discarded, "nest:shutdown done");
        discarded
    }

    /// Docker/Podman CLI backend plus the JSON user store named in config.
    pub fn from_config(config: &Config) -> Result<Self> {
        let docker = Arc::new(DockerRuntime::from_config(config)?);
        let store = Arc::new(JsonVersionStore::new(config.store_path()));
        Ok(Self::new(
            config,
            store,
            docker.clone(),
            docker.clone(),
            docker,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::PayloadDescriptor;
    use crate::testing::{FakeWorld, test_config};

    fn nest(world: &Arc<FakeWorld>) -> Nest {
        Nest::new(
            &test_config(),
            world.clone(),
            world.clone(),
            world.clone(),
            world.clone(),
        )
    }

    #[test]
    fn test_components_share_one_registry() {
        let world = FakeWorld::new();
        world.add_user("u1", "Una", 0);
        let nest = nest(&world);

        let handle = nest.lifecycle.acquire("u1", None).unwrap();
        assert_eq!(nest.registry.get("u1"), Some(handle));

        let result = nest
            .execution
            .run("u1", &PayloadDescriptor::new("f", "x.sh", "bash"))
            .unwrap();
        assert_eq!(result.liveness(), Liveness::Healthy);
    }

    #[test]
    fn test_shutdown_discards_and_closes() {
        let world = FakeWorld::new();
        world.add_user("a", "A", 0);
        world.add_user("b", "B", 0);
        let nest = nest(&world);
        nest.lifecycle.bootstrap("a").unwrap();
        nest.lifecycle.acquire("b", None).unwrap();
        assert!(!nest.is_closing());

        assert_eq!(nest.shutdown(), 2);
        assert!(nest.is_closing());
        assert!(nest.registry.is_empty());
        assert_eq!(world.live_instances(), 0);
    }

    #[test]
    fn test_trial_leaves_registry_untouched() {
        let world = FakeWorld::new();
        world.add_user("u1", "Una", 0);
        let nest = nest(&world);
        let handle = nest.lifecycle.bootstrap("u1").unwrap();

        nest.trials
            .trial(&PayloadDescriptor::new("f", "x.py", "python"))
            .unwrap();

        assert_eq!(nest.registry.snapshot(), vec![("u1".to_string(), handle)]);
        assert_eq!(world.live_instances(), 1);
    }
}
