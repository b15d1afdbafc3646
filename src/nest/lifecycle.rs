use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::registry::EnvironmentRegistry;
use crate::config::Config;
use crate::error::{NestError, NestResult};
use crate::runtime::{EnvironmentHandle, ImageRegistry, Runtime};
use crate::store::VersionStore;

/// Result of a persist attempt that did not hit an adapter error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistOutcome {
    /// Committed and pushed under this version tag
    Saved { version: u64 },
    NoUser,
    NoLiveEnvironment,
}

/// Result of a discard. Persist problems are reported here rather than
/// aborting the discard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscardOutcome {
    NothingLive,
    Discarded {
        name: String,
        saved_version: Option<u64>,
        persist_error: Option<String>,
    },
}

/// Decides whether a user's environment is reused, pulled or bootstrapped,
/// and makes sure every live environment is saved before it is removed.
///
/// Every public operation runs under the user's registry lock, so two
/// requests for the same user never interleave their discard/create steps.
pub struct LifecycleManager {
    config: Config,
    registry: Arc<EnvironmentRegistry>,
    store: Arc<dyn VersionStore>,
    images: Arc<dyn ImageRegistry>,
    runtime: Arc<dyn Runtime>,
}

impl LifecycleManager {
    pub fn new(
        config: &Config,
        registry: Arc<EnvironmentRegistry>,
        store: Arc<dyn VersionStore>,
        images: Arc<dyn ImageRegistry>,
        runtime: Arc<dyn Runtime>,
    ) -> Self {
        Self {
            config: config.clone(),
            registry,
            store,
            images,
            runtime,
        }
    }

    /// Commit the user's live environment and push it under the next version.
    ///
    /// The counter is stored before commit and push run. If either fails the
    /// error propagates and the counter stays advanced.
    pub fn persist(&self, user_id: &str) -> NestResult<PersistOutcome> {
        self.registry
            .with_user(user_id, || self.persist_locked(user_id))
    }

    /// Save, remove and unregister the user's live environment, if any.
    pub fn discard(&self, user_id: &str) -> NestResult<DiscardOutcome> {
        self.registry
            .with_user(user_id, || self.discard_locked(user_id))
    }

    /// Start the user's environment from `version` (default: their latest),
    /// falling back to the baseline image when the registry has no such image
    /// or cannot be reached.
    pub fn acquire(&self, user_id: &str, version: Option<u64>) -> NestResult<EnvironmentHandle> {
        self.registry
            .with_user(user_id, || self.acquire_locked(user_id, version))
    }

    /// Replace the user's environment with a fresh baseline instance.
    pub fn bootstrap(&self, user_id: &str) -> NestResult<EnvironmentHandle> {
        self.registry
            .with_user(user_id, || self.bootstrap_locked(user_id))
    }

    /// The user's live environment, without creating one.
    pub fn current(&self, user_id: &str) -> Option<EnvironmentHandle> {
        self.registry.get(user_id)
    }

    /// Discard every registered environment. Returns how many were discarded
    /// cleanly; failures are logged and skipped.
    pub fn shutdown(&self) -> usize {
        let users: Vec<String> = self
            .registry
            .snapshot()
            .into_iter()
            .map(|(user, _)| user)
            .collect();
        info!(count = users.len(), "lifecycle:shutdown start");

        let mut discarded = 0;
        for user_id in users {
            match self.discard(&user_id) {
                Ok(DiscardOutcome::Discarded { .. }) => discarded += 1,
                Ok(DiscardOutcome::NothingLive) => {}
                Err(e) => error!(user_id = %user_id, error = ?e, "lifecycle:shutdown discard failed"),
            }
        }
        info!(discarded, remaining = self.registry.len(), "lifecycle:shutdown done");
        discarded
    }

    fn persist_locked(&self, user_id: &str) -> NestResult<PersistOutcome> {
        let Some(user) = self.store.get_user(user_id)? else {
            debug!(user_id, "lifecycle:persist no user");
            return Ok(PersistOutcome::NoUser);
        };
        let Some(handle) = self.registry.get(user_id) else {
            debug!(user_id, "lifecycle:persist nothing live");
            return Ok(PersistOutcome::NoLiveEnvironment);
        };

        let version = user.container_version + 1;
        let repository = self.config.repository_for(user_id);
        let tag = version.to_string();
        info!(user_id, name = %handle.name, version, "lifecycle:persist start");

        self.store.set_version_counter(user_id, version)?;
        self.runtime
            .commit(&handle, &repository, &user.name, &tag)?;
        self.images.push(&repository, &tag)?;

        info!(user_id, version, "lifecycle:persist done");
        Ok(PersistOutcome::Saved { version })
    }

    fn discard_locked(&self, user_id: &str) -> NestResult<DiscardOutcome> {
        let Some(handle) = self.registry.get(user_id) else {
            return Ok(DiscardOutcome::NothingLive);
        };
        info!(user_id, name = %handle.name, "lifecycle:discard start");

        let (saved_version, persist_error) = match self.persist_locked(user_id) {
            Ok(PersistOutcome::Saved { version }) => (Some(version), None),
            Ok(outcome) => {
                warn!(user_id, ?outcome, "lifecycle:discard without save");
                (None, None)
            }
            Err(e) => {
                warn!(user_id, error = ?e, "lifecycle:discard persist failed, removing anyway");
                (None, Some(format!("{e:#}")))
            }
        };

        let removed = self.runtime.remove(&handle, true);
        // Cleared even when remove failed so the registry never points at a
        // half-torn-down instance
        self.registry.take_and_clear(user_id);

        if let Err(source) = removed {
            error!(user_id, name = %handle.name, error = ?source, "lifecycle:discard remove failed");
            return Err(NestError::RemoveFailed {
                name: handle.name,
                source,
            });
        }

        info!(user_id, name = %handle.name, ?saved_version, "lifecycle:discard done");
        Ok(DiscardOutcome::Discarded {
            name: handle.name,
            saved_version,
            persist_error,
        })
    }

    fn acquire_locked(&self, user_id: &str, version: Option<u64>) -> NestResult<EnvironmentHandle> {
        if self.store.get_user(user_id)?.is_none() {
            return Err(NestError::UserNotFound(user_id.to_string()));
        }

        self.discard_locked(user_id)?;

        // Resolved after the discard so "latest" includes what it just saved
        let version = match version {
            Some(v) => v,
            None => self
                .store
                .get_user(user_id)?
                .ok_or_else(|| NestError::UserNotFound(user_id.to_string()))?
                .container_version,
        };

        let repository = self.config.repository_for(user_id);
        let tag = version.to_string();
        info!(user_id, version, "lifecycle:acquire pull");

        match self.images.pull(&repository, &tag) {
            Ok(image) => {
                let handle = self.start_locked(user_id, &image)?;
                info!(user_id, name = %handle.name, image = %image, "lifecycle:acquire pulled");
                Ok(handle)
            }
            Err(e) if e.is_recoverable() => {
                warn!(user_id, version, error = %e, "lifecycle:acquire pull failed, bootstrapping");
                self.bootstrap_locked(user_id)
            }
            Err(source) => Err(NestError::Pull {
                reference: format!("{repository}:{tag}"),
                source,
            }),
        }
    }

    fn bootstrap_locked(&self, user_id: &str) -> NestResult<EnvironmentHandle> {
        self.discard_locked(user_id)?;
        let handle = self.start_locked(user_id, self.config.baseline_image())?;
        info!(user_id, name = %handle.name, "lifecycle:bootstrap done");
        Ok(handle)
    }

    fn start_locked(&self, user_id: &str, image: &str) -> NestResult<EnvironmentHandle> {
        let handle = self.runtime.run_detached(image)?;
        let displaced = self.registry.put(user_id, handle.clone());
        if let Some(stale) = displaced {
            // Unreachable while every creation path discards under the user lock
            error!(user_id, stale = %stale.name, "lifecycle:registry held a second handle");
            debug_assert!(false, "live handle displaced for {user_id}");
        }
        Ok(handle)
    }
}
