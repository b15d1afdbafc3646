use std::sync::Arc;
use tracing::{error, info};

use super::execution::drive;
use super::score::{self, TrialScore};
use crate::error::NestResult;
use crate::payload::PayloadDescriptor;
use crate::runtime::{Runtime, SandboxIo};

/// Scores payloads in throwaway baseline instances.
///
/// Trial instances belong to a single `trial` call: they are never
/// registered, never committed, and always removed before the call returns.
pub struct TrialOrchestrator {
    baseline_image: String,
    runtime: Arc<dyn Runtime>,
    sandbox: Arc<dyn SandboxIo>,
}

impl TrialOrchestrator {
    pub fn new(
        baseline_image: impl Into<String>,
        runtime: Arc<dyn Runtime>,
        sandbox: Arc<dyn SandboxIo>,
    ) -> Self {
        Self {
            baseline_image: baseline_image.into(),
            runtime,
            sandbox,
        }
    }

    /// Run `payload` once in a fresh baseline instance and score the outcome.
    ///
    /// Only a failure to start the instance is an error. A failed removal is
    /// logged and the score still returned.
    pub fn trial(&self, payload: &PayloadDescriptor) -> NestResult<TrialScore> {
        let handle = self.runtime.run_detached(&self.baseline_image)?;
        info!(name = %handle.name, file = %payload.file_name, "trial:start");

        let run = drive(
            self.runtime.as_ref(),
            self.sandbox.as_ref(),
            &handle.name,
            payload,
        );
        let liveness = run.liveness();
        let score = score::score(run.executed, liveness, payload.category());
        info!(
            name = %handle.name,
            copied = run.copied,
            executed = run.executed,
            ?liveness,
            score,
            "trial:scored"
        );

        if let Err(e) = self.runtime.remove(&handle, true) {
            error!(name = %handle.name, error = ?e, "trial:remove failed, instance may be leaked");
        }
        Ok(score)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{BASELINE, Event, FakeWorld, lifecycle, trials};
    use std::sync::atomic::Ordering;

    fn python() -> PayloadDescriptor {
        PayloadDescriptor::new("f1", "main.py", "text/x-python")
    }

    #[test]
    fn test_trial_healthy_scores_base() {
        let world = FakeWorld::new();
        let orchestrator = trials(&world);
        assert_eq!(orchestrator.trial(&python()).unwrap(), 6);
        assert_eq!(
            orchestrator
                .trial(&PayloadDescriptor::new("f2", "run.sh", "bash"))
                .unwrap(),
            2
        );
        assert_eq!(
            orchestrator
                .trial(&PayloadDescriptor::new("f3", "a.out", "binary"))
                .unwrap(),
            10
        );
    }

    #[test]
    fn test_trial_unresponsive_is_penalized() {
        let world = FakeWorld::new();
        world.running.store(false, Ordering::SeqCst);
        assert_eq!(trials(&world).trial(&python()).unwrap(), 60);
    }

    #[test]
    fn test_trial_no_heartbeat_is_penalized() {
        let world = FakeWorld::new();
        *world.heartbeat.lock().unwrap() = None;
        assert_eq!(trials(&world).trial(&python()).unwrap(), 60);
    }

    #[test]
    fn test_trial_failed_execution_scores_zero() {
        let world = FakeWorld::new();
        world.exec_ok.store(false, Ordering::SeqCst);
        world.running.store(false, Ordering::SeqCst);
        assert_eq!(trials(&world).trial(&python()).unwrap(), 0);
    }

    #[test]
    fn test_trial_uses_baseline_and_always_removes() {
        let world = FakeWorld::new();
        world.copy_ok.store(false, Ordering::SeqCst);
        world.exec_ok.store(false, Ordering::SeqCst);

        trials(&world).trial(&python()).unwrap();

        let events = world.events();
        assert_eq!(events.first(), Some(&Event::Run(BASELINE.to_string())));
        assert!(matches!(events.last(), Some(Event::Remove(_))));
        assert_eq!(world.live_instances(), 0);
    }

    #[test]
    fn test_trial_never_registers_or_commits() {
        let world = FakeWorld::new();
        world.add_user("u1", "Una", 0);
        let (_, registry) = lifecycle(&world);

        trials(&world).trial(&python()).unwrap();

        assert!(registry.is_empty());
        assert!(!world.events().iter().any(|e| matches!(
            e,
            Event::Commit { .. } | Event::Push(_) | Event::SetVersion(..)
        )));
        assert_eq!(world.version_of("u1"), 0);
    }

    #[test]
    fn test_trial_start_failure_is_error() {
        let world = FakeWorld::new();
        world.fail_run.store(true, Ordering::SeqCst);
        assert!(trials(&world).trial(&python()).is_err());
        assert!(!world.events().iter().any(|e| matches!(e, Event::Remove(_))));
    }

    #[test]
    fn test_trial_remove_failure_still_scores() {
        let world = FakeWorld::new();
        world.fail_remove.store(true, Ordering::SeqCst);
        assert_eq!(trials(&world).trial(&python()).unwrap(), 6);
    }
}
