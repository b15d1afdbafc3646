use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use super::registry::EnvironmentRegistry;
use super::score::Liveness;
use crate::error::{NestError, NestResult};
use crate::payload::PayloadDescriptor;
use crate::runtime::{Runtime, SandboxIo};

/// What a payload run inside a user's environment produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub output: String,
    /// None when the instance was no longer running, so the heartbeat
    /// could not be checked
    pub has_heart: Option<bool>,
}

impl ExecutionResult {
    pub fn liveness(&self) -> Liveness {
        Liveness::from_probes(self.has_heart.is_some(), self.has_heart)
    }
}

/// Observations from one copy → execute → probe pass.
#[derive(Debug, Clone)]
pub(super) struct SandboxRun {
    pub copied: bool,
    pub executed: bool,
    pub output: String,
    pub responding: bool,
    pub has_heart: Option<bool>,
}

impl SandboxRun {
    pub fn liveness(&self) -> Liveness {
        Liveness::from_probes(self.responding, self.has_heart)
    }
}

fn status(ok: bool) -> &'static str {
    if ok { "success" } else { "failure" }
}

/// Copy the payload in, execute it, then probe liveness and heartbeat.
///
/// Never fails: adapter errors count as a failed step and the pass carries
/// on, so the caller always gets whatever was observed.
pub(super) fn drive(
    runtime: &dyn Runtime,
    sandbox: &dyn SandboxIo,
    instance: &str,
    payload: &PayloadDescriptor,
) -> SandboxRun {
    let category = payload.category();

    let copied = sandbox
        .copy_file(instance, &payload.file_id, &payload.file_name)
        .unwrap_or_else(|e| {
            warn!(instance, error = ?e, "sandbox:copy error");
            false
        });
    info!(instance, file = %payload.file_name, status = status(copied), "sandbox:copy");

    let (executed, output) = match sandbox.execute(instance, &payload.file_name, category) {
        Ok(out) => (out.success, out.output),
        Err(e) => {
            warn!(instance, error = ?e, "sandbox:execute error");
            (false, String::new())
        }
    };
    info!(instance, file = %payload.file_name, ?category, status = status(executed), "sandbox:execute");

    let responding = runtime.is_running(instance).unwrap_or_else(|e| {
        warn!(instance, error = ?e, "sandbox:status error");
        false
    });
    info!(instance, responding, "sandbox:status");

    let has_heart = if responding {
        let beat = sandbox.probe_heartbeat(instance).unwrap_or_else(|e| {
            warn!(instance, error = ?e, "sandbox:heartbeat error");
            None
        });
        Some(beat.is_some())
    } else {
        None
    };
    info!(instance, ?has_heart, "sandbox:heartbeat");

    SandboxRun {
        copied,
        executed,
        output,
        responding,
        has_heart,
    }
}

/// Runs payloads inside users' live environments.
pub struct ExecutionOrchestrator {
    registry: Arc<EnvironmentRegistry>,
    runtime: Arc<dyn Runtime>,
    sandbox: Arc<dyn SandboxIo>,
}

impl ExecutionOrchestrator {
    pub fn new(
        registry: Arc<EnvironmentRegistry>,
        runtime: Arc<dyn Runtime>,
        sandbox: Arc<dyn SandboxIo>,
    ) -> Self {
        Self {
            registry,
            runtime,
            sandbox,
        }
    }

    /// Run `payload` in the user's live environment. Does not create one.
    ///
    /// Holds the user's lock for the whole run so a concurrent discard
    /// cannot remove the instance mid-execution.
    pub fn run(&self, user_id: &str, payload: &PayloadDescriptor) -> NestResult<ExecutionResult> {
        self.registry.with_user(user_id, || -> NestResult<ExecutionResult> {
            let handle = self
                .registry
                .get(user_id)
                .ok_or_else(|| NestError::NoLiveEnvironment(user_id.to_string()))?;
            info!(user_id, name = %handle.name, file = %payload.file_name, "execution:run start");

            let run = drive(
                self.runtime.as_ref(),
                self.sandbox.as_ref(),
                &handle.name,
                payload,
            );
            if !run.copied || !run.executed {
                warn!(user_id, copied = run.copied, executed = run.executed, "execution:run partial failure");
            }

            let result = ExecutionResult {
                output: run.output,
                has_heart: run.has_heart,
            };
            info!(user_id, liveness = ?result.liveness(), "execution:run done");
            Ok(result)
        })
    }
}
