//! In-memory collaborators for lifecycle and orchestrator tests.
//!
//! One `FakeWorld` plays store, registry, runtime and sandbox at once and
//! records every call in order so tests can assert on sequencing.

use anyhow::{Result, anyhow, bail};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::config::Config;
use crate::error::PullError;
use crate::nest::{EnvironmentRegistry, ExecutionOrchestrator, LifecycleManager, TrialOrchestrator};
use crate::payload::ContentCategory;
use crate::runtime::{EnvironmentHandle, ExecOutput, ImageRegistry, Runtime, SandboxIo};
use crate::store::{User, VersionStore};

pub const BASELINE: &str = "test/baseline:v1";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    SetVersion(String, u64),
    Pull(String),
    Run(String),
    Commit { name: String, reference: String, author: String },
    Push(String),
    Remove(String),
    Copy(String, String),
    Exec(String),
    Status(String),
    Heartbeat(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullBehavior {
    Succeed,
    NotFound,
    Unavailable,
    Broken,
}

pub struct FakeWorld {
    events: Mutex<Vec<Event>>,
    users: Mutex<HashMap<String, User>>,
    /// Instances that have been started and not yet removed
    instances: Mutex<HashSet<String>>,
    next_id: AtomicUsize,
    pub pull: Mutex<PullBehavior>,
    pub fail_commit: AtomicBool,
    pub fail_push: AtomicBool,
    pub fail_remove: AtomicBool,
    pub fail_run: AtomicBool,
    pub copy_ok: AtomicBool,
    pub exec_ok: AtomicBool,
    pub running: AtomicBool,
    pub heartbeat: Mutex<Option<String>>,
}

impl FakeWorld {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            events: Mutex::new(Vec::new()),
            users: Mutex::new(HashMap::new()),
            instances: Mutex::new(HashSet::new()),
            next_id: AtomicUsize::new(0),
            pull: Mutex::new(PullBehavior::Succeed),
            fail_commit: AtomicBool::new(false),
            fail_push: AtomicBool::new(false),
            fail_remove: AtomicBool::new(false),
            fail_run: AtomicBool::new(false),
            copy_ok: AtomicBool::new(true),
            exec_ok: AtomicBool::new(true),
            running: AtomicBool::new(true),
            heartbeat: Mutex::new(Some("beat".to_string())),
        })
    }

    pub fn add_user(&self, id: &str, name: &str, version: u64) {
        self.users.lock().unwrap().insert(
            id.to_string(),
            User {
                id: id.to_string(),
                name: name.to_string(),
                container_version: version,
            },
        );
    }

    pub fn version_of(&self, id: &str) -> u64 {
        self.users.lock().unwrap()[id].container_version
    }

    pub fn set_pull(&self, behavior: PullBehavior) {
        *self.pull.lock().unwrap() = behavior;
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn clear_events(&self) {
        self.events.lock().unwrap().clear();
    }

    pub fn live_instances(&self) -> usize {
        self.instances.lock().unwrap().len()
    }

    fn record(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}

impl VersionStore for FakeWorld {
    fn get_user(&self, id: &str) -> Result<Option<User>> {
        Ok(self.users.lock().unwrap().get(id).cloned())
    }

    fn set_version_counter(&self, id: &str, version: u64) -> Result<()> {
        self.record(Event::SetVersion(id.to_string(), version));
        let mut users = self.users.lock().unwrap();
        let user = users.get_mut(id).ok_or_else(|| anyhow!("no user {id}"))?;
        user.container_version = version;
        Ok(())
    }
}

impl ImageRegistry for FakeWorld {
    fn pull(&self, repository: &str, tag: &str) -> std::result::Result<String, PullError> {
        let reference = format!("{repository}:{tag}");
        self.record(Event::Pull(reference.clone()));
        match *self.pull.lock().unwrap() {
            PullBehavior::Succeed => Ok(reference),
            PullBehavior::NotFound => Err(PullError::NotFound(reference)),
            PullBehavior::Unavailable => Err(PullError::Unavailable("dial tcp: refused".into())),
            PullBehavior::Broken => Err(PullError::Other(anyhow!("disk full"))),
        }
    }

    fn push(&self, repository: &str, tag: &str) -> Result<()> {
        self.record(Event::Push(format!("{repository}:{tag}")));
        if self.fail_push.load(Ordering::SeqCst) {
            bail!("push rejected");
        }
        Ok(())
    }
}

impl Runtime for FakeWorld {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn run_detached(&self, image: &str) -> Result<EnvironmentHandle> {
        self.record(Event::Run(image.to_string()));
        if self.fail_run.load(Ordering::SeqCst) {
            bail!("cannot start {image}");
        }
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        let name = format!("box-{n}");
        self.instances.lock().unwrap().insert(name.clone());
        Ok(EnvironmentHandle {
            id: format!("id-{n}"),
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
        self.record(Event::Commit {
            name: handle.name.clone(),
            reference: format!("{repository}:{tag}"),
            author: author.to_string(),
        });
        if self.fail_commit.load(Ordering::SeqCst) {
            bail!("commit failed");
        }
        Ok(())
    }

    fn remove(&self, handle: &EnvironmentHandle, _force: bool) -> Result<()> {
        self.record(Event::Remove(handle.name.clone()));
        if self.fail_remove.load(Ordering::SeqCst) {
            bail!("rm failed");
        }
        self.instances.lock().unwrap().remove(&handle.name);
        Ok(())
    }

    fn is_running(&self, name: &str) -> Result<bool> {
        self.record(Event::Status(name.to_string()));
        Ok(self.running.load(Ordering::SeqCst) && self.instances.lock().unwrap().contains(name))
    }
}

impl SandboxIo for FakeWorld {
    fn copy_file(&self, instance: &str, _file_id: &str, file_name: &str) -> Result<bool> {
        self.record(Event::Copy(instance.to_string(), file_name.to_string()));
        Ok(self.copy_ok.load(Ordering::SeqCst))
    }

    fn execute(
        &self,
        instance: &str,
        file_name: &str,
        _category: ContentCategory,
    ) -> Result<ExecOutput> {
        self.record(Event::Exec(instance.to_string()));
        let success = self.exec_ok.load(Ordering::SeqCst);
        Ok(ExecOutput {
            success,
            output: format!("ran {file_name}"),
        })
    }

    fn probe_heartbeat(&self, instance: &str) -> Result<Option<String>> {
        self.record(Event::Heartbeat(instance.to_string()));
        Ok(self.heartbeat.lock().unwrap().clone())
    }
}

pub fn test_config() -> Config {
    Config {
        namespace: Some("ns".to_string()),
        baseline_image: Some(BASELINE.to_string()),
        ..Default::default()
    }
}

pub fn lifecycle(world: &Arc<FakeWorld>) -> (LifecycleManager, Arc<EnvironmentRegistry>) {
    let registry = Arc::new(EnvironmentRegistry::new());
    let manager = LifecycleManager::new(
        &test_config(),
        Arc::clone(&registry),
        world.clone(),
        world.clone(),
        world.clone(),
    );
    (manager, registry)
}

pub fn execution(world: &Arc<FakeWorld>, registry: &Arc<EnvironmentRegistry>) -> ExecutionOrchestrator {
    ExecutionOrchestrator::new(Arc::clone(registry), world.clone(), world.clone())
}

pub fn trials(world: &Arc<FakeWorld>) -> TrialOrchestrator {
    TrialOrchestrator::new(BASELINE, world.clone(), world.clone())
}
