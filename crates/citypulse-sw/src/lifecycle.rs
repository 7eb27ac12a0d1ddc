//! Worker lifecycle: installing → waiting → active → redundant.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use url::Url;

use crate::{Result, ServiceWorkerError};

/// Unique identifier for a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServiceWorkerId(u64);

impl ServiceWorkerId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Worker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ServiceWorkerState {
    /// Created, install not started.
    #[default]
    Parsed,
    /// Precaching.
    Installing,
    /// Installed and waiting for activation.
    Installed,
    /// Evicting stale stores and claiming clients.
    Activating,
    /// Active and controlling clients.
    Activated,
    /// Replaced by a newer version.
    Redundant,
}

/// One deployed version of the proxy.
#[derive(Debug, Clone)]
pub struct ServiceWorker {
    pub id: ServiceWorkerId,

    /// Version tag this worker was built from.
    pub version: String,

    pub state: ServiceWorkerState,

    /// Time of last state change.
    pub state_changed_at: Instant,
}

impl ServiceWorker {
    /// Create a new worker.
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            id: ServiceWorkerId::new(),
            version: version.into(),
            state: ServiceWorkerState::Parsed,
            state_changed_at: Instant::now(),
        }
    }

    /// Set state.
    pub fn set_state(&mut self, state: ServiceWorkerState) {
        self.state = state;
        self.state_changed_at = Instant::now();
    }

    pub fn is_active(&self) -> bool {
        self.state == ServiceWorkerState::Activated
    }
}

/// The installing / waiting / active slots for one scope.
#[derive(Debug)]
pub struct Registration {
    /// Scope URL.
    pub scope: Url,

    pub installing: Option<ServiceWorker>,

    /// Installed but not active.
    pub waiting: Option<ServiceWorker>,

    pub active: Option<ServiceWorker>,

    /// Last time a new version was installed.
    pub last_update: Option<Instant>,
}

impl Registration {
    /// Create an empty registration.
    pub fn new(scope: Url) -> Self {
        Self {
            scope,
            installing: None,
            waiting: None,
            active: None,
            last_update: None,
        }
    }

    /// Start installing a new version. Returns a replaced installing worker, if any.
    pub fn update(&mut self, version: &str) -> Option<ServiceWorker> {
        let mut worker = ServiceWorker::new(version);
        worker.set_state(ServiceWorkerState::Installing);
        self.last_update = Some(Instant::now());

        self.installing.replace(worker).map(|mut replaced| {
            replaced.set_state(ServiceWorkerState::Redundant);
            replaced
        })
    }

    /// Move the installing worker of `version` to the waiting slot.
    ///
    /// Returns a previously waiting worker it displaced, if any.
    pub fn install_complete(&mut self, version: &str) -> Result<Option<ServiceWorker>> {
        let mut worker = match self.installing.take() {
            Some(w) if w.version == version => w,
            other => {
                self.installing = other;
                return Err(ServiceWorkerError::StateError(format!(
                    "{version} is not installing"
                )));
            }
        };

        worker.set_state(ServiceWorkerState::Installed);
        Ok(self.waiting.replace(worker).map(|mut displaced| {
            displaced.set_state(ServiceWorkerState::Redundant);
            displaced
        }))
    }

    /// Promote the waiting worker of `version` to the active slot in the
    /// `Activating` state. The previous active worker becomes redundant and
    /// is returned.
    pub fn begin_activation(&mut self, version: &str) -> Result<Option<ServiceWorker>> {
        let mut worker = match self.waiting.take() {
            Some(w) if w.version == version => w,
            other => {
                self.waiting = other;
                return Err(ServiceWorkerError::StateError(format!(
                    "{version} is not waiting"
                )));
            }
        };

        worker.set_state(ServiceWorkerState::Activating);

        let old = self.active.replace(worker).map(|mut old| {
            old.set_state(ServiceWorkerState::Redundant);
            old
        });
        Ok(old)
    }

    /// Mark the activating worker of `version` as activated.
    pub fn finish_activation(&mut self, version: &str) -> Result<()> {
        match self.active.as_mut() {
            Some(w) if w.version == version && w.state == ServiceWorkerState::Activating => {
                w.set_state(ServiceWorkerState::Activated);
                Ok(())
            }
            _ => Err(ServiceWorkerError::StateError(format!(
                "{version} is not activating"
            ))),
        }
    }

    /// Whether `version` is in the waiting slot.
    pub fn is_waiting(&self, version: &str) -> bool {
        self.waiting.as_ref().is_some_and(|w| w.version == version)
    }

    /// Whether `version` is the active, fully activated worker.
    pub fn is_controlling(&self, version: &str) -> bool {
        self.active
            .as_ref()
            .is_some_and(|w| w.version == version && w.is_active())
    }

    /// Current state of the worker built from `version`, if it is registered.
    pub fn state_of(&self, version: &str) -> Option<ServiceWorkerState> {
        [&self.installing, &self.waiting, &self.active]
            .into_iter()
            .flatten()
            .find(|w| w.version == version)
            .map(|w| w.state)
    }
}
