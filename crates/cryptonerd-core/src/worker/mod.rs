//! The offline caching worker.
//!
//! A `ServiceWorker` owns an explicit `WorkerContext` and a lifecycle
//! state. Platform events are delivered through `dispatch`, which picks the
//! handler for the event kind and enforces which events each state accepts:
//!
//! - `Install`  only from `New`; failure makes the worker `Redundant`
//! - `Activate` only from `Waiting`
//! - `Fetch`    intercepted only while `Active`, otherwise passed through
//! - `Sync`     handled only while `Active`, otherwise ignored

pub mod activate;
pub mod context;
pub mod install;
pub mod router;
pub mod state;
pub mod sync;
pub mod tasks;

use std::sync::{Arc, Mutex};

use tracing::{info, warn};

use crate::error::WorkerError;
use crate::http::Request;

pub use activate::ActivationReport;
pub use context::{NoQueuedWork, SyncWork, WorkerContext};
pub use install::InstallReport;
pub use router::{classify, FetchDisposition, Route};
pub use state::LifecycleState;
pub use sync::{SyncRegistry, SyncReport};
pub use tasks::{BackgroundTasks, TaskOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Install,
    Activate,
    Fetch,
    Sync,
}

impl EventKind {
    fn name(&self) -> &'static str {
        match self {
            EventKind::Install => "install",
            EventKind::Activate => "activate",
            EventKind::Fetch => "fetch",
            EventKind::Sync => "sync",
        }
    }
}

#[derive(Debug, Clone)]
pub enum WorkerEvent {
    Install,
    Activate,
    Fetch(Request),
    Sync { tag: String },
}

impl WorkerEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            WorkerEvent::Install => EventKind::Install,
            WorkerEvent::Activate => EventKind::Activate,
            WorkerEvent::Fetch(_) => EventKind::Fetch,
            WorkerEvent::Sync { .. } => EventKind::Sync,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EventOutcome {
    Installed(InstallReport),
    Activated(ActivationReport),
    Fetched(FetchDisposition),
    Synced(SyncReport),
}

pub struct ServiceWorker {
    ctx: Arc<WorkerContext>,
    state: Mutex<LifecycleState>,
}

impl ServiceWorker {
    pub fn new(ctx: WorkerContext) -> Self {
        Self {
            ctx: Arc::new(ctx),
            state: Mutex::new(LifecycleState::New),
        }
    }

    /// Pick up where an earlier run left off.
    ///
    /// A completed install of the current version resumes as `Active` once
    /// no other cache generation remains. Leftover generations mean the
    /// earlier run never finished activating, so activation runs again here;
    /// if it fails the worker stays `Waiting`. Without a completed install
    /// the worker starts from `New`.
    pub async fn resume(ctx: WorkerContext) -> Result<Self, WorkerError> {
        let worker = Self::new(ctx);
        if !install::is_installed(&worker.ctx).await? {
            return Ok(worker);
        }

        let version = worker.ctx.cache_version();
        let stale = worker
            .ctx
            .storage
            .keys()
            .await?
            .iter()
            .any(|name| name != version);
        if stale {
            worker.set_state(LifecycleState::Waiting);
            if worker.on_activate().await.is_ok() {
                info!(cache = version, "Resumed worker after finishing activation");
            }
        } else {
            worker.set_state(LifecycleState::Active);
            worker.ctx.clients.claim();
            info!(cache = version, "Resumed active worker");
        }
        Ok(worker)
    }

    pub fn context(&self) -> &Arc<WorkerContext> {
        &self.ctx
    }

    pub fn state(&self) -> LifecycleState {
        *self.lock_state()
    }

    pub async fn dispatch(&self, event: WorkerEvent) -> Result<EventOutcome, WorkerError> {
        match event {
            WorkerEvent::Install => self.on_install().await.map(EventOutcome::Installed),
            WorkerEvent::Activate => self.on_activate().await.map(EventOutcome::Activated),
            WorkerEvent::Fetch(request) => self.on_fetch(request).await.map(EventOutcome::Fetched),
            WorkerEvent::Sync { tag } => self.on_sync(&tag).await.map(EventOutcome::Synced),
        }
    }

    /// Install followed by activate, the usual first start.
    pub async fn start(&self) -> Result<(InstallReport, ActivationReport), WorkerError> {
        let installed = self.on_install().await?;
        let activated = self.on_activate().await?;
        Ok((installed, activated))
    }

    pub async fn on_install(&self) -> Result<InstallReport, WorkerError> {
        self.begin(EventKind::Install, LifecycleState::can_install, LifecycleState::Installing)?;
        match install::handle_install(&self.ctx).await {
            Ok(report) => {
                self.set_state(LifecycleState::Waiting);
                Ok(report)
            }
            Err(e) => {
                warn!(error = %e, "Install failed, worker will not activate");
                self.set_state(LifecycleState::Redundant);
                Err(e)
            }
        }
    }

    pub async fn on_activate(&self) -> Result<ActivationReport, WorkerError> {
        self.begin(EventKind::Activate, LifecycleState::can_activate, LifecycleState::Activating)?;
        match activate::handle_activate(&self.ctx).await {
            Ok(report) => {
                self.set_state(LifecycleState::Active);
                Ok(report)
            }
            Err(e) => {
                warn!(error = %e, "Activation failed, staying in waiting");
                self.set_state(LifecycleState::Waiting);
                Err(e)
            }
        }
    }

    pub async fn on_fetch(&self, request: Request) -> Result<FetchDisposition, WorkerError> {
        if !self.state().intercepts_fetch() {
            return Ok(FetchDisposition::Passthrough);
        }
        router::handle_fetch(&self.ctx, request).await
    }

    pub async fn on_sync(&self, tag: &str) -> Result<SyncReport, WorkerError> {
        if !self.state().is_active() {
            return Ok(SyncReport::Ignored);
        }
        sync::handle_sync(&self.ctx, tag).await
    }

    /// Check the guard and move to the in-progress state in one step, so two
    /// concurrent installs cannot both start.
    fn begin(
        &self,
        kind: EventKind,
        allowed: fn(&LifecycleState) -> bool,
        next: LifecycleState,
    ) -> Result<(), WorkerError> {
        let mut state = self.lock_state();
        let current = *state;
        if !allowed(&current) {
            return Err(WorkerError::InvalidState {
                event: kind.name(),
                state: current.to_string(),
            });
        }
        info!(event = kind.name(), from = %current, to = %next, "Lifecycle transition");
        *state = next;
        Ok(())
    }

    fn set_state(&self, next: LifecycleState) {
        let mut state = self.lock_state();
        let current = *state;
        info!(from = %current, to = %next, "Lifecycle transition");
        *state = next;
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, LifecycleState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
