use std::sync::Arc;

use parking_lot::RwLock;
use surveyor_types::{
    AutocaptureStatus, DeviceMode, DeviceSummary, JobSummary, Plan, ProjectSummary, RoutingStatus,
};
use tokio::sync::watch;

/// Cached view of backend state, refreshed by reconciliation.
#[derive(Debug, Clone, Default)]
pub struct DeviceSnapshot {
    pub summary: Option<DeviceSummary>,
    pub project: Option<ProjectSummary>,
    pub job: Option<JobSummary>,
    pub plan: Option<Plan>,
    pub routing: Option<RoutingStatus>,
    pub autocapture: Option<AutocaptureStatus>,
    /// Raised while the device winds down an acquisition.
    pub deactivating: bool,
    /// Set by the device once an acquisition can be shown.
    pub acquisition_ready: bool,
    /// Cleared while the current job is being re-fetched.
    pub job_ready: bool,
    pub last_job_id: Option<String>,
}

/// Process-wide device state, passed explicitly to every component that
/// needs it. `DeviceMode` has a single writer and many watchers.
pub struct DeviceStore {
    mode: watch::Sender<DeviceMode>,
    inner: RwLock<DeviceSnapshot>,
}

impl DeviceStore {
    pub fn new() -> Arc<Self> {
        let (mode, _) = watch::channel(DeviceMode::Other);
        Arc::new(Self {
            mode,
            inner: RwLock::new(DeviceSnapshot::default()),
        })
    }

    pub fn mode(&self) -> DeviceMode {
        *self.mode.borrow()
    }

    pub fn watch_mode(&self) -> watch::Receiver<DeviceMode> {
        self.mode.subscribe()
    }

    /// Last write wins. Returns whether the mode actually changed.
    pub fn set_mode(&self, mode: DeviceMode) -> bool {
        self.mode.send_if_modified(|current| {
            if *current == mode {
                false
            } else {
                *current = mode;
                true
            }
        })
    }

    pub fn snapshot(&self) -> DeviceSnapshot {
        self.inner.read().clone()
    }

    pub fn update<R>(&self, f: impl FnOnce(&mut DeviceSnapshot) -> R) -> R {
        f(&mut self.inner.write())
    }

    pub fn project_id(&self) -> Option<String> {
        self.inner.read().project.as_ref().map(|p| p.id.clone())
    }

    pub fn job(&self) -> Option<JobSummary> {
        self.inner.read().job.clone()
    }

    pub fn has_plan_for(&self, job_id: &str) -> bool {
        self.inner
            .read()
            .plan
            .as_ref()
            .is_some_and(|plan| plan.job_id == job_id)
    }

    pub fn acquisition_ready(&self) -> bool {
        self.inner.read().acquisition_ready
    }

    pub fn deactivating(&self) -> bool {
        self.inner.read().deactivating
    }

    pub fn last_job_id(&self) -> Option<String> {
        self.inner.read().last_job_id.clone()
    }
}
