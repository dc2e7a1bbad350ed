//! In-memory stand-ins for the backend, stream layer and view router.

use std::collections::HashSet;
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use parking_lot::Mutex;
use surveyor_types::{
    AutocaptureStatus, ChannelKind, ConnectionState, DeviceMode, DeviceSummary, JobSummary, Plan,
    ProjectSummary, Route, RoutingStatus,
};

use crate::backend::DeviceBackend;
use crate::channels::ChannelControl;
use crate::navigation::Navigator;

pub fn summary(mode: DeviceMode, job_id: Option<&str>, planned: bool) -> DeviceSummary {
    DeviceSummary {
        mode,
        project_id: job_id.map(|_| "p1".to_string()),
        job_id: job_id.map(str::to_string),
        job_planned: planned,
        acquisition_ready: false,
        storage: None,
    }
}

pub struct FakeBackend {
    pub summary: Mutex<DeviceSummary>,
    pub fail_job: Mutex<bool>,
    pub job_delay: Mutex<Duration>,
    pub calls: Mutex<Vec<&'static str>>,
}

impl FakeBackend {
    pub fn new(summary: DeviceSummary) -> Self {
        Self {
            summary: Mutex::new(summary),
            fail_job: Mutex::new(false),
            job_delay: Mutex::new(Duration::ZERO),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn count(&self, call: &str) -> usize {
        self.calls.lock().iter().filter(|c| **c == call).count()
    }
}

#[async_trait]
impl DeviceBackend for FakeBackend {
    async fn authenticate(&self) -> anyhow::Result<()> {
        self.calls.lock().push("authenticate");
        Ok(())
    }

    async fn fetch_summary(&self) -> anyhow::Result<DeviceSummary> {
        self.calls.lock().push("summary");
        Ok(self.summary.lock().clone())
    }

    async fn fetch_project(&self, project_id: &str) -> anyhow::Result<ProjectSummary> {
        self.calls.lock().push("project");
        Ok(ProjectSummary {
            id: project_id.to_string(),
            name: "Quarry north".to_string(),
        })
    }

    async fn fetch_job(&self, job_id: &str) -> anyhow::Result<JobSummary> {
        self.calls.lock().push("job");
        let delay = *self.job_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if *self.fail_job.lock() {
            return Err(anyhow!("job {job_id} not found"));
        }
        let planned = self.summary.lock().job_planned;
        Ok(JobSummary {
            id: job_id.to_string(),
            project_id: "p1".to_string(),
            name: "Bench 3".to_string(),
            planned,
        })
    }

    async fn fetch_plan(&self, job_id: &str) -> anyhow::Result<Plan> {
        self.calls.lock().push("plan");
        Ok(Plan {
            job_id: job_id.to_string(),
            shapes: Vec::new(),
        })
    }

    async fn fetch_routing_status(&self) -> anyhow::Result<RoutingStatus> {
        self.calls.lock().push("routing");
        Ok(RoutingStatus {
            enabled: true,
            active_path_id: None,
            progress: None,
        })
    }

    async fn fetch_autocapture_status(&self) -> anyhow::Result<AutocaptureStatus> {
        self.calls.lock().push("autocapture");
        Ok(AutocaptureStatus {
            enabled: false,
            interval_m: None,
        })
    }
}

#[derive(Default)]
pub struct FakeChannels {
    pub connected: Mutex<HashSet<ChannelKind>>,
    pub subscribed: Mutex<Vec<ChannelKind>>,
}

#[async_trait]
impl ChannelControl for FakeChannels {
    fn connection_state(&self, channel: ChannelKind) -> ConnectionState {
        if self.connected.lock().contains(&channel) {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        }
    }

    async fn subscribe(&self, channel: ChannelKind) {
        self.subscribed.lock().push(channel);
        self.connected.lock().insert(channel);
    }

    async fn unsubscribe(&self, channel: ChannelKind) {
        self.connected.lock().remove(&channel);
    }
}

pub struct RecordingNavigator {
    pub current: Mutex<Route>,
    pub history: Mutex<Vec<Route>>,
}

impl RecordingNavigator {
    pub fn at(route: Route) -> Self {
        Self {
            current: Mutex::new(route),
            history: Mutex::new(Vec::new()),
        }
    }
}

impl Navigator for RecordingNavigator {
    fn current_route(&self) -> Route {
        self.current.lock().clone()
    }

    fn navigate(&self, route: Route) {
        *self.current.lock() = route.clone();
        self.history.lock().push(route);
    }
}

/// Polls `cond` on the paused clock until it holds or ten virtual seconds pass.
pub async fn eventually(mut cond: impl FnMut() -> bool) -> bool {
    for _ in 0..1000 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}
