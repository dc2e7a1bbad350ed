//! Brings the console in line with the device's operating mode.
//!
//! Every mode has a checklist of idempotent steps. Runs are cancellable: a
//! newer mode cancels the run in flight and waits for it to stop before the
//! next one starts, so no effect of a superseded run lands after that point.

use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use surveyor_observability::{emit_event, ObservabilityEvent};
use surveyor_types::{ChannelKind, ConsoleEvent, DeviceMode, DeviceSummary, JobSummary, Route};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, Level};

use crate::backend::DeviceBackend;
use crate::cancellation::{until_cancelled, TaskSlot};
use crate::channels::ChannelControl;
use crate::config::ModuleSwitches;
use crate::event_bus::EventBus;
use crate::navigation::Navigator;
use crate::store::DeviceStore;

/// Collaborators a run may touch.
pub struct ReconciliationContext {
    pub store: Arc<DeviceStore>,
    pub backend: Arc<dyn DeviceBackend>,
    pub navigator: Arc<dyn Navigator>,
    pub channels: Arc<dyn ChannelControl>,
    pub modules: Arc<ModuleSwitches>,
    pub bus: EventBus,
}

#[derive(Debug, Default)]
struct EngineState {
    running: Option<DeviceMode>,
    last_completed: Option<DeviceMode>,
}

pub struct ReconciliationEngine {
    ctx: Arc<ReconciliationContext>,
    state: Arc<Mutex<EngineState>>,
    slot: TaskSlot,
    gate: tokio::sync::Mutex<()>,
}

impl ReconciliationEngine {
    pub fn new(ctx: ReconciliationContext) -> Arc<Self> {
        Arc::new(Self {
            ctx: Arc::new(ctx),
            state: Arc::new(Mutex::new(EngineState::default())),
            slot: TaskSlot::new(),
            gate: tokio::sync::Mutex::new(()),
        })
    }

    /// Starts a run for `mode` unless that mode is already the one being
    /// reconciled or the last one reconciled. Returns whether a run started.
    pub async fn trigger(&self, mode: DeviceMode) -> bool {
        self.start(mode, false).await
    }

    /// Credentials changed: whatever the device is doing, check it again.
    pub async fn on_authenticated(&self) -> bool {
        let mode = self.ctx.store.mode();
        self.start(mode, true).await
    }

    pub fn last_completed(&self) -> Option<DeviceMode> {
        self.state.lock().last_completed
    }

    pub fn running(&self) -> Option<DeviceMode> {
        self.state.lock().running
    }

    /// Cancels the run in flight and waits for it to stop.
    pub async fn shutdown(&self) {
        let _gate = self.gate.lock().await;
        self.slot.clear().await;
        self.state.lock().running = None;
    }

    async fn start(&self, mode: DeviceMode, force: bool) -> bool {
        let _gate = self.gate.lock().await;
        {
            let state = self.state.lock();
            let target = state.running.or(state.last_completed);
            if !force && target == Some(mode) {
                debug!(mode = %mode, "reconciliation already covers mode");
                return false;
            }
        }

        let ctx = self.ctx.clone();
        let state = self.state.clone();
        self.slot
            .replace(move |token| {
                // The previous run has been joined by now.
                state.lock().running = Some(mode);
                async move {
                    let run = Run {
                        ctx: &ctx,
                        token: &token,
                        mode,
                        run_id: uuid::Uuid::new_v4().to_string(),
                    };
                    ctx.bus.publish(ConsoleEvent::ReconciliationStarted { mode });
                    info!(mode = %mode, run_id = %run.run_id, "reconciliation started");
                    let outcome = run.execute().await;
                    let completed = {
                        let mut state = state.lock();
                        if outcome.is_ok() && !token.is_cancelled() {
                            state.last_completed = Some(mode);
                            state.running = None;
                            true
                        } else {
                            false
                        }
                    };
                    if completed {
                        info!(mode = %mode, run_id = %run.run_id, "reconciliation completed");
                        ctx.bus.publish(ConsoleEvent::ReconciliationCompleted { mode });
                    } else {
                        info!(mode = %mode, run_id = %run.run_id, "reconciliation cancelled");
                        ctx.bus.publish(ConsoleEvent::ReconciliationCancelled { mode });
                    }
                }
            })
            .await;
        true
    }
}

struct Cancelled;

type StepResult<T> = Result<T, Cancelled>;

struct Run<'a> {
    ctx: &'a ReconciliationContext,
    token: &'a CancellationToken,
    mode: DeviceMode,
    run_id: String,
}

impl Run<'_> {
    async fn execute(&self) -> StepResult<()> {
        match self.mode {
            DeviceMode::Active => self.active().await,
            DeviceMode::Deactivating => self.deactivating().await,
            DeviceMode::Deactivated => self.deactivated().await,
            DeviceMode::Other => Ok(()),
        }
    }

    async fn active(&self) -> StepResult<()> {
        let summary = self.refresh_summary().await?;
        let mut job = None;
        if let Some(summary) = &summary {
            self.ensure_project(summary).await?;
            job = self.ensure_job(summary).await?;
        }
        let planned = job.as_ref().is_some_and(|j| j.planned)
            || summary.as_ref().is_some_and(|s| s.job_planned);

        match &job {
            Some(job) => {
                if planned {
                    self.ensure_plan(&job.id).await?;
                }
                self.show_acquisition(&job.id)?;
            }
            None => debug!(run_id = %self.run_id, "no job resolved; staying on current view"),
        }

        self.connect(ChannelKind::PointCloud).await?;
        if planned {
            self.refresh_routing().await?;
            self.connect(ChannelKind::Routing).await?;
            self.connect(ChannelKind::Autocapture).await?;
        }
        Ok(())
    }

    async fn deactivating(&self) -> StepResult<()> {
        if let Some(summary) = self.refresh_summary().await? {
            self.ensure_project(&summary).await?;
            self.ensure_job(&summary).await?;
        }
        self.checkpoint()?;
        self.ctx.store.update(|s| s.deactivating = true);
        Ok(())
    }

    async fn deactivated(&self) -> StepResult<()> {
        self.refresh_summary().await?;
        self.checkpoint()?;
        let store = &self.ctx.store;
        store.update(|s| s.deactivating = false);

        let route = self.ctx.navigator.current_route();
        if route.is_planning() || store.acquisition_ready() {
            return Ok(());
        }
        let target = store
            .last_job_id()
            .map(|job_id| Route::Job { job_id })
            .unwrap_or(Route::Projects);
        if route != target {
            self.ctx.navigator.navigate(target);
        }
        Ok(())
    }

    /// Fresh summary when the device answers, the cached one otherwise.
    async fn refresh_summary(&self) -> StepResult<Option<DeviceSummary>> {
        let fetched = self
            .step("refresh_summary", self.ctx.backend.fetch_summary())
            .await?;
        let Some(summary) = fetched else {
            return Ok(self.ctx.store.snapshot().summary);
        };
        self.ctx.store.update(|s| {
            s.acquisition_ready = summary.acquisition_ready;
            if let Some(job_id) = &summary.job_id {
                s.last_job_id = Some(job_id.clone());
            }
            s.summary = Some(summary.clone());
        });
        Ok(Some(summary))
    }

    async fn ensure_project(&self, summary: &DeviceSummary) -> StepResult<()> {
        let Some(project_id) = summary.project_id.as_deref() else {
            return Ok(());
        };
        if self.ctx.store.project_id().as_deref() == Some(project_id) {
            return Ok(());
        }
        if let Some(project) = self
            .step("fetch_project", self.ctx.backend.fetch_project(project_id))
            .await?
        {
            self.ctx.store.update(|s| s.project = Some(project));
        }
        Ok(())
    }

    async fn ensure_job(&self, summary: &DeviceSummary) -> StepResult<Option<JobSummary>> {
        let Some(job_id) = summary.job_id.as_deref() else {
            return Ok(None);
        };
        if let Some(job) = self.ctx.store.job().filter(|j| j.id == job_id) {
            return Ok(Some(job));
        }
        self.ctx.store.update(|s| s.job_ready = false);
        let fetched = self
            .step("fetch_job", self.ctx.backend.fetch_job(job_id))
            .await?;
        if let Some(job) = &fetched {
            self.ctx.store.update(|s| {
                if s.plan.as_ref().is_some_and(|p| p.job_id != job.id) {
                    s.plan = None;
                }
                s.last_job_id = Some(job.id.clone());
                s.job = Some(job.clone());
                s.job_ready = true;
            });
        }
        Ok(fetched)
    }

    async fn ensure_plan(&self, job_id: &str) -> StepResult<()> {
        if self.ctx.store.has_plan_for(job_id) {
            return Ok(());
        }
        if let Some(plan) = self
            .step("fetch_plan", self.ctx.backend.fetch_plan(job_id))
            .await?
        {
            self.ctx.store.update(|s| s.plan = Some(plan));
        }
        Ok(())
    }

    async fn refresh_routing(&self) -> StepResult<()> {
        if !self.ctx.modules.is_enabled(ChannelKind::Routing.module()) {
            return Ok(());
        }
        if let Some(status) = self
            .step("routing_status", self.ctx.backend.fetch_routing_status())
            .await?
        {
            self.ctx.store.update(|s| s.routing = Some(status));
        }
        if let Some(status) = self
            .step(
                "autocapture_status",
                self.ctx.backend.fetch_autocapture_status(),
            )
            .await?
        {
            self.ctx.store.update(|s| s.autocapture = Some(status));
        }
        Ok(())
    }

    fn show_acquisition(&self, job_id: &str) -> StepResult<()> {
        self.checkpoint()?;
        if self.ctx.navigator.current_route().is_acquisition() {
            return Ok(());
        }
        self.ctx.navigator.navigate(Route::Acquisition {
            job_id: job_id.to_string(),
        });
        Ok(())
    }

    async fn connect(&self, channel: ChannelKind) -> StepResult<()> {
        if !self.ctx.modules.is_enabled(channel.module()) {
            debug!(channel = %channel, "module disabled; not connecting");
            return Ok(());
        }
        if self.ctx.channels.connection_state(channel).is_connected() {
            return Ok(());
        }
        self.checkpoint()?;
        self.ctx.channels.subscribe(channel).await;
        Ok(())
    }

    /// Runs one fallible step. Failures are logged and yield `None`;
    /// only cancellation stops the checklist.
    async fn step<T>(
        &self,
        name: &'static str,
        fut: impl Future<Output = anyhow::Result<T>>,
    ) -> StepResult<Option<T>> {
        let outcome = until_cancelled(self.token, fut).await;
        self.checkpoint()?;
        match outcome {
            None => Err(Cancelled),
            Some(Ok(value)) => Ok(Some(value)),
            Some(Err(err)) => {
                let detail = format!("{err:#}");
                emit_event(
                    Level::WARN,
                    ObservabilityEvent {
                        event: "reconcile.step_failed",
                        component: "reconciliation",
                        correlation_id: Some(&self.run_id),
                        mode: Some(self.mode.as_str()),
                        status: Some(name),
                        error_code: Some("RECONCILE_STEP_FAILED"),
                        detail: Some(&detail),
                        ..Default::default()
                    },
                );
                Ok(None)
            }
        }
    }

    fn checkpoint(&self) -> StepResult<()> {
        if self.token.is_cancelled() {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{eventually, summary, FakeBackend, FakeChannels, RecordingNavigator};
    use std::time::Duration;
    use surveyor_types::FeatureModule;

    struct Harness {
        engine: Arc<ReconciliationEngine>,
        store: Arc<DeviceStore>,
        backend: Arc<FakeBackend>,
        channels: Arc<FakeChannels>,
        navigator: Arc<RecordingNavigator>,
        modules: Arc<ModuleSwitches>,
    }

    fn harness(summary: DeviceSummary, route: Route) -> Harness {
        let store = DeviceStore::new();
        let backend = Arc::new(FakeBackend::new(summary));
        let channels = Arc::new(FakeChannels::default());
        let navigator = Arc::new(RecordingNavigator::at(route));
        let modules = ModuleSwitches::all_enabled();
        let engine = ReconciliationEngine::new(ReconciliationContext {
            store: store.clone(),
            backend: backend.clone(),
            navigator: navigator.clone(),
            channels: channels.clone(),
            modules: modules.clone(),
            bus: EventBus::new(),
        });
        Harness {
            engine,
            store,
            backend,
            channels,
            navigator,
            modules,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn active_run_loads_job_and_connects_streams() {
        let h = harness(
            summary(DeviceMode::Active, Some("j1"), true),
            Route::Projects,
        );
        assert!(h.engine.trigger(DeviceMode::Active).await);
        assert!(eventually(|| h.engine.last_completed() == Some(DeviceMode::Active)).await);

        assert!(h.store.has_plan_for("j1"));
        assert_eq!(
            h.navigator.history.lock().as_slice(),
            [Route::Acquisition {
                job_id: "j1".into()
            }]
        );
        assert_eq!(
            h.channels.subscribed.lock().as_slice(),
            [
                ChannelKind::PointCloud,
                ChannelKind::Routing,
                ChannelKind::Autocapture
            ]
        );
        assert!(h.store.snapshot().routing.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_mode_does_not_rerun() {
        let h = harness(summary(DeviceMode::Active, Some("j1"), false), Route::Projects);
        assert!(h.engine.trigger(DeviceMode::Active).await);
        assert!(!h.engine.trigger(DeviceMode::Active).await);
        assert!(eventually(|| h.engine.last_completed() == Some(DeviceMode::Active)).await);
        assert!(!h.engine.trigger(DeviceMode::Active).await);
        assert_eq!(h.backend.count("summary"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn newer_mode_cancels_run_in_flight() {
        let h = harness(
            summary(DeviceMode::Active, Some("j1"), true),
            Route::Projects,
        );
        *h.backend.job_delay.lock() = Duration::from_secs(30);

        h.engine.trigger(DeviceMode::Active).await;
        assert!(eventually(|| h.backend.count("job") == 1).await);

        h.backend.summary.lock().mode = DeviceMode::Deactivated;
        assert!(h.engine.trigger(DeviceMode::Deactivated).await);
        assert!(eventually(|| h.engine.last_completed() == Some(DeviceMode::Deactivated)).await);

        // Let the abandoned fetch's timer elapse; nothing may land afterwards.
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(h.store.job().is_none());
        assert!(h.channels.subscribed.lock().is_empty());
        assert!(!h
            .navigator
            .history
            .lock()
            .iter()
            .any(Route::is_acquisition));
        assert_eq!(h.engine.last_completed(), Some(DeviceMode::Deactivated));
    }

    #[tokio::test(start_paused = true)]
    async fn deactivated_redirects_once_to_last_job() {
        let h = harness(
            summary(DeviceMode::Deactivated, Some("j7"), false),
            Route::Acquisition {
                job_id: "j7".into(),
            },
        );
        h.engine.trigger(DeviceMode::Deactivated).await;
        assert!(eventually(|| h.engine.last_completed() == Some(DeviceMode::Deactivated)).await);
        h.engine.trigger(DeviceMode::Deactivated).await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(
            h.navigator.history.lock().as_slice(),
            [Route::Job {
                job_id: "j7".into()
            }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn deactivated_without_a_known_job_falls_back_to_projects() {
        let h = harness(
            summary(DeviceMode::Deactivated, None, false),
            Route::Acquisition {
                job_id: "j9".into(),
            },
        );
        assert!(h.store.last_job_id().is_none());
        h.engine.trigger(DeviceMode::Deactivated).await;
        assert!(eventually(|| h.engine.last_completed() == Some(DeviceMode::Deactivated)).await);
        h.engine.trigger(DeviceMode::Deactivated).await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(h.navigator.history.lock().as_slice(), [Route::Projects]);
    }

    #[tokio::test(start_paused = true)]
    async fn deactivated_leaves_planning_view_alone() {
        let h = harness(
            summary(DeviceMode::Deactivated, None, false),
            Route::Planning { job_id: None },
        );
        h.engine.trigger(DeviceMode::Deactivated).await;
        assert!(eventually(|| h.engine.last_completed() == Some(DeviceMode::Deactivated)).await);
        assert!(h.navigator.history.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_job_fetch_skips_redirect_but_not_later_steps() {
        let h = harness(
            summary(DeviceMode::Active, Some("j1"), false),
            Route::Projects,
        );
        *h.backend.fail_job.lock() = true;
        h.engine.trigger(DeviceMode::Active).await;
        assert!(eventually(|| h.engine.last_completed() == Some(DeviceMode::Active)).await);

        assert!(h.navigator.history.lock().is_empty());
        assert_eq!(
            h.channels.subscribed.lock().as_slice(),
            [ChannelKind::PointCloud]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn deactivating_raises_flag_without_connecting() {
        let h = harness(
            summary(DeviceMode::Deactivating, Some("j1"), true),
            Route::Projects,
        );
        h.engine.trigger(DeviceMode::Deactivating).await;
        assert!(eventually(|| h.engine.last_completed() == Some(DeviceMode::Deactivating)).await);
        assert!(h.store.deactivating());
        assert!(h.channels.subscribed.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn authentication_forces_a_rerun() {
        let h = harness(summary(DeviceMode::Active, None, false), Route::Projects);
        h.store.set_mode(DeviceMode::Active);
        h.engine.trigger(DeviceMode::Active).await;
        assert!(eventually(|| h.backend.count("summary") == 1).await);
        assert!(eventually(|| h.engine.last_completed() == Some(DeviceMode::Active)).await);

        assert!(h.engine.on_authenticated().await);
        assert!(eventually(|| h.backend.count("summary") == 2).await);
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_modules_are_not_connected() {
        let h = harness(
            summary(DeviceMode::Active, Some("j1"), true),
            Route::Projects,
        );
        h.modules.set(FeatureModule::PointCloud, false);
        h.modules.set(FeatureModule::Routing, false);
        h.engine.trigger(DeviceMode::Active).await;
        assert!(eventually(|| h.engine.last_completed() == Some(DeviceMode::Active)).await);
        assert!(h.channels.subscribed.lock().is_empty());
        assert_eq!(h.backend.count("routing"), 0);
    }
}
