//! Turns system-stream messages and bus signals into store writes,
//! reconciliation triggers and routed notifications.

use std::sync::Arc;

use surveyor_types::{ChannelKind, ConsoleEvent, DeviceMode, DeviceSummary, SystemMessage};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::DeviceBackend;
use crate::event_bus::EventBus;
use crate::notifications::NotificationRouter;
use crate::reconciliation::ReconciliationEngine;
use crate::store::DeviceStore;

pub struct SystemDispatcher {
    store: Arc<DeviceStore>,
    backend: Arc<dyn DeviceBackend>,
    engine: Arc<ReconciliationEngine>,
    router: NotificationRouter,
    bus: EventBus,
    inbox: Mutex<Option<mpsc::UnboundedReceiver<ConsoleEvent>>>,
}

impl SystemDispatcher {
    pub fn new(
        store: Arc<DeviceStore>,
        backend: Arc<dyn DeviceBackend>,
        engine: Arc<ReconciliationEngine>,
        router: NotificationRouter,
        bus: EventBus,
    ) -> Arc<Self> {
        // Subscribed here so nothing published before `run` starts is missed.
        let inbox = Mutex::new(Some(bus.subscribe_control()));
        Arc::new(Self {
            store,
            backend,
            engine,
            router,
            bus,
            inbox,
        })
    }

    /// The only writer of `DeviceMode`.
    pub async fn apply_mode(&self, mode: DeviceMode) {
        if self.store.set_mode(mode) {
            info!(mode = %mode, "device mode changed");
            self.bus.publish(ConsoleEvent::ModeChanged { mode });
        }
        self.engine.trigger(mode).await;
    }

    /// Explicit status poll, used at startup and after reconnects.
    pub async fn poll_status(&self) -> anyhow::Result<DeviceSummary> {
        let summary = self.backend.fetch_summary().await?;
        self.store.update(|s| {
            s.acquisition_ready = summary.acquisition_ready;
            s.summary = Some(summary.clone());
        });
        self.apply_mode(summary.mode).await;
        Ok(summary)
    }

    pub async fn authenticate(&self) -> anyhow::Result<()> {
        self.backend.authenticate().await?;
        self.bus.publish(ConsoleEvent::Authenticated);
        Ok(())
    }

    pub async fn handle_event(&self, event: ConsoleEvent) {
        match event {
            ConsoleEvent::MessageReceived(msg) if msg.channel == ChannelKind::System => {
                match SystemMessage::from_payload(&msg.payload) {
                    SystemMessage::Mode { mode } => self.apply_mode(mode).await,
                    SystemMessage::Notification(notification) => {
                        self.router.route(&notification);
                    }
                    SystemMessage::AcquisitionReady { ready } => {
                        self.store.update(|s| s.acquisition_ready = ready);
                    }
                    SystemMessage::Unknown => debug!("ignoring unrecognised system message"),
                }
            }
            ConsoleEvent::Notification(notification) => {
                self.router.route(&notification);
            }
            ConsoleEvent::Authenticated => {
                self.engine.on_authenticated().await;
            }
            ConsoleEvent::ConnectionOpened { channel: ChannelKind::System } => {
                // Pushes may have been missed while the stream was down.
                if let Err(err) = self.poll_status().await {
                    warn!("status poll after reconnect failed: {err:#}");
                }
            }
            _ => {}
        }
    }

    /// Consumes the control lane of the bus until cancelled. Only the first
    /// call does anything.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let Some(mut rx) = self.inbox.lock().take() else {
            warn!("system dispatcher is already running");
            return;
        };
        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                event = rx.recv() => event,
            };
            match event {
                Some(event) => self.handle_event(event).await,
                None => break,
            }
        }
        debug!("system dispatcher stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModuleSwitches;
    use crate::event_bus::drain_ready;
    use crate::notifications::tests::RecordingSink;
    use crate::reconciliation::ReconciliationContext;
    use crate::testing::{eventually, summary, FakeBackend, FakeChannels, RecordingNavigator};
    use serde_json::json;
    use surveyor_types::{ChannelMessage, Route};

    fn dispatcher() -> (Arc<SystemDispatcher>, Arc<DeviceStore>, Arc<RecordingSink>, EventBus) {
        let bus = EventBus::new();
        let store = DeviceStore::new();
        let backend = Arc::new(FakeBackend::new(summary(DeviceMode::Active, None, false)));
        let engine = ReconciliationEngine::new(ReconciliationContext {
            store: store.clone(),
            backend: backend.clone(),
            navigator: Arc::new(RecordingNavigator::at(Route::Projects)),
            channels: Arc::new(FakeChannels::default()),
            modules: ModuleSwitches::all_enabled(),
            bus: bus.clone(),
        });
        let sink = Arc::new(RecordingSink::default());
        let router = NotificationRouter::new(sink.clone());
        let dispatcher = SystemDispatcher::new(store.clone(), backend, engine, router, bus.clone());
        (dispatcher, store, sink, bus)
    }

    fn system(payload: serde_json::Value) -> ConsoleEvent {
        ConsoleEvent::MessageReceived(ChannelMessage {
            channel: ChannelKind::System,
            payload,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn mode_message_updates_store_and_reconciles() {
        let (dispatcher, store, _sink, bus) = dispatcher();
        let mut rx = bus.subscribe();
        dispatcher
            .handle_event(system(json!({"type": "mode", "mode": "active"})))
            .await;
        assert_eq!(store.mode(), DeviceMode::Active);
        assert!(eventually(|| dispatcher.engine.last_completed() == Some(DeviceMode::Active)).await);
        let events = drain_ready(&mut rx);
        assert!(events.contains(&ConsoleEvent::ModeChanged {
            mode: DeviceMode::Active
        }));
    }

    #[tokio::test]
    async fn device_notifications_are_routed() {
        let (dispatcher, _store, sink, _bus) = dispatcher();
        dispatcher
            .handle_event(system(json!({
                "type": "notification",
                "code": "E0042",
                "level": "info",
                "message": "gnss antenna disconnected"
            })))
            .await;
        assert_eq!(sink.alerts.lock().len(), 1);
        assert_eq!(sink.spoken.lock().len(), 1);
    }

    #[tokio::test]
    async fn acquisition_ready_push_sets_gate() {
        let (dispatcher, store, _sink, _bus) = dispatcher();
        dispatcher
            .handle_event(system(json!({"type": "acquisition_ready", "ready": true})))
            .await;
        assert!(store.acquisition_ready());
    }

    #[tokio::test]
    async fn messages_from_other_channels_are_ignored() {
        let (dispatcher, store, _sink, _bus) = dispatcher();
        dispatcher
            .handle_event(ConsoleEvent::MessageReceived(ChannelMessage {
                channel: ChannelKind::Routing,
                payload: json!({"type": "mode", "mode": "active"}),
            }))
            .await;
        assert_eq!(store.mode(), DeviceMode::Other);
    }

    #[tokio::test(start_paused = true)]
    async fn mode_push_survives_a_stream_burst() {
        let (dispatcher, store, _sink, bus) = dispatcher();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(dispatcher.clone().run(cancel.clone()));

        bus.publish(system(json!({"type": "mode", "mode": "deactivated"})));
        for i in 0..2100 {
            bus.publish(ConsoleEvent::MessageReceived(ChannelMessage {
                channel: ChannelKind::PointCloud,
                payload: json!({ "seq": i }),
            }));
        }

        assert!(eventually(|| store.mode() == DeviceMode::Deactivated).await);
        cancel.cancel();
        task.await.expect("dispatcher task");
    }

    #[tokio::test(start_paused = true)]
    async fn second_run_returns_immediately() {
        let (dispatcher, _store, _sink, _bus) = dispatcher();
        let cancel = CancellationToken::new();
        let first = tokio::spawn(dispatcher.clone().run(cancel.clone()));
        assert!(eventually(|| dispatcher.inbox.lock().is_none()).await);
        dispatcher.clone().run(CancellationToken::new()).await;
        assert!(!first.is_finished());
        cancel.cancel();
        first.await.expect("dispatcher task");
    }

    #[tokio::test(start_paused = true)]
    async fn poll_status_applies_reported_mode() {
        let (dispatcher, store, _sink, _bus) = dispatcher();
        let summary = dispatcher.poll_status().await.expect("poll");
        assert_eq!(summary.mode, DeviceMode::Active);
        assert_eq!(store.mode(), DeviceMode::Active);
    }
}
