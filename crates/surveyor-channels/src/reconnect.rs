//! Keeps one logical subscription alive across connection loss.
//!
//! A subscription owns a single supervision task. The task opens the stream,
//! reads until it ends, waits out a fixed backoff and tries again for as long
//! as the subscription stands and the channel's module is enabled. Only one
//! task exists per channel, so at most one connection is ever live.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use surveyor_core::{until_cancelled, EventBus, ModuleSwitches, NotificationRouter, TaskSlot};
use surveyor_types::{ChannelKind, ConnectionState, ConsoleEvent};
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::supervisor::{ChannelSupervisor, ReadEnd};
use crate::traits::{Transport, NORMAL_CLOSE};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Idle,
    Connecting,
    Open,
    Backoff,
    Unsubscribed,
}

impl SubscriptionState {
    /// States in which a subscription is already live.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            SubscriptionState::Connecting | SubscriptionState::Open | SubscriptionState::Backoff
        )
    }
}

/// Everything a supervisor needs from its surroundings.
#[derive(Clone)]
pub struct ReconnectContext {
    pub transport: Arc<dyn Transport>,
    pub bus: EventBus,
    pub router: NotificationRouter,
    pub modules: Arc<ModuleSwitches>,
    pub token: Option<String>,
    pub delay: Duration,
}

struct Shared {
    channel: ChannelKind,
    endpoint: String,
    ctx: ReconnectContext,
    state: watch::Sender<SubscriptionState>,
    connection: watch::Sender<ConnectionState>,
    ever_connected: AtomicBool,
}

pub struct ReconnectSupervisor {
    shared: Arc<Shared>,
    slot: TaskSlot,
    ops: Mutex<()>,
}

impl ReconnectSupervisor {
    pub fn new(channel: ChannelKind, endpoint: String, ctx: ReconnectContext) -> Self {
        let (state, _) = watch::channel(SubscriptionState::Idle);
        let (connection, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            shared: Arc::new(Shared {
                channel,
                endpoint,
                ctx,
                state,
                connection,
                ever_connected: AtomicBool::new(false),
            }),
            slot: TaskSlot::new(),
            ops: Mutex::new(()),
        }
    }

    pub fn channel(&self) -> ChannelKind {
        self.shared.channel
    }

    pub fn state(&self) -> SubscriptionState {
        *self.shared.state.borrow()
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.shared.connection.borrow()
    }

    /// Resolves once the subscription is no longer live: unsubscribed, or
    /// dropped by the retry loop because its module was switched off.
    pub async fn released(&self) {
        let mut state = self.shared.state.subscribe();
        loop {
            let live = state.borrow_and_update().is_active();
            if !live {
                return;
            }
            if state.changed().await.is_err() {
                return;
            }
        }
    }

    /// No-op while a subscription is already live, including a pending retry.
    pub async fn subscribe(&self) {
        let _ops = self.ops.lock().await;
        let channel = self.shared.channel;
        if self.state().is_active() {
            debug!(channel = %channel, "already subscribed");
            return;
        }
        if !self.shared.ctx.modules.is_enabled(channel.module()) {
            debug!(channel = %channel, "module disabled; not subscribing");
            return;
        }
        self.shared.set_state(SubscriptionState::Connecting);
        let shared = self.shared.clone();
        self.slot
            .replace(move |cancel| shared.supervise(cancel))
            .await;
    }

    /// Stops supervision. Returns once the read loop or backoff has ended and
    /// the connection is closed.
    pub async fn unsubscribe(&self) {
        let _ops = self.ops.lock().await;
        self.slot.clear().await;
        self.shared.close_intentionally();
        self.shared.set_state(SubscriptionState::Unsubscribed);
        info!(channel = %self.shared.channel, "unsubscribed");
    }
}

impl Shared {
    async fn supervise(self: Arc<Self>, cancel: CancellationToken) {
        let mut supervisor = ChannelSupervisor::new(
            self.channel,
            self.endpoint.clone(),
            self.ctx.token.clone(),
            self.ctx.transport.clone(),
            self.ctx.bus.clone(),
        );
        loop {
            self.set_state(SubscriptionState::Connecting);
            self.set_connection(ConnectionState::Pending);
            let Some(opened) = until_cancelled(&cancel, supervisor.open()).await else {
                supervisor.close(NORMAL_CLOSE, "unsubscribed").await;
                return;
            };
            match opened {
                Ok(()) => {
                    self.set_state(SubscriptionState::Open);
                    self.set_connection(ConnectionState::Connected);
                    if supervisor.read(&cancel).await == ReadEnd::Cancelled {
                        supervisor.close(NORMAL_CLOSE, "unsubscribed").await;
                        return;
                    }
                }
                Err(err) => {
                    warn!(channel = %self.channel, "{err}");
                }
            }

            self.set_connection(ConnectionState::Disconnected);
            self.set_state(SubscriptionState::Backoff);
            debug!(channel = %self.channel, delay_ms = self.ctx.delay.as_millis() as u64, "backing off");
            if until_cancelled(&cancel, tokio::time::sleep(self.ctx.delay))
                .await
                .is_none()
            {
                return;
            }
            if !self.ctx.modules.is_enabled(self.channel.module()) {
                info!(channel = %self.channel, "module disabled; dropping subscription");
                self.set_state(SubscriptionState::Idle);
                return;
            }
        }
    }

    fn set_state(&self, state: SubscriptionState) {
        self.state.send_replace(state);
    }

    /// Unsubscribing is not a loss: the router logs it as an info-level close
    /// with no alert, and the next subscription starts without "resumed"
    /// history.
    fn close_intentionally(&self) {
        let previous = self.connection.send_replace(ConnectionState::Disconnected);
        self.ever_connected.store(false, Ordering::SeqCst);
        if previous != ConnectionState::Disconnected {
            self.ctx.bus.publish(ConsoleEvent::ConnectionStateChanged {
                channel: self.channel,
                state: ConnectionState::Disconnected,
            });
            self.ctx.router.connection_closed(self.channel);
        }
    }

    fn set_connection(&self, state: ConnectionState) {
        let previous = self.connection.send_replace(state);
        if previous == state {
            return;
        }
        self.ctx.bus.publish(ConsoleEvent::ConnectionStateChanged {
            channel: self.channel,
            state,
        });
        let connected = state.is_connected();
        if previous.is_connected() != connected {
            let resumed = connected && self.ever_connected.swap(true, Ordering::SeqCst);
            self.ctx
                .router
                .connection_changed(self.channel, connected, resumed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{settle, MockTransport};
    use crate::traits::Frame;
    use surveyor_core::{drain_ready, Dispatch, NotificationSink};
    use surveyor_types::{codes, FeatureModule, Notification};

    #[derive(Default)]
    struct Alerts {
        alerted: parking_lot::Mutex<Vec<String>>,
        routed: parking_lot::Mutex<Vec<String>>,
    }

    impl NotificationSink for Alerts {
        fn alert(&self, notification: &Notification) {
            self.alerted.lock().push(notification.code.clone());
        }

        fn speak(&self, _text: &str) {}

        fn record(&self, notification: &Notification, _dispatch: Dispatch) {
            self.routed.lock().push(notification.code.clone());
        }
    }

    struct Harness {
        transport: Arc<MockTransport>,
        modules: Arc<ModuleSwitches>,
        alerts: Arc<Alerts>,
        bus: EventBus,
        sup: ReconnectSupervisor,
    }

    fn harness(channel: ChannelKind) -> Harness {
        let transport = Arc::new(MockTransport::default());
        let modules = ModuleSwitches::all_enabled();
        let alerts = Arc::new(Alerts::default());
        let bus = EventBus::new();
        let sup = ReconnectSupervisor::new(
            channel,
            format!("ws://rig{}", channel.stream_path()),
            ReconnectContext {
                transport: transport.clone(),
                bus: bus.clone(),
                router: NotificationRouter::new(alerts.clone()),
                modules: modules.clone(),
                token: None,
                delay: Duration::from_millis(1000),
            },
        );
        Harness {
            transport,
            modules,
            alerts,
            bus,
            sup,
        }
    }

    fn connected_flags(events: &[ConsoleEvent]) -> Vec<bool> {
        events
            .iter()
            .filter_map(|e| match e {
                ConsoleEvent::ConnectionStateChanged { state, .. }
                    if *state != ConnectionState::Pending =>
                {
                    Some(state.is_connected())
                }
                _ => None,
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn abrupt_close_retries_once_after_backoff() {
        let h = harness(ChannelKind::System);
        let mut rx = h.bus.subscribe();
        h.sup.subscribe().await;
        settle().await;
        assert_eq!(h.sup.state(), SubscriptionState::Open);

        let tx = h.transport.sender(0);
        for seq in 0..3 {
            tx.send(Frame::Text(format!("{{\"seq\":{seq}}}\n")))
                .expect("send");
        }
        drop(tx);
        settle().await;
        h.transport.drop_connection(0);
        settle().await;
        assert_eq!(h.sup.state(), SubscriptionState::Backoff);

        tokio::time::advance(Duration::from_millis(999)).await;
        settle().await;
        assert_eq!(h.transport.opened(), 1);

        tokio::time::advance(Duration::from_millis(2)).await;
        settle().await;
        assert_eq!(h.transport.opened(), 2);
        assert_eq!(h.sup.state(), SubscriptionState::Open);

        let events = drain_ready(&mut rx);
        let received = events
            .iter()
            .filter(|e| matches!(e, ConsoleEvent::MessageReceived(_)))
            .count();
        assert_eq!(received, 3);
        assert_eq!(connected_flags(&events), vec![true, false, true]);
        assert_eq!(
            h.alerts.alerted.lock().as_slice(),
            [codes::CHANNEL_DISCONNECTED, codes::CHANNEL_RESUMED]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn never_two_live_connections() {
        let h = harness(ChannelKind::Routing);
        h.sup.subscribe().await;
        h.sup.subscribe().await;
        settle().await;
        assert_eq!(h.transport.opened(), 1);

        for round in 0..3 {
            h.transport.drop_connection(round);
            settle().await;
            h.sup.subscribe().await;
            tokio::time::advance(Duration::from_millis(1001)).await;
            settle().await;
        }
        assert_eq!(h.transport.connections(), 4);
        assert_eq!(h.transport.max_live(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unsubscribe_during_backoff_prevents_retry() {
        let h = harness(ChannelKind::PointCloud);
        h.sup.subscribe().await;
        settle().await;
        h.transport.drop_connection(0);
        settle().await;
        assert_eq!(h.sup.state(), SubscriptionState::Backoff);

        h.sup.unsubscribe().await;
        tokio::time::advance(Duration::from_secs(10)).await;
        settle().await;
        assert_eq!(h.transport.opened(), 1);
        assert_eq!(h.sup.state(), SubscriptionState::Unsubscribed);
        assert_eq!(h.sup.connection_state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn unsubscribe_closes_open_stream_normally() {
        let h = harness(ChannelKind::System);
        h.sup.subscribe().await;
        settle().await;
        h.sup.unsubscribe().await;
        assert_eq!(h.transport.closed_with(), vec![NORMAL_CLOSE]);
        assert_eq!(h.transport.live(), 0);
        assert_eq!(h.sup.connection_state(), ConnectionState::Disconnected);
        assert!(h.alerts.alerted.lock().is_empty());
        assert_eq!(h.alerts.routed.lock().as_slice(), [codes::CHANNEL_CLOSED]);

        // An explicit subscribe after unsubscribing starts over.
        h.sup.subscribe().await;
        settle().await;
        assert_eq!(h.transport.opened(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_open_backs_off_like_a_close() {
        let h = harness(ChannelKind::System);
        h.transport.fail_next(1);
        h.sup.subscribe().await;
        settle().await;
        assert_eq!(h.sup.state(), SubscriptionState::Backoff);
        assert_eq!(h.sup.connection_state(), ConnectionState::Disconnected);

        tokio::time::advance(Duration::from_millis(1001)).await;
        settle().await;
        assert_eq!(h.sup.connection_state(), ConnectionState::Connected);
        // First success is not a resumption.
        assert!(h.alerts.alerted.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn released_waits_for_the_subscription_to_end() {
        let h = harness(ChannelKind::Routing);
        h.sup.released().await;

        h.sup.subscribe().await;
        settle().await;
        let released = h.sup.released();
        tokio::pin!(released);
        assert!(futures_util::poll!(released.as_mut()).is_pending());

        h.transport.drop_connection(0);
        settle().await;
        assert_eq!(h.sup.state(), SubscriptionState::Backoff);
        assert!(futures_util::poll!(released.as_mut()).is_pending());

        h.sup.unsubscribe().await;
        released.await;
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_module_stops_retrying() {
        let h = harness(ChannelKind::Autocapture);
        h.sup.subscribe().await;
        settle().await;
        h.modules.set(FeatureModule::Routing, false);
        h.transport.drop_connection(0);
        settle().await;

        tokio::time::advance(Duration::from_millis(1001)).await;
        settle().await;
        assert_eq!(h.transport.opened(), 1);
        assert_eq!(h.sup.state(), SubscriptionState::Idle);

        h.sup.subscribe().await;
        settle().await;
        assert_eq!(h.transport.opened(), 1);
    }
}
