//! One reconnect supervisor per channel kind, plus page-scoped keep-alives.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::FutureExt;
use parking_lot::Mutex;
use surveyor_core::{
    race, ChannelControl, EventBus, ModuleSwitches, NotificationRouter, RaceOutcome,
};
use surveyor_types::{ChannelKind, ConnectionState, FeatureModule};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::ChannelsConfig;
use crate::reconnect::{ReconnectContext, ReconnectSupervisor};
use crate::traits::Transport;

pub struct ChannelHub {
    supervisors: HashMap<ChannelKind, ReconnectSupervisor>,
    modules: Arc<ModuleSwitches>,
    /// Open keep-alive scopes per channel.
    holders: Mutex<HashMap<ChannelKind, usize>>,
    stopping: CancellationToken,
}

impl ChannelHub {
    pub fn new(
        config: &ChannelsConfig,
        transport: Arc<dyn Transport>,
        bus: EventBus,
        router: NotificationRouter,
        modules: Arc<ModuleSwitches>,
    ) -> Arc<Self> {
        let ctx = ReconnectContext {
            transport,
            bus,
            router,
            modules: modules.clone(),
            token: config.api_token.clone(),
            delay: config.reconnect_delay,
        };
        let supervisors = ChannelKind::ALL
            .into_iter()
            .map(|kind| {
                let sup = ReconnectSupervisor::new(kind, config.endpoint(kind), ctx.clone());
                (kind, sup)
            })
            .collect();
        Arc::new(Self {
            supervisors,
            modules,
            holders: Mutex::new(HashMap::new()),
            stopping: CancellationToken::new(),
        })
    }

    pub fn supervisor(&self, channel: ChannelKind) -> Option<&ReconnectSupervisor> {
        self.supervisors.get(&channel)
    }

    /// Subscribes for as long as `scope` lives. The channel is released when
    /// the last scope holding it is cancelled. The returned task also ends
    /// when the subscription is torn down elsewhere (module switched off) or
    /// the hub shuts down.
    pub async fn keep_alive(
        self: &Arc<Self>,
        channel: ChannelKind,
        scope: CancellationToken,
    ) -> JoinHandle<()> {
        *self.holders.lock().entry(channel).or_default() += 1;
        self.subscribe(channel).await;
        let hub = self.clone();
        tokio::spawn(async move {
            let Some(sup) = hub.supervisors.get(&channel) else {
                return;
            };
            let ended = race(
                &hub.stopping,
                vec![scope.cancelled().boxed(), sup.released().boxed()],
            )
            .await;
            match ended {
                RaceOutcome::Won { index: 0, .. } => {
                    if hub.release_holder(channel) {
                        hub.unsubscribe(channel).await;
                    }
                }
                RaceOutcome::Won { .. } => {
                    debug!(channel = %channel, "keep-alive ended with its subscription");
                    hub.release_holder(channel);
                }
                RaceOutcome::Cancelled => {}
            }
        })
    }

    /// Returns whether that was the last holder.
    fn release_holder(&self, channel: ChannelKind) -> bool {
        let mut holders = self.holders.lock();
        let count = holders.entry(channel).or_default();
        *count = count.saturating_sub(1);
        *count == 0
    }

    /// Flips a module at runtime. Disabling it tears down its channels now;
    /// enabling it only allows the next subscribe to go through.
    pub async fn set_module_enabled(&self, module: FeatureModule, enabled: bool) {
        self.modules.set(module, enabled);
        info!(?module, enabled, "module switched");
        if enabled {
            return;
        }
        for channel in ChannelKind::ALL {
            if channel.module() == module {
                self.unsubscribe(channel).await;
            }
        }
    }

    pub async fn shutdown(&self) {
        self.stopping.cancel();
        self.holders.lock().clear();
        for channel in ChannelKind::ALL {
            self.unsubscribe(channel).await;
        }
    }
}

#[async_trait]
impl ChannelControl for ChannelHub {
    fn connection_state(&self, channel: ChannelKind) -> ConnectionState {
        self.supervisors
            .get(&channel)
            .map(ReconnectSupervisor::connection_state)
            .unwrap_or_default()
    }

    async fn subscribe(&self, channel: ChannelKind) {
        if let Some(sup) = self.supervisors.get(&channel) {
            sup.subscribe().await;
        }
    }

    async fn unsubscribe(&self, channel: ChannelKind) {
        if let Some(sup) = self.supervisors.get(&channel) {
            sup.unsubscribe().await;
        }
    }
}
