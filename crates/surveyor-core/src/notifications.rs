use std::collections::HashSet;
use std::sync::Arc;

use surveyor_types::{codes, ChannelKind, Notification, NotificationLevel};
use tracing::{error, info, warn};

/// Where a notification ends up. More than one target may apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Dispatch {
    pub alert: bool,
    pub speak: bool,
}

impl Dispatch {
    pub const SILENT: Dispatch = Dispatch {
        alert: false,
        speak: false,
    };
}

/// Presentation-side receiver of routed notifications.
pub trait NotificationSink: Send + Sync {
    fn alert(&self, notification: &Notification);
    fn speak(&self, text: &str);

    /// Sees every routed notification, including silent ones.
    fn record(&self, _notification: &Notification, _dispatch: Dispatch) {}
}

/// Sink for headless runs: alerts and speech become log lines.
pub struct TracingSink;

impl NotificationSink for TracingSink {
    fn alert(&self, notification: &Notification) {
        warn!(
            target: "surveyor.alert",
            code = %notification.code,
            dismissible = notification.dismissible,
            "{}",
            notification.message
        );
    }

    fn speak(&self, text: &str) {
        info!(target: "surveyor.speech", "{text}");
    }
}

#[derive(Clone)]
pub struct NotificationRouter {
    sink: Arc<dyn NotificationSink>,
    silent_codes: Arc<HashSet<String>>,
    spoken_codes: Arc<HashSet<String>>,
}

impl NotificationRouter {
    pub fn new(sink: Arc<dyn NotificationSink>) -> Self {
        let spoken = [codes::ARCS_NOT_RETRIEVED, codes::CHANNEL_DISCONNECTED]
            .into_iter()
            .map(str::to_string)
            .collect();
        Self {
            sink,
            silent_codes: Arc::new(HashSet::new()),
            spoken_codes: Arc::new(spoken),
        }
    }

    pub fn with_silent_codes(mut self, silent: impl IntoIterator<Item = String>) -> Self {
        self.silent_codes = Arc::new(silent.into_iter().collect());
        self
    }

    /// Device codes carry their severity in the first letter (`E…`, `W…`,
    /// `I…`); anything else keeps the level it arrived with.
    pub fn effective_level(notification: &Notification) -> NotificationLevel {
        match notification.code.chars().next() {
            Some('E') if is_device_code(&notification.code) => NotificationLevel::Error,
            Some('W') if is_device_code(&notification.code) => NotificationLevel::Warning,
            Some('I') if is_device_code(&notification.code) => NotificationLevel::Info,
            _ => notification.level,
        }
    }

    pub fn classify(&self, notification: &Notification) -> Dispatch {
        if self.silent_codes.contains(&notification.code) {
            return Dispatch::SILENT;
        }
        let level = Self::effective_level(notification);
        let spoken = self.spoken_codes.contains(&notification.code);
        match level {
            NotificationLevel::Error => Dispatch {
                alert: true,
                speak: true,
            },
            NotificationLevel::Warning => Dispatch {
                alert: true,
                speak: spoken,
            },
            NotificationLevel::Info => Dispatch {
                alert: notification.code == codes::CHANNEL_RESUMED,
                speak: spoken,
            },
        }
    }

    pub fn route(&self, notification: &Notification) -> Dispatch {
        let dispatch = self.classify(notification);
        match Self::effective_level(notification) {
            NotificationLevel::Error => error!(code = %notification.code, "{}", notification.message),
            NotificationLevel::Warning => warn!(code = %notification.code, "{}", notification.message),
            NotificationLevel::Info => info!(code = %notification.code, "{}", notification.message),
        }
        self.sink.record(notification, dispatch);
        if dispatch.alert {
            self.sink.alert(notification);
        }
        if dispatch.speak {
            self.sink.speak(&notification.message);
        }
        dispatch
    }

    /// Reports a `connected` transition of a channel.
    pub fn connection_changed(&self, channel: ChannelKind, connected: bool, resumed: bool) {
        if connected && !resumed {
            info!(channel = %channel, "channel connected");
            return;
        }
        let notification = if connected {
            Notification::new(
                codes::CHANNEL_RESUMED,
                NotificationLevel::Info,
                format!("Connection to the {channel} stream resumed"),
            )
        } else {
            Notification::new(
                codes::CHANNEL_DISCONNECTED,
                NotificationLevel::Warning,
                format!("Connection to the {channel} stream was lost, retrying"),
            )
            .dismissible()
        };
        self.route(&notification);
    }

    /// Reports a stream the console closed on purpose. Logged, never alerted.
    pub fn connection_closed(&self, channel: ChannelKind) -> Dispatch {
        self.route(&Notification::new(
            codes::CHANNEL_CLOSED,
            NotificationLevel::Info,
            format!("Disconnected from the {channel} stream"),
        ))
    }
}

fn is_device_code(code: &str) -> bool {
    code.len() > 1 && code[1..].chars().all(|c| c.is_ascii_digit())
}
