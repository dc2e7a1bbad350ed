use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum NotificationLevel {
    Info,
    Warning,
    Error,
}

/// Well-known codes raised by the console itself. Device-originated codes are
/// passed through verbatim.
pub mod codes {
    pub const ARCS_NOT_RETRIEVED: &str = "PLAN_ARCS_NOT_RETRIEVED";
    pub const CHANNEL_DISCONNECTED: &str = "CHANNEL_DISCONNECTED";
    pub const CHANNEL_RESUMED: &str = "CHANNEL_RESUMED";
    pub const CHANNEL_CLOSED: &str = "CHANNEL_CLOSED";
    pub const NO_SELECTION: &str = "PLAN_NO_SELECTION";
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Notification {
    pub code: String,
    pub level: NotificationLevel,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub dismissible: bool,
}

impl Notification {
    pub fn new(code: impl Into<String>, level: NotificationLevel, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            level,
            message: message.into(),
            dismissible: false,
        }
    }

    pub fn dismissible(mut self) -> Self {
        self.dismissible = true;
        self
    }

    pub fn arcs_not_retrieved(detail: &str) -> Self {
        Self::new(
            codes::ARCS_NOT_RETRIEVED,
            NotificationLevel::Error,
            format!("Path arcs could not be retrieved: {detail}"),
        )
        .dismissible()
    }
}
