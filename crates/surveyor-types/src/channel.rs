use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::device::DeviceMode;
use crate::notification::Notification;

/// Feature modules gate which streams the console is allowed to keep open.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FeatureModule {
    Core,
    Routing,
    PointCloud,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    System,
    Routing,
    PointCloud,
    Autocapture,
}

impl ChannelKind {
    pub const ALL: [ChannelKind; 4] = [
        ChannelKind::System,
        ChannelKind::Routing,
        ChannelKind::PointCloud,
        ChannelKind::Autocapture,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ChannelKind::System => "system",
            ChannelKind::Routing => "routing",
            ChannelKind::PointCloud => "pointcloud",
            ChannelKind::Autocapture => "autocapture",
        }
    }

    pub fn stream_path(self) -> &'static str {
        match self {
            ChannelKind::System => "/ws/system",
            ChannelKind::Routing => "/ws/routing",
            ChannelKind::PointCloud => "/ws/pointcloud",
            ChannelKind::Autocapture => "/ws/autocapture",
        }
    }

    pub fn module(self) -> FeatureModule {
        match self {
            ChannelKind::System => FeatureModule::Core,
            ChannelKind::Routing | ChannelKind::Autocapture => FeatureModule::Routing,
            ChannelKind::PointCloud => FeatureModule::PointCloud,
        }
    }
}

impl std::fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One decoded line of a channel stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChannelMessage {
    pub channel: ChannelKind,
    pub payload: Value,
}

/// Typed view of the payloads the system channel pushes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SystemMessage {
    Mode {
        mode: DeviceMode,
    },
    Notification(Notification),
    AcquisitionReady {
        ready: bool,
    },
    #[serde(other)]
    Unknown,
}

impl SystemMessage {
    pub fn from_payload(payload: &Value) -> Self {
        serde_json::from_value(payload.clone()).unwrap_or(SystemMessage::Unknown)
    }
}
