use serde::{Deserialize, Serialize};

use crate::geometry::Shape;

/// Coarse operating mode reported by the acquisition device.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeviceMode {
    Active,
    Deactivating,
    Deactivated,
    #[default]
    #[serde(other)]
    Other,
}

impl DeviceMode {
    pub fn as_str(self) -> &'static str {
        match self {
            DeviceMode::Active => "active",
            DeviceMode::Deactivating => "deactivating",
            DeviceMode::Deactivated => "deactivated",
            DeviceMode::Other => "other",
        }
    }
}

impl std::fmt::Display for DeviceMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Connected,
    #[default]
    Disconnected,
    Pending,
}

impl ConnectionState {
    pub fn is_connected(self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StorageInfo {
    pub free_bytes: u64,
    pub total_bytes: u64,
}

/// Answer of the status endpoint: what the device is doing right now.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSummary {
    pub mode: DeviceMode,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub job_id: Option<String>,
    #[serde(default)]
    pub job_planned: bool,
    #[serde(default)]
    pub acquisition_ready: bool,
    #[serde(default)]
    pub storage: Option<StorageInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSummary {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct JobSummary {
    pub id: String,
    pub project_id: String,
    pub name: String,
    #[serde(default)]
    pub planned: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    pub job_id: String,
    #[serde(default)]
    pub shapes: Vec<Shape>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RoutingStatus {
    pub enabled: bool,
    #[serde(default)]
    pub active_path_id: Option<String>,
    #[serde(default)]
    pub progress: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AutocaptureStatus {
    pub enabled: bool,
    #[serde(default)]
    pub interval_m: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_mode_deserializes_as_other() {
        let mode: DeviceMode = serde_json::from_str("\"calibrating\"").unwrap();
        assert_eq!(mode, DeviceMode::Other);
        let mode: DeviceMode = serde_json::from_str("\"deactivating\"").unwrap();
        assert_eq!(mode, DeviceMode::Deactivating);
    }

    #[test]
    fn summary_defaults_missing_fields() {
        let summary: DeviceSummary = serde_json::from_str(r#"{"mode":"active"}"#).unwrap();
        assert_eq!(summary.mode, DeviceMode::Active);
        assert!(summary.job_id.is_none());
        assert!(!summary.acquisition_ready);
    }
}
