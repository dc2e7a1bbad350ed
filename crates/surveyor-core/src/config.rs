use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use surveyor_types::FeatureModule;
use tokio::fs;

pub const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:8080";
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 1000;
pub const DEFAULT_POLYGON_DRAG_MS: u64 = 100;
pub const DEFAULT_PATH_DRAG_MS: u64 = 1000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_server_url")]
    pub base_url: String,
    /// Streaming endpoint root. Derived from `base_url` when absent.
    #[serde(default)]
    pub stream_url: Option<String>,
    #[serde(default)]
    pub api_token: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: default_server_url(),
            stream_url: None,
            api_token: None,
        }
    }
}

impl ServerConfig {
    pub fn stream_base_url(&self) -> String {
        if let Some(url) = self.stream_url.as_deref().filter(|u| !u.trim().is_empty()) {
            return url.trim_end_matches('/').to_string();
        }
        let base = self.base_url.trim_end_matches('/');
        if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            base.to_string()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModulesConfig {
    #[serde(default = "default_true")]
    pub routing: bool,
    #[serde(default = "default_true")]
    pub point_cloud: bool,
}

impl Default for ModulesConfig {
    fn default() -> Self {
        Self {
            routing: true,
            point_cloud: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelSettings {
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            reconnect_delay_ms: DEFAULT_RECONNECT_DELAY_MS,
        }
    }
}

impl ChannelSettings {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanningSettings {
    #[serde(default = "default_polygon_drag_ms")]
    pub polygon_drag_ms: u64,
    #[serde(default = "default_path_drag_ms")]
    pub path_drag_ms: u64,
}

impl Default for PlanningSettings {
    fn default() -> Self {
        Self {
            polygon_drag_ms: DEFAULT_POLYGON_DRAG_MS,
            path_drag_ms: DEFAULT_PATH_DRAG_MS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    #[serde(default = "default_retention_days")]
    pub retention_days: u64,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            retention_days: default_retention_days(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ConsoleConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub modules: ModulesConfig,
    #[serde(default)]
    pub channels: ChannelSettings,
    #[serde(default)]
    pub planning: PlanningSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

fn default_server_url() -> String {
    DEFAULT_SERVER_URL.to_string()
}

fn default_true() -> bool {
    true
}

fn default_reconnect_delay_ms() -> u64 {
    DEFAULT_RECONNECT_DELAY_MS
}

fn default_polygon_drag_ms() -> u64 {
    DEFAULT_POLYGON_DRAG_MS
}

fn default_path_drag_ms() -> u64 {
    DEFAULT_PATH_DRAG_MS
}

fn default_retention_days() -> u64 {
    14
}

/// Live on/off switches for feature modules. Readers poll these before
/// (re)opening a module's streams, so a module disabled at runtime stops
/// reconnecting at its next backoff.
#[derive(Debug)]
pub struct ModuleSwitches {
    routing: AtomicBool,
    point_cloud: AtomicBool,
}

impl ModuleSwitches {
    pub fn new(config: &ModulesConfig) -> Arc<Self> {
        Arc::new(Self {
            routing: AtomicBool::new(config.routing),
            point_cloud: AtomicBool::new(config.point_cloud),
        })
    }

    pub fn all_enabled() -> Arc<Self> {
        Self::new(&ModulesConfig::default())
    }

    pub fn is_enabled(&self, module: FeatureModule) -> bool {
        match module {
            FeatureModule::Core => true,
            FeatureModule::Routing => self.routing.load(Ordering::SeqCst),
            FeatureModule::PointCloud => self.point_cloud.load(Ordering::SeqCst),
        }
    }

    pub fn set(&self, module: FeatureModule, enabled: bool) {
        match module {
            FeatureModule::Core => {}
            FeatureModule::Routing => self.routing.store(enabled, Ordering::SeqCst),
            FeatureModule::PointCloud => self.point_cloud.store(enabled, Ordering::SeqCst),
        }
    }
}

#[derive(Debug, Clone, Default)]
struct ConfigLayers {
    global: Value,
    project: Value,
    env: Value,
    cli: Value,
}

#[derive(Clone)]
pub struct ConfigStore {
    layers: Arc<ConfigLayers>,
}

impl ConfigStore {
    pub async fn new(path: impl AsRef<Path>, cli_overrides: Option<Value>) -> anyhow::Result<Self> {
        let project_path = path.as_ref().to_path_buf();
        if let Some(parent) = project_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let global_path = resolve_global_config_path().await?;

        let mut global = read_json_file(&global_path)
            .await
            .unwrap_or_else(|_| empty_object());
        let mut project = read_json_file(&project_path)
            .await
            .unwrap_or_else(|_| empty_object());

        scrub_persisted_secrets(&mut global, &global_path).await?;
        scrub_persisted_secrets(&mut project, &project_path).await?;

        let layers = ConfigLayers {
            global,
            project,
            env: env_layer(),
            cli: cli_overrides.unwrap_or_else(empty_object),
        };

        Ok(Self {
            layers: Arc::new(layers),
        })
    }

    pub async fn get(&self) -> ConsoleConfig {
        let merged = self.get_effective_value().await;
        serde_json::from_value(merged).unwrap_or_default()
    }

    pub async fn get_effective_value(&self) -> Value {
        let layers = &self.layers;
        let mut merged = empty_object();
        deep_merge(&mut merged, &layers.global);
        deep_merge(&mut merged, &layers.project);
        deep_merge(&mut merged, &layers.env);
        deep_merge(&mut merged, &layers.cli);
        merged
    }
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

async fn write_json_file(path: &Path, value: &Value) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let mut to_write = value.clone();
    strip_persisted_secrets(&mut to_write);
    let raw = serde_json::to_string_pretty(&to_write)?;
    fs::write(path, raw).await?;
    Ok(())
}

/// The API token is dropped from persisted layers whenever the environment
/// already provides one, so a runtime secret never lands on disk.
fn strip_persisted_secrets(value: &mut Value) {
    if !runtime_token_present() {
        return;
    }
    if let Some(server) = value
        .as_object_mut()
        .and_then(|root| root.get_mut("server"))
        .and_then(Value::as_object_mut)
    {
        server.remove("api_token");
        server.remove("apiToken");
    }
}

fn runtime_token_present() -> bool {
    std::env::var("SURVEYOR_API_TOKEN")
        .map(|v| !v.trim().is_empty())
        .unwrap_or(false)
}

async fn scrub_persisted_secrets(value: &mut Value, path: &Path) -> anyhow::Result<()> {
    let before = value.clone();
    strip_persisted_secrets(value);
    if *value != before {
        write_json_file(path, value).await?;
    }
    Ok(())
}

async fn read_json_file(path: &Path) -> anyhow::Result<Value> {
    if !path.exists() {
        return Ok(empty_object());
    }
    let raw = fs::read_to_string(path).await?;
    Ok(serde_json::from_str::<Value>(&raw).unwrap_or_else(|_| empty_object()))
}

async fn resolve_global_config_path() -> anyhow::Result<PathBuf> {
    if let Ok(path) = std::env::var("SURVEYOR_GLOBAL_CONFIG") {
        let path = PathBuf::from(path);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        return Ok(path);
    }
    if let Some(config_dir) = dirs::config_dir() {
        let path = config_dir.join("surveyor").join("config.json");
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        return Ok(path);
    }
    Ok(PathBuf::from(".surveyor/global_config.json"))
}

fn env_layer() -> Value {
    let mut root = empty_object();

    if let Ok(url) = std::env::var("SURVEYOR_SERVER_URL") {
        if !url.trim().is_empty() {
            deep_merge(&mut root, &json!({ "server": { "base_url": url.trim() } }));
        }
    }
    if let Ok(url) = std::env::var("SURVEYOR_STREAM_URL") {
        if !url.trim().is_empty() {
            deep_merge(&mut root, &json!({ "server": { "stream_url": url.trim() } }));
        }
    }
    if let Ok(token) = std::env::var("SURVEYOR_API_TOKEN") {
        if !token.trim().is_empty() {
            deep_merge(&mut root, &json!({ "server": { "api_token": token.trim() } }));
        }
    }
    if let Some(v) = std::env::var("SURVEYOR_MODULE_ROUTING")
        .ok()
        .and_then(|raw| parse_bool_like(&raw))
    {
        deep_merge(&mut root, &json!({ "modules": { "routing": v } }));
    }
    if let Some(v) = std::env::var("SURVEYOR_MODULE_POINT_CLOUD")
        .ok()
        .and_then(|raw| parse_bool_like(&raw))
    {
        deep_merge(&mut root, &json!({ "modules": { "point_cloud": v } }));
    }
    if let Some(ms) = std::env::var("SURVEYOR_RECONNECT_DELAY_MS")
        .ok()
        .and_then(|raw| raw.trim().parse::<u64>().ok())
    {
        deep_merge(&mut root, &json!({ "channels": { "reconnect_delay_ms": ms } }));
    }

    root
}

fn parse_bool_like(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub fn deep_merge(base: &mut Value, overlay: &Value) {
    if overlay.is_null() {
        return;
    }
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                if value.is_null() {
                    continue;
                }
                match base_map.get_mut(key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        base_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base_value, overlay_value) => {
            *base_value = overlay_value.clone();
        }
    }
}
