use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use clap::{Parser, Subcommand};
use surveyor_channels::{ChannelHub, ChannelsConfig, WebSocketTransport};
use surveyor_core::{
    BusNavigator, ConfigStore, ConsoleConfig, DeviceBackend, DeviceStore, EventBus, HttpBackend,
    ModuleSwitches, NotificationRouter, ReconciliationContext, ReconciliationEngine,
    SystemDispatcher, TracingSink,
};
use surveyor_observability::{emit_event, init_logging, mask_secret, ObservabilityEvent};
use surveyor_planning::{GeometryEditSession, HttpPathService, LoggingCommandPort};
use surveyor_types::{ChannelKind, ConsoleEvent, DeviceMode, Route};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "surveyor-console")]
#[command(about = "Headless Surveyor field console")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Stay connected to the device and keep the console in sync with it.
    Run {
        #[arg(long)]
        server: Option<String>,
        #[arg(long)]
        stream_url: Option<String>,
        #[arg(long)]
        api_token: Option<String>,
        #[arg(long)]
        state_dir: Option<String>,
        #[arg(long)]
        config: Option<String>,
    },
    /// Poll the device status once and print it as JSON.
    Status {
        #[arg(long)]
        server: Option<String>,
        #[arg(long)]
        api_token: Option<String>,
        #[arg(long)]
        state_dir: Option<String>,
        #[arg(long)]
        config: Option<String>,
    },
}

struct Runtime {
    bus: EventBus,
    device: Arc<DeviceStore>,
    hub: Arc<ChannelHub>,
    engine: Arc<ReconciliationEngine>,
    dispatcher: Arc<SystemDispatcher>,
    planning: Arc<GeometryEditSession>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            server,
            stream_url,
            api_token,
            state_dir,
            config,
        } => {
            let state_dir = resolve_state_dir(state_dir);
            let overrides = build_cli_overrides(server, stream_url, api_token);
            let config = load_config(&state_dir, config, overrides).await?;
            let logging = init_logging(&state_dir, config.logging.retention_days)?;
            emit_event(
                tracing::Level::INFO,
                ObservabilityEvent {
                    event: "logging.initialized",
                    component: "console.main",
                    status: Some("ok"),
                    detail: Some(&format!("pruned_files={}", logging.summary.pruned_files)),
                    ..Default::default()
                },
            );
            info!("console logging initialized: {:?}", logging.summary);
            run(&state_dir, config).await?;
        }
        Command::Status {
            server,
            api_token,
            state_dir,
            config,
        } => {
            let state_dir = resolve_state_dir(state_dir);
            let overrides = build_cli_overrides(server, None, api_token);
            let config = load_config(&state_dir, config, overrides).await?;
            let backend = HttpBackend::new(&config.server)?;
            let summary = backend
                .fetch_summary()
                .await
                .with_context(|| format!("polling {}", config.server.base_url))?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
    }
    Ok(())
}

async fn run(state_dir: &Path, config: ConsoleConfig) -> anyhow::Result<()> {
    let attempt_id = Uuid::new_v4().to_string();
    let started = Instant::now();
    info!(
        "starting surveyor-console: attempt_id={} server={} token={} state_dir={}",
        attempt_id,
        config.server.base_url,
        mask_secret(config.server.api_token.as_deref()),
        state_dir.display()
    );

    let runtime = build_runtime(&config)?;
    let shutdown = CancellationToken::new();

    let dispatch_task = tokio::spawn(runtime.dispatcher.clone().run(shutdown.child_token()));
    let plan_task = tokio::spawn(follow_plans(
        runtime.bus.subscribe_control(),
        runtime.device.clone(),
        runtime.planning.clone(),
        shutdown.child_token(),
    ));
    let system = runtime
        .hub
        .keep_alive(ChannelKind::System, shutdown.child_token())
        .await;

    if let Err(err) = runtime.dispatcher.authenticate().await {
        warn!("authentication failed: {err:#}");
    }
    match runtime.dispatcher.poll_status().await {
        Ok(summary) => info!(mode = %summary.mode, "initial device status"),
        Err(err) => warn!("initial status poll failed: {err:#}"),
    }
    emit_event(
        tracing::Level::INFO,
        ObservabilityEvent {
            event: "console.startup.ready",
            component: "console.main",
            correlation_id: Some(&attempt_id),
            status: Some("ok"),
            detail: Some(&format!("elapsed_ms={}", started.elapsed().as_millis())),
            ..Default::default()
        },
    );

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("shutting down");
    shutdown.cancel();
    let _ = system.await;
    runtime.engine.shutdown().await;
    runtime.hub.shutdown().await;
    let _ = dispatch_task.await;
    let _ = plan_task.await;
    Ok(())
}

fn build_runtime(config: &ConsoleConfig) -> anyhow::Result<Runtime> {
    let bus = EventBus::new();
    let device = DeviceStore::new();
    let modules = ModuleSwitches::new(&config.modules);
    let router = NotificationRouter::new(Arc::new(TracingSink));
    let backend: Arc<dyn DeviceBackend> = Arc::new(HttpBackend::new(&config.server)?);
    let navigator = Arc::new(BusNavigator::new(bus.clone(), Route::Projects));
    let hub = ChannelHub::new(
        &ChannelsConfig::from_console(config),
        Arc::new(WebSocketTransport),
        bus.clone(),
        router.clone(),
        modules.clone(),
    );
    let engine = ReconciliationEngine::new(ReconciliationContext {
        store: device.clone(),
        backend: backend.clone(),
        navigator,
        channels: hub.clone(),
        modules,
        bus: bus.clone(),
    });
    let dispatcher =
        SystemDispatcher::new(device.clone(), backend, engine.clone(), router, bus.clone());
    let planning = Arc::new(GeometryEditSession::new(
        Arc::new(HttpPathService::new(&config.server)?),
        Arc::new(LoggingCommandPort),
        bus.clone(),
        &config.planning,
    ));
    Ok(Runtime {
        bus,
        device,
        hub,
        engine,
        dispatcher,
        planning,
    })
}

/// Loads the job plan into the edit session whenever an Active run finishes
/// with a plan the session does not hold yet.
async fn follow_plans(
    mut rx: UnboundedReceiver<ConsoleEvent>,
    device: Arc<DeviceStore>,
    planning: Arc<GeometryEditSession>,
    cancel: CancellationToken,
) {
    let mut loaded: Option<String> = None;
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => return,
            event = rx.recv() => event,
        };
        match event {
            Some(ConsoleEvent::ReconciliationCompleted {
                mode: DeviceMode::Active,
            }) => {
                let Some(plan) = device.snapshot().plan else {
                    continue;
                };
                if loaded.as_deref() == Some(plan.job_id.as_str()) {
                    continue;
                }
                loaded = Some(plan.job_id.clone());
                planning.load_plan(plan);
            }
            Some(event) => debug!(kind = event.kind(), "console event"),
            None => return,
        }
    }
}

async fn load_config(
    state_dir: &Path,
    flag: Option<String>,
    overrides: Option<serde_json::Value>,
) -> anyhow::Result<ConsoleConfig> {
    let config_path = flag
        .map(PathBuf::from)
        .unwrap_or_else(|| state_dir.join("config.json"));
    let store = ConfigStore::new(config_path, overrides).await?;
    Ok(store.get().await)
}

fn build_cli_overrides(
    server: Option<String>,
    stream_url: Option<String>,
    api_token: Option<String>,
) -> Option<serde_json::Value> {
    let mut server_config = serde_json::Map::new();
    if let Some(url) = server.filter(|s| !s.trim().is_empty()) {
        server_config.insert("base_url".to_string(), serde_json::Value::String(url));
    }
    if let Some(url) = stream_url.filter(|s| !s.trim().is_empty()) {
        server_config.insert("stream_url".to_string(), serde_json::Value::String(url));
    }
    if let Some(token) = api_token.filter(|s| !s.trim().is_empty()) {
        server_config.insert("api_token".to_string(), serde_json::Value::String(token));
    }
    if server_config.is_empty() {
        return None;
    }
    Some(serde_json::json!({ "server": server_config }))
}

fn resolve_state_dir(flag: Option<String>) -> PathBuf {
    if let Some(dir) = flag {
        return PathBuf::from(dir);
    }
    if let Ok(dir) = std::env::var("SURVEYOR_STATE_DIR") {
        if !dir.trim().is_empty() {
            return PathBuf::from(dir);
        }
    }
    dirs::data_local_dir()
        .map(|d| d.join("surveyor"))
        .unwrap_or_else(|| PathBuf::from(".surveyor"))
}
