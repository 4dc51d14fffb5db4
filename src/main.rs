use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vivisect_gadget::capture::{
    run_history_recorder, CaptureHistory, CaptureOrchestrator, CommandHostProbe, CommandTrigger,
    LinkProbe, SysfsLinkProbe, TcpdumpLauncher,
};
use vivisect_gadget::config::{AppConfig, ConfigStore};
use vivisect_gadget::events::EventBus;
use vivisect_gadget::gadget::{GadgetController, GadgetMode, IpCommandConfigurator};
use vivisect_gadget::otg::ConfigFsBinder;
use vivisect_gadget::payload::{HidgSink, KeystrokeService, PayloadLibrary};
use vivisect_gadget::state::AppState;
use vivisect_gadget::store::{BackingStoreManager, LoopMounter};
use vivisect_gadget::sync::{run_sync_scheduler, Synchronizer};
use vivisect_gadget::web;

/// Log level for the application
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Verbose,
    Debug,
    Trace,
}

/// vivisect-gadget command line arguments
#[derive(Parser, Debug)]
#[command(name = "vivisect-gadget")]
#[command(version, about = "USB gadget personality controller", long_about = None)]
struct CliArgs {
    /// Listen address (overrides database config)
    #[arg(short = 'a', long, value_name = "ADDRESS")]
    address: Option<String>,

    /// HTTP port (overrides database config)
    #[arg(short = 'p', long, value_name = "PORT")]
    port: Option<u16>,

    /// Data directory path (default: /var/lib/vivisect)
    #[arg(short = 'd', long, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    /// Gadget mode to enter at startup (overrides database config)
    #[arg(short = 'm', long, value_name = "MODE")]
    mode: Option<GadgetMode>,

    /// Log level (error, warn, info, verbose, debug, trace)
    #[arg(short = 'l', long, value_name = "LEVEL", default_value = "info")]
    log_level: LogLevel,

    /// Increase verbosity (-v for verbose, -vv for debug, -vvv for trace)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    init_logging(args.log_level, args.verbose);

    tracing::info!("Starting vivisect-gadget v{}", env!("CARGO_PKG_VERSION"));

    let data_dir = args.data_dir.unwrap_or_else(get_data_dir);
    tracing::info!("Data directory: {}", data_dir.display());
    tokio::fs::create_dir_all(&data_dir).await?;

    let config_store = ConfigStore::new(&data_dir.join("vivisect.db")).await?;
    let mut config = (*config_store.get()).clone();
    if normalize_paths(&mut config, &data_dir) {
        config_store.set(config.clone()).await?;
    }
    if let Some(address) = args.address {
        config.web.bind_address = address;
    }
    if let Some(port) = args.port {
        config.web.http_port = port;
    }
    if let Some(mode) = args.mode {
        config.gadget.startup_mode = mode;
    }

    let output_dir = config.output.output_dir();
    tokio::fs::create_dir_all(&output_dir).await?;

    let events = Arc::new(EventBus::new());
    let shutdown = CancellationToken::new();

    // Backing store: recover from an unclean exit before anything binds
    let store = Arc::new(BackingStoreManager::new(
        config.storage.clone(),
        Arc::new(LoopMounter),
        events.clone(),
    ));
    if let Err(e) = store.recover().await {
        tracing::warn!("Backing store recovery failed: {}", e);
    }
    if config.storage.create_if_missing {
        match store.ensure_image().await {
            Ok(true) => tracing::info!("Created backing image {}", store.image_path().display()),
            Ok(false) => {}
            Err(e) => tracing::warn!("Backing image unavailable: {}", e),
        }
    }

    // Gadget controller
    let binder = Arc::new(ConfigFsBinder::new(
        config.gadget.clone(),
        config.network.clone(),
    ));
    let controller = Arc::new(GadgetController::new(
        binder.clone(),
        Arc::new(IpCommandConfigurator),
        store.clone(),
        events.clone(),
        config.gadget.clone(),
        config.network.clone(),
    ));

    if !binder.is_available() {
        tracing::warn!("USB gadget ConfigFS or UDC not available, staying unbound");
    } else if config.gadget.startup_mode != GadgetMode::Unbound {
        let mode = config.gadget.startup_mode;
        match controller
            .switch_mode(mode, config.gadget.startup_read_only)
            .await
        {
            Ok(()) => tracing::info!("Entered startup mode {}", mode),
            Err(e) => tracing::warn!("Failed to enter startup mode {}: {}", mode, e),
        }
    }

    // Capture
    let link_probe: Arc<dyn LinkProbe> = Arc::new(SysfsLinkProbe::new());
    let capture = Arc::new(CaptureOrchestrator::new(
        controller.clone(),
        link_probe.clone(),
        Arc::new(CommandHostProbe),
        Arc::new(TcpdumpLauncher::new(
            config.capture.tool.clone(),
            config.capture.extra_args.clone(),
        )),
        Arc::new(CommandTrigger::new(config.capture.collect_command.clone())),
        events.clone(),
        config.capture.clone(),
        config.network.interface.clone(),
        output_dir.clone(),
    ));
    let history = Arc::new(CaptureHistory::new(config_store.pool().clone()));

    // Sync and keystrokes
    let sync = Arc::new(Synchronizer::new(
        store.clone(),
        events.clone(),
        output_dir.clone(),
        config.sync.clone(),
    ));
    let library = PayloadLibrary::load(Path::new(&config.hid.payload_dir));
    let keystrokes = Arc::new(KeystrokeService::new(
        controller.clone(),
        Arc::new(HidgSink::new()),
        events.clone(),
        config.hid.clone(),
        library,
    ));

    let state = AppState::new(
        config_store,
        events.clone(),
        controller.clone(),
        store,
        capture.clone(),
        history.clone(),
        sync.clone(),
        keystrokes,
        link_probe,
        shutdown.clone(),
        data_dir,
    );

    // Background tasks. The recorder outlives the orchestrator so the final
    // shutdown record is persisted.
    let recorder_cancel = CancellationToken::new();
    let recorder_task = tokio::spawn(run_history_recorder(
        history,
        events.clone(),
        recorder_cancel.clone(),
    ));
    let capture_task = tokio::spawn(capture.run(shutdown.clone()));
    let sync_task = tokio::spawn(run_sync_scheduler(
        sync,
        events.clone(),
        config.sync.clone(),
        shutdown.clone(),
    ));

    let app = web::create_router(state);
    let ip: IpAddr = config
        .web
        .bind_address
        .parse()
        .map_err(|_| anyhow::anyhow!("Invalid bind address: {}", config.web.bind_address))?;
    let addr = SocketAddr::new(ip, config.web.http_port);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Listening on http://{}", addr);

    let signal = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
        }
        tracing::info!("Shutdown signal received");
        signal.cancel();
    });

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.clone().cancelled_owned())
        .await?;

    // Teardown: sessions first, then the binding, then ConfigFS
    let _ = capture_task.await;
    let _ = sync_task.await;
    recorder_cancel.cancel();
    let _ = recorder_task.await;
    controller.shutdown().await;
    binder.shutdown().await;

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Initialize logging with tracing
fn init_logging(level: LogLevel, verbose_count: u8) {
    // Verbose count overrides log level
    let effective_level = match verbose_count {
        0 => level,
        1 => LogLevel::Verbose,
        2 => LogLevel::Debug,
        _ => LogLevel::Trace,
    };

    let filter = match effective_level {
        LogLevel::Error => "vivisect_gadget=error,tower_http=error",
        LogLevel::Warn => "vivisect_gadget=warn,tower_http=warn",
        LogLevel::Info => "vivisect_gadget=info,tower_http=info",
        LogLevel::Verbose => "vivisect_gadget=debug,tower_http=info",
        LogLevel::Debug => "vivisect_gadget=debug,tower_http=debug",
        LogLevel::Trace => "vivisect_gadget=trace,tower_http=debug",
    };

    // Environment variable takes highest priority
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());

    if let Err(err) = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
    {
        eprintln!("failed to initialize tracing: {}", err);
    }
}

/// Get the application data directory
fn get_data_dir() -> PathBuf {
    if let Ok(path) = std::env::var("VIVISECT_DATA_DIR") {
        return PathBuf::from(path);
    }
    PathBuf::from("/var/lib/vivisect")
}

/// Anchor relative paths under the data directory; returns whether anything changed
fn normalize_paths(config: &mut AppConfig, data_dir: &Path) -> bool {
    let mut changed = false;
    for path in [
        &mut config.storage.image_path,
        &mut config.storage.mount_point,
        &mut config.hid.payload_dir,
        &mut config.output.output_dir,
    ] {
        if !path.trim().is_empty() && Path::new(path.as_str()).is_relative() {
            let absolute = data_dir.join(path.trim());
            *path = absolute.to_string_lossy().into_owned();
            changed = true;
        }
    }
    changed
}
