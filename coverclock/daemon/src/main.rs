//! Coverclock Daemon - Cover Art / Clock Display
//!
//! Watches one Home Assistant media player and keeps a small display showing
//! its album cover while it plays, and a sprite-sheet clock otherwise.
//!
//! # Usage
//!
//! ```bash
//! # Watch a media player (settings from ~/.config/coverclock/coverclock.toml)
//! coverclock-daemon watch
//!
//! # Everything on the command line
//! coverclock-daemon watch --url https://ha.local:8123 --token "$TOKEN" \
//!     --entity media_player.living_room --sprite-sheet clock.png
//!
//! # Clock only, stepping through every frame
//! coverclock-daemon clock --mode cycle --interval 0.25 --sprite-sheet clock.png
//!
//! # Verbose logging
//! RUST_LOG=debug coverclock-daemon watch
//! ```
//!
//! # Signals
//!
//! - `SIGTERM` / `SIGINT`: Graceful shutdown (a frame in flight completes)

mod clock_only;
mod config;

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use coverclock_core::{
    FitMode, HassClient, HttpStateSource, Orchestrator, OrchestratorConfig, PngFileSink,
    SpriteSheet, Supervisor, TimeZoneSetting,
};

use clock_only::{ClockFace, ClockMode, ClockPlan};
use config::{default_config_path, load_config_from_path, ConfigOverrides, DaemonConfig};

/// Capacity of the supervisor → orchestrator channel
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Coverclock Daemon - album cover or clock on a small display
#[derive(Parser, Debug)]
#[command(name = "coverclock-daemon")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Configuration file path
    #[arg(short = 'c', long, env = "COVERCLOCK_CONFIG", value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        short = 'l',
        long,
        env = "COVERCLOCK_LOG_LEVEL",
        default_value = "info",
        global = true
    )]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Follow a media player: cover while playing, clock otherwise
    Watch(WatchArgs),
    /// Show the clock face only
    Clock(ClockArgs),
}

/// Options shared by both commands
#[derive(ClapArgs, Debug, Default)]
struct DisplayArgs {
    /// Clock sprite sheet (8x8 grid of 16x16 sprites)
    #[arg(long, value_name = "FILE")]
    sprite_sheet: Option<PathBuf>,

    /// Where rendered frames are written (PNG)
    #[arg(short = 'o', long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Canvas width in pixels
    #[arg(long)]
    width: Option<u32>,

    /// Canvas height in pixels
    #[arg(long)]
    height: Option<u32>,

    /// Counter-clockwise rotation in degrees
    #[arg(long)]
    rotate: Option<u16>,

    /// Mirror frames horizontally
    #[arg(long)]
    mirror: bool,

    /// Invert frame colors
    #[arg(long)]
    invert: bool,

    /// Clock time zone: `local`, an offset such as `+02:00` or a name such as `Europe/Warsaw`
    #[arg(long, value_name = "ZONE")]
    timezone: Option<TimeZoneSetting>,

    /// Delay handed to the display per frame, in milliseconds
    #[arg(long, value_name = "MS")]
    send_delay_ms: Option<u64>,
}

impl DisplayArgs {
    fn overrides(self) -> ConfigOverrides {
        ConfigOverrides {
            sprite_sheet: self.sprite_sheet,
            output: self.output,
            width: self.width,
            height: self.height,
            rotate: self.rotate,
            mirror: self.mirror.then_some(true),
            invert: self.invert.then_some(true),
            time_zone: self.timezone,
            send_delay: self.send_delay_ms.map(Duration::from_millis),
            ..ConfigOverrides::default()
        }
    }
}

#[derive(ClapArgs, Debug)]
struct WatchArgs {
    /// Home Assistant base URL
    #[arg(long, value_name = "URL")]
    url: Option<String>,

    /// Long-lived access token
    #[arg(long, value_name = "TOKEN")]
    token: Option<String>,

    /// Media player entity id
    #[arg(short = 'e', long, value_name = "ENTITY")]
    entity: Option<String>,

    /// Skip TLS certificate verification for REST calls
    #[arg(long)]
    insecure: bool,

    /// How covers are fitted to the canvas
    #[arg(long, value_name = "MODE")]
    cover_fit: Option<FitMode>,

    /// How clock sprites are fitted to the canvas
    #[arg(long, value_name = "MODE")]
    clock_fit: Option<FitMode>,

    /// Minimum time between cover renders, in milliseconds
    #[arg(long, value_name = "MS")]
    min_cover_interval_ms: Option<u64>,

    /// Idle clock tick, in milliseconds
    #[arg(long, value_name = "MS")]
    clock_interval_ms: Option<u64>,

    /// Delay between reconnect attempts, in milliseconds
    #[arg(long, value_name = "MS")]
    reconnect_delay_ms: Option<u64>,

    /// WebSocket heartbeat interval, in seconds
    #[arg(long, value_name = "SECS")]
    heartbeat_secs: Option<u64>,

    #[command(flatten)]
    display: DisplayArgs,
}

impl WatchArgs {
    fn overrides(self) -> ConfigOverrides {
        ConfigOverrides {
            base_url: self.url,
            token: self.token,
            entity_id: self.entity,
            insecure_tls: self.insecure.then_some(true),
            cover_fit: self.cover_fit,
            clock_fit: self.clock_fit,
            min_cover_interval: self.min_cover_interval_ms.map(Duration::from_millis),
            clock_interval: self.clock_interval_ms.map(Duration::from_millis),
            reconnect_delay: self.reconnect_delay_ms.map(Duration::from_millis),
            heartbeat_interval: self.heartbeat_secs.map(Duration::from_secs),
            ..self.display.overrides()
        }
    }
}

#[derive(ClapArgs, Debug)]
struct ClockArgs {
    /// Frame selection
    #[arg(long, value_enum, default_value_t = ClockMode::Realtime)]
    mode: ClockMode,

    /// Frame for `--mode index` (0..63)
    #[arg(long, default_value_t = 0)]
    index: u8,

    /// First frame for `--mode cycle` (0..63)
    #[arg(long, default_value_t = 0)]
    start_index: u8,

    /// Frame increment for `--mode cycle`
    #[arg(long, default_value_t = 1)]
    step: u8,

    /// Seconds between updates
    #[arg(long, default_value_t = 1.0)]
    interval: f64,

    /// Send a single frame and exit
    #[arg(long)]
    once: bool,

    /// How sprites are fitted to the canvas
    #[arg(long, value_name = "MODE")]
    fill: Option<FitMode>,

    #[command(flatten)]
    display: DisplayArgs,
}

impl ClockArgs {
    fn plan(&self) -> Result<ClockPlan> {
        let interval = Duration::try_from_secs_f64(self.interval)
            .with_context(|| format!("Invalid --interval {}", self.interval))?;
        Ok(ClockPlan {
            mode: self.mode,
            index: self.index,
            start_index: self.start_index,
            step: self.step,
            interval,
            once: self.once,
        })
    }
}

/// Initialize logging with the specified level
fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!(
            "coverclock_daemon={level},coverclock_core={level}"
        ))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .init();
}

/// Flip the returned channel to `true` on SIGINT or SIGTERM
fn spawn_signal_listener() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);

    tokio::spawn(async move {
        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to install SIGTERM handler");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        wait_for_signal(tokio::signal::ctrl_c(), terminate).await;
        let _ = tx.send(true);
    });

    rx
}

/// Resolve once either signal arrives
///
/// A Ctrl+C listener that fails to install is logged and ignored; SIGTERM
/// still ends the wait.
async fn wait_for_signal(
    ctrl_c: impl Future<Output = std::io::Result<()>>,
    terminate: impl Future<Output = ()>,
) {
    let interrupt = async {
        match ctrl_c.await {
            Ok(()) => {}
            Err(e) => {
                warn!(error = %e, "Failed to listen for Ctrl+C");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        () = interrupt => {
            info!("Received SIGINT, initiating graceful shutdown");
        }
        () = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}

/// Load configuration: file, then environment, then CLI overrides
fn resolve_config(path: Option<PathBuf>, overrides: ConfigOverrides) -> Result<DaemonConfig> {
    let path = path.or_else(default_config_path);
    let mut config = load_config_from_path(path)?;
    overrides.apply_to(&mut config);
    info!(source = %config.source(), "Configuration resolved");
    Ok(config)
}

fn load_sprite_sheet(path: &Path) -> Result<SpriteSheet> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read sprite sheet {}", path.display()))?;
    let sheet = SpriteSheet::from_bytes(&bytes)
        .with_context(|| format!("Invalid sprite sheet {}", path.display()))?;
    info!(path = %path.display(), "Sprite sheet loaded");
    Ok(sheet)
}

fn prepare_output_dir(output: &Path) -> Result<()> {
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create output directory {}", parent.display()))?;
    }
    Ok(())
}

async fn run_watch(config: DaemonConfig, shutdown: watch::Receiver<bool>) -> Result<()> {
    let settings = config.watch_settings()?;
    let sheet = load_sprite_sheet(config.sprite_sheet()?)?;
    prepare_output_dir(&config.output)?;

    let base_url = settings.hass.base_url()?;
    let source = HttpStateSource::new(
        base_url.clone(),
        settings.hass.token.clone(),
        settings.hass.insecure_tls,
    )
    .context("Failed to build HTTP client")?;
    let sink = PngFileSink::new(&config.output);

    info!(
        url = %base_url,
        entity_id = %settings.hass.entity_id,
        output = %sink.path().display(),
        time_zone = %settings.time_zone,
        "Watching media player"
    );

    let orchestrator = Orchestrator::new(
        OrchestratorConfig::from_settings(&settings),
        source,
        sink,
        sheet,
        settings.time_zone.wall_clock(),
    );

    let client = HassClient::new(base_url, settings.hass.token.clone())
        .with_heartbeat_interval(settings.timing.heartbeat_interval)
        .with_handshake_timeout(settings.timing.handshake_timeout);
    let supervisor = Supervisor::new(client, Some(settings.hass.entity_id.clone()))
        .with_reconnect_delay(settings.timing.reconnect_delay);

    let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let supervisor_task = tokio::spawn({
        let shutdown = shutdown.clone();
        async move { supervisor.run(events_tx, shutdown).await }
    });

    orchestrator.run(events_rx, shutdown).await;

    if let Err(e) = supervisor_task.await {
        warn!(error = %e, "Supervisor task ended abnormally");
    }

    info!("Watch stopped");
    Ok(())
}

async fn run_clock(
    config: DaemonConfig,
    plan: ClockPlan,
    shutdown: watch::Receiver<bool>,
) -> Result<()> {
    config.display.validate()?;
    let sheet = load_sprite_sheet(config.sprite_sheet()?)?;
    prepare_output_dir(&config.output)?;

    let mut sink = PngFileSink::new(&config.output);
    info!(output = %sink.path().display(), "Writing clock frames");
    let clock = config.time_zone.wall_clock();
    let face = ClockFace {
        sheet: &sheet,
        options: config.display.clock_options(),
        sink: &mut sink,
        clock: &clock,
        send_delay: config.timing.send_delay,
    };

    let frames = clock_only::run(plan, face, shutdown)
        .await
        .context("Clock display failed")?;
    info!(frames, output = %config.output.display(), "Clock stopped");
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level);

    info!("Coverclock Daemon starting");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let shutdown = spawn_signal_listener();

    match args.command {
        Command::Watch(watch_args) => {
            let config = resolve_config(args.config, watch_args.overrides())?;
            run_watch(config, shutdown).await
        }
        Command::Clock(clock_args) => {
            let plan = clock_args.plan()?;
            let overrides = ConfigOverrides {
                clock_fit: clock_args.fill,
                ..clock_args.display.overrides()
            };
            let config = resolve_config(args.config, overrides)?;
            run_clock(config, plan, shutdown).await
        }
    }
}
