// CLI entry point for the Soundstage stage tools.
//
// Usage:
//   stage [--config <PATH>] host [--relay <ADDR>] [--name <NAME>] [--mode <ID>]
//       Run a headless host: connect to the relay, play clips on the silent
//       backend, and keep effect state in step. Runs until the relay gives up
//       or the process is killed.
//
//   stage [--config <PATH>] cue [--relay <ADDR>] <play ID | fade [MS] | stop | mode ID | modes>
//       Connect as a controller, send one event, and exit.

use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use soundstage_relay::{TransportEvent, TransportSession};
use soundstage_stage::catalog::{CatalogProvider, StaticCatalog};
use soundstage_stage::config::StageConfig;
use soundstage_stage::error::StageError;
use soundstage_stage::host::Host;
use soundstage_stage::silent::SilentBackend;
use soundstage_stage::timer::MonotonicClock;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// How long `cue` waits for the handshake.
const CUE_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Parser)]
#[command(name = "stage", version, about = "Soundstage host and cue tools")]
struct Args {
    /// TOML config file (defaults to ./soundstage-stage.toml when present).
    #[arg(long, global = true, env = "SOUNDSTAGE_STAGE_CONFIG")]
    config: Option<PathBuf>,

    /// Relay address, host:port.
    #[arg(long, global = true)]
    relay: Option<String>,

    /// Device name announced to the relay.
    #[arg(long, global = true)]
    name: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run a headless host device.
    Host {
        /// Story mode to start in.
        #[arg(long)]
        mode: Option<String>,
    },
    /// Send one control event to the relay.
    Cue {
        #[command(subcommand)]
        cue: Cue,
    },
}

#[derive(Debug, Subcommand)]
enum Cue {
    /// Trigger a sound on the host.
    Play { sound_id: String },
    /// Fade everything out (default 2000 ms).
    Fade { duration_ms: Option<u64> },
    /// Stop everything now.
    Stop,
    /// Switch every device to a story mode.
    Mode { mode_id: String },
    /// List the available story modes and sounds.
    Modes,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = StageConfig::load(args.config.as_deref()).context("loading stage config")?;
    if let Some(relay) = args.relay {
        config.relay_addr = relay;
    }
    if let Some(name) = args.name {
        config.device_name = name;
    }

    init_tracing(&config.log_level);

    match args.command {
        Command::Host { mode } => {
            if let Some(mode) = mode {
                config.initial_story_mode = mode;
            }
            run_host(&config)
        }
        Command::Cue { cue: Cue::Modes } => list_modes(&config),
        Command::Cue { cue } => send_cue(&config, cue),
    }
}

fn load_catalog(config: &StageConfig) -> Result<StaticCatalog, StageError> {
    Ok(match &config.catalog_file {
        Some(path) => StaticCatalog::load(path)?,
        None => StaticCatalog::builtin(),
    })
}

fn run_host(config: &StageConfig) -> anyhow::Result<()> {
    let catalog = load_catalog(config)?;
    if catalog.catalog(&config.initial_story_mode).is_none() {
        return Err(StageError::UnknownStoryMode(config.initial_story_mode.clone()).into());
    }

    let backend = SilentBackend::new(config.silent_clip_ms);
    let mut host = Host::new(Box::new(catalog), Box::new(backend), &config.host_settings());
    host.select_story_mode(&config.initial_story_mode);

    let session = TransportSession::connect(config.transport());
    let clock = MonotonicClock::start();
    let frame = Duration::from_millis(config.frame_interval_ms.max(1));
    info!(relay = %config.relay_addr, mode = %config.initial_story_mode, "host running");

    loop {
        let now = clock.now();
        for event in session.poll() {
            match event {
                TransportEvent::Message(message) => host.handle(now, &message),
                TransportEvent::Connected { connection_id } => {
                    info!(connection = %connection_id, "connected to relay");
                }
                TransportEvent::Disconnected { reason } => warn!(%reason, "lost relay"),
                TransportEvent::ConnectError { error, attempt } => {
                    warn!(%error, attempt, "relay unreachable");
                }
                TransportEvent::GaveUp { attempts } => {
                    bail!("relay at {} unreachable after {attempts} attempts", config.relay_addr);
                }
            }
        }
        host.advance(now);
        host.frame(now);
        thread::sleep(frame);
    }
}

fn send_cue(config: &StageConfig, cue: Cue) -> anyhow::Result<()> {
    let mut transport = config.transport();
    transport.reconnect.max_attempts = 1;
    let mut session = TransportSession::connect(transport);

    let deadline = Instant::now() + CUE_CONNECT_TIMEOUT;
    while !session.is_connected() {
        if Instant::now() >= deadline {
            bail!("could not reach relay at {}", config.relay_addr);
        }
        if let Some(TransportEvent::GaveUp { .. }) =
            session.recv_timeout(Duration::from_millis(100))
        {
            bail!("could not reach relay at {}", config.relay_addr);
        }
    }

    match cue {
        Cue::Play { sound_id } => session.emit_sound(&sound_id)?,
        Cue::Fade { duration_ms } => session.emit_fade_out(duration_ms)?,
        Cue::Stop => session.emit_stop_all()?,
        Cue::Mode { mode_id } => session.emit_story_mode_change(&mode_id)?,
        Cue::Modes => {}
    }
    session.disconnect();
    Ok(())
}

fn list_modes(config: &StageConfig) -> anyhow::Result<()> {
    let catalog = load_catalog(config)?;
    for mode in catalog.story_modes() {
        println!("{} - {}", mode.id, mode.name);
        for sound in &mode.sounds {
            println!("    {:<12} {} {}", sound.id, sound.icon, sound.label);
        }
    }
    Ok(())
}

/// Install the fmt subscriber. `RUST_LOG` wins over the configured level.
fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
