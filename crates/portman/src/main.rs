//! portman - keystroke-driven JACK routing
//!
//! Subcommands:
//! - `portman run` - Bind keys and toggle routes interactively (default)
//! - `portman dump [clients|ports|connections]` - Print the current graph
//! - `portman config` - Print the effective configuration

use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use portconf::{MixerSetting, PortmanConfig, SetupConfig};
use tracing::{info, warn};

use portman::backends::{MemoryGraph, MemoryMixer};
use portman::terminal::{self, RawMode};
use portman::{GraphMirror, GraphService, MixerRegistry, Session, StudioSetup};

#[derive(Parser)]
#[command(name = "portman")]
#[command(about = "Keystroke-driven JACK routing and mixer toggles")]
#[command(version)]
struct Cli {
    /// Config file (replaces ./portman.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Use an in-memory demo studio instead of JACK and ALSA
    #[arg(long, global = true)]
    dry_run: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Bind keys to routes and toggle them interactively (Ctrl-C quits)
    Run,

    /// Print the current graph once
    Dump {
        #[arg(value_enum, default_value = "connections")]
        what: DumpKind,
    },

    /// Print the effective configuration as TOML
    Config,
}

#[derive(Clone, Copy, ValueEnum)]
enum DumpKind {
    Clients,
    Ports,
    Connections,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let (config, sources) = PortmanConfig::load_with_sources_from(cli.config.as_deref())
        .context("Failed to load configuration")?;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.infra.telemetry.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    for path in &sources.files {
        info!("Loaded config from {}", path.display());
    }
    for var in &sources.env_overrides {
        info!("Config overridden by {}", var);
    }

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(&config, cli.dry_run),
        Commands::Dump { what } => dump(&config, cli.dry_run, what),
        Commands::Config => {
            print!("{}", config.to_toml());
            Ok(())
        }
    }
}

fn run(config: &PortmanConfig, dry_run: bool) -> Result<()> {
    let session = open_session(config, dry_run)?;
    let setup = StudioSetup::new(
        config.setup.clone(),
        session.graph(),
        Arc::clone(session.registry()),
    );

    let raw = RawMode::enable().context("Failed to put the terminal in raw mode")?;
    let result = session.run(setup, Box::new(io::stdout()), terminal::keys());
    drop(raw);
    println!();
    result
}

fn dump(config: &PortmanConfig, dry_run: bool, what: DumpKind) -> Result<()> {
    let session = open_session(config, dry_run)?;
    let snapshot = session.mirror().snapshot();
    let mut out = io::stdout().lock();
    match what {
        DumpKind::Clients => snapshot.write_clients(&mut out)?,
        DumpKind::Ports => snapshot.write_ports(&mut out)?,
        DumpKind::Connections => snapshot.write_connections(&mut out)?,
    }
    out.flush()?;
    Ok(())
}

fn open_session(config: &PortmanConfig, dry_run: bool) -> Result<Session> {
    let settle = Duration::from_millis(config.infra.debounce.settle_ms);
    let mirror =
        Arc::new(GraphMirror::new(settle).context("Failed to start the reorder debouncer")?);

    let (service, registry) = if dry_run {
        let graph = Arc::new(demo_graph());
        graph.attach(&mirror);
        let service: Arc<dyn GraphService> = graph;
        (service, MixerRegistry::new(demo_mixer(&config.setup)))
    } else {
        (open_graph(config, &mirror)?, hardware_mixer())
    };

    Ok(Session::start(mirror, service, Arc::new(registry))?)
}

#[cfg(feature = "jack")]
fn open_graph(config: &PortmanConfig, mirror: &Arc<GraphMirror>) -> Result<Arc<dyn GraphService>> {
    let jack = &config.infra.jack;
    let service = portman::backends::JackService::open(
        &jack.client_name,
        jack.no_start_server,
        Arc::clone(mirror),
    )
    .context("Cannot open the JACK server")?;
    Ok(Arc::new(service))
}

#[cfg(not(feature = "jack"))]
fn open_graph(_config: &PortmanConfig, _mirror: &Arc<GraphMirror>) -> Result<Arc<dyn GraphService>> {
    anyhow::bail!("portman was built without JACK support; use --dry-run")
}

#[cfg(feature = "alsa")]
fn hardware_mixer() -> MixerRegistry {
    MixerRegistry::new(portman::backends::AlsaMixer::new())
}

#[cfg(not(feature = "alsa"))]
fn hardware_mixer() -> MixerRegistry {
    warn!("Built without ALSA support; mixer toggles will not bind");
    MixerRegistry::new(MemoryMixer::new())
}

fn demo_graph() -> MemoryGraph {
    let graph = MemoryGraph::new();
    graph.add_client(
        "Built-in Audio Analog Stereo",
        &["capture_FL", "capture_FR", "monitor_FL", "monitor_FR", "playback_FL", "playback_FR"],
    );
    graph.add_client("firefox", &["output_FL", "output_FR"]);
    graph.add_client("mpv", &["output_FL", "output_FR"]);
    graph.connect_quietly("firefox:output_FL", "Built-in Audio Analog Stereo:playback_FL");
    graph.connect_quietly("firefox:output_FR", "Built-in Audio Analog Stereo:playback_FR");
    graph
}

/// A card carrying every configured control, all switched off.
fn demo_mixer(setup: &SetupConfig) -> MemoryMixer {
    let mixer = MemoryMixer::new();
    for setting in setup.mixer_settings() {
        match setting {
            MixerSetting::Enum { card, control, off, on } => {
                mixer.add_enum(card, &control, &[off.as_str(), on.as_str()], &off)
            }
            MixerSetting::Volume { card, control, .. } => mixer.add_volume(card, &control, 0),
        }
    }
    if setup.has_no_mixer_toggles() {
        warn!("No mixer toggles configured");
    }
    mixer
}
