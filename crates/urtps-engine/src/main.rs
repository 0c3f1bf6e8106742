//! `urtps-peer`: a command-line peer on the uRTPS bus.
//!
//! Publishes the fixed messages listed in its config file and logs (or
//! tracks as flags) the topics it subscribes to, until Ctrl-C.
//!
//! # Usage
//!
//! ```text
//! urtps-peer [OPTIONS]
//!
//! Options:
//!   --config    <PATH>   Peer config file [default: urtps.toml]
//!   --group     <ADDR>   Multicast group, overrides [network].group
//!   --port      <PORT>   UDP port, overrides [network].port
//!   --log-level <LEVEL>  Log filter, overrides [logging].log_level
//! ```
//!
//! Each option can also be set through `URTPS_CONFIG`, `URTPS_GROUP`,
//! `URTPS_PORT` and `URTPS_LOG_LEVEL`. Precedence is CLI or environment, then
//! the config file, then built-in defaults. `RUST_LOG`, when set, replaces the
//! log filter entirely.

use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use urtps_core::domain::drivers::{bool_node, echo_node, teller_node, BoolReader};
use urtps_engine::infrastructure::storage::config::{load_config, PeerConfig, SubscriberKind};
use urtps_engine::Engine;

/// Runs one peer on the uRTPS multicast bus.
#[derive(Debug, Parser)]
#[command(
    name = "urtps-peer",
    about = "Publish/subscribe peer for the uRTPS multicast bus",
    version
)]
struct Cli {
    /// Path of the TOML peer configuration. A missing file means defaults.
    #[arg(long, default_value = "urtps.toml", env = "URTPS_CONFIG")]
    config: PathBuf,

    /// IPv4 multicast group to join.
    #[arg(long, env = "URTPS_GROUP")]
    group: Option<Ipv4Addr>,

    /// UDP port to send and receive on.
    #[arg(long, env = "URTPS_PORT")]
    port: Option<u16>,

    /// `tracing` filter such as `info` or `urtps_engine=debug`.
    #[arg(long, env = "URTPS_LOG_LEVEL")]
    log_level: Option<String>,
}

impl Cli {
    /// Applies the command-line overrides on top of `config`.
    fn apply(&self, config: &mut PeerConfig) {
        if let Some(group) = self.group {
            config.network.group = group;
        }
        if let Some(port) = self.port {
            config.network.port = port;
        }
        if let Some(level) = &self.log_level {
            config.logging.log_level.clone_from(level);
        }
    }
}

/// Builds the configured nodes and registers them with `engine`.
///
/// Returns the flags of every `bool` subscriber so they can be reported.
fn register_nodes(engine: &Engine, config: &PeerConfig) -> anyhow::Result<Vec<(String, BoolReader)>> {
    for entry in &config.publish {
        let node = teller_node(&entry.name, &entry.message, entry.interval())
            .with_context(|| format!("invalid [[publish]] entry {:?}", entry.name))?;
        engine.register_publishing(node);
    }

    let mut flags = Vec::new();
    for entry in &config.subscribe {
        let context = || format!("invalid [[subscribe]] entry {:?}", entry.name);
        match entry.kind {
            SubscriberKind::Echo => {
                engine.register_subscribing(echo_node(&entry.name).with_context(context)?);
            }
            SubscriberKind::Bool => {
                let (node, reader) = bool_node(&entry.name).with_context(context)?;
                engine.register_subscribing(node);
                flags.push((entry.name.clone(), reader));
            }
        }
    }
    Ok(flags)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = load_config(&cli.config)
        .with_context(|| format!("failed to load config from {}", cli.config.display()))?;
    cli.apply(&mut config);

    // ── Logging setup ─────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.log_level)),
        )
        .init();

    let engine_config = config.engine_config()?;
    info!(
        "urtps-peer starting on {}:{}",
        engine_config.group, engine_config.port
    );

    let engine = Arc::new(Engine::new(engine_config));
    engine.set_unknown_topic_observer(|topic| tracing::trace!(topic, "unclaimed topic"));
    let flags = register_nodes(&engine, &config)?;
    if config.publish.is_empty() && config.subscribe.is_empty() {
        warn!("no [[publish]] or [[subscribe]] entries configured; the peer will idle");
    }

    let handle = engine
        .start_in_background()
        .context("failed to start engine")?;

    // ── Wait for Ctrl-C or for the engine to stop on its own ─────────────────
    let mut join = tokio::task::spawn_blocking(move || handle.join());
    let outcome = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for Ctrl-C")?;
            info!("shutdown signal received");
            engine.stop();
            (&mut join).await
        }
        finished = &mut join => finished,
    };

    let run_result = outcome
        .context("engine join task failed")?
        .map_err(|_| anyhow::anyhow!("engine thread panicked"))?;

    let stats = engine.stats();
    info!(
        received = stats.frames_received,
        delivered = stats.frames_delivered,
        unknown = stats.unknown_topics,
        malformed = stats.decode_errors,
        sent = stats.frames_sent,
        io_errors = stats.io_errors,
        "urtps-peer stopped"
    );
    for (name, flag) in &flags {
        info!(topic = %name, value = flag.get(), "final flag");
    }

    run_result.context("engine stopped with an error")
}
