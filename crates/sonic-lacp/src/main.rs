//! lacpd entry point.
//!
//! Runs two LACP systems cabled back to back over an in-memory wire, lets
//! them negotiate for a fixed time and reports the resulting aggregators.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use sonic_lacp::config::LacpConfig;
use sonic_lacp::driver::spawn_ticker;
use sonic_lacp::{LacpCallbacks, LacpEngine, LinkInfo, DEFAULT_CONFIG_PATH};
use sonic_types::{Duplex, LinkSpeed, MacAddress};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// SONiC LACP daemon (back-to-back simulation)
#[derive(Parser, Debug)]
#[command(name = "lacpd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file
    #[arg(short = 'c', long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Member links per system
    #[arg(short = 'p', long, default_value = "2")]
    ports: usize,

    /// Member link speed (e.g. 10G, 25G, 100G)
    #[arg(long, default_value = "10G")]
    speed: LinkSpeed,

    /// How long to run before reporting
    #[arg(short = 'd', long, default_value = "15")]
    duration_secs: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, default_value = "info")]
    log_level: String,

    /// Write the effective configuration to this file and exit
    #[arg(long)]
    write_config: Option<PathBuf>,
}

type Frame = (usize, Vec<u8>);

/// One side of the wire. Frames sent on a slot arrive on the same slot of
/// the peer.
struct WireCallbacks {
    name: &'static str,
    wire: mpsc::UnboundedSender<Frame>,
}

impl LacpCallbacks for WireCallbacks {
    fn transmit(&self, slot: usize, frame: &[u8]) -> Result<(), String> {
        self.wire
            .send((slot, frame.to_vec()))
            .map_err(|e| format!("wire closed: {e}"))
    }

    fn set_data_path(&self, slot: usize, enabled: bool) {
        info!(system = self.name, slot, enabled, "data path");
    }

    fn set_carrier(&self, up: bool) {
        info!(system = self.name, up, "carrier");
    }
}

/// Feeds frames from the wire into an engine until the wire closes or
/// shutdown is requested.
async fn run_receiver(
    name: &'static str,
    engine: Arc<LacpEngine>,
    mut wire: mpsc::UnboundedReceiver<Frame>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            frame = wire.recv() => match frame {
                Some((slot, frame)) => {
                    if let Err(e) = engine.receive_frame(slot, &frame) {
                        warn!(system = name, slot, error = %e, "dropped frame");
                    }
                }
                None => break,
            },
        }
    }
}

fn build_side(
    name: &'static str,
    index: u8,
    config: &LacpConfig,
    args: &Args,
    wire: mpsc::UnboundedSender<Frame>,
) -> anyhow::Result<Arc<LacpEngine>> {
    let system = MacAddress::new([0x02, 0, 0, 0, 0, index]);
    let callbacks = Arc::new(WireCallbacks { name, wire });
    let engine = LacpEngine::new(config, system, callbacks)
        .with_context(|| format!("failed to initialize {name}"))?;

    for slot in 0..args.ports {
        let link = LinkInfo {
            mac: MacAddress::new([0x02, 0, 0, index, 0, slot as u8]),
            up: true,
            speed: args.speed,
            duplex: Duplex::Full,
        };
        engine
            .bind_port(slot, link)
            .with_context(|| format!("failed to bind {name} slot {slot}"))?;
    }
    Ok(Arc::new(engine))
}

fn report(name: &str, engine: &LacpEngine, ports: usize) {
    match engine.active_aggregator_info() {
        Some(info) => info!(system = name, carrier = engine.carrier(), "{info}"),
        None => warn!(system = name, "no active aggregator"),
    }
    for slot in 0..ports {
        match engine.port(slot) {
            Ok(port) => info!(
                system = name,
                slot,
                rx = ?port.rx_state,
                mux = ?port.mux_state,
                partner = %port.partner_oper.system,
                lacpdu_rx = port.stats.lacpdu_rx,
                lacpdu_tx = port.stats.lacpdu_tx,
                "port"
            ),
            Err(e) => warn!(system = name, slot, error = %e, "port unavailable"),
        }
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = LacpConfig::load_or_default(&args.config)
        .with_context(|| format!("failed to load {}", args.config.display()))?;
    if let Some(path) = &args.write_config {
        config
            .save(path)
            .with_context(|| format!("failed to write {}", path.display()))?;
        info!(path = %path.display(), "configuration written");
        return Ok(());
    }
    anyhow::ensure!(
        args.ports > 0 && args.ports <= config.max_ports,
        "--ports must be 1-{}",
        config.max_ports
    );
    info!(
        ports = args.ports,
        speed = %args.speed,
        tick_interval_ms = config.tick_interval_ms,
        ticks_per_sec = config.ticks_per_sec(),
        lacp_rate = %config.lacp_rate,
        "starting back-to-back LACP systems"
    );

    let (a_tx, a_rx) = mpsc::unbounded_channel();
    let (b_tx, b_rx) = mpsc::unbounded_channel();
    // What A transmits, B receives.
    let a = build_side("system-a", 1, &config, &args, a_tx)?;
    let b = build_side("system-b", 2, &config, &args, b_tx)?;

    let shutdown = CancellationToken::new();
    let tasks = vec![
        spawn_ticker(a.clone(), shutdown.clone()),
        spawn_ticker(b.clone(), shutdown.clone()),
        tokio::spawn(run_receiver("system-b", b.clone(), a_rx, shutdown.clone())),
        tokio::spawn(run_receiver("system-a", a.clone(), b_rx, shutdown.clone())),
    ];

    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs(args.duration_secs)) => {}
        result = tokio::signal::ctrl_c() => {
            result.context("failed to listen for Ctrl-C")?;
            info!("received Ctrl-C, stopping early");
        }
    }
    shutdown.cancel();
    for task in tasks {
        task.await.context("task panicked")?;
    }

    report("system-a", &a, args.ports);
    report("system-b", &b, args.ports);
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    info!("--- Starting lacpd ---");
    match run(args).await {
        Ok(()) => {
            info!("lacpd exiting normally");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("lacpd error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
