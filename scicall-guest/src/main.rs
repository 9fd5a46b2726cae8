//! scicall-guest: remote guest client for a scicall station.

use std::path::PathBuf;

use clap::Parser;
use log::{error, info};
use tokio::io::{AsyncBufReadExt, BufReader};

use scicall_guest::console::{self, ConsoleCommand};
use scicall_guest::session::SessionSnapshot;
use scicall_guest::{load_config, logging, DryRunPipeline, SessionHandle, UserAction};

/// scicall-guest - join a scicall station as a remote guest
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Station host name or address
    #[arg(short, long)]
    station: Option<String>,

    /// Channel on the station (1-based)
    #[arg(short, long)]
    channel: Option<u32>,

    /// Configuration file path
    #[arg(short = 'f', long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Start a local loopback test instead of waiting for commands
    #[arg(long)]
    self_test: bool,

    /// Directory for log files (console only when unset)
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Number of days to keep log files
    #[arg(long)]
    log_retention_days: Option<u64>,
}

fn print_status(snapshot: &SessionSnapshot) {
    println!("connection: {:?}", snapshot.connection);
    println!(
        "legs: outbound={:?} feedback={:?} mix={:?}",
        snapshot.legs.outbound, snapshot.legs.feedback, snapshot.legs.mix
    );
    println!(
        "video={} mic={} monitor={} mic_gain={:.2} monitor_gain={:.2} latency={}ms",
        snapshot.video_enabled,
        snapshot.audio_enabled,
        snapshot.monitor_enabled,
        snapshot.mic_gain,
        snapshot.monitor_gain,
        snapshot.latency_ms
    );
    for leg in &snapshot.mix_legs {
        println!("  {:?} {} port {} volume {:.2}", leg.role, leg.index, leg.port, leg.volume);
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = match load_config(args.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config file: {}", e);
            return Err(e.into());
        }
    };

    // Command line takes precedence over the config file
    if args.station.is_some() {
        config.station.host = args.station.clone();
    }
    if args.channel.is_some() {
        config.station.channel = args.channel;
    }

    let log_dir = args
        .log_dir
        .clone()
        .or_else(|| config.logging.log_dir.as_ref().map(PathBuf::from));
    let retention_days = args
        .log_retention_days
        .or(config.logging.retention_days)
        .unwrap_or(7);
    let _log_guard = logging::init_logging(
        log_dir.as_deref(),
        retention_days,
        args.verbose,
        config.logging.level.as_deref(),
    )?;

    let session_config = config.session_config()?;
    info!(
        "scicall-guest {} joining {} on channel {}",
        env!("CARGO_PKG_VERSION"),
        session_config.station,
        session_config.channel + 1
    );

    let (session, mut notices) = SessionHandle::spawn(session_config, DryRunPipeline::new());

    tokio::spawn(async move {
        while let Some(notice) = notices.recv().await {
            println!("* {}", notice);
        }
    });

    if args.self_test {
        session.act(UserAction::SelfTest)?;
    }

    println!("{}", console::HELP);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match console::parse_line(&line) {
            Ok(None) => {}
            Ok(Some(ConsoleCommand::Action(action))) => session.act(action)?,
            Ok(Some(ConsoleCommand::Status)) => match session.snapshot().await {
                Ok(snapshot) => print_status(&snapshot),
                Err(e) => error!("Status unavailable: {}", e),
            },
            Ok(Some(ConsoleCommand::Help)) => println!("{}", console::HELP),
            Ok(Some(ConsoleCommand::Quit)) => break,
            Err(msg) => println!("{}", msg),
        }
    }

    info!("Shutting down");
    session.shutdown().await;
    Ok(())
}
