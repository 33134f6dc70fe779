//! live_verify - continuous face verification from a live camera
//!
//! This tool:
//! 1. Loads configuration (LIVE_VERIFY_CONFIG file + LIVE_VERIFY_* env + flags)
//! 2. Probes the matcher health endpoint (warning only)
//! 3. Runs a verification session on a driver thread
//! 4. Prints every display change to stdout until Ctrl-C or --duration elapses

use anyhow::{Context, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::{Duration, Instant};

use live_verify::{
    open_source, DisplayState, HttpMatcher, LiveVerifyConfig, ResultSink, SessionController,
    SessionDriver,
};

#[path = "../ui.rs"]
mod ui;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Parser, Debug)]
#[command(name = "live_verify", about = "Continuously verify faces from a live camera")]
struct Args {
    /// Matcher API base URL (overrides config).
    #[arg(long, value_name = "URL")]
    matcher_url: Option<String>,
    /// Camera source: stub://name, a still directory, or http(s):// (overrides config).
    #[arg(long, value_name = "URL")]
    camera: Option<String>,
    /// Acceptance threshold for a displayed match (overrides config).
    #[arg(long)]
    threshold: Option<f64>,
    /// Stop after this many seconds.
    #[arg(long, value_name = "SECS")]
    duration: Option<u64>,
    /// Print display changes as JSON lines.
    #[arg(long)]
    json: bool,
    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let is_tty = std::io::stderr().is_terminal();
    let stdout_is_tty = std::io::stdout().is_terminal();
    let ui = ui::Ui::from_args(Some(&args.ui), is_tty, !stdout_is_tty);

    let mut cfg = LiveVerifyConfig::load()?;
    if let Some(url) = args.matcher_url {
        cfg.matcher_url = url;
    }
    if let Some(camera) = args.camera {
        cfg.camera.url = camera;
    }
    if let Some(threshold) = args.threshold {
        cfg.acceptance_threshold = threshold;
    }
    cfg.validate()?;

    let matcher = HttpMatcher::new(cfg.matcher());
    {
        let stage = ui.stage("Probe matcher");
        match matcher.health() {
            Ok(true) => drop(stage),
            Ok(false) => {
                log::warn!("matcher at {} reports unhealthy", matcher.base_url());
                stage.fail("unhealthy");
            }
            Err(e) => {
                log::warn!("matcher health probe failed: {}", e);
                stage.fail("unreachable");
            }
        }
    }

    let source = open_source(&cfg.camera)?;
    let controller = SessionController::new(
        source,
        matcher,
        cfg.policy()?,
        cfg.timing(),
        ResultSink::new(),
    )?;
    let handle = SessionDriver::new(controller).spawn()?;
    {
        let _stage = ui.stage("Start camera");
        handle.start().context("failed to start verification session")?;
    }
    log::info!(
        "live_verify running: camera={} matcher={} threshold={:.2}",
        cfg.camera.url,
        cfg.matcher_url,
        cfg.acceptance_threshold
    );

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .context("error setting Ctrl-C handler")?;

    let deadline = args
        .duration
        .map(|secs| Instant::now() + Duration::from_secs(secs));
    let watch = handle.watch();
    let mut seen_version = watch.version();
    let mut shown = DisplayState::default();

    loop {
        match rx.recv_timeout(POLL_INTERVAL) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                log::info!("shutdown signal received, stopping session...");
                break;
            }
            Err(RecvTimeoutError::Timeout) => {}
        }
        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            break;
        }

        let version = watch.version();
        if version == seen_version {
            continue;
        }
        seen_version = version;
        let current = watch.current();
        if current.same_decision(&shown) {
            continue;
        }
        print_display(&current, args.json)?;
        shown = current;
    }

    handle.stop()?;
    let stats = handle.stats()?;
    ui.note(&format!(
        "{} dispatched, {} matched, {} no match, {} failed, {} stale",
        stats.dispatched, stats.accepted, stats.rejected, stats.failed, stats.stale
    ));
    handle.shutdown()?;
    Ok(())
}

fn print_display(display: &DisplayState, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(display)?);
        return Ok(());
    }
    match (&display.matched_identity, display.similarity_score) {
        (Some(identity), Some(score)) => {
            let integrity = match display.data_integrity {
                Some(true) => "verified",
                Some(false) => "FAILED",
                None => "unknown",
            };
            println!(
                "MATCH {} similarity={:.1}% integrity={}",
                identity,
                score * 100.0,
                integrity
            );
        }
        _ => println!("NO MATCH"),
    }
    Ok(())
}
