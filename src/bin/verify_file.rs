//! verify_file - single-shot verification of a local still
//!
//! Posts one image to the matcher, applies the live-session decision policy, and
//! prints the result as JSON on stdout.

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use std::io::IsTerminal;
use std::path::PathBuf;

use live_verify::ingest::load_still;
use live_verify::session::{Decision, RejectReason};
use live_verify::{HttpMatcher, LiveVerifyConfig, Matcher};

#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(name = "verify_file", about = "Verify one local image against the matcher")]
struct Args {
    /// JPEG or PNG still to verify.
    image: PathBuf,
    /// Matcher API base URL (overrides config).
    #[arg(long, value_name = "URL")]
    matcher_url: Option<String>,
    /// Acceptance threshold (overrides config).
    #[arg(long)]
    threshold: Option<f64>,
    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

#[derive(Serialize)]
struct Report<'a> {
    image: String,
    accepted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<&'a str>,
    matched_user: Option<&'a str>,
    similarity_score: Option<f64>,
    data_integrity: Option<bool>,
    message: Option<&'a str>,
    threshold: f64,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args = Args::parse();
    let is_tty = std::io::stderr().is_terminal();
    let stdout_is_tty = std::io::stdout().is_terminal();
    let ui = ui::Ui::from_args(Some(&args.ui), is_tty, !stdout_is_tty);

    let mut cfg = LiveVerifyConfig::load()?;
    if let Some(url) = args.matcher_url {
        cfg.matcher_url = url;
    }
    if let Some(threshold) = args.threshold {
        cfg.acceptance_threshold = threshold;
    }
    cfg.validate()?;
    let policy = cfg.policy()?;

    let sample = {
        let _stage = ui.stage("Load image");
        load_still(&args.image)?
    };
    let matcher = HttpMatcher::new(cfg.matcher());
    let outcome = {
        let _stage = ui.stage("Verify");
        matcher
            .verify(&sample)
            .with_context(|| format!("verification of {} failed", args.image.display()))?
    };

    let (accepted, reason) = match policy.decide(&outcome) {
        Decision::Accept { .. } => (true, None),
        Decision::Reject(RejectReason::NotMatched) => (false, Some("not_matched")),
        Decision::Reject(RejectReason::BelowThreshold) => (false, Some("below_threshold")),
        Decision::Reject(RejectReason::MissingIdentity) => (false, Some("missing_identity")),
    };
    let report = Report {
        image: args.image.display().to_string(),
        accepted,
        reason,
        matched_user: outcome.matched_identity.as_deref(),
        similarity_score: outcome.similarity_score,
        data_integrity: outcome.data_integrity,
        message: outcome.message.as_deref(),
        threshold: policy.acceptance_threshold(),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
