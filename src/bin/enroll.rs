//! enroll - register a new identity with the matcher
//!
//! Walks the enrollment flow (capture, preview, details, generate, watermark + save)
//! from a local still or a single camera capture.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::time::Duration;

use live_verify::ingest::load_still;
use live_verify::{
    open_source, CaptureError, EnrollmentFlow, FrameSample, FrameSource, HttpMatcher,
    IdentityDetails, LiveVerifyConfig,
};

#[path = "../ui.rs"]
mod ui;

const CAPTURE_ATTEMPTS: u32 = 50;
const CAPTURE_RETRY: Duration = Duration::from_millis(100);

#[derive(Parser, Debug)]
#[command(name = "enroll", about = "Enroll a new identity from an image or camera")]
struct Args {
    /// Still image to enroll (JPEG or PNG).
    #[arg(long, value_name = "PATH", conflicts_with = "camera")]
    image: Option<PathBuf>,
    /// Capture one frame from this camera source instead of an image file.
    #[arg(long, value_name = "URL")]
    camera: Option<String>,
    /// Display name; becomes the enrolled username.
    #[arg(long)]
    name: String,
    #[arg(long)]
    employee_id: String,
    #[arg(long)]
    department: String,
    /// Administrator recorded as performing the enrollment.
    #[arg(long, env = "LIVE_VERIFY_ADMIN", default_value = "admin")]
    admin: String,
    /// Matcher API base URL (overrides config).
    #[arg(long, value_name = "URL")]
    matcher_url: Option<String>,
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
    if let Some(camera) = &args.camera {
        cfg.camera.url = camera.clone();
    }
    cfg.validate()?;

    let mut flow = EnrollmentFlow::new();
    {
        let _stage = ui.stage("Capture");
        match &args.image {
            Some(path) => flow.upload(load_still(path)?)?,
            None if args.camera.is_some() => {
                let still = capture_once(&cfg)?;
                flow.upload(still)?;
            }
            None => return Err(anyhow!("either --image or --camera is required")),
        }
    }
    if let Some(still) = flow.still() {
        ui.note(&format!(
            "preview: {}x{} ({} bytes, {})",
            still.width,
            still.height,
            still.byte_len(),
            still.fingerprint()
        ));
    }
    flow.confirm()?;

    {
        let _stage = ui.stage("Details");
        flow.set_details(IdentityDetails {
            name: args.name.clone(),
            employee_id: args.employee_id,
            department: args.department,
        })?;
    }
    {
        let _stage = ui.stage("Generate embedding");
        flow.generate()?;
    }

    let matcher = HttpMatcher::new(cfg.matcher());
    let stage = ui.stage("Watermark and save");
    let receipt = match flow.watermark_and_save(&matcher, &args.admin) {
        Ok(receipt) => {
            drop(stage);
            receipt.clone()
        }
        Err(e) => {
            stage.fail(&e.to_string());
            return Err(e).with_context(|| format!("failed to enroll '{}'", args.name));
        }
    };

    let message = receipt
        .message
        .unwrap_or_else(|| format!("{} has been enrolled securely.", args.name));
    println!("{}", message);
    Ok(())
}

fn capture_once(cfg: &LiveVerifyConfig) -> Result<FrameSample> {
    let mut source = open_source(&cfg.camera)?;
    source
        .acquire()
        .with_context(|| format!("failed to open camera {}", cfg.camera.url))?;

    let mut result = Err(anyhow!("camera produced no frame"));
    for _ in 0..CAPTURE_ATTEMPTS {
        match source.capture() {
            Ok(still) => {
                result = Ok(still);
                break;
            }
            Err(CaptureError::NoFrameAvailable) => std::thread::sleep(CAPTURE_RETRY),
            Err(e) => {
                result = Err(e.into());
                break;
            }
        }
    }
    source.release();
    result
}
