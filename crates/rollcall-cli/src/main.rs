use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use rollcall_core::Ledger;
use rollcall_hw::{Camera, CameraError};
use rollcall_vision::{LbphParams, VisionPipeline};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod config;
mod display;
mod interrupt;
mod keys;
mod report;
mod session;

use config::Config;
use display::{AsciiRenderer, Notice};
use interrupt::InterruptFlag;
use keys::{Control, RawModeGuard};
use session::{print_summary, AttendanceSession, SessionError, SessionOptions};

#[derive(Parser)]
#[command(name = "rollcall", about = "Webcam face-recognition attendance")]
struct Cli {
    /// Config file (default: ./rollcall.toml if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG is set
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Take attendance from the camera (default)
    Run,
    /// Build the face model and label map from a dataset directory
    Train {
        /// Directory with one subdirectory of face images per person, named <name>_<id>
        #[arg(short, long)]
        dataset: PathBuf,
    },
    /// Show who is recorded on a date
    Summary {
        /// Date as YYYY-MM-DD (default: today)
        #[arg(short, long)]
        date: Option<NaiveDate>,
    },
    /// Show every attendance record, grouped by date
    Report,
    /// List video capture devices
    Devices,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = Config::load(cli.config.as_deref()).context("loading configuration")?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(&config),
        Commands::Train { dataset } => train(&config, &dataset),
        Commands::Summary { date } => summary(&config, date),
        Commands::Report => report(&config),
        Commands::Devices => {
            devices();
            Ok(())
        }
    }
}

fn today() -> NaiveDate {
    Local::now().date_naive()
}

fn run(config: &Config) -> Result<()> {
    let pipeline = VisionPipeline::load(
        &config.models.detector,
        config.detector_options(),
        &config.models.recognizer,
        &config.models.labels,
        config.recognition.confidence_threshold,
    )
    .map_err(|e| SessionError::Configuration(e.to_string()))?;

    let mut session = AttendanceSession::open(
        pipeline,
        &config.ledger.path,
        today(),
        SessionOptions {
            quorum_window: config.recognition.quorum_window,
            track_iou_threshold: config.tracking.iou_threshold,
            track_max_missed: config.tracking.max_missed,
        },
    )?;

    let (width, height) = (config.camera.width, config.camera.height);
    let camera = match config.camera.device.parse::<u32>() {
        Ok(index) => Camera::open_index(index, width, height)?,
        Err(_) => Camera::open(&config.camera.device, width, height)?,
    };
    let outcome = capture_loop(config, &camera, &mut session);

    // Terminal is back in cooked mode here.
    print_summary(session.ledger().date(), &session.summary());
    outcome
}

fn capture_loop(
    config: &Config,
    camera: &Camera,
    session: &mut AttendanceSession<VisionPipeline>,
) -> Result<()> {
    let mut stream = camera.stream(config.camera.warmup_frames)?;

    let interrupt = InterruptFlag::new();
    if let Err(e) = interrupt.listen_for_ctrl_c() {
        tracing::warn!(error = %e, "Ctrl-C handler not installed");
    }

    let guard = match RawModeGuard::enable() {
        Ok(guard) => Some(guard),
        Err(e) => {
            tracing::warn!(error = %e, "no interactive terminal; key controls disabled");
            None
        }
    };
    let renderer = (config.preview.enabled && guard.is_some())
        .then(|| AsciiRenderer::new(config.preview.width, config.preview.height));
    if renderer.is_some() {
        display::clear_screen()?;
    }

    tracing::info!(
        device = %camera.device_path,
        format = ?camera.pixel_format(),
        "attendance session started"
    );
    let mut stdout = std::io::stdout();
    let mut notice: Option<Notice> = None;

    loop {
        if interrupt.is_raised() {
            break;
        }

        let control = match guard {
            Some(_) => keys::poll_control()?,
            None => None,
        };
        if control.is_some() {
            notice = None;
        }
        match control {
            Some(Control::Quit) => break,
            Some(Control::Reload) => {
                let present = session.reload(today());
                tracing::info!(present, "attendance reloaded");
            }
            Some(Control::Summary) => {
                let people = session.summary();
                if renderer.is_some() {
                    notice = Some(Notice::summary(&people));
                } else {
                    print!("{} present:\r\n", people.len());
                    for person in &people {
                        print!("  {person}\r\n");
                    }
                }
            }
            None => {}
        }

        let frame = match stream.next_frame() {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!(error = %e, "camera read failed, stopping");
                return Err(capture_error(e));
            }
        };
        if frame.is_dark {
            tracing::debug!(sequence = frame.sequence, "dark frame skipped");
            continue;
        }

        let now = Local::now().naive_local();
        let processed = session.process_frame(&frame.data, frame.width, frame.height, now);
        let outcome = match processed {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(error = %e, sequence = frame.sequence, "frame skipped");
                continue;
            }
        };

        for person in &outcome.recorded {
            tracing::info!(person = %person, "marked present");
        }

        if let Some(renderer) = &renderer {
            renderer.draw(
                &mut stdout,
                &frame.data,
                frame.width,
                frame.height,
                &outcome.annotations,
                session.ledger().present_count(),
                notice.as_ref(),
            )?;
            if notice.as_mut().is_some_and(|n| !n.tick()) {
                notice = None;
            }
        }
    }

    drop(guard);
    tracing::info!("attendance session stopped");
    Ok(())
}

fn capture_error(e: CameraError) -> anyhow::Error {
    anyhow::Error::new(e).context("capture stream ended")
}

fn train(config: &Config, dataset: &std::path::Path) -> Result<()> {
    let (model, mut labels, summary) =
        rollcall_vision::train_from_dir(dataset, LbphParams::default())
            .with_context(|| format!("training from {}", dataset.display()))?;

    rollcall_vision::save_artifacts(
        &model,
        &mut labels,
        &config.models.recognizer,
        &config.models.labels,
    )?;

    println!(
        "Trained {} people from {} images ({} images skipped)",
        summary.people.len(),
        summary.images,
        summary.skipped_images
    );
    for (label, key) in &labels.labels {
        println!("  {label:>3}  {key}");
    }
    if !summary.skipped_dirs.is_empty() {
        println!("Skipped directories: {}", summary.skipped_dirs.join(", "));
    }
    println!("Model:  {}", config.models.recognizer.display());
    println!("Labels: {}", config.models.labels.display());
    Ok(())
}

fn summary(config: &Config, date: Option<NaiveDate>) -> Result<()> {
    let date = date.unwrap_or_else(today);
    let ledger = Ledger::new(&config.ledger.path, date);
    print_summary(date, &report::people_on(&ledger, date)?);
    Ok(())
}

fn report(config: &Config) -> Result<()> {
    let ledger = Ledger::new(&config.ledger.path, today());
    let by_date = report::group_by_date(ledger.records()?);

    if by_date.is_empty() {
        println!("No attendance recorded in {}", config.ledger.path.display());
        return Ok(());
    }
    for line in report::report_lines(&by_date) {
        println!("{line}");
    }
    Ok(())
}

fn devices() {
    let devices = Camera::list_devices();
    if devices.is_empty() {
        println!("No V4L2 capture devices found");
        return;
    }
    for d in devices {
        println!("{}  {}  (driver {}, bus {})", d.path, d.name, d.driver, d.bus);
    }
}
