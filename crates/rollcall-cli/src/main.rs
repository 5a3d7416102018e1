use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rollcall_core::{ClassificationResult, FaceEncoder, FaceRegion, Gallery, Matcher, OnnxEncoder};
use rollcall_hw::Camera;
use serde::Serialize;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

mod attendance;
mod config;
mod overlay;
mod pipeline;

use attendance::AttendanceBackend;
use config::Config;
use overlay::TerminalOverlay;
use pipeline::{FramePipeline, Outcome};

#[derive(Parser)]
#[command(name = "rollcall", about = "Camera attendance capture against a gallery of known faces")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch the camera and log the first known face seen
    Run {
        /// Directory of reference images named after their label
        #[arg(short, long)]
        gallery: Option<PathBuf>,
        /// Maximum match distance (exclusive)
        #[arg(short, long)]
        tolerance: Option<f32>,
        /// V4L2 device path (default: try /dev/video0..2)
        #[arg(short, long)]
        camera: Option<String>,
        /// Attendance file or database path
        #[arg(short, long)]
        attendance: Option<PathBuf>,
        /// Attendance store format
        #[arg(long, value_enum)]
        backend: Option<AttendanceBackend>,
        /// Downsampling factor applied before detection
        #[arg(long)]
        scale: Option<u32>,
        /// Keep an annotated copy of the latest frame here
        #[arg(long)]
        preview: Option<PathBuf>,
        /// TrueType font for preview labels
        #[arg(long)]
        font: Option<PathBuf>,
    },
    /// Classify the faces in a single image file
    Classify {
        image: PathBuf,
        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },
    /// Load the gallery and list its labels
    Gallery,
    /// List V4L2 capture devices
    Devices,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = Config::from_env().context("loading configuration")?;

    match cli.command {
        Commands::Run {
            gallery,
            tolerance,
            camera,
            attendance,
            backend,
            scale,
            preview,
            font,
        } => {
            if let Some(dir) = gallery {
                config.gallery_dir = dir;
            }
            if let Some(tolerance) = tolerance {
                config.tolerance = tolerance;
            }
            if camera.is_some() {
                config.camera_device = camera;
            }
            if let Some(path) = attendance {
                config.attendance_path = path;
            }
            if let Some(backend) = backend {
                config.attendance_backend = backend;
            }
            if let Some(scale) = scale {
                config.detection_scale = scale;
            }
            if preview.is_some() {
                config.preview_path = preview;
            }
            if font.is_some() {
                config.font_path = font;
            }
            run(&config)
        }
        Commands::Classify { image, json } => classify(&config, &image, json),
        Commands::Gallery => list_gallery(&config),
        Commands::Devices => {
            let devices = Camera::list_devices();
            if devices.is_empty() {
                println!("No V4L2 capture devices found");
            }
            for device in devices {
                println!("{}  {} ({}, {})", device.path, device.name, device.driver, device.bus);
            }
            Ok(())
        }
    }
}

fn load_gallery(config: &Config, encoder: &mut OnnxEncoder) -> Result<Gallery> {
    let gallery = Gallery::load(&config.gallery_dir, encoder)
        .with_context(|| format!("loading gallery from {}", config.gallery_dir.display()))?;
    tracing::info!(
        dir = %config.gallery_dir.display(),
        known = gallery.len(),
        "gallery loaded"
    );
    Ok(gallery)
}

fn load_encoder(config: &Config) -> Result<OnnxEncoder> {
    let encoder = OnnxEncoder::load(&config.model_dir)
        .with_context(|| format!("loading face models from {}", config.model_dir.display()))?;
    OnnxEncoder::check_tolerance(config.tolerance);
    Ok(encoder)
}

fn run(config: &Config) -> Result<()> {
    let mut encoder = load_encoder(config)?;
    let gallery = load_gallery(config, &mut encoder)?;
    if gallery.is_empty() {
        tracing::warn!("no known faces loaded; every face will show as Unknown");
    }

    let log = attendance::open_log(config.attendance_backend, &config.attendance_path)
        .with_context(|| format!("opening attendance store {}", config.attendance_path.display()))?;
    let camera = Camera::open_first(&config.camera_candidates()).context("opening camera")?;
    let font = match &config.preview_path {
        Some(_) => load_preview_font(config)?,
        None => None,
    };
    let quit = install_quit_signal()?;

    println!(
        "Watching {} ({}); press q then Enter, or Ctrl-C, to stop",
        camera.device_path,
        camera.card_name().unwrap_or_else(|| "unknown camera".into())
    );

    let pipeline = FramePipeline::new(
        camera,
        encoder,
        log,
        TerminalOverlay::new(config.preview_path.clone(), font),
        gallery,
        quit,
        config.pipeline_options(),
    );

    match pipeline.run()? {
        Outcome::Logged(record) => {
            println!("Attendance logged: {} on {} at {}", record.label, record.date, record.time);
            Ok(())
        }
        Outcome::QuitRequested => {
            println!("Stopped");
            Ok(())
        }
        Outcome::CameraFailed(e) => Err(anyhow::Error::new(e).context("camera stopped delivering frames")),
    }
}

fn load_preview_font(config: &Config) -> Result<Option<ab_glyph::FontVec>> {
    let font = overlay::load_font(config.font_path.as_deref()).context("loading preview font")?;
    if font.is_none() {
        tracing::warn!("no usable system font; preview labels drawn without text, set ROLLCALL_FONT_PATH");
    }
    Ok(font)
}

/// Shared flag raised by Ctrl-C or by typing `q` on stdin.
fn install_quit_signal() -> Result<Arc<AtomicBool>> {
    let quit = Arc::new(AtomicBool::new(false));

    let flag = quit.clone();
    ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst)).context("installing Ctrl-C handler")?;

    let flag = quit.clone();
    std::thread::Builder::new()
        .name("rollcall-stdin".into())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                match line {
                    Ok(line) if line.trim().eq_ignore_ascii_case("q") => {
                        flag.store(true, Ordering::SeqCst);
                        break;
                    }
                    Ok(_) => {}
                    Err(_) => break,
                }
            }
        })
        .context("spawning stdin watcher")?;

    Ok(quit)
}

#[derive(Serialize)]
struct FaceReport<'a> {
    region: &'a FaceRegion,
    #[serde(flatten)]
    result: &'a ClassificationResult,
}

fn classify(config: &Config, path: &Path, json: bool) -> Result<()> {
    let mut encoder = load_encoder(config)?;
    let gallery = load_gallery(config, &mut encoder)?;

    let image = image::open(path)
        .with_context(|| format!("decoding {}", path.display()))?
        .to_rgb8();
    let faces = encoder.encode(&image).context("encoding image")?;

    let matcher = rollcall_core::EuclideanMatcher;
    let results = faces
        .iter()
        .map(|face| matcher.classify(&face.signature, &gallery, config.tolerance))
        .collect::<Result<Vec<_>, _>>()
        .context("classifying faces")?;

    if json {
        let reports: Vec<FaceReport> = faces
            .iter()
            .zip(&results)
            .map(|(face, result)| FaceReport {
                region: &face.region,
                result,
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&reports)?);
        return Ok(());
    }

    if faces.is_empty() {
        println!("No face detected");
    }
    for (face, result) in faces.iter().zip(&results) {
        let r = &face.region;
        match result.distance {
            Some(distance) => println!(
                "{} at ({:.0}, {:.0}, {:.0}x{:.0}) distance {:.3} confidence {:.3}",
                result.display_label(),
                r.x,
                r.y,
                r.width,
                r.height,
                distance,
                result.confidence
            ),
            None => println!(
                "{} at ({:.0}, {:.0}, {:.0}x{:.0})",
                result.display_label(),
                r.x,
                r.y,
                r.width,
                r.height
            ),
        }
    }
    Ok(())
}

fn list_gallery(config: &Config) -> Result<()> {
    let mut encoder = load_encoder(config)?;
    let gallery = load_gallery(config, &mut encoder)?;

    if gallery.is_empty() {
        println!("No known faces in {}", config.gallery_dir.display());
        return Ok(());
    }
    println!(
        "{} known faces ({}-dimensional signatures):",
        gallery.len(),
        gallery.dimension().unwrap_or_default()
    );
    for label in gallery.labels() {
        println!("  {label}");
    }
    Ok(())
}
