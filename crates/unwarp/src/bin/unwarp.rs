//! unwarp CLI: chessboard detection, camera calibration, undistortion and
//! top-down rectification.

use clap::{Args, Parser, Subcommand};
use log::{info, LevelFilter};
use serde::de::DeserializeOwned;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use unwarp::calib::{undistort, CalibrationModel, UndistortOptions};
use unwarp::chessboard::{draw_corners, ChessboardDetector, ChessboardParams};
use unwarp::core::BorderMode;
use unwarp::io::{load_image, save_image};
use unwarp::{calibrate_from_images, corners_unwarp, CalibrationSetup, UnwarpParams};

type CliError = Box<dyn std::error::Error>;
type CliResult<T> = Result<T, CliError>;

#[derive(Parser)]
#[command(name = "unwarp")]
#[command(about = "Calibrate a camera from chessboard images, undistort, and warp to a top-down view")]
#[command(version)]
struct Cli {
    /// Log level: off, error, warn, info, debug, trace [default: $UNWARP_LOG, else info].
    #[arg(long, global = true)]
    log_level: Option<LevelFilter>,

    /// Emit `tracing` spans instead of plain log lines (RUST_LOG filters;
    /// needs the `tracing` feature).
    #[arg(long, global = true)]
    tracing: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Detect chessboard inner corners in an image.
    Detect(DetectArgs),
    /// Solve a camera model from chessboard images.
    Calibrate(CalibrateArgs),
    /// Remove lens distortion from an image.
    Undistort(UndistortArgs),
    /// Undistort, detect the board and warp it to a top-down view.
    Unwarp(UnwarpArgs),
}

#[derive(Debug, Clone, Args)]
struct GridArgs {
    /// Inner corners per row (overrides the config file).
    #[arg(long)]
    nx: Option<usize>,
    /// Inner corners per column (overrides the config file).
    #[arg(long)]
    ny: Option<usize>,
}

#[derive(Debug, Clone, Args)]
struct DetectArgs {
    /// Input image.
    #[arg(long)]
    image: PathBuf,
    /// Where to write the corner set (JSON); stdout when omitted.
    #[arg(long)]
    out: Option<PathBuf>,
    /// Write the input with the corners drawn in.
    #[arg(long)]
    overlay: Option<PathBuf>,
    /// Detector parameters (JSON, `ChessboardParams`).
    #[arg(long)]
    config: Option<PathBuf>,
    #[command(flatten)]
    grid: GridArgs,
}

#[derive(Debug, Clone, Args)]
struct CalibrateArgs {
    /// Calibration images, all of one size.
    #[arg(required = true)]
    images: Vec<PathBuf>,
    /// Where to write the camera model (JSON).
    #[arg(long)]
    out: PathBuf,
    /// Also write the full report (RMS error, per-view RMS, iterations).
    #[arg(long)]
    report: Option<PathBuf>,
    /// Calibration setup (JSON, `CalibrationSetup`).
    #[arg(long)]
    config: Option<PathBuf>,
    /// Edge length of one square (overrides the config file).
    #[arg(long)]
    square_size: Option<f64>,
    /// Fewest usable images (overrides the config file).
    #[arg(long)]
    min_views: Option<usize>,
    #[command(flatten)]
    grid: GridArgs,
}

#[derive(Debug, Clone, Args)]
struct UndistortArgs {
    #[arg(long)]
    image: PathBuf,
    /// Camera model written by `calibrate`.
    #[arg(long)]
    model: PathBuf,
    #[arg(long)]
    out: PathBuf,
    /// Replicate edge pixels instead of filling with black.
    #[arg(long)]
    replicate_border: bool,
}

#[derive(Debug, Clone, Args)]
struct UnwarpArgs {
    #[arg(long)]
    image: PathBuf,
    /// Camera model written by `calibrate`.
    #[arg(long)]
    model: PathBuf,
    #[arg(long)]
    out: PathBuf,
    /// Write the warped image with the detected corners drawn in.
    #[arg(long)]
    overlay: Option<PathBuf>,
    /// Write the transform matrix (JSON, row-major 3x3).
    #[arg(long)]
    transform: Option<PathBuf>,
    /// Rectification parameters (JSON, `UnwarpParams`).
    #[arg(long)]
    config: Option<PathBuf>,
    #[command(flatten)]
    grid: GridArgs,
}

fn read_json<T: DeserializeOwned + Default>(path: Option<&Path>) -> CliResult<T> {
    match path {
        Some(path) => {
            let raw = fs::read_to_string(path)
                .map_err(|e| format!("failed to read config {}: {e}", path.display()))?;
            Ok(serde_json::from_str(&raw)
                .map_err(|e| format!("invalid config {}: {e}", path.display()))?)
        }
        None => Ok(T::default()),
    }
}

fn init_logging(cli: &Cli) -> CliResult<()> {
    #[cfg(feature = "tracing")]
    if cli.tracing {
        let _ = tracing_log::LogTracer::init();
        unwarp::core::init_tracing(false);
        return Ok(());
    }
    unwarp::core::init_with_level(unwarp::core::resolve_level(cli.log_level))?;
    #[cfg(not(feature = "tracing"))]
    if cli.tracing {
        log::warn!("built without the `tracing` feature, using plain logs");
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let result = init_logging(&cli).and_then(|()| match &cli.command {
        Commands::Detect(args) => run_detect(args),
        Commands::Calibrate(args) => run_calibrate(args),
        Commands::Undistort(args) => run_undistort(args),
        Commands::Unwarp(args) => run_unwarp(args),
    });
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

// ── detect ─────────────────────────────────────────────────────────────

fn run_detect(args: &DetectArgs) -> CliResult<()> {
    let params: ChessboardParams = read_json(args.config.as_deref())?;
    let nx = args.grid.nx.unwrap_or(8);
    let ny = args.grid.ny.unwrap_or(6);

    let img = load_image(&args.image)?;
    let corners = ChessboardDetector::new(params).detect(&img.view(), nx, ny);
    info!(
        "{}: {nx}x{ny} board {}",
        args.image.display(),
        if corners.found { "found" } else { "not found" }
    );

    let json = serde_json::to_string_pretty(&corners)?;
    match &args.out {
        Some(path) => {
            fs::write(path, json)?;
            info!("corners written to {}", path.display());
        }
        None => println!("{json}"),
    }

    if let Some(path) = &args.overlay {
        save_image(&draw_corners(&img.view(), &corners), path)?;
    }
    Ok(())
}

// ── calibrate ──────────────────────────────────────────────────────────

fn run_calibrate(args: &CalibrateArgs) -> CliResult<()> {
    let mut setup: CalibrationSetup = read_json(args.config.as_deref())?;
    if let Some(nx) = args.grid.nx {
        setup.nx = nx;
    }
    if let Some(ny) = args.grid.ny {
        setup.ny = ny;
    }
    if let Some(s) = args.square_size {
        setup.square_size = s;
    }
    if let Some(n) = args.min_views {
        setup.min_views = n;
    }

    let images = args
        .images
        .iter()
        .map(|p| load_image(p).map_err(|e| format!("{}: {e}", p.display())))
        .collect::<Result<Vec<_>, _>>()?;
    let views: Vec<_> = images.iter().map(|img| img.view()).collect();

    let run = calibrate_from_images(&views, &setup)?;
    for &i in &run.skipped {
        info!("skipped {} (no board)", args.images[i].display());
    }
    info!(
        "rms reprojection error {:.4} px over {} views",
        run.report.rms_error,
        run.used.len()
    );

    run.report.model.save_json(&args.out)?;
    info!("model written to {}", args.out.display());
    if let Some(path) = &args.report {
        fs::write(path, serde_json::to_string_pretty(&run.report)?)?;
    }
    Ok(())
}

// ── undistort ──────────────────────────────────────────────────────────

fn run_undistort(args: &UndistortArgs) -> CliResult<()> {
    let model = CalibrationModel::load_json(&args.model)?;
    let options = UndistortOptions {
        border: if args.replicate_border {
            BorderMode::Replicate
        } else {
            BorderMode::default()
        },
        ..UndistortOptions::default()
    };
    let img = load_image(&args.image)?;
    let out = undistort(&img.view(), &model, &options)?;
    save_image(&out, &args.out)?;
    info!("undistorted image written to {}", args.out.display());
    Ok(())
}

// ── unwarp ─────────────────────────────────────────────────────────────

fn run_unwarp(args: &UnwarpArgs) -> CliResult<()> {
    let mut params: UnwarpParams = read_json(args.config.as_deref())?;
    if let Some(nx) = args.grid.nx {
        params.nx = nx;
    }
    if let Some(ny) = args.grid.ny {
        params.ny = ny;
    }
    params.annotate |= args.overlay.is_some();

    let model = CalibrationModel::load_json(&args.model)?;
    let img = load_image(&args.image)?;
    let result = corners_unwarp(&img.view(), &model, &params)?;

    save_image(&result.warped, &args.out)?;
    info!("top-down view written to {}", args.out.display());
    if let (Some(path), Some(overlay)) = (&args.overlay, &result.overlay) {
        save_image(overlay, path)?;
    }
    if let Some(path) = &args.transform {
        let m = result.transform.forward().to_array();
        fs::write(path, serde_json::to_string_pretty(&m)?)?;
    }
    Ok(())
}
