use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use stereocal::{HighGuiViewer, StereoRig};
use stereocal_core::{stereo_config::StereoConfig, NUMBER_OF_CAMERAS};
use stereocal_sensor::{ImageSource, OpenCvTransportLayer};

mod settings;

use settings::Settings;

/// Interactive calibration of a two camera stereo rig.
///
/// Stages whose results are already present in the input stereo config are
/// skipped. In the capture windows, space keeps the current chessboard
/// observation and `x` finishes the stage.
#[derive(Parser, Debug)]
struct Cli {
    /// File with a previous stereo calibration.
    #[arg(long)]
    stereo_config: Option<PathBuf>,

    /// File to write the stereo calibration to.
    #[arg(long, default_value = "calibration_output.json")]
    out_stereo_config: PathBuf,

    /// JSON file with calibration, disparity and camera settings.
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Also write the OpenVSLAM export to this file.
    #[arg(long)]
    openvslam_out: Option<PathBuf>,

    /// Use nominal lens intrinsics for cameras that have none instead of
    /// calibrating them.
    #[arg(long)]
    nominal_intrinsics: bool,

    /// Hardware id of the camera mounted on the right.
    #[arg(long)]
    right_camera: Option<String>,

    /// Exposure time in microseconds.
    #[arg(long)]
    exposure: Option<f64>,

    /// Gain in dB.
    #[arg(long)]
    gain: Option<f64>,

    /// Acquisition frame rate.
    #[arg(long)]
    framerate: Option<f64>,

    /// Print every camera event.
    #[arg(short, long)]
    verbose: bool,

    /// Exit after calibrating instead of showing the disparity preview.
    #[arg(long)]
    no_preview: bool,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let mut settings = match &cli.settings {
        Some(path) => Settings::from_json_file(path)?,
        None => Settings::default(),
    };
    settings.apply_cli(&cli);
    log::debug!("settings: {settings:?}");

    let config = match &cli.stereo_config {
        Some(path) => StereoConfig::from_json_file(path)?,
        None => StereoConfig::new(),
    };
    let mut rig = StereoRig::new(config);
    if cli.nominal_intrinsics {
        for cam_id in 0..NUMBER_OF_CAMERAS {
            if !rig.config.have_camera_intrinsics(cam_id) {
                log::info!("using nominal intrinsics for camera {cam_id}");
                rig.config.fill_nominal_intrinsics(cam_id);
            }
        }
    }

    let transport = OpenCvTransportLayer::default();
    let mut source = ImageSource::open(&transport, &settings.source)?;
    let calibrator = settings.calibration.finalize()?;
    for cam_id in 0..NUMBER_OF_CAMERAS {
        let Some(size) = source.image_size(cam_id) else {
            continue;
        };
        if size != calibrator.image_size() {
            log::warn!(
                "camera {cam_id} delivers {}x{}, calibration assumes {}x{}",
                size.width,
                size.height,
                calibrator.image_size().width,
                calibrator.image_size().height
            );
        }
    }

    let mut viewer = HighGuiViewer;
    calibrator.calibrate_cameras(&mut rig, &mut source, &mut viewer)?;

    rig.config.save_json(&cli.out_stereo_config)?;
    log::info!("stereo config written to {}", cli.out_stereo_config.display());

    println!("{}", rig.config.to_json()?);

    if !rig.is_rectified() {
        log::warn!("calibration is incomplete, no OpenVSLAM export and no disparity preview");
        return Ok(());
    }

    let export = rig.config.export_openvslam()?;
    print!("{export}");
    if let Some(path) = &cli.openvslam_out {
        std::fs::write(path, &export)
            .with_context(|| format!("failed to write {}", path.display()))?;
    }

    if !cli.no_preview {
        let mut preview = settings.disparity.finalize()?;
        preview.run(&rig, &mut source, &mut viewer)?;
    }
    Ok(())
}
