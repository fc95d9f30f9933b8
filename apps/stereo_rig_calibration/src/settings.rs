use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use stereocal::{CalibrationCfg, DisparityCfg};
use stereocal_sensor::SourceCfg;

use crate::Cli;

/// Tuning of every stage. Sections and fields missing from the settings file
/// keep their defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub calibration: CalibrationCfg,
    pub disparity: DisparityCfg,
    pub source: SourceCfg,
}

impl Settings {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read settings {}", path.display()))?;
        Self::from_json(&json).with_context(|| format!("invalid settings {}", path.display()))
    }

    /// Command line flags take precedence over the settings file.
    pub fn apply_cli(&mut self, cli: &Cli) {
        if let Some(id) = &cli.right_camera {
            self.source.right_camera_id = Some(id.clone());
        }
        let params = &mut self.source.camera_params;
        params.exposure_time = cli.exposure.or(params.exposure_time);
        params.gain = cli.gain.or(params.gain);
        params.frame_rate = cli.framerate.or(params.frame_rate);
        self.source.print_events |= cli.verbose;
    }
}
