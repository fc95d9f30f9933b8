use std::{collections::BTreeMap, path::Path};

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::{ser::PrettyFormatter, Map, Value};
use sophus::nalgebra::{Matrix3, SMatrix};

use crate::{
    matrix::{flatten_row_major, reshape_row_major},
    CameraMatrix, DisparityToDepthMatrix, DistortionCoefficients, ImageSize, PixelRegion,
    ProjectionMatrix, Real, RotationMatrix, TranslationVector, NUMBER_OF_CAMERAS,
};

const CAMERA_MATRIX_KEYS: [&str; NUMBER_OF_CAMERAS] = ["K1", "K2"];
const DISTORTION_KEYS: [&str; NUMBER_OF_CAMERAS] = ["D1", "D2"];
const ROTATION_KEY: &str = "R";
const TRANSLATION_KEY: &str = "T";
const ESSENTIAL_KEY: &str = "E";
const FUNDAMENTAL_KEY: &str = "F";
const DISPARITY_TO_DEPTH_KEY: &str = "Q";

/// Output of stereo rectification, derived from the intrinsics and the stereo
/// parameters. Never persisted.
#[derive(Clone, Debug, PartialEq)]
pub struct Rectification {
    pub rotation: [RotationMatrix; NUMBER_OF_CAMERAS],
    pub projection: [ProjectionMatrix; NUMBER_OF_CAMERAS],
    pub valid_region: [PixelRegion; NUMBER_OF_CAMERAS],
    // size of the rectified images and of the remap tables
    pub image_size: ImageSize,
}

/// Calibration state of the rig. Every field is optional: a config is filled
/// in stages (intrinsics, then stereo parameters, then rectification).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StereoConfig {
    // intrinsic
    pub camera_matrix: [Option<CameraMatrix>; NUMBER_OF_CAMERAS],
    pub distortion: [Option<DistortionCoefficients>; NUMBER_OF_CAMERAS],

    // stereo params
    pub rotation: Option<RotationMatrix>,
    pub translation: Option<TranslationVector>,
    pub essential: Option<Matrix3<Real>>,
    pub fundamental: Option<Matrix3<Real>>,

    // rectification params
    pub disparity_to_depth: Option<DisparityToDepthMatrix>,
    pub rectification: Option<Rectification>,
}

impl StereoConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read stereo config {}", path.display()))?;
        let mut config = Self::new();
        config.load_json(&json);
        Ok(config)
    }

    /// Fills every field present in `json`. Absent keys, keys with the wrong
    /// number of elements and unparsable input leave the fields untouched.
    pub fn load_json(&mut self, json: &str) {
        let params = match serde_json::from_str::<Value>(json) {
            Ok(Value::Object(params)) => params,
            Ok(_) => {
                log::warn!("stereo config is not a JSON object, ignoring it");
                return;
            }
            Err(err) => {
                log::warn!("failed to parse stereo config: {err}");
                return;
            }
        };

        for cam_id in 0..NUMBER_OF_CAMERAS {
            if let Some(m) = read_matrix(&params, CAMERA_MATRIX_KEYS[cam_id]) {
                self.camera_matrix[cam_id] = Some(m);
            }
            if let Some(d) = read_matrix(&params, DISTORTION_KEYS[cam_id]) {
                self.distortion[cam_id] = Some(d);
            }
        }

        if let Some(r) = read_matrix(&params, ROTATION_KEY) {
            self.rotation = Some(r);
        }
        if let Some(t) = read_matrix(&params, TRANSLATION_KEY) {
            self.translation = Some(t);
        }
        if let Some(e) = read_matrix(&params, ESSENTIAL_KEY) {
            self.essential = Some(e);
        }
        if let Some(f) = read_matrix(&params, FUNDAMENTAL_KEY) {
            self.fundamental = Some(f);
        }
        if let Some(q) = read_matrix(&params, DISPARITY_TO_DEPTH_KEY) {
            self.disparity_to_depth = Some(q);
        }
    }

    /// Pretty printed with four space indentation and sorted keys. Unset
    /// fields are omitted.
    pub fn to_json(&self) -> Result<String> {
        let mut params = BTreeMap::<&str, Vec<Real>>::new();

        for cam_id in 0..NUMBER_OF_CAMERAS {
            if let Some(m) = &self.camera_matrix[cam_id] {
                params.insert(CAMERA_MATRIX_KEYS[cam_id], flatten_row_major(m));
            }
            if let Some(d) = &self.distortion[cam_id] {
                params.insert(DISTORTION_KEYS[cam_id], flatten_row_major(d));
            }
        }

        if let Some(r) = &self.rotation {
            params.insert(ROTATION_KEY, flatten_row_major(r));
        }
        if let Some(t) = &self.translation {
            params.insert(TRANSLATION_KEY, flatten_row_major(t));
        }
        if let Some(e) = &self.essential {
            params.insert(ESSENTIAL_KEY, flatten_row_major(e));
        }
        if let Some(f) = &self.fundamental {
            params.insert(FUNDAMENTAL_KEY, flatten_row_major(f));
        }
        if let Some(q) = &self.disparity_to_depth {
            params.insert(DISPARITY_TO_DEPTH_KEY, flatten_row_major(q));
        }

        let mut buffer = Vec::new();
        let mut serializer =
            serde_json::Serializer::with_formatter(&mut buffer, PrettyFormatter::with_indent(b"    "));
        params.serialize(&mut serializer)?;
        Ok(String::from_utf8(buffer)?)
    }

    pub fn save_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        std::fs::write(path, self.to_json()?)
            .with_context(|| format!("failed to write stereo config {}", path.display()))
    }

    /// Nominal intrinsics of the rig's lenses with zero distortion. Unknown
    /// camera ids are ignored.
    pub fn fill_nominal_intrinsics(&mut self, cam_id: usize) {
        let (Some(camera_matrix), Some(distortion)) = (
            self.camera_matrix.get_mut(cam_id),
            self.distortion.get_mut(cam_id),
        ) else {
            log::warn!("there is no camera {cam_id}, nominal intrinsics not set");
            return;
        };
        *camera_matrix = Some(CameraMatrix::new(
            3660.0, 0.0, 800.0, //
            0.0, 3660.0, 600.0, //
            0.0, 0.0, 1.0,
        ));
        *distortion = Some(DistortionCoefficients::zeros());
    }

    /// False for camera ids outside the rig.
    pub fn have_camera_intrinsics(&self, cam_id: usize) -> bool {
        matches!(
            (self.camera_matrix.get(cam_id), self.distortion.get(cam_id)),
            (Some(Some(_)), Some(Some(_)))
        )
    }

    pub fn have_all_camera_intrinsics(&self) -> bool {
        (0..NUMBER_OF_CAMERAS).all(|cam_id| self.have_camera_intrinsics(cam_id))
    }

    pub fn have_stereo_params(&self) -> bool {
        self.rotation.is_some()
            && self.translation.is_some()
            && self.essential.is_some()
            && self.fundamental.is_some()
            && self.disparity_to_depth.is_some()
    }
}

fn read_matrix<const R: usize, const C: usize>(
    params: &Map<String, Value>,
    key: &str,
) -> Option<SMatrix<Real, R, C>> {
    let value = params.get(key)?;

    let mut values = vec![];
    if !collect_numbers(value, &mut values) {
        log::warn!("{key}: expected an array of numbers, leaving it unset");
        return None;
    }

    let matrix = reshape_row_major(&values);
    if matrix.is_none() {
        log::warn!(
            "{key}: expected {} values, found {}, leaving it unset",
            R * C,
            values.len()
        );
    }
    matrix
}

// nested arrays are flattened in order
fn collect_numbers(value: &Value, values: &mut Vec<Real>) -> bool {
    match value {
        Value::Number(n) => match n.as_f64() {
            Some(x) => {
                values.push(x);
                true
            }
            None => false,
        },
        Value::Array(items) => items.iter().all(|item| collect_numbers(item, values)),
        _ => false,
    }
}
