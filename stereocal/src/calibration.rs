use anyhow::{bail, Context, Result};
use opencv::{
    calib3d,
    core::{Mat, Point2f, Size, TermCriteria, TermCriteria_COUNT, TermCriteria_EPS, Vector},
};
use serde::Deserialize;
use stereocal_core::{
    stereo_config::StereoConfig, CameraMatrix, DistortionCoefficients, ImageSize, StereoSource,
    NUMBER_OF_CAMERAS,
};

use crate::{
    chessboard::{ChessboardDetector, PatternCfg},
    convert::{mat_to_matrix, mat_to_values, matrix_to_mat},
    observation::ObservationSet,
    rectification::StereoRig,
    viewer::{Key, Viewer},
};

const INTRINSICS_KEY_DELAY_MS: i32 = 1;
const STEREO_KEY_DELAY_MS: i32 = 10;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CalibrationCfg {
    pub pattern: PatternCfg,
    /// size the solver and the rectification assume for every frame
    pub image_size: ImageSize,
    pub preview_scale: f64,
}

impl Default for CalibrationCfg {
    fn default() -> Self {
        Self {
            pattern: PatternCfg::default(),
            image_size: ImageSize::new(1600, 1200),
            preview_scale: 0.5,
        }
    }
}

impl CalibrationCfg {
    pub fn finalize(self) -> Result<Calibrator> {
        Ok(Calibrator {
            detector: self.pattern.finalize()?,
            image_size: self.image_size,
            preview_scale: self.preview_scale,
            intrinsics_criteria: TermCriteria::new(
                TermCriteria_COUNT + TermCriteria_EPS,
                30,
                f64::EPSILON,
            )?,
            stereo_criteria: TermCriteria::new(TermCriteria_COUNT + TermCriteria_EPS, 30, 1e-6)?,
        })
    }
}

pub struct Calibrator {
    detector: ChessboardDetector,
    image_size: ImageSize,
    preview_scale: f64,
    intrinsics_criteria: TermCriteria,
    stereo_criteria: TermCriteria,
}

impl Calibrator {
    pub fn image_size(&self) -> ImageSize {
        self.image_size
    }

    fn cv_image_size(&self) -> Size {
        Size::new(self.image_size.width as i32, self.image_size.height as i32)
    }

    /// Collects observations of one camera until the operator aborts. A frame
    /// is kept when the spacebar is pressed while the pattern is visible.
    pub fn capture_intrinsics<S, V>(
        &self,
        source: &mut S,
        viewer: &mut V,
        cam_id: usize,
    ) -> Result<ObservationSet<1>>
    where
        S: StereoSource<Mat>,
        V: Viewer,
    {
        log::info!("calibrating camera {cam_id}: space captures, x finishes");
        let window = cam_id.to_string();
        let mut observations = ObservationSet::new();

        for images in source.frames() {
            let images = images?;
            let image = &images[cam_id];
            let corners = self.detector.detect(image)?;
            viewer.show(
                &window,
                &self
                    .detector
                    .annotate(image, corners.as_ref(), self.preview_scale)?,
            )?;

            match viewer.wait_key(INTRINSICS_KEY_DELAY_MS)? {
                Some(Key::Accept) => match corners {
                    Some(corners) => {
                        observations.push([corners]);
                        log::info!("new points, {} observation(s)", observations.len());
                    }
                    None => log::warn!("no pattern in view, nothing captured"),
                },
                Some(Key::Abort) => break,
                None => {}
            }
        }
        Ok(observations)
    }

    /// Solves one camera's intrinsics with fixed principal point and aspect
    /// ratio. Returns whether the config was updated.
    pub fn solve_intrinsics(
        &self,
        observations: &ObservationSet<1>,
        config: &mut StereoConfig,
        cam_id: usize,
    ) -> Result<bool> {
        if observations.is_empty() {
            log::warn!("no observations for camera {cam_id}, intrinsics left unset");
            return Ok(false);
        }

        let mut k = matrix_to_mat(&CameraMatrix::identity())?;
        let mut d = Mat::default();
        let mut rvecs = Vector::<Mat>::new();
        let mut tvecs = Vector::<Mat>::new();
        let rms = calib3d::calibrate_camera(
            &observations.object_points(self.detector.object_points()),
            &observations.image_points(0),
            self.cv_image_size(),
            &mut k,
            &mut d,
            &mut rvecs,
            &mut tvecs,
            calib3d::CALIB_FIX_PRINCIPAL_POINT
                | calib3d::CALIB_FIX_ASPECT_RATIO
                | calib3d::CALIB_FIX_K3,
            self.intrinsics_criteria,
        )?;
        if !rms.is_finite() {
            log::error!("intrinsic calibration of camera {cam_id} failed");
            return Ok(false);
        }

        // k1 k2 p1 p2, k3 is fixed at zero
        let d = mat_to_values(&d)?;
        let d = d
            .get(..4)
            .context("solver returned fewer than 4 distortion coefficients")?;
        let camera_matrix = mat_to_matrix(&k)?;
        let distortion = DistortionCoefficients::from_row_slice(d);
        log::info!(
            "camera {cam_id}: rms reprojection error {rms:.4} over {} observation(s)",
            observations.len()
        );
        log::info!("K{}: {camera_matrix}", cam_id + 1);
        log::info!("D{}: {}", cam_id + 1, distortion.transpose());

        config.camera_matrix[cam_id] = Some(camera_matrix);
        config.distortion[cam_id] = Some(distortion);
        Ok(true)
    }

    pub fn calibrate_intrinsics<S, V>(
        &self,
        source: &mut S,
        viewer: &mut V,
        config: &mut StereoConfig,
        cam_id: usize,
    ) -> Result<bool>
    where
        S: StereoSource<Mat>,
        V: Viewer,
    {
        let observations = self.capture_intrinsics(source, viewer, cam_id)?;
        self.solve_intrinsics(&observations, config, cam_id)
    }

    /// Like [`Self::capture_intrinsics`], but a frame is only kept when both
    /// cameras see the pattern.
    pub fn capture_stereo<S, V>(&self, source: &mut S, viewer: &mut V) -> Result<ObservationSet<2>>
    where
        S: StereoSource<Mat>,
        V: Viewer,
    {
        log::info!("calibrating the stereo pair: space captures, x finishes");
        let mut observations = ObservationSet::new();

        for images in source.frames() {
            let images = images?;
            let mut corners: [Option<Vector<Point2f>>; NUMBER_OF_CAMERAS] = [None, None];
            for (cam_id, image) in images.iter().enumerate() {
                let found = self.detector.detect(image)?;
                viewer.show(
                    &cam_id.to_string(),
                    &self
                        .detector
                        .annotate(image, found.as_ref(), self.preview_scale)?,
                )?;
                corners[cam_id] = found;
            }

            match viewer.wait_key(STEREO_KEY_DELAY_MS)? {
                Some(Key::Accept) => match corners {
                    [Some(left), Some(right)] => {
                        observations.push([left, right]);
                        log::info!("new points, {} observation(s)", observations.len());
                    }
                    _ => log::warn!("pattern not seen by both cameras, nothing captured"),
                },
                Some(Key::Abort) => break,
                None => {}
            }
        }
        Ok(observations)
    }

    /// Solves rotation, translation, essential and fundamental matrices with
    /// the intrinsics held fixed. Returns whether the config was updated.
    pub fn solve_stereo(
        &self,
        observations: &ObservationSet<2>,
        config: &mut StereoConfig,
    ) -> Result<bool> {
        if !config.have_all_camera_intrinsics() {
            bail!("stereo calibration needs the intrinsics of both cameras");
        }
        if observations.is_empty() {
            log::warn!("no stereo observations, stereo parameters left unset");
            return Ok(false);
        }

        let mut k = Vec::with_capacity(NUMBER_OF_CAMERAS);
        let mut d = Vec::with_capacity(NUMBER_OF_CAMERAS);
        for cam_id in 0..NUMBER_OF_CAMERAS {
            k.push(matrix_to_mat(&config.camera_matrix[cam_id].context("camera matrix unset")?)?);
            d.push(matrix_to_mat(&config.distortion[cam_id].context("distortion unset")?)?);
        }
        let [k1, k2] = k.as_mut_slice() else {
            bail!("expected one camera matrix per camera");
        };
        let [d1, d2] = d.as_mut_slice() else {
            bail!("expected one distortion vector per camera");
        };

        let mut r = Mat::default();
        let mut t = Mat::default();
        let mut e = Mat::default();
        let mut f = Mat::default();
        let rms = calib3d::stereo_calibrate(
            &observations.object_points(self.detector.object_points()),
            &observations.image_points(0),
            &observations.image_points(1),
            k1,
            d1,
            k2,
            d2,
            self.cv_image_size(),
            &mut r,
            &mut t,
            &mut e,
            &mut f,
            calib3d::CALIB_FIX_INTRINSIC,
            self.stereo_criteria,
        )?;
        if !rms.is_finite() {
            log::error!("stereo calibration failed");
            return Ok(false);
        }

        let rotation = mat_to_matrix(&r)?;
        let translation = mat_to_matrix(&t)?;
        log::info!(
            "stereo rms reprojection error {rms:.4} over {} observation(s)",
            observations.len()
        );
        log::info!("R: {rotation}");
        log::info!("T: {}", translation.transpose());

        config.rotation = Some(rotation);
        config.translation = Some(translation);
        config.essential = Some(mat_to_matrix(&e)?);
        config.fundamental = Some(mat_to_matrix(&f)?);
        Ok(true)
    }

    pub fn calibrate_stereo<S, V>(
        &self,
        source: &mut S,
        viewer: &mut V,
        config: &mut StereoConfig,
    ) -> Result<bool>
    where
        S: StereoSource<Mat>,
        V: Viewer,
    {
        if !config.have_all_camera_intrinsics() {
            bail!("stereo calibration needs the intrinsics of both cameras");
        }
        let observations = self.capture_stereo(source, viewer)?;
        self.solve_stereo(&observations, config)
    }

    /// Runs every calibration stage whose results are missing from the rig,
    /// then recomputes the rectification. A stage that produces nothing leaves
    /// its results unset and the rig unrectified; errors are reserved for the
    /// source and the viewer.
    pub fn calibrate_cameras<S, V>(
        &self,
        rig: &mut StereoRig,
        source: &mut S,
        viewer: &mut V,
    ) -> Result<()>
    where
        S: StereoSource<Mat>,
        V: Viewer,
    {
        for cam_id in 0..NUMBER_OF_CAMERAS {
            if !rig.config.have_camera_intrinsics(cam_id) {
                self.calibrate_intrinsics(source, viewer, &mut rig.config, cam_id)?;
            }
            log::info!("stereo config:\n{}", rig.config.to_json()?);
        }

        if !rig.config.have_stereo_params() {
            if rig.config.have_all_camera_intrinsics() {
                self.calibrate_stereo(source, viewer, &mut rig.config)?;
            } else {
                log::warn!("skipping stereo calibration, intrinsics are missing");
            }
        }

        if let Err(err) = rig.recompute_rectification(self.image_size) {
            log::warn!("rig left unrectified: {err:#}");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use opencv::{
        core::{Scalar, CV_8UC1},
        prelude::*,
    };
    use stereocal_core::{
        nalgebra::{Rotation3, Vector3},
        RotationMatrix, TranslationVector,
    };

    use super::*;
    use crate::chessboard::tests::synthetic_board;

    struct StillSource {
        images: [Mat; NUMBER_OF_CAMERAS],
    }

    impl StereoSource<Mat> for StillSource {
        fn get_images(&mut self) -> Result<[Mat; NUMBER_OF_CAMERAS]> {
            Ok(self.images.clone())
        }
    }

    /// Replays key presses and records which windows were drawn.
    struct ScriptedViewer {
        keys: VecDeque<Option<Key>>,
        windows: Vec<String>,
    }

    impl ScriptedViewer {
        fn new(keys: &[Option<Key>]) -> Self {
            Self {
                keys: keys.iter().copied().collect(),
                windows: vec![],
            }
        }
    }

    impl Viewer for ScriptedViewer {
        fn show(&mut self, window: &str, _image: &Mat) -> Result<()> {
            self.windows.push(window.to_string());
            Ok(())
        }

        fn wait_key(&mut self, _delay_ms: i32) -> Result<Option<Key>> {
            Ok(self.keys.pop_front().unwrap_or(Some(Key::Abort)))
        }
    }

    fn blank() -> Mat {
        Mat::new_rows_cols_with_default(1200, 1600, CV_8UC1, Scalar::all(128.0)).unwrap()
    }

    fn calibrator() -> Calibrator {
        CalibrationCfg::default().finalize().unwrap()
    }

    const TRUE_FOCAL: f64 = 1000.0;

    // principal point where the solver pins it for a 1600x1200 image
    fn true_camera_matrix() -> CameraMatrix {
        CameraMatrix::new(TRUE_FOCAL, 0.0, 799.5, 0.0, TRUE_FOCAL, 599.5, 0.0, 0.0, 1.0)
    }

    /// Projects the default board seen from a few tilted poses through an
    /// ideal pinhole camera, once from the left camera and once from a right
    /// camera displaced by `baseline` along x.
    fn synthetic_observations(baseline: f64) -> ObservationSet<2> {
        let k = true_camera_matrix();
        let pattern = calibrator().detector.object_points().to_vec();
        let poses = [
            (0.3, 0.0, 0.0),
            (-0.3, 0.1, 0.0),
            (0.0, 0.35, 0.1),
            (0.2, -0.3, 0.0),
            (-0.1, -0.2, 0.2),
            (0.25, 0.25, -0.1),
        ];

        let mut observations = ObservationSet::new();
        for (roll, pitch, yaw) in poses {
            let rotation = Rotation3::from_euler_angles(roll, pitch, yaw);
            let translation = Vector3::new(-2.0, -1.5, 15.0);
            let project = |offset: f64| -> Vector<Point2f> {
                pattern
                    .iter()
                    .map(|p| {
                        let board = Vector3::new(p.x as f64, p.y as f64, p.z as f64);
                        let camera = rotation * board + translation + Vector3::new(offset, 0.0, 0.0);
                        let pixel = k * (camera / camera.z);
                        Point2f::new(pixel.x as f32, pixel.y as f32)
                    })
                    .collect()
            };
            observations.push([project(0.0), project(-baseline)]);
        }
        observations
    }

    fn left_only(stereo: &ObservationSet<2>) -> ObservationSet<1> {
        let mut observations = ObservationSet::new();
        for corners in stereo.image_points(0).iter() {
            observations.push([corners]);
        }
        observations
    }

    #[test]
    fn default_cfg() {
        let cfg = CalibrationCfg::default();
        assert_eq!(cfg.image_size, ImageSize::new(1600, 1200));
        assert_eq!(cfg.pattern.cols, 5);
        assert_eq!(cfg.pattern.rows, 4);
        assert_eq!(cfg.pattern.subsample, 4);
    }

    #[test]
    fn accepting_without_pattern_captures_nothing() {
        let calibrator = calibrator();
        let mut source = StillSource {
            images: [blank(), blank()],
        };
        let mut viewer = ScriptedViewer::new(&[None, Some(Key::Accept), Some(Key::Abort)]);

        let observations = calibrator.capture_intrinsics(&mut source, &mut viewer, 1).unwrap();
        assert!(observations.is_empty());
        assert_eq!(viewer.windows, vec!["1", "1", "1"]);

        let mut config = StereoConfig::new();
        assert!(!calibrator
            .solve_intrinsics(&observations, &mut config, 1)
            .unwrap());
        assert_eq!(config, StereoConfig::new());
    }

    #[test]
    fn accepted_frames_with_pattern_are_captured() {
        let calibrator = calibrator();
        let mut source = StillSource {
            images: [synthetic_board(), blank()],
        };
        let mut viewer = ScriptedViewer::new(&[
            Some(Key::Accept),
            None,
            Some(Key::Accept),
            Some(Key::Abort),
        ]);

        let observations = calibrator.capture_intrinsics(&mut source, &mut viewer, 0).unwrap();
        assert_eq!(observations.len(), 2);
        assert_eq!(observations.image_points(0).get(0).unwrap().len(), 20);
    }

    #[test]
    fn stereo_capture_needs_both_views() {
        let calibrator = calibrator();
        let mut source = StillSource {
            images: [synthetic_board(), blank()],
        };
        let mut viewer = ScriptedViewer::new(&[Some(Key::Accept), Some(Key::Abort)]);
        let observations = calibrator.capture_stereo(&mut source, &mut viewer).unwrap();
        assert!(observations.is_empty());
        assert_eq!(viewer.windows, vec!["0", "1", "0", "1"]);

        let mut source = StillSource {
            images: [synthetic_board(), synthetic_board()],
        };
        let mut viewer = ScriptedViewer::new(&[Some(Key::Accept), Some(Key::Abort)]);
        let observations = calibrator.capture_stereo(&mut source, &mut viewer).unwrap();
        assert_eq!(observations.len(), 1);
    }

    #[test]
    fn intrinsics_are_recovered_from_synthetic_views() {
        let calibrator = calibrator();
        let observations = left_only(&synthetic_observations(2.0));
        let mut config = StereoConfig::new();
        assert!(calibrator
            .solve_intrinsics(&observations, &mut config, 0)
            .unwrap());
        assert!(config.have_camera_intrinsics(0));
        assert!(!config.have_camera_intrinsics(1));

        let k = config.camera_matrix[0].unwrap();
        assert!((k[(0, 0)] - TRUE_FOCAL).abs() < 1.0, "fx = {}", k[(0, 0)]);
        assert_eq!(k[(0, 0)], k[(1, 1)]);
        // the principal point stays at the image center
        assert_eq!(k[(0, 2)], 799.5);
        assert_eq!(k[(1, 2)], 599.5);
        assert!(config.distortion[0].unwrap().amax() < 1e-2);
    }

    #[test]
    fn stereo_solve_needs_intrinsics() {
        let calibrator = calibrator();
        let mut config = StereoConfig::new();
        config.fill_nominal_intrinsics(0);
        assert!(calibrator
            .solve_stereo(&synthetic_observations(2.0), &mut config)
            .is_err());
        let mut source = StillSource {
            images: [blank(), blank()],
        };
        let mut viewer = ScriptedViewer::new(&[]);
        assert!(calibrator
            .calibrate_stereo(&mut source, &mut viewer, &mut config)
            .is_err());
        assert!(viewer.windows.is_empty());
    }

    #[test]
    fn baseline_is_recovered_from_synthetic_views() {
        let calibrator = calibrator();
        let mut config = StereoConfig::new();
        config.camera_matrix = [Some(true_camera_matrix()), Some(true_camera_matrix())];
        config.distortion = [Some(DistortionCoefficients::zeros()); 2];

        assert!(calibrator
            .solve_stereo(&synthetic_observations(2.0), &mut config)
            .unwrap());
        let t = config.translation.unwrap();
        assert!((t - TranslationVector::new(-2.0, 0.0, 0.0)).norm() < 1e-2, "T = {t}");
        let r = config.rotation.unwrap();
        assert!((r - RotationMatrix::identity()).amax() < 1e-3);
        assert!(config.essential.is_some());
        assert!(config.fundamental.is_some());
        // Q only comes with the rectification
        assert!(!config.have_stereo_params());
    }

    fn calibrated_intrinsics() -> StereoConfig {
        let mut config = StereoConfig::new();
        config.camera_matrix = [Some(true_camera_matrix()), Some(true_camera_matrix())];
        config.distortion = [Some(DistortionCoefficients::zeros()); 2];
        config
    }

    #[test]
    fn aborted_stereo_stage_keeps_the_intrinsics() {
        let calibrator = calibrator();
        let mut rig = StereoRig::new(calibrated_intrinsics());
        let mut source = StillSource {
            images: [blank(), blank()],
        };
        let mut viewer = ScriptedViewer::new(&[]);

        calibrator
            .calibrate_cameras(&mut rig, &mut source, &mut viewer)
            .unwrap();
        assert_eq!(viewer.windows, vec!["0", "1"]);
        assert!(!rig.is_rectified());
        assert_eq!(rig.config, calibrated_intrinsics());

        let path = std::env::temp_dir().join(format!(
            "stereocal-aborted-stereo-{}.json",
            std::process::id()
        ));
        rig.config.save_json(&path).unwrap();
        let saved = StereoConfig::from_json_file(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(saved, calibrated_intrinsics());
    }

    #[test]
    fn failed_intrinsics_skip_the_stereo_stage() {
        let calibrator = calibrator();
        let mut config = StereoConfig::new();
        config.fill_nominal_intrinsics(1);
        let expected = config.clone();
        let mut rig = StereoRig::new(config);
        let mut source = StillSource {
            images: [blank(), blank()],
        };
        let mut viewer = ScriptedViewer::new(&[]);

        calibrator
            .calibrate_cameras(&mut rig, &mut source, &mut viewer)
            .unwrap();
        // only the intrinsic capture of camera 0 ran
        assert_eq!(viewer.windows, vec!["0"]);
        assert!(!rig.is_rectified());
        assert_eq!(rig.config, expected);
    }

    #[test]
    fn complete_config_skips_straight_to_rectification() {
        let calibrator = calibrator();
        let mut config = calibrated_intrinsics();
        assert!(calibrator
            .solve_stereo(&synthetic_observations(2.0), &mut config)
            .unwrap());
        let mut rig = StereoRig::new(config);
        rig.recompute_rectification(calibrator.image_size()).unwrap();
        assert!(rig.config.have_stereo_params());

        let mut source = StillSource {
            images: [blank(), blank()],
        };
        let mut viewer = ScriptedViewer::new(&[]);
        calibrator
            .calibrate_cameras(&mut rig, &mut source, &mut viewer)
            .unwrap();
        assert!(viewer.windows.is_empty());
        assert!(rig.is_rectified());
    }
}
