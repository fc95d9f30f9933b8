use anyhow::{Context, Result};
use opencv::{
    calib3d,
    core::{self, Mat, Rect, Size},
    imgproc,
};
use stereocal_core::{
    stereo_config::{Rectification, StereoConfig},
    ImageSize, PixelRegion, NUMBER_OF_CAMERAS,
};

use crate::convert::{mat_to_matrix, matrix_to_mat};

/// Per camera remap tables, one `CV_32FC1` map per axis.
pub struct RectificationMaps {
    pub map_x: Mat,
    pub map_y: Mat,
}

/// The calibration state of the rig together with the pixel maps derived
/// from it.
#[derive(Default)]
pub struct StereoRig {
    pub config: StereoConfig,
    pub maps: Option<[RectificationMaps; NUMBER_OF_CAMERAS]>,
}

fn to_size(size: ImageSize) -> Size {
    Size::new(size.width as i32, size.height as i32)
}

fn to_region(rect: Rect) -> PixelRegion {
    PixelRegion {
        x: rect.x,
        y: rect.y,
        width: rect.width,
        height: rect.height,
    }
}

impl StereoRig {
    pub fn new(config: StereoConfig) -> Self {
        Self { config, maps: None }
    }

    pub fn is_rectified(&self) -> bool {
        self.maps.is_some()
    }

    /// Recomputes the rectifying transforms, Q and the remap tables from the
    /// intrinsics and the stereo rotation and translation.
    pub fn recompute_rectification(&mut self, image_size: ImageSize) -> Result<()> {
        let config = &self.config;
        let mut k = Vec::with_capacity(NUMBER_OF_CAMERAS);
        let mut d = Vec::with_capacity(NUMBER_OF_CAMERAS);
        for cam_id in 0..NUMBER_OF_CAMERAS {
            let camera_matrix = config.camera_matrix[cam_id]
                .with_context(|| format!("camera {cam_id} has no camera matrix"))?;
            let distortion = config.distortion[cam_id]
                .with_context(|| format!("camera {cam_id} has no distortion coefficients"))?;
            k.push(matrix_to_mat(&camera_matrix)?);
            d.push(matrix_to_mat(&distortion)?);
        }
        let rotation = config
            .rotation
            .context("stereo rotation is unset, calibrate the rig first")?;
        let translation = config
            .translation
            .context("stereo translation is unset, calibrate the rig first")?;

        let size = to_size(image_size);
        let mut r = [Mat::default(), Mat::default()];
        let mut p = [Mat::default(), Mat::default()];
        let mut q = Mat::default();
        let mut roi = [Rect::default(), Rect::default()];
        {
            let [r1, r2] = &mut r;
            let [p1, p2] = &mut p;
            let [roi1, roi2] = &mut roi;
            calib3d::stereo_rectify(
                &k[0],
                &d[0],
                &k[1],
                &d[1],
                size,
                &matrix_to_mat(&rotation)?,
                &matrix_to_mat(&translation)?,
                r1,
                r2,
                p1,
                p2,
                &mut q,
                calib3d::CALIB_ZERO_DISPARITY,
                1.0,
                size,
                roi1,
                roi2,
            )?;
        }

        let rectify_map = |cam_id: usize| -> Result<RectificationMaps> {
            let mut map_x = Mat::default();
            let mut map_y = Mat::default();
            calib3d::init_undistort_rectify_map(
                &k[cam_id],
                &d[cam_id],
                &r[cam_id],
                &p[cam_id],
                size,
                core::CV_32FC1,
                &mut map_x,
                &mut map_y,
            )?;
            Ok(RectificationMaps { map_x, map_y })
        };
        let maps = [rectify_map(0)?, rectify_map(1)?];

        let rectification = Rectification {
            rotation: [mat_to_matrix(&r[0])?, mat_to_matrix(&r[1])?],
            projection: [mat_to_matrix(&p[0])?, mat_to_matrix(&p[1])?],
            valid_region: [to_region(roi[0]), to_region(roi[1])],
            image_size,
        };
        log::info!(
            "rectified {}x{}, valid regions {:?} / {:?}",
            image_size.width,
            image_size.height,
            rectification.valid_region[0],
            rectification.valid_region[1]
        );

        self.config.disparity_to_depth = Some(mat_to_matrix(&q)?);
        self.config.rectification = Some(rectification);
        self.maps = Some(maps);
        Ok(())
    }

    /// Warps a raw frame pair onto common epipolar lines.
    pub fn remap(&self, images: &[Mat; NUMBER_OF_CAMERAS]) -> Result<[Mat; NUMBER_OF_CAMERAS]> {
        let maps = self
            .maps
            .as_ref()
            .context("rectification maps have not been computed")?;

        let mut rectified = [Mat::default(), Mat::default()];
        for ((image, map), out) in images.iter().zip(maps).zip(rectified.iter_mut()) {
            imgproc::remap(
                image,
                out,
                &map.map_x,
                &map.map_y,
                imgproc::INTER_LINEAR,
                core::BORDER_CONSTANT,
                core::Scalar::default(),
            )?;
        }
        Ok(rectified)
    }
}

#[cfg(test)]
mod tests {
    use opencv::prelude::*;
    use stereocal_core::{RotationMatrix, TranslationVector};

    use super::*;

    fn calibrated_rig() -> StereoRig {
        let mut config = StereoConfig::new();
        config.fill_nominal_intrinsics(0);
        config.fill_nominal_intrinsics(1);
        config.rotation = Some(RotationMatrix::identity());
        config.translation = Some(TranslationVector::new(-10.0, 0.0, 0.0));
        StereoRig::new(config)
    }

    #[test]
    fn rectification_needs_stereo_params() {
        let mut config = StereoConfig::new();
        config.fill_nominal_intrinsics(0);
        config.fill_nominal_intrinsics(1);
        let mut rig = StereoRig::new(config);
        assert!(rig.recompute_rectification(ImageSize::new(1600, 1200)).is_err());
        assert!(!rig.is_rectified());
        assert!(rig.config.rectification.is_none());

        let mut rig = calibrated_rig();
        rig.config.distortion[1] = None;
        assert!(rig.recompute_rectification(ImageSize::new(1600, 1200)).is_err());
    }

    #[test]
    fn rectification_fills_q_and_maps() {
        let mut rig = calibrated_rig();
        rig.recompute_rectification(ImageSize::new(1600, 1200)).unwrap();
        assert!(rig.is_rectified());

        let q = rig.config.disparity_to_depth.unwrap();
        // Q[3][2] is -1/Tx
        assert!((q[(3, 2)] - 0.1).abs() < 1e-9);

        let rectification = rig.config.rectification.as_ref().unwrap();
        assert_eq!(rectification.image_size, ImageSize::new(1600, 1200));
        // baseline in the right projection: Tx * f
        let p2 = rectification.projection[1];
        assert!((p2[(0, 3)] + 10.0 * p2[(0, 0)]).abs() < 1e-6);
        // zero disparity at infinity
        assert_eq!(rectification.projection[0][(0, 2)], p2[(0, 2)]);

        let maps = rig.maps.as_ref().unwrap();
        assert_eq!(maps[0].map_x.rows(), 1200);
        assert_eq!(maps[0].map_x.cols(), 1600);
        assert_eq!(maps[1].map_y.typ(), core::CV_32FC1);
    }

    #[test]
    fn remap_keeps_the_frame_size() {
        let mut rig = calibrated_rig();
        let image = Mat::new_rows_cols_with_default(1200, 1600, core::CV_8UC1, core::Scalar::all(9.0))
            .unwrap();
        assert!(rig.remap(&[image.clone(), image.clone()]).is_err());

        rig.recompute_rectification(ImageSize::new(1600, 1200)).unwrap();
        let [left, right] = rig.remap(&[image.clone(), image]).unwrap();
        assert_eq!(left.cols(), 1600);
        assert_eq!(right.rows(), 1200);
    }
}
