use anyhow::Result;
use opencv::{
    calib3d::{self, StereoSGBM},
    core::{self, Mat, Ptr, Size, CV_8U},
    imgproc,
    prelude::*,
};
use serde::Deserialize;
use stereocal_core::StereoSource;

use crate::{
    rectification::StereoRig,
    viewer::{Key, Viewer},
};

pub const DISPARITY_WINDOW: &str = "disparity";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DisparityCfg {
    pub min_disparity: i32,
    // must be divisible by 16
    pub num_disparities: i32,
    pub block_size: i32,
    // window size the smoothness penalties are derived from
    pub penalty_window_size: i32,
    pub disp12_max_diff: i32,
    pub uniqueness_ratio: i32,
    pub speckle_window_size: i32,
    pub speckle_range: i32,
    pub pre_filter_cap: i32,

    pub scale: f64,
}

impl Default for DisparityCfg {
    fn default() -> Self {
        Self {
            min_disparity: 64,
            num_disparities: 256,
            block_size: 27,
            penalty_window_size: 7,
            disp12_max_diff: 10,
            uniqueness_ratio: 15,
            speckle_window_size: 5,
            speckle_range: 2,
            pre_filter_cap: 63,
            scale: 0.5,
        }
    }
}

impl DisparityCfg {
    pub fn p1(&self) -> i32 {
        4 * 3 * self.penalty_window_size.pow(2)
    }

    pub fn p2(&self) -> i32 {
        8 * 3 * self.penalty_window_size.pow(2)
    }

    pub fn finalize(self) -> Result<DisparityPreview> {
        if self.num_disparities <= 0 || self.num_disparities % 16 != 0 {
            anyhow::bail!(
                "number of disparities must be a positive multiple of 16, got {}",
                self.num_disparities
            );
        }
        let matcher = StereoSGBM::create(
            self.min_disparity,
            self.num_disparities,
            self.block_size,
            self.p1(),
            self.p2(),
            self.disp12_max_diff,
            self.pre_filter_cap,
            self.uniqueness_ratio,
            self.speckle_window_size,
            self.speckle_range,
            calib3d::StereoSGBM_MODE_SGBM_3WAY,
        )?;
        log::debug!("disparity matcher: {self:?}, P1 {} P2 {}", self.p1(), self.p2());

        Ok(DisparityPreview {
            matcher,
            scale: self.scale,
        })
    }
}

pub struct DisparityPreview {
    matcher: Ptr<StereoSGBM>,
    scale: f64,
}

impl DisparityPreview {
    fn downsample(&self, image: &Mat) -> Result<Mat> {
        let mut small = Mat::default();
        imgproc::resize(
            image,
            &mut small,
            Size::default(),
            self.scale,
            self.scale,
            imgproc::INTER_AREA,
        )?;
        Ok(small)
    }

    /// Raw fixed point disparity of a rectified pair.
    pub fn compute(&mut self, left: &Mat, right: &Mat) -> Result<Mat> {
        let mut disparity = Mat::default();
        self.matcher.compute(left, right, &mut disparity)?;
        Ok(disparity)
    }

    /// Shows the rectified pair and its color mapped disparity until the
    /// operator presses the spacebar.
    pub fn run<S, V>(&mut self, rig: &StereoRig, source: &mut S, viewer: &mut V) -> Result<()>
    where
        S: StereoSource<Mat>,
        V: Viewer,
    {
        log::info!("disparity preview running, press space to quit");
        for images in source.frames() {
            let [left, right] = rig.remap(&images?)?;
            let left = self.downsample(&left)?;
            let right = self.downsample(&right)?;
            viewer.show("0", &left)?;
            viewer.show("1", &right)?;

            let disparity = self.compute(&left, &right)?;
            viewer.show(DISPARITY_WINDOW, &colorize(&normalize_disparity(&disparity)?)?)?;

            if viewer.wait_key(1)? == Some(Key::Accept) {
                break;
            }
        }
        Ok(())
    }
}

/// Stretches the disparity range onto 0..=255. A constant image maps to 0.
pub fn normalize_disparity(disparity: &Mat) -> Result<Mat> {
    let mut min = 0.0;
    let mut max = 0.0;
    core::min_max_loc(
        disparity,
        Some(&mut min),
        Some(&mut max),
        None,
        None,
        &core::no_array(),
    )?;

    let range = max - min;
    let (alpha, beta) = if range > 0.0 {
        (255.0 / range, -min * 255.0 / range)
    } else {
        (0.0, 0.0)
    };
    let mut normalized = Mat::default();
    disparity.convert_to(&mut normalized, CV_8U, alpha, beta)?;
    Ok(normalized)
}

pub fn colorize(normalized: &Mat) -> Result<Mat> {
    let mut colored = Mat::default();
    imgproc::apply_color_map(normalized, &mut colored, imgproc::COLORMAP_JET)?;
    Ok(colored)
}
