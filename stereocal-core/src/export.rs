//! Plain text dump of the rectified rig in the syntax of an OpenVSLAM config
//! file. Lossy and one way.

use anyhow::{Context, Result};

use crate::{matrix::flatten_row_major, stereo_config::StereoConfig, Real};

pub const OPENVSLAM_FPS: u32 = 20;

fn format_list(values: &[Real]) -> String {
    let values: Vec<String> = values.iter().map(|x| format!("{x:?}")).collect();
    format!("[{}]", values.join(", "))
}

impl StereoConfig {
    pub fn export_openvslam(&self) -> Result<String> {
        let rectification = self
            .rectification
            .as_ref()
            .context("rectification has not been computed")?;
        let k_left = self.camera_matrix[0].context("left camera matrix is unset")?;
        let k_right = self.camera_matrix[1].context("right camera matrix is unset")?;
        let d_left = self.distortion[0].context("left distortion is unset")?;
        let d_right = self.distortion[1].context("right distortion is unset")?;

        // the right projection carries the baseline in its last column
        let p2 = &rectification.projection[1];

        let lines = [
            format!("Camera.fx: {:?}", p2[(0, 0)]),
            format!("Camera.fy: {:?}", p2[(1, 1)]),
            format!("Camera.cx: {:?}", p2[(0, 2)]),
            format!("Camera.cy: {:?}", p2[(1, 2)]),
            format!("Camera.focal_x_baseline: {:?}", -p2[(0, 3)]),
            format!("Camera.fps: {OPENVSLAM_FPS}"),
            format!("Camera.cols: {}", rectification.image_size.width),
            format!("Camera.rows: {}", rectification.image_size.height),
            String::from("Camera.k1: 0"),
            String::from("Camera.k2: 0"),
            String::from("Camera.p1: 0"),
            String::from("Camera.p2: 0"),
            String::from("Camera.k3: 0"),
            format!("StereoRectifier.K_left: {}", format_list(&flatten_row_major(&k_left))),
            format!("StereoRectifier.D_left: {}", format_list(d_left.as_slice())),
            format!(
                "StereoRectifier.R_left: {}",
                format_list(&flatten_row_major(&rectification.rotation[0]))
            ),
            format!("StereoRectifier.K_right: {}", format_list(&flatten_row_major(&k_right))),
            format!("StereoRectifier.D_right: {}", format_list(d_right.as_slice())),
            format!(
                "StereoRectifier.R_right: {}",
                format_list(&flatten_row_major(&rectification.rotation[1]))
            ),
        ];

        let mut out = lines.join("\n");
        out.push('\n');
        Ok(out)
    }
}
