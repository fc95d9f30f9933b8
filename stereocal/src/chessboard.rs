use anyhow::{bail, Result};
use opencv::{
    calib3d,
    core::{Mat, Point2f, Point3f, Size, TermCriteria, TermCriteria_COUNT, TermCriteria_EPS, Vector},
    imgproc,
    prelude::*,
};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PatternCfg {
    /// inner corners per row
    pub cols: usize,
    /// inner corners per column
    pub rows: usize,
    pub square_size: f32,

    /// detection runs on every `subsample`-th pixel in both directions
    pub subsample: usize,
    pub refine_window: i32,
    pub refine_iterations: i32,
    pub refine_epsilon: f64,
}

impl Default for PatternCfg {
    fn default() -> Self {
        Self {
            cols: 5,
            rows: 4,
            square_size: 1.0,
            subsample: 4,
            refine_window: 11,
            refine_iterations: 30,
            refine_epsilon: 0.001,
        }
    }
}

impl PatternCfg {
    pub fn finalize(self) -> Result<ChessboardDetector> {
        if self.cols < 2 || self.rows < 2 {
            bail!(
                "a chessboard needs at least 2x2 inner corners, got {}x{}",
                self.cols,
                self.rows
            );
        }
        if self.subsample == 0 {
            bail!("subsample factor must be positive");
        }

        let criteria = TermCriteria::new(
            TermCriteria_COUNT + TermCriteria_EPS,
            self.refine_iterations,
            self.refine_epsilon,
        )?;
        let object_points = object_points(self.cols, self.rows, self.square_size);
        log::debug!(
            "chessboard pattern {}x{}, square size {}",
            self.cols,
            self.rows,
            self.square_size
        );

        Ok(ChessboardDetector {
            pattern_size: Size::new(self.cols as i32, self.rows as i32),
            subsample: self.subsample,
            refine_window: Size::new(self.refine_window, self.refine_window),
            criteria,
            object_points,
        })
    }
}

/// Board coordinates of the inner corners, row by row with x varying fastest.
/// The board lies in the z = 0 plane.
pub fn object_points(cols: usize, rows: usize, square_size: f32) -> Vector<Point3f> {
    (0..rows)
        .flat_map(|r| (0..cols).map(move |c| (c, r)))
        .map(|(c, r)| Point3f::new(c as f32 * square_size, r as f32 * square_size, 0.0))
        .collect()
}

pub struct ChessboardDetector {
    pattern_size: Size,
    subsample: usize,
    refine_window: Size,
    criteria: TermCriteria,
    object_points: Vector<Point3f>,
}

impl ChessboardDetector {
    pub fn object_points(&self) -> &Vector<Point3f> {
        &self.object_points
    }

    /// Looks for the pattern on a subsampled copy of `image` and refines the
    /// corners found there on the full resolution image.
    pub fn detect(&self, image: &Mat) -> Result<Option<Vector<Point2f>>> {
        let gray = to_gray(image)?;

        let factor = 1.0 / self.subsample as f64;
        let mut small = Mat::default();
        imgproc::resize(
            &gray,
            &mut small,
            Size::default(),
            factor,
            factor,
            imgproc::INTER_NEAREST,
        )?;

        let mut corners = Vector::<Point2f>::new();
        let found = calib3d::find_chessboard_corners(
            &small,
            self.pattern_size,
            &mut corners,
            calib3d::CALIB_CB_ADAPTIVE_THRESH + calib3d::CALIB_CB_NORMALIZE_IMAGE,
        )?;
        if !found {
            return Ok(None);
        }

        let scale = self.subsample as f32;
        let mut corners: Vector<Point2f> = corners
            .iter()
            .map(|p| Point2f::new(p.x * scale, p.y * scale))
            .collect();
        imgproc::corner_sub_pix(
            &gray,
            &mut corners,
            self.refine_window,
            Size::new(-1, -1),
            self.criteria,
        )?;
        Ok(Some(corners))
    }

    /// Color copy of `image` with the detected corners drawn on it, scaled for
    /// display.
    pub fn annotate(
        &self,
        image: &Mat,
        corners: Option<&Vector<Point2f>>,
        scale: f64,
    ) -> Result<Mat> {
        let mut color = Mat::default();
        if image.channels() == 1 {
            imgproc::cvt_color(image, &mut color, imgproc::COLOR_GRAY2BGR, 0)?;
        } else {
            color = image.try_clone()?;
        }
        if let Some(corners) = corners {
            calib3d::draw_chessboard_corners(&mut color, self.pattern_size, corners, true)?;
        }

        let mut preview = Mat::default();
        imgproc::resize(
            &color,
            &mut preview,
            Size::default(),
            scale,
            scale,
            imgproc::INTER_LINEAR,
        )?;
        Ok(preview)
    }
}

fn to_gray(image: &Mat) -> Result<Mat> {
    if image.channels() == 1 {
        return Ok(image.try_clone()?);
    }
    let mut gray = Mat::default();
    imgproc::cvt_color(image, &mut gray, imgproc::COLOR_BGR2GRAY, 0)?;
    Ok(gray)
}

#[cfg(test)]
pub(crate) mod tests {
    use opencv::core::{Rect, Scalar, CV_8UC1};

    use super::*;

    pub const SQUARE: i32 = 160;
    pub const BOARD_ORIGIN: (i32, i32) = (320, 200);

    /// A 6x5 square board, hence 5x4 inner corners, on a 1600x1200 image.
    pub fn synthetic_board() -> Mat {
        let mut image =
            Mat::new_rows_cols_with_default(1200, 1600, CV_8UC1, Scalar::all(255.0)).unwrap();
        for r in 0..5 {
            for c in 0..6 {
                if (r + c) % 2 == 1 {
                    continue;
                }
                let square = Rect::new(
                    BOARD_ORIGIN.0 + c * SQUARE,
                    BOARD_ORIGIN.1 + r * SQUARE,
                    SQUARE,
                    SQUARE,
                );
                imgproc::rectangle(&mut image, square, Scalar::all(0.0), -1, imgproc::LINE_8, 0)
                    .unwrap();
            }
        }
        image
    }

    #[test]
    fn object_points_run_along_rows() {
        let points = object_points(5, 4, 2.0).to_vec();
        assert_eq!(points.len(), 20);
        assert_eq!(points[0], Point3f::new(0.0, 0.0, 0.0));
        assert_eq!(points[1], Point3f::new(2.0, 0.0, 0.0));
        assert_eq!(points[4], Point3f::new(8.0, 0.0, 0.0));
        assert_eq!(points[5], Point3f::new(0.0, 2.0, 0.0));
        assert_eq!(points[19], Point3f::new(8.0, 6.0, 0.0));
        assert!(points.iter().all(|p| p.z == 0.0));
    }

    #[test]
    fn degenerate_patterns_are_rejected() {
        let cfg = PatternCfg {
            rows: 1,
            ..PatternCfg::default()
        };
        assert!(cfg.finalize().is_err());
        let cfg = PatternCfg {
            subsample: 0,
            ..PatternCfg::default()
        };
        assert!(cfg.finalize().is_err());
    }

    #[test]
    fn blank_image_has_no_pattern() {
        let detector = PatternCfg::default().finalize().unwrap();
        let image =
            Mat::new_rows_cols_with_default(1200, 1600, CV_8UC1, Scalar::all(128.0)).unwrap();
        assert!(detector.detect(&image).unwrap().is_none());
    }

    #[test]
    fn corners_are_found_at_full_resolution() {
        let detector = PatternCfg::default().finalize().unwrap();
        let corners = detector.detect(&synthetic_board()).unwrap().unwrap();
        assert_eq!(corners.len(), 20);

        for corner in corners.iter() {
            let near_grid = (1..6).any(|c| {
                (1..5).any(|r| {
                    let x = (BOARD_ORIGIN.0 + c * SQUARE) as f32;
                    let y = (BOARD_ORIGIN.1 + r * SQUARE) as f32;
                    (corner.x - x).abs() < 2.0 && (corner.y - y).abs() < 2.0
                })
            });
            assert!(near_grid, "corner {corner:?} is off the board grid");
        }
    }

    #[test]
    fn annotated_preview_is_scaled_color() {
        let detector = PatternCfg::default().finalize().unwrap();
        let board = synthetic_board();
        let corners = detector.detect(&board).unwrap();
        let preview = detector.annotate(&board, corners.as_ref(), 0.5).unwrap();
        assert_eq!(preview.cols(), 800);
        assert_eq!(preview.rows(), 600);
        assert_eq!(preview.channels(), 3);
    }
}
