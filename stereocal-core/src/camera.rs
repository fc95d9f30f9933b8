use serde::{Deserialize, Serialize};

/// Number of cameras in the rig. Logical id 0 is the left camera.
pub const NUMBER_OF_CAMERAS: usize = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSize {
    pub width: usize,
    pub height: usize,
}

impl ImageSize {
    pub fn new(width: usize, height: usize) -> Self {
        Self { width, height }
    }
}

/// Region of valid pixels after rectification.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PixelRegion {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

pub trait Camera {
    fn rows(&self) -> usize;
    fn cols(&self) -> usize;

    fn image_size(&self) -> ImageSize {
        ImageSize::new(self.cols(), self.rows())
    }
}
