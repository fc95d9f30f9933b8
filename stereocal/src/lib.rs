//! Calibration algorithms for a two camera rig: chessboard capture, intrinsic
//! and stereo solves, rectification and the disparity preview.

pub mod calibration;
pub mod chessboard;
pub mod convert;
pub mod disparity;
pub mod observation;
pub mod rectification;
pub mod viewer;

pub use calibration::{CalibrationCfg, Calibrator};
pub use disparity::{DisparityCfg, DisparityPreview};
pub use rectification::StereoRig;
pub use viewer::{HighGuiViewer, Key, Viewer};
