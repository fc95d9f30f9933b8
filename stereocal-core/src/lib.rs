mod source;
pub use source::*;
mod camera;
pub use camera::*;
pub mod export;
pub mod matrix;
pub mod stereo_config;

pub use sophus::nalgebra;
use sophus::nalgebra::{Matrix3, Matrix3x4, Matrix4, Vector3, Vector4};

pub type Real = f64;
pub type CameraMatrix = Matrix3<Real>;
pub type DistortionCoefficients = Vector4<Real>;
pub type RotationMatrix = Matrix3<Real>;
pub type TranslationVector = Vector3<Real>;
pub type ProjectionMatrix = Matrix3x4<Real>;
pub type DisparityToDepthMatrix = Matrix4<Real>;
