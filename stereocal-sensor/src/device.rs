use anyhow::Result;
use serde::Deserialize;
use stereocal_core::ImageSize;

/// Identity of a camera as reported by the transport layer. The serial number
/// is the hardware identifier used to assign logical ids.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceInfo {
    pub serial_number: String,
    pub model_name: String,
    pub device_class: String,
}

/// Acquisition settings applied when a camera is opened. Unset values keep the
/// device's automatic behaviour.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct CameraParams {
    // microseconds
    pub exposure_time: Option<f64>,
    pub gain: Option<f64>,
    pub frame_rate: Option<f64>,
}

#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum GrabError {
    #[error("camera device has been removed")]
    DeviceRemoved,
    #[error("error {error_code:#x}: {description}")]
    Failed { error_code: u32, description: String },
}

pub enum GrabResult<I> {
    Succeeded(I),
    Failed(GrabError),
}

impl<I> GrabResult<I> {
    pub fn grab_succeeded(&self) -> bool {
        matches!(self, GrabResult::Succeeded(_))
    }

    pub fn image(&self) -> Option<&I> {
        match self {
            GrabResult::Succeeded(image) => Some(image),
            GrabResult::Failed(_) => None,
        }
    }
}

/// A physical camera. While grabbing, the device is owned by its grab thread.
pub trait CameraDevice: Send + 'static {
    type Image: Send + 'static;

    fn device_info(&self) -> &DeviceInfo;
    fn open(&mut self) -> Result<()>;
    fn is_open(&self) -> bool;
    fn apply_params(&mut self, params: &CameraParams) -> Result<()>;
    /// Acquires one frame. Called once per software trigger.
    fn grab(&mut self) -> GrabResult<Self::Image>;
    fn image_size(&self) -> ImageSize;
    fn close(&mut self) -> Result<()>;
}

pub trait TransportLayer {
    type Device: CameraDevice;

    fn enumerate_devices(&self) -> Result<Vec<DeviceInfo>>;
    fn create_device(&self, info: &DeviceInfo) -> Result<Self::Device>;
}

/// Image operations the acquisition layer needs from a frame type.
pub trait FrameImage: Sized {
    fn width(&self) -> usize;
    fn height(&self) -> usize;
    fn rotate_180(&self) -> Result<Self>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grab_error_messages() {
        assert_eq!(
            GrabError::DeviceRemoved.to_string(),
            "camera device has been removed"
        );
        let err = GrabError::Failed {
            error_code: 0xe1000014,
            description: "buffer incomplete".to_string(),
        };
        assert_eq!(err.to_string(), "error 0xe1000014: buffer incomplete");

        // converts into the anyhow errors the rest of the crate propagates
        let err: anyhow::Error = GrabError::DeviceRemoved.into();
        assert!(err.downcast_ref::<GrabError>().is_some());
    }
}
