//! Camera backend on top of OpenCV's video capture. Devices are addressed by
//! their capture index, which doubles as their hardware id.

use anyhow::{bail, Context, Result};
use opencv::{
    core::{self, Mat},
    imgproc,
    prelude::*,
    videoio::{self, VideoCapture},
};
use stereocal_core::ImageSize;

use crate::device::{
    CameraDevice, CameraParams, DeviceInfo, FrameImage, GrabError, GrabResult, TransportLayer,
};

const DEVICE_CLASS: &str = "VideoCapture";

pub struct OpenCvTransportLayer {
    pub max_devices_probed: i32,
    pub api_preference: i32,
}

impl Default for OpenCvTransportLayer {
    fn default() -> Self {
        Self {
            max_devices_probed: 8,
            api_preference: videoio::CAP_ANY,
        }
    }
}

impl TransportLayer for OpenCvTransportLayer {
    type Device = OpenCvCamera;

    fn enumerate_devices(&self) -> Result<Vec<DeviceInfo>> {
        let mut devices = vec![];
        for index in 0..self.max_devices_probed {
            let mut capture = VideoCapture::new(index, self.api_preference)?;
            if !capture.is_opened()? {
                continue;
            }
            devices.push(DeviceInfo {
                serial_number: index.to_string(),
                model_name: capture.get_backend_name()?,
                device_class: String::from(DEVICE_CLASS),
            });
            capture.release()?;
        }
        log::debug!("probed {} capture indices", self.max_devices_probed);
        Ok(devices)
    }

    fn create_device(&self, info: &DeviceInfo) -> Result<OpenCvCamera> {
        let index = info
            .serial_number
            .parse()
            .with_context(|| format!("{} is not a capture index", info.serial_number))?;
        Ok(OpenCvCamera {
            info: info.clone(),
            index,
            api_preference: self.api_preference,
            capture: None,
        })
    }
}

pub struct OpenCvCamera {
    info: DeviceInfo,
    index: i32,
    api_preference: i32,
    capture: Option<VideoCapture>,
}

impl OpenCvCamera {
    fn set_property(capture: &mut VideoCapture, property: i32, value: Option<f64>) -> Result<()> {
        if let Some(value) = value {
            if !capture.set(property, value)? {
                log::warn!("capture property {property} was not accepted ({value})");
            }
        }
        Ok(())
    }

    fn read_frame(capture: &mut VideoCapture) -> Result<Option<Mat>, GrabError> {
        let mut frame = Mat::default();
        let grabbed = capture.read(&mut frame).map_err(opencv_grab_error)?;
        if !grabbed || frame.empty() {
            return Ok(None);
        }
        if frame.channels() == 1 {
            return Ok(Some(frame));
        }

        let mut gray = Mat::default();
        imgproc::cvt_color(&frame, &mut gray, imgproc::COLOR_BGR2GRAY, 0)
            .map_err(opencv_grab_error)?;
        Ok(Some(gray))
    }
}

fn opencv_grab_error(err: opencv::Error) -> GrabError {
    GrabError::Failed {
        error_code: err.code as u32,
        description: err.message,
    }
}

impl CameraDevice for OpenCvCamera {
    type Image = Mat;

    fn device_info(&self) -> &DeviceInfo {
        &self.info
    }

    fn open(&mut self) -> Result<()> {
        let capture = VideoCapture::new(self.index, self.api_preference)?;
        if !capture.is_opened()? {
            bail!("failed to open capture device {}", self.index);
        }
        self.capture = Some(capture);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.capture
            .as_ref()
            .is_some_and(|capture| capture.is_opened().unwrap_or(false))
    }

    fn apply_params(&mut self, params: &CameraParams) -> Result<()> {
        let capture = self.capture.as_mut().context("camera is not open")?;
        Self::set_property(capture, videoio::CAP_PROP_EXPOSURE, params.exposure_time)?;
        Self::set_property(capture, videoio::CAP_PROP_GAIN, params.gain)?;
        Self::set_property(capture, videoio::CAP_PROP_FPS, params.frame_rate)?;
        Ok(())
    }

    fn grab(&mut self) -> GrabResult<Mat> {
        let Some(capture) = self.capture.as_mut() else {
            return GrabResult::Failed(GrabError::DeviceRemoved);
        };
        match Self::read_frame(capture) {
            Ok(Some(frame)) => GrabResult::Succeeded(frame),
            Ok(None) if !capture.is_opened().unwrap_or(false) => {
                GrabResult::Failed(GrabError::DeviceRemoved)
            }
            Ok(None) => GrabResult::Failed(GrabError::Failed {
                error_code: 0,
                description: String::from("no frame delivered"),
            }),
            Err(err) => GrabResult::Failed(err),
        }
    }

    fn image_size(&self) -> ImageSize {
        let Some(capture) = &self.capture else {
            return ImageSize::new(0, 0);
        };
        let width = capture.get(videoio::CAP_PROP_FRAME_WIDTH).unwrap_or(0.0);
        let height = capture.get(videoio::CAP_PROP_FRAME_HEIGHT).unwrap_or(0.0);
        ImageSize::new(width as usize, height as usize)
    }

    fn close(&mut self) -> Result<()> {
        if let Some(mut capture) = self.capture.take() {
            capture.release()?;
        }
        Ok(())
    }
}

impl FrameImage for Mat {
    fn width(&self) -> usize {
        self.cols() as usize
    }

    fn height(&self) -> usize {
        self.rows() as usize
    }

    fn rotate_180(&self) -> Result<Self> {
        let mut rotated = Mat::default();
        core::flip(self, &mut rotated, -1)?;
        Ok(rotated)
    }
}
