//! Camera acquisition for the stereo rig: device abstraction, per camera grab
//! threads driven by software triggers and the paired image source.

pub mod device;
pub mod events;
pub mod image_source;
pub mod instant_camera;
pub mod opencv_camera;

pub use device::*;
pub use events::*;
pub use image_source::{ImageSource, SourceCfg};
pub use instant_camera::InstantCamera;
pub use opencv_camera::{OpenCvCamera, OpenCvTransportLayer};

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;

    use anyhow::{bail, Result};
    use stereocal_core::ImageSize;

    use crate::device::{
        CameraDevice, CameraParams, DeviceInfo, FrameImage, GrabError, GrabResult, TransportLayer,
    };

    #[derive(Clone, Debug, PartialEq)]
    pub struct TestFrame {
        pub serial: String,
        pub sequence: u32,
        pub pixels: Vec<u8>,
    }

    impl TestFrame {
        pub const PIXELS: [u8; 4] = [1, 2, 3, 4];

        pub fn new(serial: &str, sequence: u32) -> Self {
            Self {
                serial: serial.to_string(),
                sequence,
                pixels: Self::PIXELS.to_vec(),
            }
        }
    }

    impl FrameImage for TestFrame {
        fn width(&self) -> usize {
            2
        }

        fn height(&self) -> usize {
            2
        }

        fn rotate_180(&self) -> Result<Self> {
            let mut rotated = self.clone();
            rotated.pixels.reverse();
            Ok(rotated)
        }
    }

    pub struct FakeDevice {
        info: DeviceInfo,
        open: bool,
        sequence: u32,
        failures: VecDeque<GrabError>,
    }

    impl FakeDevice {
        pub fn new(serial: &str) -> Self {
            Self {
                info: DeviceInfo {
                    serial_number: serial.to_string(),
                    model_name: String::from("fake"),
                    device_class: String::from("test"),
                },
                open: false,
                sequence: 0,
                failures: VecDeque::new(),
            }
        }

        /// The next grabs fail with these errors, in order.
        pub fn failing_with(mut self, failures: Vec<GrabError>) -> Self {
            self.failures = failures.into();
            self
        }
    }

    impl CameraDevice for FakeDevice {
        type Image = TestFrame;

        fn device_info(&self) -> &DeviceInfo {
            &self.info
        }

        fn open(&mut self) -> Result<()> {
            self.open = true;
            Ok(())
        }

        fn is_open(&self) -> bool {
            self.open
        }

        fn apply_params(&mut self, _params: &CameraParams) -> Result<()> {
            Ok(())
        }

        fn grab(&mut self) -> GrabResult<TestFrame> {
            if let Some(err) = self.failures.pop_front() {
                return GrabResult::Failed(err);
            }
            let frame = TestFrame::new(&self.info.serial_number, self.sequence);
            self.sequence += 1;
            GrabResult::Succeeded(frame)
        }

        fn image_size(&self) -> ImageSize {
            if self.open {
                ImageSize::new(16, 12)
            } else {
                ImageSize::new(0, 0)
            }
        }

        fn close(&mut self) -> Result<()> {
            self.open = false;
            Ok(())
        }
    }

    pub struct FakeTransport {
        serials: Vec<String>,
    }

    impl FakeTransport {
        pub fn new(serials: &[&str]) -> Self {
            Self {
                serials: serials.iter().map(|s| s.to_string()).collect(),
            }
        }
    }

    impl TransportLayer for FakeTransport {
        type Device = FakeDevice;

        fn enumerate_devices(&self) -> Result<Vec<DeviceInfo>> {
            Ok(self
                .serials
                .iter()
                .map(|serial| FakeDevice::new(serial).info)
                .collect())
        }

        fn create_device(&self, info: &DeviceInfo) -> Result<FakeDevice> {
            if !self.serials.contains(&info.serial_number) {
                bail!("no device with serial {}", info.serial_number);
            }
            Ok(FakeDevice::new(&info.serial_number))
        }
    }
}
