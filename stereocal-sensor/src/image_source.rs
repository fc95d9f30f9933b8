use std::sync::Arc;

use anyhow::{bail, Context, Result};
use crossbeam_channel::{Receiver, Sender};
use serde::Deserialize;
use stereocal_core::{Camera, ImageSize, StereoSource, NUMBER_OF_CAMERAS};

use crate::{
    device::{CameraDevice, CameraParams, DeviceInfo, FrameImage, GrabResult, TransportLayer},
    events::{
        ConfigurationEventPrinter, ImageEventHandler, ImageEventPrinter, RegistrationMode,
    },
    instant_camera::InstantCamera,
};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SourceCfg {
    /// Hardware id of the camera mounted on the right. Without it the
    /// enumeration order decides.
    pub right_camera_id: Option<String>,
    /// The left camera is mounted upside down.
    pub rotate_left_camera: bool,
    pub queue_capacity: usize,
    pub camera_params: CameraParams,
    /// Register the event printers on every camera.
    pub print_events: bool,
}

impl Default for SourceCfg {
    fn default() -> Self {
        Self {
            right_camera_id: None,
            rotate_left_camera: true,
            queue_capacity: 4,
            camera_params: CameraParams::default(),
            print_events: false,
        }
    }
}

/// Maps the first two enumerated devices to logical ids. The configured right
/// camera gets id 1, any other device id 0; a device whose id is already taken
/// falls back to the free one.
pub fn assign_logical_ids(
    devices: &[DeviceInfo],
    right_camera_id: Option<&str>,
) -> Vec<(usize, DeviceInfo)> {
    let mut taken = [false; NUMBER_OF_CAMERAS];
    let mut assigned = Vec::with_capacity(NUMBER_OF_CAMERAS);

    for info in devices.iter().take(NUMBER_OF_CAMERAS) {
        let preferred = if right_camera_id == Some(info.serial_number.as_str()) {
            1
        } else {
            0
        };
        let cam_id = if taken[preferred] {
            let free = 1 - preferred;
            log::warn!(
                "camera id {preferred} is already taken, using {free} for device {}",
                info.serial_number
            );
            free
        } else {
            preferred
        };
        taken[cam_id] = true;
        assigned.push((cam_id, info.clone()));
    }

    assigned
}

/// Pushes every successfully grabbed image, tagged with the logical id of its
/// camera, into the shared queue. Blocks while the queue is full.
pub struct QueueingImageHandler<I> {
    cam_id: usize,
    queue: Sender<(usize, I)>,
}

impl<I> QueueingImageHandler<I> {
    pub fn new(cam_id: usize, queue: Sender<(usize, I)>) -> Self {
        Self { cam_id, queue }
    }
}

impl<I: Clone + Send> ImageEventHandler<I> for QueueingImageHandler<I> {
    fn on_image_grabbed(&mut self, camera: &DeviceInfo, result: &GrabResult<I>) {
        match result {
            GrabResult::Succeeded(image) => {
                if self.queue.send((self.cam_id, image.clone())).is_err() {
                    log::debug!(
                        "image queue closed, dropping frame of {}",
                        camera.serial_number
                    );
                }
            }
            GrabResult::Failed(err) => {
                log::error!(
                    "camera {} ({}) failed to grab: {err}",
                    self.cam_id,
                    camera.serial_number
                );
            }
        }
    }
}

/// Two software triggered cameras feeding one bounded queue.
pub struct ImageSource<D: CameraDevice> {
    // dropped before the cameras so that grab threads blocked on a full
    // queue are released
    queue: Receiver<(usize, D::Image)>,
    // indexed by logical id
    cameras: Vec<InstantCamera<D>>,
    rotate_left_camera: bool,
}

impl<D> ImageSource<D>
where
    D: CameraDevice,
    D::Image: FrameImage + Clone,
{
    pub fn open<T>(transport: &T, cfg: &SourceCfg) -> Result<Self>
    where
        T: TransportLayer<Device = D>,
    {
        let devices = transport.enumerate_devices()?;
        for info in &devices {
            log::info!(
                "found device {} ({}, {})",
                info.serial_number,
                info.model_name,
                info.device_class
            );
        }
        if devices.len() < NUMBER_OF_CAMERAS {
            bail!(
                "found {} camera(s), the stereo rig needs {NUMBER_OF_CAMERAS}",
                devices.len()
            );
        }

        let (sender, queue) = crossbeam_channel::bounded(cfg.queue_capacity);
        let mut slots: [Option<InstantCamera<D>>; NUMBER_OF_CAMERAS] =
            std::array::from_fn(|_| None);

        for (cam_id, info) in assign_logical_ids(&devices, cfg.right_camera_id.as_deref()) {
            log::info!("using device {} as camera {cam_id}", info.serial_number);

            let mut camera = InstantCamera::new();
            camera.set_params(cfg.camera_params.clone());
            if cfg.print_events {
                camera.register_configuration(
                    Arc::new(ConfigurationEventPrinter),
                    RegistrationMode::Append,
                )?;
                camera.register_image_event_handler(
                    Box::new(ImageEventPrinter),
                    RegistrationMode::Append,
                )?;
            }
            camera.register_image_event_handler(
                Box::new(QueueingImageHandler::new(cam_id, sender.clone())),
                RegistrationMode::Append,
            )?;
            camera.attach(transport.create_device(&info)?)?;
            camera
                .start_grabbing()
                .with_context(|| format!("failed to start camera {}", info.serial_number))?;

            slots[cam_id] = Some(camera);
        }

        let cameras = slots
            .into_iter()
            .collect::<Option<Vec<_>>>()
            .context("a logical camera id was left unassigned")?;

        Ok(Self {
            queue,
            cameras,
            rotate_left_camera: cfg.rotate_left_camera,
        })
    }

    pub fn image_size(&self, cam_id: usize) -> Option<ImageSize> {
        self.cameras.get(cam_id).map(|camera| camera.image_size())
    }

    pub fn device_info(&self, cam_id: usize) -> Option<&DeviceInfo> {
        self.cameras.get(cam_id)?.device_info()
    }
}

impl<D> StereoSource<D::Image> for ImageSource<D>
where
    D: CameraDevice,
    D::Image: FrameImage + Clone,
{
    fn get_images(&mut self) -> Result<[D::Image; NUMBER_OF_CAMERAS]> {
        for camera in &self.cameras {
            camera.execute_software_trigger()?;
        }

        let mut images: [Option<D::Image>; NUMBER_OF_CAMERAS] = std::array::from_fn(|_| None);
        while images.iter().any(Option::is_none) {
            let (cam_id, image) = self
                .queue
                .recv()
                .context("every camera stopped delivering images")?;
            if images[cam_id].is_some() {
                log::debug!("replacing stale frame of camera {cam_id}");
            }
            images[cam_id] = Some(image);
        }
        log::trace!("{} frame(s) left in the queue", self.queue.len());

        let [Some(left), Some(right)] = images else {
            bail!("incomplete frame pair");
        };
        let left = if self.rotate_left_camera {
            left.rotate_180()?
        } else {
            left
        };

        Ok([left, right])
    }
}
