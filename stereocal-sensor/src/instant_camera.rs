use std::{
    sync::Arc,
    thread::{self, JoinHandle},
};

use anyhow::{bail, Context, Result};
use crossbeam_channel::{Receiver, Sender};
use stereocal_core::{Camera, ImageSize};

use crate::{
    device::{CameraDevice, CameraParams, DeviceInfo, GrabError, GrabResult},
    events::{ConfigurationEventHandler, ImageEventHandler, RegistrationMode},
};

type ImageHandlers<I> = Vec<Box<dyn ImageEventHandler<I>>>;

enum Command {
    Trigger,
    Stop,
}

enum CameraState<D: CameraDevice> {
    Detached,
    Attached(D),
    Grabbing {
        commands: Sender<Command>,
        worker: JoinHandle<(D, ImageHandlers<D::Image>)>,
    },
}

/// Software triggered camera. Grabbing runs on a dedicated thread that
/// acquires one frame per trigger and hands it to the registered image event
/// handlers.
pub struct InstantCamera<D: CameraDevice> {
    info: Option<DeviceInfo>,
    image_size: ImageSize,
    params: CameraParams,
    configuration_handlers: Vec<Arc<dyn ConfigurationEventHandler>>,
    image_handlers: ImageHandlers<D::Image>,
    state: CameraState<D>,
}

impl<D: CameraDevice> Default for InstantCamera<D> {
    fn default() -> Self {
        Self {
            info: None,
            image_size: ImageSize::new(0, 0),
            params: CameraParams::default(),
            configuration_handlers: Vec::new(),
            image_handlers: Vec::new(),
            state: CameraState::Detached,
        }
    }
}

impl<D: CameraDevice> InstantCamera<D> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn device_info(&self) -> Option<&DeviceInfo> {
        self.info.as_ref()
    }

    pub fn is_grabbing(&self) -> bool {
        matches!(self.state, CameraState::Grabbing { .. })
    }

    pub fn set_params(&mut self, params: CameraParams) {
        self.params = params;
    }

    pub fn register_configuration(
        &mut self,
        handler: Arc<dyn ConfigurationEventHandler>,
        mode: RegistrationMode,
    ) -> Result<()> {
        if self.is_grabbing() {
            bail!("cannot register a configuration while grabbing");
        }
        if mode == RegistrationMode::ReplaceAll {
            self.configuration_handlers.clear();
        }
        self.configuration_handlers.push(handler);
        Ok(())
    }

    pub fn register_image_event_handler(
        &mut self,
        handler: Box<dyn ImageEventHandler<D::Image>>,
        mode: RegistrationMode,
    ) -> Result<()> {
        if self.is_grabbing() {
            bail!("cannot register an image event handler while grabbing");
        }
        if mode == RegistrationMode::ReplaceAll {
            self.image_handlers.clear();
        }
        self.image_handlers.push(handler);
        Ok(())
    }

    fn notify(&self, event: impl Fn(&dyn ConfigurationEventHandler, &DeviceInfo)) {
        if let Some(info) = &self.info {
            for handler in &self.configuration_handlers {
                event(handler.as_ref(), info);
            }
        }
    }

    pub fn attach(&mut self, device: D) -> Result<()> {
        if !matches!(self.state, CameraState::Detached) {
            bail!("a device is already attached");
        }
        self.info = Some(device.device_info().clone());
        self.image_size = device.image_size();
        self.notify(|h, info| h.on_attach(info));
        self.state = CameraState::Attached(device);
        self.notify(|h, info| h.on_attached(info));
        Ok(())
    }

    pub fn open(&mut self) -> Result<()> {
        let CameraState::Attached(device) = &mut self.state else {
            bail!("camera must be attached and idle to be opened");
        };
        if device.is_open() {
            return Ok(());
        }

        if let Some(info) = &self.info {
            for handler in &self.configuration_handlers {
                handler.on_open(info);
            }
        }
        device.open()?;
        device.apply_params(&self.params)?;
        self.image_size = device.image_size();
        self.notify(|h, info| h.on_opened(info));
        Ok(())
    }

    pub fn start_grabbing(&mut self) -> Result<()> {
        self.open()?;

        let CameraState::Attached(device) = std::mem::replace(&mut self.state, CameraState::Detached)
        else {
            bail!("camera is not attached");
        };
        let info = device.device_info().clone();

        self.notify(|h, info| h.on_grab_start(info));

        let (commands, command_receiver) = crossbeam_channel::unbounded();
        let image_handlers = std::mem::take(&mut self.image_handlers);
        let configuration_handlers = self.configuration_handlers.clone();
        let worker = thread::Builder::new()
            .name(format!("grab-{}", info.serial_number))
            .spawn(move || grab_loop(device, image_handlers, configuration_handlers, command_receiver))
            .context("failed to spawn grab thread")?;

        self.state = CameraState::Grabbing { commands, worker };
        self.notify(|h, info| h.on_grab_started(info));
        Ok(())
    }

    pub fn execute_software_trigger(&self) -> Result<()> {
        let CameraState::Grabbing { commands, .. } = &self.state else {
            bail!("camera is not grabbing");
        };
        commands
            .send(Command::Trigger)
            .context("grab thread has stopped")
    }

    pub fn stop_grabbing(&mut self) -> Result<()> {
        if !self.is_grabbing() {
            return Ok(());
        }
        self.notify(|h, info| h.on_grab_stop(info));

        let CameraState::Grabbing { commands, worker } =
            std::mem::replace(&mut self.state, CameraState::Detached)
        else {
            bail!("camera is not grabbing");
        };
        // the worker may already be gone after a panic, join reports it
        let _ = commands.send(Command::Stop);
        let Ok((device, image_handlers)) = worker.join() else {
            bail!("grab thread panicked");
        };

        self.image_handlers = image_handlers;
        self.state = CameraState::Attached(device);
        self.notify(|h, info| h.on_grab_stopped(info));
        Ok(())
    }

    pub fn close(&mut self) -> Result<()> {
        self.stop_grabbing()?;
        let is_open = matches!(&self.state, CameraState::Attached(device) if device.is_open());
        if !is_open {
            return Ok(());
        }

        self.notify(|h, info| h.on_close(info));
        if let CameraState::Attached(device) = &mut self.state {
            device.close()?;
        }
        self.notify(|h, info| h.on_closed(info));
        Ok(())
    }

    pub fn detach(&mut self) -> Option<D> {
        if self.is_grabbing() {
            if let Err(err) = self.stop_grabbing() {
                log::error!("failed to stop grabbing before detach: {err:#}");
            }
        }
        if !matches!(self.state, CameraState::Attached(_)) {
            return None;
        }
        self.notify(|h, info| h.on_detach(info));
        let CameraState::Attached(device) = std::mem::replace(&mut self.state, CameraState::Detached)
        else {
            return None;
        };
        self.notify(|h, info| h.on_detached(info));
        Some(device)
    }
}

impl<D: CameraDevice> Camera for InstantCamera<D> {
    fn rows(&self) -> usize {
        self.image_size.height
    }

    fn cols(&self) -> usize {
        self.image_size.width
    }
}

impl<D: CameraDevice> Drop for InstantCamera<D> {
    fn drop(&mut self) {
        if self.info.is_none() {
            return;
        }
        if let Err(err) = self.close() {
            log::error!("failed to close camera: {err:#}");
        }
        self.notify(|h, info| h.on_destroy(info));
        if let Some(mut device) = self.detach() {
            if device.is_open() {
                if let Err(err) = device.close() {
                    log::error!("failed to close device: {err:#}");
                }
            }
        }
        self.notify(|h, info| h.on_destroyed(info));
    }
}

fn grab_loop<D: CameraDevice>(
    mut device: D,
    mut image_handlers: ImageHandlers<D::Image>,
    configuration_handlers: Vec<Arc<dyn ConfigurationEventHandler>>,
    commands: Receiver<Command>,
) -> (D, ImageHandlers<D::Image>) {
    let info = device.device_info().clone();
    log::debug!("grab loop started for {}", info.serial_number);

    let mut stop = false;
    while !stop {
        let Ok(Command::Trigger) = commands.recv() else {
            break;
        };
        // triggers that piled up while the handlers were busy yield one frame
        let mut skipped = 0;
        for command in commands.try_iter() {
            match command {
                Command::Trigger => skipped += 1,
                Command::Stop => {
                    stop = true;
                    break;
                }
            }
        }
        if stop {
            break;
        }
        if skipped > 0 {
            for handler in image_handlers.iter_mut() {
                handler.on_images_skipped(&info, skipped);
            }
        }

        let result = device.grab();

        if let GrabResult::Failed(err) = &result {
            if *err == GrabError::DeviceRemoved {
                for handler in &configuration_handlers {
                    handler.on_camera_device_removed(&info);
                }
            }
            let message = err.to_string();
            for handler in &configuration_handlers {
                handler.on_grab_error(&info, &message);
            }
        }

        for handler in image_handlers.iter_mut() {
            handler.on_image_grabbed(&info, &result);
        }
    }

    log::debug!("grab loop stopped for {}", info.serial_number);
    (device, image_handlers)
}
