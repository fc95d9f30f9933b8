//! Callback interfaces a camera notifies about its lifecycle and about
//! grabbed images. Every configuration callback defaults to a no-op.

use crate::device::{DeviceInfo, FrameImage, GrabError, GrabResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegistrationMode {
    Append,
    ReplaceAll,
}

pub trait ConfigurationEventHandler: Send + Sync {
    fn on_attach(&self, _camera: &DeviceInfo) {}
    fn on_attached(&self, _camera: &DeviceInfo) {}
    fn on_open(&self, _camera: &DeviceInfo) {}
    fn on_opened(&self, _camera: &DeviceInfo) {}
    fn on_grab_start(&self, _camera: &DeviceInfo) {}
    fn on_grab_started(&self, _camera: &DeviceInfo) {}
    fn on_grab_stop(&self, _camera: &DeviceInfo) {}
    fn on_grab_stopped(&self, _camera: &DeviceInfo) {}
    fn on_close(&self, _camera: &DeviceInfo) {}
    fn on_closed(&self, _camera: &DeviceInfo) {}
    fn on_destroy(&self, _camera: &DeviceInfo) {}
    fn on_destroyed(&self, _camera: &DeviceInfo) {}
    fn on_detach(&self, _camera: &DeviceInfo) {}
    fn on_detached(&self, _camera: &DeviceInfo) {}
    fn on_grab_error(&self, _camera: &DeviceInfo, _message: &str) {}
    fn on_camera_device_removed(&self, _camera: &DeviceInfo) {}
}

/// Called from the camera's grab thread for every triggered frame.
pub trait ImageEventHandler<I>: Send {
    fn on_image_grabbed(&mut self, camera: &DeviceInfo, result: &GrabResult<I>);

    /// Triggers received while the handlers were busy were merged into one.
    fn on_images_skipped(&mut self, _camera: &DeviceInfo, _count: usize) {}
}

pub struct ConfigurationEventPrinter;

impl ConfigurationEventHandler for ConfigurationEventPrinter {
    fn on_attach(&self, _camera: &DeviceInfo) {
        log::info!("OnAttach event");
    }

    fn on_attached(&self, camera: &DeviceInfo) {
        log::info!("OnAttached event for device {}", camera.model_name);
    }

    fn on_open(&self, camera: &DeviceInfo) {
        log::info!("OnOpen event for device {}", camera.model_name);
    }

    fn on_opened(&self, camera: &DeviceInfo) {
        log::info!("OnOpened event for device {}", camera.model_name);
    }

    fn on_grab_start(&self, camera: &DeviceInfo) {
        log::info!("OnGrabStart event for device {}", camera.model_name);
    }

    fn on_grab_started(&self, camera: &DeviceInfo) {
        log::info!("OnGrabStarted event for device {}", camera.model_name);
    }

    fn on_grab_stop(&self, camera: &DeviceInfo) {
        log::info!("OnGrabStop event for device {}", camera.model_name);
    }

    fn on_grab_stopped(&self, camera: &DeviceInfo) {
        log::info!("OnGrabStopped event for device {}", camera.model_name);
    }

    fn on_close(&self, camera: &DeviceInfo) {
        log::info!("OnClose event for device {}", camera.model_name);
    }

    fn on_closed(&self, camera: &DeviceInfo) {
        log::info!("OnClosed event for device {}", camera.model_name);
    }

    fn on_destroy(&self, camera: &DeviceInfo) {
        log::info!("OnDestroy event for device {}", camera.model_name);
    }

    fn on_destroyed(&self, _camera: &DeviceInfo) {
        log::info!("OnDestroyed event");
    }

    fn on_detach(&self, camera: &DeviceInfo) {
        log::info!("OnDetach event for device {}", camera.model_name);
    }

    fn on_detached(&self, camera: &DeviceInfo) {
        log::info!("OnDetached event for device {}", camera.model_name);
    }

    fn on_grab_error(&self, camera: &DeviceInfo, message: &str) {
        log::error!(
            "OnGrabError event for device {}: {message}",
            camera.model_name
        );
    }

    fn on_camera_device_removed(&self, camera: &DeviceInfo) {
        log::warn!(
            "OnCameraDeviceRemoved event for device {}",
            camera.model_name
        );
    }
}

pub struct ImageEventPrinter;

impl<I: FrameImage> ImageEventHandler<I> for ImageEventPrinter {
    fn on_image_grabbed(&mut self, camera: &DeviceInfo, result: &GrabResult<I>) {
        match result {
            GrabResult::Succeeded(image) => log::debug!(
                "OnImageGrabbed event for device {}: {}x{}",
                camera.model_name,
                image.width(),
                image.height()
            ),
            GrabResult::Failed(GrabError::DeviceRemoved) => log::error!(
                "OnImageGrabbed event for device {}: device removed",
                camera.model_name
            ),
            GrabResult::Failed(err) => log::error!(
                "OnImageGrabbed event for device {}: {err}",
                camera.model_name
            ),
        }
    }

    fn on_images_skipped(&mut self, camera: &DeviceInfo, count: usize) {
        log::warn!(
            "OnImagesSkipped event for device {}: {count} image(s) skipped",
            camera.model_name
        );
    }
}
