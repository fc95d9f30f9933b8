use anyhow::Result;
use opencv::{core::Mat, highgui};

/// Operator input recognised by the interactive loops.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Key {
    /// spacebar: capture the current observation, or leave the preview
    Accept,
    /// `x`: finish the capture session
    Abort,
}

impl Key {
    pub fn from_code(code: i32) -> Option<Self> {
        if code < 0 {
            return None;
        }
        match (code & 0xff) as u8 {
            b' ' => Some(Key::Accept),
            b'x' => Some(Key::Abort),
            _ => None,
        }
    }
}

pub trait Viewer {
    fn show(&mut self, window: &str, image: &Mat) -> Result<()>;

    /// Waits up to `delay_ms` for a key press.
    fn wait_key(&mut self, delay_ms: i32) -> Result<Option<Key>>;
}

#[derive(Default)]
pub struct HighGuiViewer;

impl Viewer for HighGuiViewer {
    fn show(&mut self, window: &str, image: &Mat) -> Result<()> {
        highgui::imshow(window, image)?;
        Ok(())
    }

    fn wait_key(&mut self, delay_ms: i32) -> Result<Option<Key>> {
        let code = highgui::wait_key(delay_ms)?;
        Ok(Key::from_code(code))
    }
}
