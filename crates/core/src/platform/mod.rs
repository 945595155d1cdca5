pub mod adb;
pub mod replay;
pub mod streaming;
pub mod stub;

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::DeviceError;
use crate::logger;
use crate::types::{Frame, Size};

pub use adb::AdbDevice;
pub use replay::ReplayDevice;
pub use streaming::{FrameSlot, StreamingDevice};
pub use stub::{DeviceCommand, StubDevice};

/// Capability set the engine drives: one screen to look at and the inputs
/// to poke it with. Coordinates are in capture pixels.
pub trait Device: Send {
    fn name(&self) -> &str;
    fn capture(&mut self) -> Result<Frame, DeviceError>;
    fn click(&mut self, x: i32, y: i32) -> Result<(), DeviceError>;
    fn swipe(&mut self, from: (i32, i32), to: (i32, i32), duration: Duration) -> Result<(), DeviceError>;

    // Mobile-only operations.

    fn open_app(&mut self, _package: &str) -> Result<(), DeviceError> {
        Err(DeviceError::Unsupported("open_app"))
    }

    fn close_app(&mut self, _package: &str) -> Result<(), DeviceError> {
        Err(DeviceError::Unsupported("close_app"))
    }

    fn press_back(&mut self) -> Result<(), DeviceError> {
        Err(DeviceError::Unsupported("press_back"))
    }

    fn press_home(&mut self) -> Result<(), DeviceError> {
        Err(DeviceError::Unsupported("press_home"))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Backend {
    /// Blank frames, inputs only logged.
    #[default]
    Stub,
    /// Cycle through the PNG screenshots of a folder.
    Replay { dir: PathBuf },
    /// A phone reachable through `adb`.
    Adb {
        #[serde(default)]
        serial: Option<String>,
        #[serde(default)]
        screenshot_size: Option<Size>,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceSettings {
    pub backend: Backend,
    /// Capture on a background thread at this rate instead of on demand.
    pub streaming_fps: Option<f64>,
}

/// Build the backend described by `settings`.
pub fn create_device(settings: &DeviceSettings) -> Result<Box<dyn Device>, DeviceError> {
    let device: Box<dyn Device> = match &settings.backend {
        Backend::Stub => Box::new(StubDevice::new(vec![])),
        Backend::Replay { dir } => Box::new(ReplayDevice::open(dir)?),
        Backend::Adb { serial, screenshot_size } => {
            Box::new(AdbDevice::connect(serial.clone(), *screenshot_size)?)
        }
    };
    logger::info_p("device", &format!("using {}", device.name()));
    match settings.streaming_fps {
        Some(fps) if fps > 0.0 => Ok(Box::new(StreamingDevice::new(device, fps))),
        _ => Ok(device),
    }
}
