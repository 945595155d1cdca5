use std::time::Duration;

use image::Rgb;

use super::Device;
use crate::error::DeviceError;
use crate::logger;
use crate::types::Frame;

/// One input the stub received.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceCommand {
    Click { x: i32, y: i32 },
    Swipe { from: (i32, i32), to: (i32, i32), duration: Duration },
    OpenApp(String),
    CloseApp(String),
    Back,
    Home,
}

type Script = Box<dyn FnMut(&[DeviceCommand]) -> Frame + Send>;

enum Frames {
    /// Played in order; the last one repeats.
    Scripted { frames: Vec<Frame>, cursor: usize },
    /// Computed from the inputs received so far.
    Reactive(Script),
}

/// Hardware-free device: scripted captures, recorded inputs. Dry runs use it
/// with no frames (a blank portrait screen).
pub struct StubDevice {
    name: String,
    frames: Frames,
    commands: Vec<DeviceCommand>,
    failures: usize,
}

impl StubDevice {
    pub fn new(frames: Vec<Frame>) -> Self {
        Self {
            name: "stub".into(),
            frames: Frames::Scripted { frames, cursor: 0 },
            commands: Vec::new(),
            failures: 0,
        }
    }

    /// Each capture calls `script` with every input recorded so far.
    pub fn reactive(script: impl FnMut(&[DeviceCommand]) -> Frame + Send + 'static) -> Self {
        Self { frames: Frames::Reactive(Box::new(script)), ..Self::new(vec![]) }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn push_frame(&mut self, frame: Frame) {
        if let Frames::Scripted { frames, .. } = &mut self.frames {
            frames.push(frame);
        }
    }

    /// Make the next `n` operations fail with a transient command error.
    pub fn fail_next(&mut self, n: usize) {
        self.failures = n;
    }

    pub fn commands(&self) -> &[DeviceCommand] {
        &self.commands
    }

    pub fn take_commands(&mut self) -> Vec<DeviceCommand> {
        std::mem::take(&mut self.commands)
    }

    pub fn clicks(&self) -> Vec<(i32, i32)> {
        self.commands
            .iter()
            .filter_map(|c| match c {
                DeviceCommand::Click { x, y } => Some((*x, *y)),
                _ => None,
            })
            .collect()
    }

    fn glitch(&mut self, op: &str) -> Result<(), DeviceError> {
        if self.failures > 0 {
            self.failures -= 1;
            return Err(DeviceError::Command { command: op.into(), message: "scripted failure".into() });
        }
        Ok(())
    }

    fn record(&mut self, op: &str, cmd: DeviceCommand) -> Result<(), DeviceError> {
        self.glitch(op)?;
        logger::debug_p("stub", &format!("{}: {:?}", self.name, cmd));
        self.commands.push(cmd);
        Ok(())
    }
}

impl Device for StubDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn capture(&mut self) -> Result<Frame, DeviceError> {
        self.glitch("capture")?;
        match &mut self.frames {
            Frames::Reactive(script) => Ok(script(&self.commands)),
            Frames::Scripted { frames, cursor } => match frames.get(*cursor) {
                Some(frame) => {
                    let frame = frame.clone();
                    if *cursor + 1 < frames.len() {
                        *cursor += 1;
                    }
                    Ok(frame)
                }
                None => Ok(Frame::from_pixel(1080, 1920, Rgb([0, 0, 0]))),
            },
        }
    }

    fn click(&mut self, x: i32, y: i32) -> Result<(), DeviceError> {
        self.record("click", DeviceCommand::Click { x, y })
    }

    fn swipe(&mut self, from: (i32, i32), to: (i32, i32), duration: Duration) -> Result<(), DeviceError> {
        self.record("swipe", DeviceCommand::Swipe { from, to, duration })
    }

    fn open_app(&mut self, package: &str) -> Result<(), DeviceError> {
        self.record("open_app", DeviceCommand::OpenApp(package.into()))
    }

    fn close_app(&mut self, package: &str) -> Result<(), DeviceError> {
        self.record("close_app", DeviceCommand::CloseApp(package.into()))
    }

    fn press_back(&mut self) -> Result<(), DeviceError> {
        self.record("press_back", DeviceCommand::Back)
    }

    fn press_home(&mut self) -> Result<(), DeviceError> {
        self.record("press_home", DeviceCommand::Home)
    }
}
