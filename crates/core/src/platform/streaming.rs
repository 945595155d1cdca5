use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::Device;
use crate::error::DeviceError;
use crate::logger;
use crate::types::Frame;

/// Longest a reader waits for the first frame.
const FIRST_FRAME_WAIT: Duration = Duration::from_secs(5);

/// Single-slot latest-frame buffer. Publishing replaces whatever was there;
/// readers block until at least one frame has arrived.
#[derive(Default)]
pub struct FrameSlot {
    slot: Mutex<Option<(u64, Arc<Frame>)>>,
    ready: Condvar,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, frame: Frame) {
        let Ok(mut slot) = self.slot.lock() else { return };
        let seq = slot.as_ref().map_or(0, |(n, _)| n + 1);
        *slot = Some((seq, Arc::new(frame)));
        self.ready.notify_all();
    }

    /// Most recent frame and its sequence number, waiting up to `timeout`
    /// for the first one.
    pub fn latest(&self, timeout: Duration) -> Option<(u64, Arc<Frame>)> {
        let slot = self.slot.lock().ok()?;
        let (slot, _) = self.ready.wait_timeout_while(slot, timeout, |s| s.is_none()).ok()?;
        slot.clone()
    }
}

/// Wraps a backend with a producer thread that keeps `FrameSlot` filled at
/// `fps`. Captures read the slot; inputs go straight to the backend.
pub struct StreamingDevice {
    name: String,
    inner: Arc<Mutex<Box<dyn Device>>>,
    slot: Arc<FrameSlot>,
    running: Arc<AtomicBool>,
    producer: Option<JoinHandle<()>>,
}

impl StreamingDevice {
    pub fn new(inner: Box<dyn Device>, fps: f64) -> Self {
        let name = format!("streaming:{}", inner.name());
        let inner = Arc::new(Mutex::new(inner));
        let slot = Arc::new(FrameSlot::new());
        let running = Arc::new(AtomicBool::new(true));
        let period = Duration::from_secs_f64(1.0 / fps.max(0.1));

        let producer = {
            let (inner, slot, running) = (Arc::clone(&inner), Arc::clone(&slot), Arc::clone(&running));
            thread::spawn(move || produce(inner, slot, running, period))
        };
        Self { name, inner, slot, running, producer: Some(producer) }
    }

    pub fn slot(&self) -> &FrameSlot {
        &self.slot
    }

    fn with_inner<T>(&self, f: impl FnOnce(&mut dyn Device) -> Result<T, DeviceError>) -> Result<T, DeviceError> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| DeviceError::Disconnected("capture thread panicked".into()))?;
        f(inner.as_mut())
    }
}

fn produce(inner: Arc<Mutex<Box<dyn Device>>>, slot: Arc<FrameSlot>, running: Arc<AtomicBool>, period: Duration) {
    while running.load(Ordering::SeqCst) {
        let frame = match inner.lock() {
            Ok(mut device) => device.capture(),
            Err(_) => return,
        };
        match frame {
            Ok(frame) => slot.publish(frame),
            Err(e) => logger::warn_p("device", &format!("stream capture failed: {}", e)),
        }
        thread::sleep(period);
    }
}

impl Drop for StreamingDevice {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.producer.take() {
            handle.join().ok();
        }
    }
}

impl Device for StreamingDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn capture(&mut self) -> Result<Frame, DeviceError> {
        match self.slot.latest(FIRST_FRAME_WAIT) {
            Some((_, frame)) => Ok(frame.as_ref().clone()),
            None => Err(DeviceError::Command {
                command: "capture".into(),
                message: format!("no frame within {:?}", FIRST_FRAME_WAIT),
            }),
        }
    }

    fn click(&mut self, x: i32, y: i32) -> Result<(), DeviceError> {
        self.with_inner(|d| d.click(x, y))
    }

    fn swipe(&mut self, from: (i32, i32), to: (i32, i32), duration: Duration) -> Result<(), DeviceError> {
        self.with_inner(|d| d.swipe(from, to, duration))
    }

    fn open_app(&mut self, package: &str) -> Result<(), DeviceError> {
        self.with_inner(|d| d.open_app(package))
    }

    fn close_app(&mut self, package: &str) -> Result<(), DeviceError> {
        self.with_inner(|d| d.close_app(package))
    }

    fn press_back(&mut self) -> Result<(), DeviceError> {
        self.with_inner(|d| d.press_back())
    }

    fn press_home(&mut self) -> Result<(), DeviceError> {
        self.with_inner(|d| d.press_home())
    }
}
