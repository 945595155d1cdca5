use std::process::Command;
use std::time::Duration;

use image::imageops::{self, FilterType};
use image::ImageFormat;

use super::Device;
use crate::error::DeviceError;
use crate::logger;
use crate::types::{Frame, Point, Size};

/// Shortest swipe the device reliably registers.
const MIN_SWIPE: Duration = Duration::from_millis(500);

/// Android device driven through the `adb` command-line tool.
///
/// Captures are resized to `screenshot_size` (when set) so configs recorded
/// at one resolution work on another; input coordinates are scaled back to
/// the device's native resolution.
pub struct AdbDevice {
    name: String,
    serial: Option<String>,
    native: Size,
    capture_size: Size,
}

impl AdbDevice {
    pub fn connect(serial: Option<String>, screenshot_size: Option<Size>) -> Result<Self, DeviceError> {
        // Network devices ("10.0.0.5:5555") need an explicit connect first.
        if let Some(s) = serial.as_deref().filter(|s| !s.chars().all(char::is_alphanumeric)) {
            run_adb(None, &["connect", s])?;
        }
        let mut device = Self {
            name: format!("adb:{}", serial.as_deref().unwrap_or("default")),
            serial,
            native: Size::new(0, 0),
            capture_size: Size::new(0, 0),
        };
        device.recompute_size()?;
        device.capture_size = screenshot_size.unwrap_or(device.native);
        logger::info_p(
            "device",
            &format!("{} native {} capture {}", device.name, device.native, device.capture_size),
        );
        Ok(device)
    }

    /// Serials of the attached devices in the `device` state.
    pub fn devices() -> Result<Vec<String>, DeviceError> {
        let out = run_adb(None, &["devices"])?;
        Ok(parse_devices(&String::from_utf8_lossy(&out)))
    }

    /// Re-read the native resolution, e.g. after a rotation.
    pub fn recompute_size(&mut self) -> Result<(), DeviceError> {
        self.native = Size::of(&self.capture_raw()?);
        Ok(())
    }

    fn adb(&self, args: &[&str]) -> Result<Vec<u8>, DeviceError> {
        run_adb(self.serial.as_deref(), args)
    }

    fn shell(&self, args: &[&str]) -> Result<(), DeviceError> {
        let mut full = vec!["shell"];
        full.extend_from_slice(args);
        self.adb(&full).map(|_| ())
    }

    fn capture_raw(&self) -> Result<Frame, DeviceError> {
        let png = self.adb(&["exec-out", "screencap", "-p"])?;
        let image = image::load_from_memory_with_format(&png, ImageFormat::Png)
            .map_err(|e| DeviceError::Decode(e.to_string()))?;
        Ok(image.to_rgb8())
    }

    fn to_native(&self, (x, y): (i32, i32)) -> (i32, i32) {
        let p = Point::new(x as f64, y as f64).rescale(self.capture_size, self.native);
        (p.x as i32, p.y as i32)
    }
}

fn run_adb(serial: Option<&str>, args: &[&str]) -> Result<Vec<u8>, DeviceError> {
    let mut cmd = Command::new("adb");
    if let Some(serial) = serial {
        cmd.args(["-s", serial]);
    }
    cmd.args(args);
    logger::debug_p("device", &format!("adb {}", args.join(" ")));
    let out = cmd.output()?;
    if !out.status.success() {
        return Err(DeviceError::Command {
            command: format!("adb {}", args.join(" ")),
            message: String::from_utf8_lossy(&out.stderr).trim().to_string(),
        });
    }
    Ok(out.stdout)
}

/// Serials from `adb devices` output.
pub fn parse_devices(listing: &str) -> Vec<String> {
    listing
        .lines()
        .filter_map(|line| line.strip_suffix("\tdevice"))
        .map(str::to_string)
        .collect()
}

impl Device for AdbDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn capture(&mut self) -> Result<Frame, DeviceError> {
        let frame = self.capture_raw()?;
        if Size::of(&frame) == self.capture_size {
            return Ok(frame);
        }
        Ok(imageops::resize(&frame, self.capture_size.w, self.capture_size.h, FilterType::Triangle))
    }

    fn click(&mut self, x: i32, y: i32) -> Result<(), DeviceError> {
        let (x, y) = self.to_native((x, y));
        self.shell(&["input", "touchscreen", "tap", &x.to_string(), &y.to_string()])
    }

    fn swipe(&mut self, from: (i32, i32), to: (i32, i32), duration: Duration) -> Result<(), DeviceError> {
        let (x1, y1) = self.to_native(from);
        let (x2, y2) = self.to_native(to);
        let ms = duration.max(MIN_SWIPE).as_millis().to_string();
        self.shell(&[
            "input",
            "touchscreen",
            "swipe",
            &x1.to_string(),
            &y1.to_string(),
            &x2.to_string(),
            &y2.to_string(),
            &ms,
        ])
    }

    fn open_app(&mut self, package: &str) -> Result<(), DeviceError> {
        self.shell(&["monkey", "-p", package, "1"])
    }

    fn close_app(&mut self, package: &str) -> Result<(), DeviceError> {
        self.press_home()?;
        self.shell(&["am", "force-stop", package])
    }

    fn press_back(&mut self) -> Result<(), DeviceError> {
        self.shell(&["input", "keyevent", "KEYCODE_BACK"])
    }

    fn press_home(&mut self) -> Result<(), DeviceError> {
        self.shell(&["input", "keyevent", "KEYCODE_HOME"])
    }
}
