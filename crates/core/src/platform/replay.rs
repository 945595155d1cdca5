use std::path::{Path, PathBuf};
use std::time::Duration;

use super::Device;
use crate::error::DeviceError;
use crate::logger;
use crate::types::Frame;

/// Plays back the PNG screenshots of a folder in name order, wrapping
/// around. Inputs are only logged.
pub struct ReplayDevice {
    name: String,
    files: Vec<PathBuf>,
    cursor: usize,
}

impl ReplayDevice {
    pub fn open(dir: &Path) -> Result<Self, DeviceError> {
        let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|e| e.eq_ignore_ascii_case("png")))
            .collect();
        if files.is_empty() {
            return Err(DeviceError::Disconnected(format!("no screenshots in {}", dir.display())));
        }
        files.sort();
        Ok(Self { name: format!("replay:{}", dir.display()), files, cursor: 0 })
    }

    fn log(&self, what: &str) {
        logger::info_p("replay", &format!("{} (frame {})", what, self.cursor));
    }
}

impl Device for ReplayDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn capture(&mut self) -> Result<Frame, DeviceError> {
        let path = &self.files[self.cursor % self.files.len()];
        self.cursor = (self.cursor + 1) % self.files.len();
        let frame = image::open(path).map_err(|e| DeviceError::Decode(format!("{}: {}", path.display(), e)))?;
        Ok(frame.to_rgb8())
    }

    fn click(&mut self, x: i32, y: i32) -> Result<(), DeviceError> {
        self.log(&format!("click {}, {}", x, y));
        Ok(())
    }

    fn swipe(&mut self, from: (i32, i32), to: (i32, i32), duration: Duration) -> Result<(), DeviceError> {
        self.log(&format!("swipe {:?} -> {:?} over {:?}", from, to, duration));
        Ok(())
    }

    fn press_back(&mut self) -> Result<(), DeviceError> {
        self.log("back");
        Ok(())
    }

    fn press_home(&mut self) -> Result<(), DeviceError> {
        self.log("home");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn cycles_screenshots_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        Frame::from_pixel(3, 3, Rgb([2, 0, 0])).save(dir.path().join("b.png")).unwrap();
        Frame::from_pixel(3, 3, Rgb([1, 0, 0])).save(dir.path().join("a.png")).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let mut replay = ReplayDevice::open(dir.path()).unwrap();
        let shades: Vec<u8> = (0..3).map(|_| replay.capture().unwrap().get_pixel(0, 0)[0]).collect();
        assert_eq!(shades, vec![1, 2, 1]);
        replay.click(1, 1).unwrap();
    }

    #[test]
    fn empty_folder_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(ReplayDevice::open(dir.path()), Err(DeviceError::Disconnected(_))));
    }
}
