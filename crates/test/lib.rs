//! Synthetic screens and on-disk config fixtures for the scenario harness.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::Rgb;
use tapchain_core::clock::ManualClock;
use tapchain_core::config::{Config, Document};
use tapchain_core::detect::Detector;
use tapchain_core::executor::Executor;
use tapchain_core::settings::Settings;
use tapchain_core::types::Frame;
use tapchain_core::vision::Vision;

pub const BACKGROUND: Rgb<u8> = Rgb([40, 40, 40]);

/// Deterministic texture; distinct seeds give patterns that do not match
/// each other.
pub fn texture(w: u32, h: u32, seed: u32) -> Frame {
    let mut s = seed.wrapping_mul(2246822519).max(1);
    Frame::from_fn(w, h, |_, _| {
        s ^= s << 13;
        s ^= s >> 17;
        s ^= s << 5;
        Rgb([(s >> 3) as u8, (s >> 11) as u8, (s >> 19) as u8])
    })
}

/// Flat screen with patterns pasted at their top-left corners.
pub struct Screen {
    frame: Frame,
}

impl Screen {
    pub fn new(w: u32, h: u32) -> Self {
        Self { frame: Frame::from_pixel(w, h, BACKGROUND) }
    }

    pub fn with(mut self, pattern: &Frame, x: i64, y: i64) -> Self {
        image::imageops::replace(&mut self.frame, pattern, x, y);
        self
    }

    /// Paste `pattern` so that its centre lands on `(cx, cy)`.
    pub fn centred(self, pattern: &Frame, cx: i64, cy: i64) -> Self {
        let (w, h) = (pattern.width() as i64, pattern.height() as i64);
        self.with(pattern, cx - w / 2, cy - h / 2)
    }

    pub fn build(self) -> Frame {
        self.frame
    }
}

/// A configs root in a temp folder with one named config in it.
pub struct Fixture {
    dir: tempfile::TempDir,
    name: String,
}

impl Fixture {
    pub fn new(name: &str) -> std::io::Result<Self> {
        let dir = tempfile::tempdir()?;
        std::fs::create_dir_all(dir.path().join(name))?;
        Ok(Self { dir, name: name.to_string() })
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn folder(&self) -> PathBuf {
        self.dir.path().join(&self.name)
    }

    /// Write a pattern image into the config folder.
    pub fn pattern(&self, file: &str, image: &Frame) -> image::ImageResult<()> {
        image.save(self.folder().join(file))
    }

    /// Write `doc` as the config document.
    pub fn document(&self, doc: &Document) -> tapchain_core::Result<()> {
        std::fs::write(self.folder().join(tapchain_core::config::DOCUMENT_NAME), doc.to_json()?)?;
        Ok(())
    }

    /// Write screenshots for a replay device, in order.
    pub fn screenshots(&self, frames: &[Frame]) -> image::ImageResult<PathBuf> {
        let dir = self.dir.path().join("screens");
        std::fs::create_dir_all(&dir)?;
        for (i, frame) in frames.iter().enumerate() {
            frame.save(dir.join(format!("{:03}.png", i)))?;
        }
        Ok(dir)
    }

    pub fn open(&self) -> tapchain_core::Result<Config> {
        Config::open(self.root(), &self.name, false)
    }

    /// Executor over the on-disk config, driven by a virtual clock.
    pub fn executor(&self, settings: Settings) -> tapchain_core::Result<(Executor, Arc<ManualClock>)> {
        let config = self.open()?;
        let vision = Vision::new(config.pattern_store(), Detector::default());
        let clock = Arc::new(ManualClock::new());
        let exec = Executor::new(config, vision, settings).with_clock(clock.clone());
        Ok((exec, clock))
    }
}
