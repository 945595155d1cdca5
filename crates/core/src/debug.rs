use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

use chrono::Local;
use image::Rgb;

use crate::logger;
use crate::types::{Frame, Rect};

/// Copy of `frame` with every `(score, rect)` outlined, red at score 0
/// through green at score 100.
pub fn annotate(frame: &Frame, boxes: &[(f64, Rect)]) -> Frame {
    let mut out = frame.clone();
    for &(score, rect) in boxes {
        let t = (score / 100.0).clamp(0.0, 1.0);
        let color = Rgb([(255.0 * (1.0 - t)) as u8, (255.0 * t) as u8, 0]);
        outline(&mut out, rect, 3, color);
    }
    out
}

fn outline(img: &mut Frame, rect: Rect, thickness: i32, color: Rgb<u8>) {
    let (w, h) = (img.width() as i32, img.height() as i32);
    let mut put = |x: i32, y: i32| {
        if x >= 0 && y >= 0 && x < w && y < h {
            img.put_pixel(x as u32, y as u32, color);
        }
    };
    for t in 0..thickness {
        for x in rect.x - t..=rect.right() + t {
            put(x, rect.y - t);
            put(x, rect.bottom() + t);
        }
        for y in rect.y - t..=rect.bottom() + t {
            put(rect.x - t, y);
            put(rect.right() + t, y);
        }
    }
}

/// Writes annotated detection snapshots for threshold tuning.
pub struct DebugImages {
    folder: PathBuf,
    counter: AtomicU64,
}

impl DebugImages {
    pub fn new(folder: impl Into<PathBuf>, expire: Option<Duration>) -> Self {
        let folder = folder.into();
        if let Some(age) = expire {
            prune_stale(&folder, age);
        }
        std::fs::create_dir_all(&folder).ok();
        Self { folder, counter: AtomicU64::new(0) }
    }

    pub fn save(&self, scene: &Frame, pattern_name: &str, confidence: f32, rect: Rect) {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        let stem = Path::new(pattern_name)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "pattern".into());
        let name = format!(
            "{} - search #{} for {} {:.2}.png",
            Local::now().format("%Y-%m-%d %H-%M-%S"),
            n,
            stem,
            confidence
        );
        let path = self.folder.join(name);
        let annotated = annotate(scene, &[(confidence as f64 * 100.0, rect)]);
        match annotated.save(&path) {
            Ok(()) => logger::debug_p("detect", &format!("saved {}", path.display())),
            Err(e) => logger::warn_p("detect", &format!("could not save {}: {}", path.display(), e)),
        }
    }
}

/// Delete files under `folder` (recursively) not modified within `max_age`.
pub fn prune_stale(folder: &Path, max_age: Duration) {
    let Ok(entries) = std::fs::read_dir(folder) else { return };
    let now = SystemTime::now();
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            prune_stale(&path, max_age);
            continue;
        }
        let age = entry
            .metadata()
            .and_then(|m| m.modified())
            .ok()
            .and_then(|t| now.duration_since(t).ok());
        if age.is_some_and(|a| a > max_age) {
            std::fs::remove_file(&path).ok();
        }
    }
}
