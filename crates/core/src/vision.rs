use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::debug::DebugImages;
use crate::detect::{DetectOptions, Detection, Detector};
use crate::error::{Error, Result};
use crate::types::{Frame, Ltrb, Size};

/// Loads pattern images once and hands out shared copies.
///
/// Paths are resolved against the config folder, except absolute paths and
/// paths that already start at the configs root (e.g. `configs/shared/x.png`),
/// which are resolved against the root's parent.
pub struct PatternStore {
    folder: PathBuf,
    root: Option<PathBuf>,
    cache: Mutex<HashMap<String, Arc<Frame>>>,
}

impl PatternStore {
    pub fn new(folder: impl Into<PathBuf>) -> Self {
        Self { folder: folder.into(), root: None, cache: Mutex::new(HashMap::new()) }
    }

    pub fn with_root(mut self, configs_root: impl Into<PathBuf>) -> Self {
        self.root = Some(configs_root.into());
        self
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    pub fn resolve(&self, path: &str) -> PathBuf {
        let p = Path::new(path);
        if p.is_absolute() {
            return p.to_path_buf();
        }
        if let Some(root) = &self.root {
            let first = p.components().next();
            let root_name = root.file_name();
            if let (Some(Component::Normal(first)), Some(root_name)) = (first, root_name) {
                if first == root_name {
                    return root.parent().unwrap_or(Path::new("")).join(p);
                }
            }
        }
        self.folder.join(p)
    }

    /// Register an in-memory image under `key`; later loads of `key` return it.
    pub fn insert(&self, key: &str, image: Frame) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(key.to_string(), Arc::new(image));
        }
    }

    pub fn load(&self, path: &str) -> Result<Arc<Frame>> {
        if let Some(hit) = self.cache.lock().ok().and_then(|c| c.get(path).cloned()) {
            return Ok(hit);
        }
        let resolved = self.resolve(path);
        let image = image::open(&resolved)
            .map_err(|source| Error::Pattern { path: resolved.clone(), source })?
            .to_rgb8();
        let image = Arc::new(image);
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(path.to_string(), Arc::clone(&image));
        }
        Ok(image)
    }
}

/// Check `region` against a `size` scene.
pub fn check_region(region: Ltrb, size: Size) -> Result<Ltrb> {
    if region.left < 0
        || region.top < 0
        || region.right > size.w as i32
        || region.bottom > size.h as i32
    {
        return Err(Error::RegionOutOfBounds { region, width: size.w, height: size.h });
    }
    if region.width() <= 0 || region.height() <= 0 {
        return Err(Error::InvalidInput(format!("region {} is empty", region)));
    }
    Ok(region)
}

/// Grow `region` by a quarter of its width/height on each side (at least one
/// pixel), clamped to the scene.
pub fn pad_region(region: Ltrb, size: Size) -> Result<Ltrb> {
    let region = check_region(region, size)?;
    let dx = (region.width() as f64 * 0.25).ceil() as i32;
    let dy = (region.height() as f64 * 0.25).ceil() as i32;
    Ok(Ltrb::new(
        (region.left - dx).max(0),
        (region.top - dy).max(0),
        (region.right + dx).min(size.w as i32),
        (region.bottom + dy).min(size.h as i32),
    ))
}

/// Pattern store, detector and optional debug output shared by every
/// condition and effect of one config.
pub struct Vision {
    pub store: PatternStore,
    pub detector: Detector,
    debug: Option<DebugImages>,
}

impl Vision {
    pub fn new(store: PatternStore, detector: Detector) -> Self {
        Self { store, detector, debug: None }
    }

    pub fn with_debug(mut self, debug: DebugImages) -> Self {
        self.debug = Some(debug);
        self
    }

    pub fn pattern(&self, path: &str) -> Result<Arc<Frame>> {
        self.store.load(path)
    }

    /// Best match of `pattern` in `scene`, optionally confined to `region`
    /// (padded when `pad` is set). The box is in full-scene coordinates.
    pub fn locate(&self, pattern: &str, scene: &Frame, region: Option<Ltrb>, pad: bool) -> Result<Detection> {
        let image = self.pattern(pattern)?;
        let mut hit = match region {
            None => self.detector.best(&image, scene)?,
            Some(region) => {
                let size = Size::of(scene);
                let crop = if pad { pad_region(region, size)? } else { check_region(region, size)? };
                let view = image::imageops::crop_imm(
                    scene,
                    crop.left as u32,
                    crop.top as u32,
                    crop.width() as u32,
                    crop.height() as u32,
                )
                .to_image();
                let mut hit = self.detector.best(&image, &view)?;
                hit.rect = hit.rect.translate(crop.left, crop.top);
                hit
            }
        };
        hit.confidence = hit.confidence.max(0.0);
        if let Some(debug) = &self.debug {
            debug.save(scene, pattern, hit.confidence, hit.rect);
        }
        Ok(hit)
    }

    /// Every match of `pattern` in the whole scene.
    pub fn locate_all(&self, pattern: &str, scene: &Frame, opts: &DetectOptions) -> Result<Vec<Detection>> {
        let image = self.pattern(pattern)?;
        self.detector.detect(&image, scene, opts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::tests::{noise, scene_with};
    use crate::types::Rect;

    #[test]
    fn padding_strictly_contains_and_stays_inside() {
        let size = Size::new(100, 80);
        for region in [
            Ltrb::new(10, 10, 30, 30),
            Ltrb::new(0, 0, 40, 20),
            Ltrb::new(60, 50, 100, 80),
            Ltrb::new(0, 10, 3, 13),
        ] {
            let padded = pad_region(region, size).unwrap();
            assert!(padded.contains(&region));
            assert_ne!(padded, region);
            assert!(Ltrb::new(0, 0, 100, 80).contains(&padded));
        }
    }

    #[test]
    fn quarter_padding() {
        let padded = pad_region(Ltrb::new(40, 40, 60, 48), Size::new(200, 200)).unwrap();
        assert_eq!(padded, Ltrb::new(35, 38, 65, 50));
    }

    #[test]
    fn out_of_bounds_region_is_rejected() {
        let err = pad_region(Ltrb::new(10, 10, 120, 20), Size::new(100, 100)).unwrap_err();
        assert!(matches!(err, Error::RegionOutOfBounds { .. }));
        let err = check_region(Ltrb::new(-1, 0, 10, 10), Size::new(100, 100)).unwrap_err();
        assert!(matches!(err, Error::RegionOutOfBounds { .. }));
    }

    #[test]
    fn resolves_paths_relative_to_folder_or_root() {
        let store = PatternStore::new("/data/configs/game").with_root("/data/configs");
        assert_eq!(store.resolve("ok.png"), PathBuf::from("/data/configs/game/ok.png"));
        assert_eq!(store.resolve("configs/shared/x.png"), PathBuf::from("/data/configs/shared/x.png"));
        assert_eq!(store.resolve("/abs/y.png"), PathBuf::from("/abs/y.png"));
    }

    #[test]
    fn locate_in_region_reports_scene_coordinates() {
        let pattern = noise(6, 6, 11);
        let scene = scene_with(80, 60, &pattern, &[(50, 30)]);
        let vision = Vision::new(PatternStore::new("."), Detector::default());
        vision.store.insert("p.png", pattern);
        let hit = vision.locate("p.png", &scene, Some(Ltrb::new(45, 25, 60, 40)), true).unwrap();
        assert_eq!(hit.rect, Rect::new(50, 30, 6, 6));
    }
}
