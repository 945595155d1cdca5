use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::detect::{DetectOptions, Detection};
use crate::error::{Error, Result};
use crate::logger;
use crate::platform::Device;
use crate::settings::seconds;
use crate::state::RunState;
use crate::types::{Frame, Ltrb, Point, Rect, Size};
use crate::vision::Vision;

/// Effects run after a condition confirmed feasibility, so a locate below
/// this confidence is treated as a bug rather than a miss.
pub const LOCATE_FLOOR: f32 = 0.1;

/// Everything an effect may touch while it runs.
pub struct Context<'a> {
    pub device: &'a mut dyn Device,
    pub state: &'a mut RunState,
    pub vision: &'a Vision,
}

/// Named point of a located box.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Anchor {
    Top,
    Bottom,
    Left,
    Right,
    Tl,
    Tr,
    Bl,
    Br,
    Center,
}

impl Anchor {
    pub fn point(self, r: Rect) -> Point {
        let (x, y) = (r.x as f64, r.y as f64);
        let (cx, cy) = (r.center().x, r.center().y);
        let (right, bottom) = (r.right() as f64, r.bottom() as f64);
        match self {
            Anchor::Top => Point::new(cx, y),
            Anchor::Bottom => Point::new(cx, bottom),
            Anchor::Left => Point::new(x, cy),
            Anchor::Right => Point::new(right, cy),
            Anchor::Tl => Point::new(x, y),
            Anchor::Tr => Point::new(right, y),
            Anchor::Bl => Point::new(x, bottom),
            Anchor::Br => Point::new(right, bottom),
            Anchor::Center => Point::new(cx, cy),
        }
    }
}

/// Spatial relation a `ClickNearest` candidate must have with the anchor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NearestFilter {
    /// Vertical spans overlap.
    SameRow,
    /// Horizontal spans overlap.
    SameColumn,
}

impl NearestFilter {
    pub fn accepts(self, anchor: &Rect, candidate: &Rect) -> bool {
        match self {
            NearestFilter::SameRow => anchor.shares_rows(candidate),
            NearestFilter::SameColumn => anchor.shares_columns(candidate),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Effect {
    /// Click the centre of a fixed region.
    #[serde(rename = "ClickRegionEffect")]
    ClickRegion { intended_region: Ltrb },

    /// Click a located pattern (its centre or an offset inside it).
    #[serde(rename = "ClickSubimageEffect")]
    ClickPattern {
        image_path: String,
        #[serde(default)]
        intended_region: Option<Ltrb>,
        #[serde(default)]
        tap_coords_in_image: Option<[i32; 2]>,
    },

    /// Click the copy of a repeated pattern closest to a unique anchor
    /// (e.g. the "select" button on the row with a given icon).
    #[serde(rename = "ClickSubimageNearestEffect")]
    ClickNearest {
        match_path: String,
        click_path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        validator: Option<NearestFilter>,
    },

    /// Click where `click_image_path` sits inside the stored reference scene,
    /// scaled to the capture. For buttons whose look varies but place does not.
    #[serde(rename = "ClickRelativeRegionEffect")]
    ClickRelative { click_image_path: String, scene_image_path: String },

    #[serde(rename = "DragSubimageEffect")]
    DragPattern {
        image_path: String,
        #[serde(default)]
        intended_region: Option<Ltrb>,
        #[serde(default)]
        tap_coords_in_image: Option<[i32; 2]>,
        movement_amount: [i32; 2],
        duration: f64,
    },

    #[serde(rename = "ScrollRegionEffect")]
    ScrollRegion { image_path: String, start: Anchor, end: Anchor },

    #[serde(rename = "ScrollRelativeRegionEffect")]
    ScrollRelative {
        scroll_image_path: String,
        scene_image_path: String,
        start: Anchor,
        end: Anchor,
    },
}

fn jitter() -> f64 {
    rand::thread_rng().gen_range(-1..=1) as f64
}

fn strict(pattern: &str, hit: Detection) -> Result<Detection> {
    if hit.confidence <= LOCATE_FLOOR {
        return Err(Error::LocateFailed { pattern: pattern.to_string(), confidence: hit.confidence });
    }
    Ok(hit)
}

fn tap_point(rect: Rect, tap: Option<[i32; 2]>) -> Point {
    match tap {
        Some([tx, ty]) => Point::new((rect.x + tx) as f64, (rect.y + ty) as f64),
        None => rect.center(),
    }
}

fn click(ctx: &mut Context, p: Point) -> Result<()> {
    let (x, y) = p.offset(jitter(), jitter()).to_pixel();
    logger::info_p("effect", &format!("click at {}, {}", x, y));
    ctx.device.click(x, y)?;
    Ok(())
}

fn swipe(ctx: &mut Context, from: Point, to: Point, duration: Duration) -> Result<()> {
    let a = from.offset(jitter(), jitter()).to_pixel();
    let b = to.offset(jitter(), jitter()).to_pixel();
    logger::info_p("effect", &format!("swipe {:?} -> {:?} over {:?}", a, b, duration));
    ctx.device.swipe(a, b, duration)?;
    Ok(())
}

/// Closest accepted candidate to `anchor`, centre to centre; the earliest
/// candidate wins ties.
pub fn nearest_candidate(
    anchor: Rect,
    candidates: &[Detection],
    accept: impl Fn(&Rect, &Rect) -> bool,
) -> Option<Rect> {
    let origin = anchor.center();
    let mut best: Option<(f64, Rect)> = None;
    for c in candidates.iter().filter(|c| accept(&anchor, &c.rect)) {
        let d = origin.distance_sq(&c.rect.center());
        if best.map_or(true, |(bd, _)| d < bd) {
            best = Some((d, c.rect));
        }
    }
    best.map(|(_, r)| r)
}

impl Effect {
    pub fn kind(&self) -> &'static str {
        match self {
            Effect::ClickRegion { .. } => "ClickRegion",
            Effect::ClickPattern { .. } => "ClickPattern",
            Effect::ClickNearest { .. } => "ClickNearest",
            Effect::ClickRelative { .. } => "ClickRelative",
            Effect::DragPattern { .. } => "DragPattern",
            Effect::ScrollRegion { .. } => "ScrollRegion",
            Effect::ScrollRelative { .. } => "ScrollRelative",
        }
    }

    /// Pattern images this effect reads.
    pub fn pattern_paths(&self) -> Vec<&str> {
        match self {
            Effect::ClickRegion { .. } => vec![],
            Effect::ClickPattern { image_path, .. }
            | Effect::DragPattern { image_path, .. }
            | Effect::ScrollRegion { image_path, .. } => vec![image_path.as_str()],
            Effect::ClickNearest { match_path, click_path, .. } => vec![match_path.as_str(), click_path.as_str()],
            Effect::ClickRelative { click_image_path, scene_image_path } => {
                vec![click_image_path.as_str(), scene_image_path.as_str()]
            }
            Effect::ScrollRelative { scroll_image_path, scene_image_path, .. } => {
                vec![scroll_image_path.as_str(), scene_image_path.as_str()]
            }
        }
    }

    /// Issue this effect's single device command against `scene`.
    pub fn apply(&self, scene: &Frame, ctx: &mut Context) -> Result<()> {
        match self {
            Effect::ClickRegion { intended_region } => click(ctx, intended_region.center()),

            Effect::ClickPattern { image_path, intended_region, tap_coords_in_image } => {
                let hit = strict(image_path, ctx.vision.locate(image_path, scene, *intended_region, true)?)?;
                click(ctx, tap_point(hit.rect, *tap_coords_in_image))
            }

            Effect::ClickNearest { match_path, click_path, validator } => {
                let anchor = strict(match_path, ctx.vision.locate(match_path, scene, None, true)?)?;
                let candidates = ctx.vision.locate_all(click_path, scene, &DetectOptions::default())?;
                let accept = |a: &Rect, c: &Rect| validator.map_or(true, |v| v.accepts(a, c));
                match nearest_candidate(anchor.rect, &candidates, accept) {
                    Some(rect) => click(ctx, rect.center()),
                    None => {
                        logger::info_p(
                            "effect",
                            &format!("no {} candidate near {}; skipping", click_path, anchor.rect),
                        );
                        Ok(())
                    }
                }
            }

            Effect::ClickRelative { click_image_path, scene_image_path } => {
                let reference = ctx.vision.pattern(scene_image_path)?;
                let pattern = ctx.vision.pattern(click_image_path)?;
                let hit = strict(click_image_path, ctx.vision.detector.best(&pattern, &reference)?)?;
                let p = hit.rect.center().rescale(Size::of(&reference), Size::of(scene));
                click(ctx, p)
            }

            Effect::DragPattern { image_path, intended_region, tap_coords_in_image, movement_amount, duration } => {
                let hit = strict(image_path, ctx.vision.locate(image_path, scene, *intended_region, true)?)?;
                let from = tap_point(hit.rect, *tap_coords_in_image);
                let to = from.offset(movement_amount[0] as f64, movement_amount[1] as f64);
                swipe(ctx, from, to, seconds(*duration, "drag duration")?)
            }

            Effect::ScrollRegion { image_path, start, end } => {
                let hit = strict(image_path, ctx.vision.locate(image_path, scene, None, true)?)?;
                swipe(ctx, start.point(hit.rect), end.point(hit.rect), Duration::ZERO)
            }

            Effect::ScrollRelative { scroll_image_path, scene_image_path, start, end } => {
                let reference = ctx.vision.pattern(scene_image_path)?;
                let pattern = ctx.vision.pattern(scroll_image_path)?;
                let hit = strict(scroll_image_path, ctx.vision.detector.best(&pattern, &reference)?)?;
                let (from, to) = (Size::of(&reference), Size::of(scene));
                swipe(
                    ctx,
                    start.point(hit.rect).rescale(from, to),
                    end.point(hit.rect).rescale(from, to),
                    Duration::ZERO,
                )
            }
        }
    }
}
