use serde::{Deserialize, Deserializer, Serialize};

use crate::error::Result;
use crate::logger;
use crate::state::RunState;
use crate::types::{Frame, Ltrb, Rect};
use crate::vision::Vision;

/// Score and annotated box of one condition or action.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Evaluation {
    pub score: f64,
    pub rect: Rect,
}

impl Evaluation {
    pub const NONE: Evaluation = Evaluation { score: 0.0, rect: Rect::new(0, 0, 0, 0) };

    pub fn passed(&self) -> bool {
        self.score > 0.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Condition {
    /// Holds when the pattern is found above threshold; graded score.
    #[serde(rename = "SubimageCondition")]
    Match(PatternCheck),
    /// Holds when the pattern is *not* found; scores exactly 0 or 100.
    #[serde(rename = "NotSubimageCondition")]
    NotMatch(PatternCheck),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternCheck {
    pub image_path: String,
    #[serde(default)]
    pub intended_region: Option<Ltrb>,
    /// 0-100; the scaled match strength must exceed it.
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    /// Multiplier on match strength; inflates fuzzier patterns.
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default, deserialize_with = "key_or_false")]
    pub save_region_as: Option<String>,
    #[serde(default = "default_pad")]
    pub should_pad_region: bool,
}

fn default_threshold() -> f64 {
    80.0
}

fn default_weight() -> f64 {
    1.0
}

fn default_pad() -> bool {
    true
}

// Older documents wrote `false` for "no key".
fn key_or_false<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Key {
        Name(String),
        Flag(bool),
    }
    Ok(match Option::<Key>::deserialize(d)? {
        Some(Key::Name(s)) => Some(s),
        _ => None,
    })
}

impl PatternCheck {
    pub fn new(image_path: impl Into<String>) -> Self {
        Self {
            image_path: image_path.into(),
            intended_region: None,
            threshold: default_threshold(),
            weight: default_weight(),
            save_region_as: None,
            should_pad_region: true,
        }
    }

    pub fn in_region(mut self, region: Ltrb) -> Self {
        self.intended_region = Some(region);
        self
    }

    pub fn threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    pub fn save_as(mut self, key: impl Into<String>) -> Self {
        self.save_region_as = Some(key.into());
        self
    }

    pub fn unpadded(mut self) -> Self {
        self.should_pad_region = false;
        self
    }

    /// Confidence scaled to the 0-100 scale plus the run-state bias.
    pub fn strength(&self, confidence: f32, adjustment: f64) -> f64 {
        confidence as f64 * self.weight * 100.0 + adjustment
    }
}

impl Condition {
    pub fn check(&self) -> &PatternCheck {
        match self {
            Condition::Match(c) | Condition::NotMatch(c) => c,
        }
    }

    pub fn threshold(&self) -> f64 {
        self.check().threshold
    }

    fn kind(&self) -> &'static str {
        match self {
            Condition::Match(_) => "match",
            Condition::NotMatch(_) => "not-match",
        }
    }

    /// Score for a raw detector confidence, without touching any image.
    pub fn score_for(&self, confidence: f32, adjustment: f64) -> f64 {
        let check = self.check();
        let strength = check.strength(confidence, adjustment);
        match self {
            Condition::Match(_) if strength > check.threshold => strength.clamp(0.0, 100.0),
            Condition::Match(_) => 0.0,
            Condition::NotMatch(_) if strength < check.threshold => 100.0,
            Condition::NotMatch(_) => 0.0,
        }
    }

    pub fn evaluate(&self, scene: &Frame, state: &mut RunState, vision: &Vision) -> Result<Evaluation> {
        let check = self.check();
        let hit = vision.locate(&check.image_path, scene, check.intended_region, check.should_pad_region)?;
        let adjustment = state.viability_adjustment();
        let score = self.score_for(hit.confidence, adjustment);
        logger::debug_p(
            "condition",
            &format!(
                "{} {} {:.0}/{:.0} for {}",
                self.kind(),
                if score > 0.0 { "pass" } else { "fail" },
                check.strength(hit.confidence, adjustment),
                check.threshold,
                check.image_path
            ),
        );

        if let (Condition::Match(_), true, Some(key)) = (self, score > 0.0, &check.save_region_as) {
            state.set_region(key.clone(), hit.rect);
        }
        Ok(Evaluation { score, rect: hit.rect })
    }
}
