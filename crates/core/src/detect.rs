//! Template detection.
//!
//! A [`Correlator`] turns a pattern and a scene into a confidence map; the
//! [`Detector`] reads the best (or the best N non-overlapping) matches out of
//! that map by greedy non-maximum suppression.

use crate::error::{Error, Result};
use crate::logger;
use crate::types::{Frame, Rect};

/// Confidence for every top-left placement of a pattern inside a scene.
/// Dimensions are `(scene_w - pattern_w + 1) x (scene_h - pattern_h + 1)`.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreMap {
    width: u32,
    height: u32,
    data: Vec<f32>,
}

impl ScoreMap {
    pub fn from_vec(width: u32, height: u32, data: Vec<f32>) -> Option<Self> {
        (data.len() == width as usize * height as usize).then_some(Self { width, height, data })
    }

    pub fn filled(width: u32, height: u32, value: f32) -> Self {
        Self { width, height, data: vec![value; width as usize * height as usize] }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn get(&self, x: u32, y: u32) -> f32 {
        self.data[(y * self.width + x) as usize]
    }

    pub fn set(&mut self, x: u32, y: u32, value: f32) {
        self.data[(y * self.width + x) as usize] = value;
    }

    /// Global maximum; the first one in row-major order on ties.
    pub fn max_loc(&self) -> Option<(f32, u32, u32)> {
        let mut best: Option<(f32, usize)> = None;
        for (i, &v) in self.data.iter().enumerate() {
            if best.map_or(true, |(b, _)| v > b) {
                best = Some((v, i));
            }
        }
        best.map(|(v, i)| (v, i as u32 % self.width, i as u32 / self.width))
    }

    /// Zero a `w` x `h` window centred on `(cx, cy)`, clamped to the map.
    pub fn suppress(&mut self, cx: u32, cy: u32, w: u32, h: u32) {
        let x0 = cx.saturating_sub(w / 2);
        let y0 = cy.saturating_sub(h / 2);
        let x1 = (cx + w / 2 + 1).min(self.width);
        let y1 = (cy + h / 2 + 1).min(self.height);
        for y in y0..y1 {
            for x in x0..x1 {
                self.set(x, y, 0.0);
            }
        }
    }
}

/// The raw correlation primitive.
pub trait Correlator: Send + Sync {
    fn correlate(&self, pattern: &Frame, scene: &Frame) -> Result<ScoreMap>;
}

/// Zero-mean normalized cross-correlation over the three colour channels
/// (scores in [-1, 1]; 1 is a pixel-exact match). Windows or patterns with
/// no variance score 0.
pub struct NormedCorrelator;

struct Integral {
    stride: usize,
    sum: Vec<[f64; 3]>,
    sq: Vec<[f64; 3]>,
}

impl Integral {
    fn new(img: &Frame) -> Self {
        let (w, h) = (img.width() as usize, img.height() as usize);
        let stride = w + 1;
        let mut sum = vec![[0.0; 3]; stride * (h + 1)];
        let mut sq = vec![[0.0; 3]; stride * (h + 1)];
        for y in 0..h {
            let mut row_sum = [0.0; 3];
            let mut row_sq = [0.0; 3];
            for x in 0..w {
                let p = img.get_pixel(x as u32, y as u32);
                for c in 0..3 {
                    let v = p[c] as f64;
                    row_sum[c] += v;
                    row_sq[c] += v * v;
                    let above = y * stride + x + 1;
                    let here = (y + 1) * stride + x + 1;
                    sum[here][c] = sum[above][c] + row_sum[c];
                    sq[here][c] = sq[above][c] + row_sq[c];
                }
            }
        }
        Self { stride, sum, sq }
    }

    fn window(&self, x: usize, y: usize, w: usize, h: usize) -> ([f64; 3], [f64; 3]) {
        let (a, b) = (y * self.stride + x, y * self.stride + x + w);
        let (c, d) = ((y + h) * self.stride + x, (y + h) * self.stride + x + w);
        let mut s = [0.0; 3];
        let mut q = [0.0; 3];
        for i in 0..3 {
            s[i] = self.sum[d][i] - self.sum[b][i] - self.sum[c][i] + self.sum[a][i];
            q[i] = self.sq[d][i] - self.sq[b][i] - self.sq[c][i] + self.sq[a][i];
        }
        (s, q)
    }
}

impl Correlator for NormedCorrelator {
    fn correlate(&self, pattern: &Frame, scene: &Frame) -> Result<ScoreMap> {
        let (pw, ph) = (pattern.width() as usize, pattern.height() as usize);
        let (sw, sh) = (scene.width() as usize, scene.height() as usize);
        if pw > sw || ph > sh {
            return Err(Error::InvalidInput(format!(
                "pattern {}x{} is larger than scene {}x{}",
                pw, ph, sw, sh
            )));
        }

        let n = (pw * ph) as f64;
        let mut means = [0.0f64; 3];
        for p in pattern.pixels() {
            for c in 0..3 {
                means[c] += p[c] as f64;
            }
        }
        means.iter_mut().for_each(|m| *m /= n);

        let mut tpl = Vec::with_capacity(pw * ph * 3);
        let mut t_norm = 0.0;
        for p in pattern.pixels() {
            for c in 0..3 {
                let v = p[c] as f64 - means[c];
                t_norm += v * v;
                tpl.push(v);
            }
        }

        let (mw, mh) = (sw - pw + 1, sh - ph + 1);
        let mut data = vec![0.0f32; mw * mh];
        if t_norm <= f64::EPSILON {
            return Ok(ScoreMap { width: mw as u32, height: mh as u32, data });
        }

        let integral = Integral::new(scene);
        let raw = scene.as_raw();
        let row_len = pw * 3;
        for y in 0..mh {
            for x in 0..mw {
                let (s, q) = integral.window(x, y, pw, ph);
                let var: f64 = (0..3).map(|c| q[c] - s[c] * s[c] / n).sum();
                if var <= 1e-6 {
                    continue;
                }
                let mut num = 0.0;
                for ty in 0..ph {
                    let srow = &raw[((y + ty) * sw + x) * 3..][..row_len];
                    let trow = &tpl[ty * row_len..][..row_len];
                    num += srow.iter().zip(trow).map(|(&a, &b)| a as f64 * b).sum::<f64>();
                }
                data[y * mw + x] = (num / (t_norm * var).sqrt()).clamp(-1.0, 1.0) as f32;
            }
        }
        Ok(ScoreMap { width: mw as u32, height: mh as u32, data })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectOptions {
    pub threshold: f32,
    pub min_count: usize,
    pub max_count: usize,
}

impl Default for DetectOptions {
    fn default() -> Self {
        Self { threshold: 0.5, min_count: 1, max_count: 10 }
    }
}

impl DetectOptions {
    /// Only the single best match.
    pub fn best() -> Self {
        Self { max_count: 1, ..Self::default() }
    }
}

/// One match: confidence in [0, 1] (correlators may report negatives for
/// anti-correlated areas) and its box in scene coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub confidence: f32,
    pub rect: Rect,
}

pub struct Detector {
    correlator: Box<dyn Correlator>,
}

impl Default for Detector {
    fn default() -> Self {
        Self::new(NormedCorrelator)
    }
}

impl Detector {
    pub fn new(correlator: impl Correlator + 'static) -> Self {
        Self { correlator: Box::new(correlator) }
    }

    /// Matches ordered by confidence, highest first. At least `min_count`
    /// are returned regardless of `threshold`; never more than `max_count`.
    pub fn detect(&self, pattern: &Frame, scene: &Frame, opts: &DetectOptions) -> Result<Vec<Detection>> {
        if pattern.width() == 0 || pattern.height() == 0 {
            return Err(Error::InvalidInput("pattern image is empty".into()));
        }
        if scene.width() == 0 || scene.height() == 0 {
            return Err(Error::InvalidInput("scene image is empty".into()));
        }

        let mut map = self.correlator.correlate(pattern, scene)?;
        let (pw, ph) = pattern.dimensions();
        let mut found = Vec::new();
        while found.len() < opts.max_count {
            let Some((confidence, x, y)) = map.max_loc() else { break };
            if found.len() >= opts.min_count && confidence < opts.threshold {
                break;
            }
            let rect = Rect::new(x as i32, y as i32, pw as i32, ph as i32);
            logger::debug_p("detect", &format!("match {:.3} at {}", confidence, rect));
            found.push(Detection { confidence, rect });
            map.suppress(x, y, pw, ph);
        }
        Ok(found)
    }

    pub fn best(&self, pattern: &Frame, scene: &Frame) -> Result<Detection> {
        self.detect(pattern, scene, &DetectOptions::best())?
            .into_iter()
            .next()
            .ok_or_else(|| Error::InvalidInput("correlator returned an empty map".into()))
    }
}
