use std::fmt;

use serde::{Deserialize, Serialize};

/// A captured snapshot of the device screen (RGB, device coordinates).
pub type Frame = image::RgbImage;

/// Detection-space box: origin plus size. Everything a detector reports
/// and everything stored in run-state uses this convention.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "[i32; 4]", into = "[i32; 4]")]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
}

impl Rect {
    pub const fn new(x: i32, y: i32, w: i32, h: i32) -> Self {
        Self { x, y, w, h }
    }

    pub fn right(&self) -> i32 {
        self.x + self.w
    }

    pub fn bottom(&self) -> i32 {
        self.y + self.h
    }

    pub fn center(&self) -> Point {
        Point::new(self.x as f64 + self.w as f64 / 2.0, self.y as f64 + self.h as f64 / 2.0)
    }

    pub fn translate(&self, dx: i32, dy: i32) -> Rect {
        Rect { x: self.x + dx, y: self.y + dy, ..*self }
    }

    /// Corner-point form of this box.
    pub fn to_ltrb(&self) -> Ltrb {
        Ltrb::new(self.x, self.y, self.right(), self.bottom())
    }

    /// True when the vertical spans of both boxes overlap ("same row").
    pub fn shares_rows(&self, other: &Rect) -> bool {
        self.y < other.bottom() && other.y < self.bottom()
    }

    /// True when the horizontal spans of both boxes overlap ("same column").
    pub fn shares_columns(&self, other: &Rect) -> bool {
        self.x < other.right() && other.x < self.right()
    }
}

impl From<[i32; 4]> for Rect {
    fn from([x, y, w, h]: [i32; 4]) -> Self {
        Rect { x, y, w, h }
    }
}

impl From<Rect> for [i32; 4] {
    fn from(r: Rect) -> Self {
        [r.x, r.y, r.w, r.h]
    }
}

impl fmt::Display for Rect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {}x{})", self.x, self.y, self.w, self.h)
    }
}

/// Intended-region box: corner points `(left, top, right, bottom)`.
/// Only configuration uses this convention; convert explicitly with
/// [`Ltrb::to_rect`] / [`Rect::to_ltrb`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "[i32; 4]", into = "[i32; 4]")]
pub struct Ltrb {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Ltrb {
    pub const fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self { left, top, right, bottom }
    }

    pub fn width(&self) -> i32 {
        self.right - self.left
    }

    pub fn height(&self) -> i32 {
        self.bottom - self.top
    }

    pub fn center(&self) -> Point {
        Point::new(
            (self.left + self.right) as f64 / 2.0,
            (self.top + self.bottom) as f64 / 2.0,
        )
    }

    pub fn to_rect(&self) -> Rect {
        Rect::new(self.left, self.top, self.width(), self.height())
    }

    /// Non-strict containment of `other` in `self`.
    pub fn contains(&self, other: &Ltrb) -> bool {
        self.left <= other.left
            && self.top <= other.top
            && self.right >= other.right
            && self.bottom >= other.bottom
    }
}

impl From<[i32; 4]> for Ltrb {
    fn from([left, top, right, bottom]: [i32; 4]) -> Self {
        Ltrb { left, top, right, bottom }
    }
}

impl From<Ltrb> for [i32; 4] {
    fn from(r: Ltrb) -> Self {
        [r.left, r.top, r.right, r.bottom]
    }
}

impl fmt::Display for Ltrb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}, {}, {}]", self.left, self.top, self.right, self.bottom)
    }
}

/// Sub-pixel screen point; rounded only when a device command is issued.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn offset(&self, dx: f64, dy: f64) -> Point {
        Point::new(self.x + dx, self.y + dy)
    }

    /// Map from a `from`-sized image into a `to`-sized one, truncating like
    /// integer pixel coordinates do.
    pub fn rescale(&self, from: Size, to: Size) -> Point {
        Point::new(
            (self.x * to.w as f64 / from.w as f64).trunc(),
            (self.y * to.h as f64 / from.h as f64).trunc(),
        )
    }

    pub fn distance_sq(&self, other: &Point) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx * dx + dy * dy
    }

    pub fn to_pixel(&self) -> (i32, i32) {
        (self.x.round() as i32, self.y.round() as i32)
    }
}

/// Width and height of a capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "[u32; 2]", into = "[u32; 2]")]
pub struct Size {
    pub w: u32,
    pub h: u32,
}

impl Size {
    pub const fn new(w: u32, h: u32) -> Self {
        Self { w, h }
    }

    pub fn of(frame: &Frame) -> Self {
        Size::new(frame.width(), frame.height())
    }
}

impl From<[u32; 2]> for Size {
    fn from([w, h]: [u32; 2]) -> Self {
        Size { w, h }
    }
}

impl From<Size> for [u32; 2] {
    fn from(s: Size) -> Self {
        [s.w, s.h]
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.w, self.h)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ltrb_and_rect_convert_without_mixing() {
        let region = Ltrb::new(10, 20, 110, 70);
        let rect = region.to_rect();
        assert_eq!(rect, Rect::new(10, 20, 100, 50));
        assert_eq!(rect.to_ltrb(), region);
    }

    #[test]
    fn span_overlap() {
        let a = Rect::new(10, 10, 10, 10);
        assert!(a.shares_columns(&Rect::new(5, 20, 10, 10)));
        assert!(a.shares_columns(&Rect::new(0, 20, 20, 10)));
        assert!(!a.shares_columns(&Rect::new(0, 20, 5, 0)));
        assert!(a.shares_rows(&Rect::new(20, 5, 10, 10)));
        assert!(a.shares_rows(&Rect::new(20, 0, 10, 20)));
        assert!(!a.shares_rows(&Rect::new(0, 20, 5, 0)));
        // identical boxes share both spans
        assert!(a.shares_rows(&a) && a.shares_columns(&a));
    }

    #[test]
    fn rects_serialize_as_arrays() {
        let json = serde_json::to_string(&Rect::new(1, 2, 3, 4)).unwrap();
        assert_eq!(json, "[1,2,3,4]");
        let back: Ltrb = serde_json::from_str("[1,2,3,4]").unwrap();
        assert_eq!(back, Ltrb::new(1, 2, 3, 4));
    }

    #[test]
    fn rescale_truncates() {
        let p = Point::new(100.0, 51.0).rescale(Size::new(200, 100), Size::new(100, 50));
        assert_eq!(p, Point::new(50.0, 25.0));
    }
}
