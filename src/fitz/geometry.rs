//! Geometric primitives: points, rectangles, matrices
//!
//! Matrices are the usual PDF six-element affine form
//! `[a b c d e f]` mapping `(x, y)` to `(ax + cy + e, bx + dy + f)`.

use crate::fitz::error::{Error, Result};

// ============================================================================
// Point
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Point { x, y }
    }

    pub fn transform(self, m: &Matrix) -> Point {
        Point {
            x: self.x * m.a + self.y * m.c + m.e,
            y: self.x * m.b + self.y * m.d + m.f,
        }
    }
}

// ============================================================================
// Rect
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rect {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

impl Rect {
    pub const EMPTY: Rect = Rect {
        x0: 0.0,
        y0: 0.0,
        x1: 0.0,
        y1: 0.0,
    };

    pub fn new(x0: f32, y0: f32, x1: f32, y1: f32) -> Self {
        Rect { x0, y0, x1, y1 }
    }

    /// Build a rectangle from a 4-element `[llx lly urx ury]` array,
    /// normalizing so that `x0 <= x1` and `y0 <= y1`.
    pub fn from_array(v: &[f32]) -> Result<Rect> {
        if v.len() != 4 {
            return Err(Error::typecheck("rectangle array must have 4 elements"));
        }
        Ok(Rect::new(v[0], v[1], v[2], v[3]).normalize())
    }

    /// Swap corners as needed so the lower-left really is lower-left.
    pub fn normalize(mut self) -> Rect {
        if self.x0 > self.x1 {
            std::mem::swap(&mut self.x0, &mut self.x1);
        }
        if self.y0 > self.y1 {
            std::mem::swap(&mut self.y0, &mut self.y1);
        }
        self
    }

    /// Give degenerate axes a tiny positive extent. Zero-width or
    /// zero-height tiles otherwise collapse to nothing when tiled.
    /// The nudge scales with the coordinate magnitude so it is not
    /// absorbed by rounding away from the origin.
    pub fn nudge_degenerate(mut self) -> Rect {
        const TINY: f32 = 0.000_000_01;
        if self.x0 == self.x1 {
            self.x1 = self.x0 + (self.x0.abs() * f32::EPSILON).max(TINY);
        }
        if self.y0 == self.y1 {
            self.y1 = self.y0 + (self.y0.abs() * f32::EPSILON).max(TINY);
        }
        self
    }

    pub fn width(&self) -> f32 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> f32 {
        self.y1 - self.y0
    }

    pub fn is_empty(&self) -> bool {
        self.x0 >= self.x1 || self.y0 >= self.y1
    }

    /// Transform all four corners and return the bounding rectangle.
    pub fn transform(&self, m: &Matrix) -> Rect {
        let corners = [
            Point::new(self.x0, self.y0).transform(m),
            Point::new(self.x1, self.y0).transform(m),
            Point::new(self.x0, self.y1).transform(m),
            Point::new(self.x1, self.y1).transform(m),
        ];
        let mut r = Rect::new(corners[0].x, corners[0].y, corners[0].x, corners[0].y);
        for p in &corners[1..] {
            r.x0 = r.x0.min(p.x);
            r.y0 = r.y0.min(p.y);
            r.x1 = r.x1.max(p.x);
            r.y1 = r.y1.max(p.y);
        }
        r
    }
}

// ============================================================================
// Matrix
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Matrix {
    pub a: f32,
    pub b: f32,
    pub c: f32,
    pub d: f32,
    pub e: f32,
    pub f: f32,
}

impl Default for Matrix {
    fn default() -> Self {
        Matrix::IDENTITY
    }
}

impl Matrix {
    pub const IDENTITY: Matrix = Matrix {
        a: 1.0,
        b: 0.0,
        c: 0.0,
        d: 1.0,
        e: 0.0,
        f: 0.0,
    };

    pub fn new(a: f32, b: f32, c: f32, d: f32, e: f32, f: f32) -> Self {
        Matrix { a, b, c, d, e, f }
    }

    pub fn from_array(v: &[f32]) -> Result<Matrix> {
        if v.len() != 6 {
            return Err(Error::typecheck("matrix array must have 6 elements"));
        }
        Ok(Matrix::new(v[0], v[1], v[2], v[3], v[4], v[5]))
    }

    pub fn scale(sx: f32, sy: f32) -> Matrix {
        Matrix::new(sx, 0.0, 0.0, sy, 0.0, 0.0)
    }

    pub fn translate(tx: f32, ty: f32) -> Matrix {
        Matrix::new(1.0, 0.0, 0.0, 1.0, tx, ty)
    }

    /// self then other: `result = self * other`
    pub fn concat(&self, other: &Matrix) -> Matrix {
        Matrix {
            a: self.a * other.a + self.b * other.c,
            b: self.a * other.b + self.b * other.d,
            c: self.c * other.a + self.d * other.c,
            d: self.c * other.b + self.d * other.d,
            e: self.e * other.a + self.f * other.c + other.e,
            f: self.e * other.b + self.f * other.d + other.f,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rect_normalize_swaps_corners() {
        let r = Rect::new(10.0, 20.0, 2.0, 5.0).normalize();
        assert_eq!(r, Rect::new(2.0, 5.0, 10.0, 20.0));
    }

    #[test]
    fn test_rect_nudge_degenerate_width() {
        let r = Rect::new(0.0, 0.0, 0.0, 10.0).nudge_degenerate();
        assert!(r.width() > 0.0);
        assert_eq!(r.height(), 10.0);
    }

    #[test]
    fn test_rect_nudge_degenerate_height() {
        let r = Rect::new(0.0, 5.0, 10.0, 5.0).nudge_degenerate();
        assert!(r.height() > 0.0);
    }

    #[test]
    fn test_rect_nudge_away_from_origin() {
        let r = Rect::from_array(&[10.0, 10.0, 10.0, 20.0])
            .unwrap()
            .nudge_degenerate();
        assert!(r.width() > 0.0);
        assert_eq!(r.height(), 10.0);
    }

    #[test]
    fn test_rect_nudge_large_coordinates() {
        let r = Rect::new(5000.0, -3000.0, 5000.0, -3000.0).nudge_degenerate();
        assert!(r.width() > 0.0);
        assert!(r.height() > 0.0);
    }

    #[test]
    fn test_rect_nudge_leaves_normal_rect_alone() {
        let r = Rect::new(0.0, 0.0, 10.0, 10.0).nudge_degenerate();
        assert_eq!(r, Rect::new(0.0, 0.0, 10.0, 10.0));
    }

    #[test]
    fn test_rect_from_array_normalizes() {
        let r = Rect::from_array(&[5.0, 5.0, 1.0, 1.0]).unwrap();
        assert_eq!(r, Rect::new(1.0, 1.0, 5.0, 5.0));
    }

    #[test]
    fn test_rect_from_array_wrong_len() {
        assert!(Rect::from_array(&[1.0, 2.0, 3.0]).is_err());
    }

    #[test]
    fn test_matrix_identity_transform() {
        let p = Point::new(3.0, 4.0).transform(&Matrix::IDENTITY);
        assert_eq!(p, Point::new(3.0, 4.0));
    }

    #[test]
    fn test_matrix_concat_translate_scale() {
        let m = Matrix::translate(10.0, 0.0).concat(&Matrix::scale(2.0, 2.0));
        let p = Point::new(1.0, 1.0).transform(&m);
        assert_eq!(p, Point::new(22.0, 2.0));
    }

    #[test]
    fn test_rect_transform_bounds() {
        let r = Rect::new(0.0, 0.0, 1.0, 1.0);
        let t = r.transform(&Matrix::scale(2.0, 3.0));
        assert_eq!(t, Rect::new(0.0, 0.0, 2.0, 3.0));
    }

    #[test]
    fn test_matrix_from_array() {
        let m = Matrix::from_array(&[1.0, 0.0, 0.0, -1.0, 0.0, 100.0]).unwrap();
        assert_eq!(m.d, -1.0);
        assert_eq!(m.f, 100.0);
    }
}
