//! Resolved shading descriptions

use smallvec::SmallVec;

use crate::fitz::colorspace::Colorspace;
use crate::fitz::geometry::Rect;

/// A shading ready for rendering. Built from a document dictionary on the
/// PDF side; mesh data for types 4-7 stays in the source stream and is not
/// resolved here.
#[derive(Debug, Clone, PartialEq)]
pub struct Shading {
    /// 1 function-based, 2 axial, 3 radial, 4-7 mesh.
    pub shading_type: i32,
    pub colorspace: Colorspace,
    /// Axial: x0 y0 x1 y1. Radial: x0 y0 r0 x1 y1 r1. Empty otherwise.
    pub coords: SmallVec<[f32; 6]>,
    pub domain: [f32; 2],
    pub extend: [bool; 2],
    pub bbox: Option<Rect>,
}

impl Shading {
    pub fn is_mesh(&self) -> bool {
        self.shading_type >= 4
    }
}
