//! Raster image descriptions handed to the device
//!
//! A [`PixelImage`] describes geometry, sample layout and masking for one
//! image; pixel data itself is fed separately, plane by plane.

use smallvec::SmallVec;

use crate::fitz::colorspace::Colorspace;
use crate::fitz::geometry::Matrix;

/// Bytes in one row of samples: `width` samples of `n` components at
/// `bpc` bits each, rounded up to a byte boundary.
pub fn row_bytes(width: u32, n: u8, bpc: u8) -> usize {
    ((width as usize * n as usize * bpc as usize) + 7) / 8
}

#[derive(Debug, Clone)]
pub struct PixelImage {
    pub width: u32,
    pub height: u32,
    pub bpc: u8,
    /// Components per sample.
    pub n: u8,
    /// `None` for image masks and raw device-component data.
    pub colorspace: Option<Colorspace>,
    pub decode: SmallVec<[f32; 8]>,
    pub interpolate: bool,
    pub matrix: Matrix,
    pub kind: PixelImageKind,
}

#[derive(Debug, Clone)]
pub enum PixelImageKind {
    /// Plain opaque image.
    Direct,
    /// 1-bit stencil painted in the current color.
    ImageMask,
    /// Sample values within the ranges are treated as transparent.
    ColorKeyMask { ranges: SmallVec<[u32; 8]> },
    /// A separate 1-component mask plane accompanies the image data.
    StencilMask { mask: Box<StencilMask> },
}

#[derive(Debug, Clone)]
pub struct StencilMask {
    pub width: u32,
    pub height: u32,
    pub bpc: u8,
    pub decode: SmallVec<[f32; 8]>,
    pub matrix: Matrix,
}

impl PixelImage {
    pub fn row_bytes(&self) -> usize {
        row_bytes(self.width, self.n, self.bpc)
    }

    pub fn data_bytes(&self) -> usize {
        self.row_bytes() * self.height as usize
    }
}

impl StencilMask {
    pub fn row_bytes(&self) -> usize {
        row_bytes(self.width, 1, self.bpc)
    }

    pub fn data_bytes(&self) -> usize {
        self.row_bytes() * self.height as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_bytes_rounds_up() {
        // 10 pixels, 1 component, 1 bpc = 10 bits = 2 bytes
        assert_eq!(row_bytes(10, 1, 1), 2);
        assert_eq!(row_bytes(8, 1, 1), 1);
        assert_eq!(row_bytes(3, 3, 8), 9);
        assert_eq!(row_bytes(5, 3, 4), 8); // 60 bits
    }

    #[test]
    fn test_data_bytes() {
        let img = PixelImage {
            width: 4,
            height: 3,
            bpc: 8,
            n: 3,
            colorspace: Some(Colorspace::DeviceRgb),
            decode: SmallVec::new(),
            interpolate: false,
            matrix: Matrix::IDENTITY,
            kind: PixelImageKind::Direct,
        };
        assert_eq!(img.row_bytes(), 12);
        assert_eq!(img.data_bytes(), 36);
    }

    #[test]
    fn test_stencil_mask_sizes() {
        let mask = StencilMask {
            width: 9,
            height: 2,
            bpc: 1,
            decode: SmallVec::new(),
            matrix: Matrix::IDENTITY,
        };
        assert_eq!(mask.row_bytes(), 2);
        assert_eq!(mask.data_bytes(), 4);
    }
}
