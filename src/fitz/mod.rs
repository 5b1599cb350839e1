//! Rendering engine infrastructure: errors, geometry, streams, colorspaces,
//! the device abstraction, and raster image descriptions.

pub mod colorspace;
pub mod device;
pub mod error;
pub mod geometry;
pub mod image;
pub mod shading;
pub mod stream;

pub use error::{Error, Result};
