//! pdfink — the resource-traversal and content-rendering core of a PDF
//! page interpreter.
//!
//! Three pieces make up the crate:
//!
//! - a pre-rendering **page scan** ([`pdf::check_page`]) that walks a page's
//!   resource graph to decide whether transparency is in play and which spot
//!   colorants the page names, then negotiates that with the device;
//! - an **image pipeline** ([`pdf::image`]) covering XObject and inline
//!   images, masking in its three forms, and a JPX header pre-scan for the
//!   layout facts PDF leaves to the codestream;
//! - a **pattern engine** ([`pdf::pattern`]) for tiling and shading
//!   patterns, tiled either by the device (accumulation) or by replaying
//!   the cell per fill.
//!
//! Rendering targets implement [`fitz::device::Device`]; content-stream
//! execution is plugged in through [`pdf::ContentRunner`] so the crate
//! stays agnostic of tokenization.

pub mod fitz;
pub mod pdf;

pub use fitz::error::{Error, Result};
pub use fitz::device::{Device, NullDevice};
pub use pdf::{check_page, Context, InterpreterOptions, ObjectStore};
