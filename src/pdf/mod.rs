//! PDF-side interpretation: objects, resource traversal and content rendering

pub mod check;
pub mod colorspace;
pub mod image;
pub mod interpret;
pub mod loop_detect;
pub mod object;
pub mod pattern;
pub mod shading;

pub use check::{check_page, pattern_uses_transparency, scan_page_spots, PageUsage, SpotSet};
pub use interpret::{Context, ContentRunner, GraphicsState, InterpreterOptions};
pub use loop_detect::LoopDetector;
pub use object::{Dict, Name, ObjHandle, ObjRef, Object, ObjectStore};
pub use pattern::{paint_pattern, set_pattern, ClientColor, PatternInstance, PatternPaint};
