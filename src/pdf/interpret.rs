//! Interpreter context and graphics state
//!
//! The [`Context`] ties together the object store, the loop detector, the
//! graphics state stack and the configured options. Content stream
//! execution itself is pluggable: anything that can replay a content
//! stream against a device implements [`ContentRunner`], and the pattern
//! and form machinery re-enters interpretation through it.

use std::rc::Rc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::fitz::colorspace::Colorspace;
use crate::fitz::device::Device;
use crate::fitz::error::{Error, Result};
use crate::fitz::geometry::Matrix;
use crate::pdf::loop_detect::LoopDetector;
use crate::pdf::object::{Dict, Object, ObjectStore};
use crate::pdf::pattern::{ClientColor, PatternInstance};

const MAX_GSTATE_DEPTH: usize = 256;

// ============================================================================
// Options
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InterpreterOptions {
    /// Treat recoverable structural errors as fatal.
    pub stop_on_error: bool,
    /// Whether annotations will be rendered (and therefore scanned).
    pub render_annotations: bool,
    /// Ignore transparency even when the page uses it.
    pub disable_transparency: bool,
    /// Extra diagnostics from the image pipeline.
    pub debug_images: bool,
}

impl Default for InterpreterOptions {
    fn default() -> Self {
        InterpreterOptions {
            stop_on_error: false,
            render_annotations: true,
            disable_transparency: false,
            debug_images: false,
        }
    }
}

// ============================================================================
// Graphics state
// ============================================================================

#[derive(Debug, Clone)]
pub struct GraphicsState {
    pub ctm: Matrix,
    pub fill_colorspace: Colorspace,
    pub stroke_colorspace: Colorspace,
    pub fill_color: ClientColor,
    pub stroke_color: ClientColor,
    pub fill_alpha: f32,
    pub stroke_alpha: f32,
    pub blend_mode: String,
}

impl Default for GraphicsState {
    fn default() -> Self {
        GraphicsState {
            ctm: Matrix::IDENTITY,
            fill_colorspace: Colorspace::DeviceGray,
            stroke_colorspace: Colorspace::DeviceGray,
            fill_color: ClientColor::default(),
            stroke_color: ClientColor::default(),
            fill_alpha: 1.0,
            stroke_alpha: 1.0,
            blend_mode: "Normal".to_string(),
        }
    }
}

// ============================================================================
// Content re-entry
// ============================================================================

/// Replays a content stream against a device. Implemented by the content
/// stream tokenizer/executor; the resource machinery only needs the seam.
pub trait ContentRunner {
    fn run(
        &self,
        ctx: &mut Context,
        device: &mut dyn Device,
        content: &Object,
        page_dict: &Dict,
    ) -> Result<()>;
}

// ============================================================================
// Context
// ============================================================================

pub struct Context {
    pub store: ObjectStore,
    pub loops: LoopDetector,
    pub options: InterpreterOptions,

    // Filled in by the page scan.
    pub page_has_transparency: bool,
    pub page_num_spots: usize,
    pub spot_capable_device: bool,

    /// Set when a transparency-using pattern paints directly, so the
    /// compositor state is refreshed before the cell is replayed.
    pub force_transparency_refresh: bool,

    states: Vec<GraphicsState>,
    runner: Option<Rc<dyn ContentRunner>>,
    next_pattern_id: u64,
}

impl Context {
    pub fn new(store: ObjectStore) -> Self {
        Self::with_options(store, InterpreterOptions::default())
    }

    pub fn with_options(store: ObjectStore, options: InterpreterOptions) -> Self {
        Context {
            store,
            loops: LoopDetector::new(),
            options,
            page_has_transparency: false,
            page_num_spots: 0,
            spot_capable_device: false,
            force_transparency_refresh: false,
            states: vec![GraphicsState::default()],
            runner: None,
            next_pattern_id: 1,
        }
    }

    pub fn set_runner(&mut self, runner: Rc<dyn ContentRunner>) {
        self.runner = Some(runner);
    }

    pub fn run_content(
        &mut self,
        device: &mut dyn Device,
        content: &Object,
        page_dict: &Dict,
    ) -> Result<()> {
        let runner = self
            .runner
            .clone()
            .ok_or_else(|| Error::generic("no content runner installed"))?;
        runner.run(self, device, content, page_dict)
    }

    pub fn next_pattern_id(&mut self) -> u64 {
        let id = self.next_pattern_id;
        self.next_pattern_id += 1;
        id
    }

    // ------------------------------------------------------------------
    // Graphics state stack
    // ------------------------------------------------------------------

    pub fn gstate(&self) -> &GraphicsState {
        self.states.last().expect("graphics state stack is never empty")
    }

    pub fn gstate_mut(&mut self) -> &mut GraphicsState {
        self.states.last_mut().expect("graphics state stack is never empty")
    }

    pub fn gstate_depth(&self) -> usize {
        self.states.len()
    }

    pub fn gsave(&mut self) -> Result<()> {
        if self.states.len() >= MAX_GSTATE_DEPTH {
            return Err(Error::limit("graphics state stack too deep"));
        }
        let top = self.gstate().clone();
        self.states.push(top);
        Ok(())
    }

    /// Pop the graphics state. Pattern paint contexts held only by the
    /// popped state are released here.
    pub fn grestore(&mut self) {
        if self.states.len() <= 1 {
            warn!("grestore with empty graphics state stack");
            return;
        }
        let popped = match self.states.pop() {
            Some(s) => s,
            None => return,
        };
        self.release_unless_referenced(&popped.fill_color, None);
        self.release_unless_referenced(&popped.stroke_color, None);
    }

    /// Replace the fill color, releasing the outgoing pattern's paint
    /// context if nothing else still references it.
    pub fn set_fill_color(&mut self, color: ClientColor) {
        let old = std::mem::replace(&mut self.gstate_mut().fill_color, color);
        let current = self.gstate().fill_color.clone();
        self.release_unless_referenced(&old, Some(&current));
    }

    pub fn set_stroke_color(&mut self, color: ClientColor) {
        let old = std::mem::replace(&mut self.gstate_mut().stroke_color, color);
        let current = self.gstate().stroke_color.clone();
        self.release_unless_referenced(&old, Some(&current));
    }

    fn release_unless_referenced(&self, old: &ClientColor, incoming: Option<&ClientColor>) {
        let inst = match &old.pattern {
            Some(inst) => inst,
            None => return,
        };
        let referenced = self
            .states
            .iter()
            .flat_map(|s| [&s.fill_color, &s.stroke_color])
            .chain(incoming)
            .any(|c| matches!(&c.pattern, Some(p) if Rc::ptr_eq(p, inst)));
        if !referenced {
            inst.release_paint_context();
        }
    }

    /// Install a saved state as the current top, as pattern painting does
    /// before replaying the cell.
    pub fn set_gstate(&mut self, state: GraphicsState) {
        let old = std::mem::replace(self.gstate_mut(), state);
        self.release_unless_referenced(&old.fill_color, None);
        self.release_unless_referenced(&old.stroke_color, None);
    }
}
