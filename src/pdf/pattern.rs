//! Tiling and shading patterns
//!
//! Installing a pattern as the current color captures everything needed to
//! paint a cell later: the pattern object, the page it came from, a saved
//! graphics state, and for shading patterns the resolved shading. That
//! bundle, the paint context, outlives the operator that created it and is
//! released when the color is replaced or the enclosing state is popped,
//! whichever happens last.

use std::cell::RefCell;
use std::rc::Rc;

use smallvec::SmallVec;
use tracing::{debug, warn};

use crate::fitz::device::{Capability, Device, DeviceQuery};
use crate::fitz::error::{Error, Result};
use crate::fitz::geometry::{Matrix, Rect};
use crate::fitz::shading::Shading;
use crate::pdf::check;
use crate::pdf::interpret::{Context, GraphicsState};
use crate::pdf::object::{Dict, Name, ObjHandle};
use crate::pdf::shading::build_shading;

// ============================================================================
// Paint context
// ============================================================================

/// Resources a pattern needs at paint time. Held behind [`Rc`] by the
/// pattern instance; `release` drops the payload exactly once no matter
/// how many of the cleanup sites fire.
#[derive(Debug)]
pub struct PaintContext {
    inner: RefCell<Option<PaintResources>>,
}

#[derive(Debug)]
struct PaintResources {
    page_dict: Rc<Dict>,
    pattern: ObjHandle,
    shading: Option<Shading>,
}

impl PaintContext {
    fn new(page_dict: Rc<Dict>, pattern: ObjHandle, shading: Option<Shading>) -> Rc<Self> {
        Rc::new(PaintContext {
            inner: RefCell::new(Some(PaintResources {
                page_dict,
                pattern,
                shading,
            })),
        })
    }

    /// Idempotent: the first call frees the payload, later calls do nothing.
    pub fn release(&self) {
        if self.inner.borrow_mut().take().is_some() {
            debug!("released pattern paint context");
        }
    }

    pub fn is_released(&self) -> bool {
        self.inner.borrow().is_none()
    }

    fn snapshot(&self) -> Result<(Rc<Dict>, ObjHandle, Option<Shading>)> {
        let inner = self.inner.borrow();
        let res = inner
            .as_ref()
            .ok_or_else(|| Error::generic("pattern paint context already released"))?;
        Ok((res.page_dict.clone(), res.pattern.clone(), res.shading.clone()))
    }
}

// ============================================================================
// Templates and instances
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum PatternKind {
    Tiling {
        /// 1 colored, 2 uncolored.
        paint_type: i32,
        /// 1 constant spacing, 2 no distortion, 3 constant/faster.
        tiling_type: i32,
        x_step: f32,
        y_step: f32,
    },
    Shading(Shading),
}

#[derive(Debug, Clone)]
pub struct PatternTemplate {
    pub kind: PatternKind,
    /// Cell bounds; tiling patterns always have one.
    pub bbox: Option<Rect>,
    pub matrix: Matrix,
    pub uses_transparency: bool,
    /// Tiling pattern without a Resources dictionary. Tolerated, but the
    /// cell may fail to find what it references.
    pub missing_resources: bool,
}

/// An instantiated pattern, installed as part of a [`ClientColor`].
#[derive(Debug)]
pub struct PatternInstance {
    pub id: u64,
    pub template: PatternTemplate,
    /// Graphics state to restore when the cell is painted.
    pub saved: GraphicsState,
    paint: Rc<PaintContext>,
}

impl PatternInstance {
    pub fn release_paint_context(&self) {
        self.paint.release();
    }

    pub fn paint_context_released(&self) -> bool {
        self.paint.is_released()
    }
}

/// A color as the interpreter tracks it: component values, plus the
/// pattern instance when the current colorspace is a pattern space.
#[derive(Debug, Clone, Default)]
pub struct ClientColor {
    pub components: SmallVec<[f32; 8]>,
    pub pattern: Option<Rc<PatternInstance>>,
}

// ============================================================================
// Pattern installation (setcolor with a pattern name)
// ============================================================================

/// Look up the named pattern and build the color carrying its instance.
/// `components` are the underlying color operands, used by uncolored
/// (PaintType 2) tiling patterns.
pub fn set_pattern(
    ctx: &mut Context,
    stream_dict: &Dict,
    page_dict: &Dict,
    name: &Name,
    components: &[f32],
) -> Result<ClientColor> {
    let pattern = ctx
        .store
        .find_resource("Pattern", name, stream_dict, page_dict)?;
    let pat_dict = pattern
        .dict()
        .ok_or_else(|| Error::typecheck("Pattern resource is not a dictionary or stream"))?;

    let pattern_type = ctx
        .store
        .dict_get_int(pat_dict, "PatternType")
        .ok_or_else(|| Error::typecheck("pattern missing PatternType"))?;

    let template = match pattern_type {
        1 => tiling_template(ctx, pat_dict, page_dict)?,
        2 => shading_template(ctx, pat_dict)?,
        other => {
            return Err(Error::syntax(format!("PatternType {} is not valid", other)));
        }
    };

    let shading = match &template.kind {
        PatternKind::Shading(sh) => Some(sh.clone()),
        PatternKind::Tiling { .. } => None,
    };
    let paint = PaintContext::new(Rc::new(page_dict.clone()), pattern.clone(), shading);

    // The cell paints from a clean state: everything reset except the
    // alphas, which carry through into the pattern.
    ctx.gsave()?;
    let instance = (|| -> Result<PatternInstance> {
        let fill_alpha = ctx.gstate().fill_alpha;
        let stroke_alpha = ctx.gstate().stroke_alpha;
        let fresh = GraphicsState {
            fill_alpha,
            stroke_alpha,
            ctm: template.matrix,
            ..GraphicsState::default()
        };
        ctx.set_gstate(fresh);
        Ok(PatternInstance {
            id: ctx.next_pattern_id(),
            template,
            saved: ctx.gstate().clone(),
            paint,
        })
    })();
    ctx.grestore();
    let instance = instance?;

    Ok(ClientColor {
        components: SmallVec::from_slice(components),
        pattern: Some(Rc::new(instance)),
    })
}

fn tiling_template(ctx: &mut Context, pat_dict: &Dict, page_dict: &Dict) -> Result<PatternTemplate> {
    let paint_type = ctx
        .store
        .dict_get_int(pat_dict, "PaintType")
        .ok_or_else(|| Error::typecheck("tiling pattern missing PaintType"))?;
    if !(1..=2).contains(&paint_type) {
        return Err(Error::range(format!("PaintType {} out of range", paint_type)));
    }
    let tiling_type = ctx
        .store
        .dict_get_int(pat_dict, "TilingType")
        .ok_or_else(|| Error::typecheck("tiling pattern missing TilingType"))?;
    if !(1..=3).contains(&tiling_type) {
        return Err(Error::range(format!("TilingType {} out of range", tiling_type)));
    }

    let bbox_obj = ctx
        .store
        .dict_get(pat_dict, "BBox")
        .ok_or_else(|| Error::typecheck("tiling pattern missing BBox"))?;
    let bbox_values = ctx.store.to_float_array(&bbox_obj)?;
    let bbox = Rect::from_array(&bbox_values)?.nudge_degenerate();

    let x_step = ctx
        .store
        .dict_get_number(pat_dict, "XStep")
        .ok_or_else(|| Error::typecheck("tiling pattern XStep must be a number"))?;
    let y_step = ctx
        .store
        .dict_get_number(pat_dict, "YStep")
        .ok_or_else(|| Error::typecheck("tiling pattern YStep must be a number"))?;

    let missing_resources = ctx.store.dict_get(pat_dict, "Resources").is_none();
    if missing_resources {
        debug!("tiling pattern has no Resources dictionary");
    }

    let matrix = pattern_matrix(ctx, pat_dict)?;

    // On a transparent page each pattern is probed individually, so an
    // opaque pattern can still take the cheaper rendering path.
    let uses_transparency = if ctx.page_has_transparency {
        let Context {
            store,
            loops,
            options,
            ..
        } = &mut *ctx;
        check::pattern_uses_transparency(store, loops, pat_dict, page_dict, options.stop_on_error)?
    } else {
        false
    };

    Ok(PatternTemplate {
        kind: PatternKind::Tiling {
            paint_type: paint_type as i32,
            tiling_type: tiling_type as i32,
            x_step: x_step as f32,
            y_step: y_step as f32,
        },
        bbox: Some(bbox),
        matrix,
        uses_transparency,
        missing_resources,
    })
}

fn shading_template(ctx: &mut Context, pat_dict: &Dict) -> Result<PatternTemplate> {
    let matrix = pattern_matrix(ctx, pat_dict)?;
    let shading_obj = ctx
        .store
        .dict_get(pat_dict, "Shading")
        .ok_or_else(|| Error::syntax("shading pattern missing Shading"))?;
    let shading = build_shading(&ctx.store, &shading_obj)?;
    if ctx.store.dict_get(pat_dict, "ExtGState").is_some() {
        warn!("ignoring ExtGState in shading pattern");
    }
    let bbox = shading.bbox;
    Ok(PatternTemplate {
        kind: PatternKind::Shading(shading),
        bbox,
        matrix,
        uses_transparency: false,
        missing_resources: false,
    })
}

fn pattern_matrix(ctx: &Context, pat_dict: &Dict) -> Result<Matrix> {
    match ctx.store.dict_get(pat_dict, "Matrix") {
        Some(obj) => {
            let values = ctx.store.to_float_array(&obj)?;
            Matrix::from_array(&values)
        }
        None => Ok(Matrix::IDENTITY),
    }
}

// ============================================================================
// Painting
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternPaint {
    /// The cell was replayed directly through the interpreter.
    Painted,
    /// The device captured the cell and will tile it itself.
    Accumulated,
}

/// Paint the pattern carried by `color`. Devices that can accumulate
/// patterns get the cell once, clipped to its bounds; everyone else gets a
/// direct replay under the instance's saved state.
pub fn paint_pattern(
    ctx: &mut Context,
    device: &mut dyn Device,
    color: &ClientColor,
) -> Result<PatternPaint> {
    let instance = color
        .pattern
        .as_ref()
        .ok_or_else(|| Error::typecheck("current color carries no pattern"))?
        .clone();
    let (page_dict, pattern, shading) = instance.paint.snapshot()?;

    if device.query(DeviceQuery::PatternAccumulation) == Capability::Supported {
        paint_accumulated(ctx, device, &instance, &page_dict, &pattern, shading.as_ref())
            .map(|_| PatternPaint::Accumulated)
    } else {
        paint_direct(ctx, device, &instance, &page_dict, &pattern, shading.as_ref())
            .map(|_| PatternPaint::Painted)
    }
}

fn paint_accumulated(
    ctx: &mut Context,
    device: &mut dyn Device,
    instance: &PatternInstance,
    page_dict: &Dict,
    pattern: &ObjHandle,
    shading: Option<&Shading>,
) -> Result<()> {
    ctx.gsave()?;
    let result = (|| -> Result<()> {
        ctx.set_gstate(instance.saved.clone());
        let base = device.initial_matrix();
        let ctm = instance.saved.ctm.concat(&base);
        ctx.gstate_mut().ctm = ctm;
        if let Some(bbox) = instance.template.bbox {
            device.clip_rect(bbox.transform(&ctm));
        }
        device.begin_pattern_accum(instance.id)?;
        let painted = paint_cell(ctx, device, pattern, page_dict, shading, ctm);
        let ended = device.end_pattern_accum(instance.id);
        painted?;
        ended
    })();
    ctx.grestore();
    result
}

fn paint_direct(
    ctx: &mut Context,
    device: &mut dyn Device,
    instance: &PatternInstance,
    page_dict: &Dict,
    pattern: &ObjHandle,
    shading: Option<&Shading>,
) -> Result<()> {
    ctx.gsave()?;
    let result = (|| -> Result<()> {
        ctx.set_gstate(instance.saved.clone());
        if instance.template.uses_transparency {
            // The compositor must re-sync its state before the cell paints.
            ctx.force_transparency_refresh = true;
        }
        let ctm = instance.saved.ctm;
        ctx.gsave()?;
        let painted = paint_cell(ctx, device, pattern, page_dict, shading, ctm);
        ctx.grestore();
        painted
    })();
    ctx.grestore();
    result
}

fn paint_cell(
    ctx: &mut Context,
    device: &mut dyn Device,
    pattern: &ObjHandle,
    page_dict: &Dict,
    shading: Option<&Shading>,
    ctm: Matrix,
) -> Result<()> {
    match shading {
        Some(sh) => device.fill_shading(sh, ctm),
        None => ctx.run_content(device, pattern, page_dict),
    }
}
