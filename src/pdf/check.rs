//! Pre-rendering page scan
//!
//! Before a page is interpreted, its resource graph is walked once to
//! answer two questions: does anything on the page use transparency, and
//! which spot colorants does it name. The two interact: once transparency
//! is found, the walk keeps going only if spot colorants still need
//! collecting.
//!
//! Every descent is bracketed by loop detector marks so that cyclic
//! resource graphs (Form XObjects whose Resources point back at an
//! ancestor, and the like) terminate instead of recursing forever.

use std::collections::HashSet;

use tracing::{debug, warn};

use crate::fitz::device::{Device, ParamStatus, WriteResponse};
use crate::fitz::error::{Error, Result};
use crate::pdf::colorspace;
use crate::pdf::interpret::Context;
use crate::pdf::loop_detect::LoopDetector;
use crate::pdf::object::{Dict, Name, Object, ObjectStore};

// ============================================================================
// SpotSet
// ============================================================================

/// The distinct spot colorant names found on a page.
#[derive(Debug, Default)]
pub struct SpotSet(HashSet<Name>);

impl SpotSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the name was not already present.
    pub fn insert(&mut self, name: Name) -> bool {
        self.0.insert(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains(&Name::new(name))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Name> {
        self.0.iter()
    }
}

/// What the pre-rendering scan learned about a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageUsage {
    pub has_transparency: bool,
    pub num_spots: usize,
    /// Whether the device could accept spot colorants at all.
    pub spot_capable: bool,
}

// ============================================================================
// Scanner
// ============================================================================

struct Scanner<'a> {
    store: &'a ObjectStore,
    loops: &'a mut LoopDetector,
    stop_on_error: bool,
    transparent: bool,
    /// `None` when the device cannot handle spot colorants; the spot-only
    /// parts of the walk are skipped entirely in that case.
    spots: Option<SpotSet>,
}

impl<'a> Scanner<'a> {
    fn new(
        store: &'a ObjectStore,
        loops: &'a mut LoopDetector,
        stop_on_error: bool,
        collect_spots: bool,
    ) -> Self {
        Scanner {
            store,
            loops,
            stop_on_error,
            transparent: false,
            spots: collect_spots.then(SpotSet::new),
        }
    }

    /// A structural error in one resource entry only stops the whole scan
    /// when the caller asked for strictness; otherwise it is logged and the
    /// remaining entries still get scanned.
    fn checkpoint(&self, r: Result<()>) -> Result<()> {
        match r {
            Ok(()) => Ok(()),
            Err(e) if self.stop_on_error => Err(e),
            Err(e) => {
                warn!(error = %e, "ignoring malformed entry during page scan");
                Ok(())
            }
        }
    }

    /// Once transparency is known and there is no spot collection to
    /// finish, nothing further can change the outcome.
    fn done(&self) -> bool {
        self.transparent && self.spots.is_none()
    }

    fn check_colorspace_entry(&mut self, obj: &Object) -> Result<()> {
        if let Some(spots) = self.spots.as_mut() {
            colorspace::check_for_spots(self.store, self.loops, obj, spots)?;
        }
        Ok(())
    }

    /// Sorted iteration keeps the scan order (and thus which entry an
    /// early exit lands on) independent of hash state.
    fn sorted_entries(dict: &Dict) -> Vec<(&Name, &Object)> {
        let mut entries: Vec<_> = dict.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        entries
    }

    // ------------------------------------------------------------------
    // ColorSpace and Shading: spot collection only
    // ------------------------------------------------------------------

    fn check_colorspace_dict(&mut self, cs_dict: &Dict) -> Result<()> {
        if self.spots.is_none() {
            return Ok(());
        }
        for (_, value) in Self::sorted_entries(cs_dict) {
            self.loops.mark()?;
            let r = self.check_colorspace_entry(value);
            self.loops.clear_to_mark();
            self.checkpoint(r)?;
        }
        Ok(())
    }

    fn check_shading(&mut self, obj: &Object) -> Result<()> {
        let (shading, num) = self.store.resolve(obj);
        if let Some(num) = num {
            if self.loops.check_and_add(num) {
                return Ok(());
            }
        }
        let dict = shading
            .dict()
            .ok_or_else(|| Error::typecheck("Shading entry is not a dictionary or stream"))?;
        if let Some(cs) = self.store.dict_get(dict, "ColorSpace") {
            self.check_colorspace_entry(&cs)?;
        }
        Ok(())
    }

    fn check_shading_dict(&mut self, sh_dict: &Dict) -> Result<()> {
        if self.spots.is_none() {
            return Ok(());
        }
        for (_, value) in Self::sorted_entries(sh_dict) {
            self.loops.mark()?;
            let r = self.check_shading(value);
            self.loops.clear_to_mark();
            self.checkpoint(r)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // XObjects
    // ------------------------------------------------------------------

    fn check_image(&mut self, image_dict: &Dict) -> Result<()> {
        let mut transparent = false;
        if self.store.dict_get(image_dict, "SMask").is_some() {
            transparent = true;
        } else if self
            .store
            .dict_get_int(image_dict, "SMaskInData")
            .unwrap_or(0)
            != 0
        {
            transparent = true;
        }
        if transparent {
            self.transparent = true;
            if self.spots.is_none() {
                return Ok(());
            }
        }
        if let Some(cs) = self.store.dict_get2(image_dict, "ColorSpace", "CS") {
            self.check_colorspace_entry(&cs)?;
        }
        Ok(())
    }

    fn check_form(&mut self, form_dict: &Dict, page_dict: &Dict) -> Result<()> {
        if let Some(group) = self.store.dict_get(form_dict, "Group") {
            self.transparent = true;
            if self.spots.is_some() {
                if let Some(group_dict) = group.dict() {
                    if let Some(cs) = self.store.dict_get2(group_dict, "CS", "ColorSpace") {
                        self.loops.mark()?;
                        let r = self.check_colorspace_entry(&cs);
                        self.loops.clear_to_mark();
                        self.checkpoint(r)?;
                    }
                }
            }
        }
        if self.done() {
            return Ok(());
        }
        if let Some((resources, num)) = self.store.dict_get_with_num(form_dict, "Resources") {
            if let Some(num) = num {
                if self.loops.check_and_add(num) {
                    debug!(obj = num, "circular Form resources, not descending");
                    return Ok(());
                }
            }
            self.check_resources(&resources, page_dict)?;
        }
        Ok(())
    }

    fn check_xobject(&mut self, xobj_dict: &Dict, page_dict: &Dict) -> Result<()> {
        match self.store.dict_get_name(xobj_dict, "Subtype") {
            Some(n) if n == "Image" => self.check_image(xobj_dict),
            Some(n) if n == "Form" => self.check_form(xobj_dict, page_dict),
            Some(_) | None => Ok(()),
        }
    }

    fn check_xobject_dict(&mut self, xobj_dict: &Dict, page_dict: &Dict) -> Result<()> {
        for (name, value) in Self::sorted_entries(xobj_dict) {
            self.loops.mark()?;
            let r = self.check_xobject_entry(value, page_dict);
            self.loops.clear_to_mark();
            if r.is_err() {
                debug!(xobject = %name, "error scanning XObject");
            }
            self.checkpoint(r)?;
            if self.done() {
                break;
            }
        }
        Ok(())
    }

    fn check_xobject_entry(&mut self, value: &Object, page_dict: &Dict) -> Result<()> {
        let (xobj, num) = self.store.resolve(value);
        if let Some(num) = num {
            if self.loops.check_and_add(num) {
                return Ok(());
            }
        }
        let dict = xobj
            .dict()
            .ok_or_else(|| Error::typecheck("XObject entry is not a stream or dictionary"))?;
        self.check_xobject(dict, page_dict)
    }

    // ------------------------------------------------------------------
    // ExtGState
    // ------------------------------------------------------------------

    fn check_extgstate(&mut self, gs_dict: &Dict, page_dict: &Dict) -> Result<()> {
        if let Some(smask) = self.store.dict_get(gs_dict, "SMask") {
            match smask.as_ref() {
                Object::Name(n) => {
                    if *n != "None" {
                        self.transparent = true;
                    }
                }
                Object::Dict(smask_dict) => {
                    self.transparent = true;
                    // The softmask group may still name spot colorants.
                    if self.spots.is_some() {
                        if let Some((group, num)) = self.store.dict_get_with_num(smask_dict, "G") {
                            let looped = match num {
                                Some(n) => self.loops.check_and_add(n),
                                None => false,
                            };
                            if !looped {
                                if let Some(group_dict) = group.dict() {
                                    self.check_xobject(group_dict, page_dict)?;
                                }
                            }
                        }
                    }
                }
                _ => {}
            }
        }
        if let Some(bm) = self.store.dict_get_name(gs_dict, "BM") {
            if bm != "Normal" && bm != "Compatible" {
                self.transparent = true;
            }
        }
        if let Some(ca) = self.store.dict_get_number(gs_dict, "CA") {
            if ca != 1.0 {
                self.transparent = true;
            }
        }
        if let Some(ca) = self.store.dict_get_number(gs_dict, "ca") {
            if ca != 1.0 {
                self.transparent = true;
            }
        }
        Ok(())
    }

    fn check_extgstate_dict(&mut self, egs_dict: &Dict, page_dict: &Dict) -> Result<()> {
        for (_, value) in Self::sorted_entries(egs_dict) {
            self.loops.mark()?;
            let r = (|| -> Result<()> {
                let (gs, num) = self.store.resolve(value);
                if let Some(num) = num {
                    if self.loops.check_and_add(num) {
                        return Ok(());
                    }
                }
                let dict = gs
                    .as_dict()
                    .ok_or_else(|| Error::typecheck("ExtGState entry is not a dictionary"))?;
                self.check_extgstate(dict, page_dict)
            })();
            self.loops.clear_to_mark();
            self.checkpoint(r)?;
            if self.done() {
                break;
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Patterns
    // ------------------------------------------------------------------

    fn check_pattern(&mut self, pattern_dict: &Dict, page_dict: &Dict) -> Result<()> {
        if self.spots.is_some() {
            if let Some(shading) = self.store.dict_get(pattern_dict, "Shading") {
                self.loops.mark()?;
                let r = self.check_shading(&shading);
                self.loops.clear_to_mark();
                self.checkpoint(r)?;
            }
        }
        if let Some((resources, num)) = self.store.dict_get_with_num(pattern_dict, "Resources") {
            let looped = match num {
                Some(n) => self.loops.check_and_add(n),
                None => false,
            };
            if !looped {
                self.check_resources(&resources, page_dict)?;
            }
        }
        if let Some(egs) = self.store.dict_get(pattern_dict, "ExtGState") {
            if let Some(egs_dict) = egs.as_dict() {
                self.check_extgstate(egs_dict, page_dict)?;
            }
        }
        Ok(())
    }

    fn check_pattern_dict(&mut self, pat_dict: &Dict, page_dict: &Dict) -> Result<()> {
        for (_, value) in Self::sorted_entries(pat_dict) {
            self.loops.mark()?;
            let r = (|| -> Result<()> {
                let (pat, num) = self.store.resolve(value);
                if let Some(num) = num {
                    if self.loops.check_and_add(num) {
                        return Ok(());
                    }
                }
                let dict = pat
                    .dict()
                    .ok_or_else(|| Error::typecheck("Pattern entry is not a dictionary or stream"))?;
                self.check_pattern(dict, page_dict)
            })();
            self.loops.clear_to_mark();
            self.checkpoint(r)?;
            if self.done() {
                break;
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Fonts (Type 3 resources can reference anything)
    // ------------------------------------------------------------------

    fn check_font(&mut self, font_dict: &Dict, page_dict: &Dict) -> Result<()> {
        if let Some(subtype) = self.store.dict_get_name(font_dict, "Subtype") {
            if subtype == "Type3" {
                if let Some((resources, num)) = self.store.dict_get_with_num(font_dict, "Resources")
                {
                    let looped = match num {
                        Some(n) => self.loops.check_and_add(n),
                        None => false,
                    };
                    if !looped {
                        self.check_resources(&resources, page_dict)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn check_font_dict(&mut self, font_dict: &Dict, page_dict: &Dict) -> Result<()> {
        for (_, value) in Self::sorted_entries(font_dict) {
            self.loops.mark()?;
            let r = (|| -> Result<()> {
                let (font, num) = self.store.resolve(value);
                if let Some(num) = num {
                    if self.loops.check_and_add(num) {
                        return Ok(());
                    }
                }
                let dict = font
                    .as_dict()
                    .ok_or_else(|| Error::typecheck("Font entry is not a dictionary"))?;
                self.check_font(dict, page_dict)
            })();
            self.loops.clear_to_mark();
            self.checkpoint(r)?;
            if self.done() {
                break;
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Resources dispatch
    // ------------------------------------------------------------------

    fn check_resources(&mut self, resources: &Object, page_dict: &Dict) -> Result<()> {
        let (resources, _) = self.store.resolve(resources);
        let resources = match resources.as_dict() {
            Some(d) => d,
            None => return Ok(()),
        };

        if let Some(cs) = self.store.dict_get(resources, "ColorSpace") {
            if let Some(cs_dict) = cs.as_dict() {
                self.loops.mark()?;
                let r = self.check_colorspace_dict(cs_dict);
                self.loops.clear_to_mark();
                self.checkpoint(r)?;
            }
        }
        if let Some(sh) = self.store.dict_get(resources, "Shading") {
            if let Some(sh_dict) = sh.as_dict() {
                self.loops.mark()?;
                let r = self.check_shading_dict(sh_dict);
                self.loops.clear_to_mark();
                self.checkpoint(r)?;
            }
        }
        if let Some(xo) = self.store.dict_get(resources, "XObject") {
            if let Some(xo_dict) = xo.as_dict() {
                self.loops.mark()?;
                let r = self.check_xobject_dict(xo_dict, page_dict);
                self.loops.clear_to_mark();
                self.checkpoint(r)?;
            }
        }
        if self.done() {
            return Ok(());
        }
        if let Some(pat) = self.store.dict_get(resources, "Pattern") {
            if let Some(pat_dict) = pat.as_dict() {
                self.loops.mark()?;
                let r = self.check_pattern_dict(pat_dict, page_dict);
                self.loops.clear_to_mark();
                self.checkpoint(r)?;
            }
        }
        if self.done() {
            return Ok(());
        }
        if let Some(fonts) = self.store.dict_get(resources, "Font") {
            if let Some(font_dict) = fonts.as_dict() {
                self.loops.mark()?;
                let r = self.check_font_dict(font_dict, page_dict);
                self.loops.clear_to_mark();
                self.checkpoint(r)?;
            }
        }
        if self.done() {
            return Ok(());
        }
        if let Some(egs) = self.store.dict_get(resources, "ExtGState") {
            if let Some(egs_dict) = egs.as_dict() {
                self.loops.mark()?;
                let r = self.check_extgstate_dict(egs_dict, page_dict);
                self.loops.clear_to_mark();
                self.checkpoint(r)?;
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Annotations
    // ------------------------------------------------------------------

    fn check_annot(&mut self, annot_dict: &Dict, page_dict: &Dict) -> Result<()> {
        // The normal appearance stream gets a full resource scan first; it
        // can contribute both transparency and spot colorants.
        if let Some(ap) = self.store.dict_get(annot_dict, "AP") {
            if let Some(ap_dict) = ap.as_dict() {
                if let Some(normal) = self.store.dict_get(ap_dict, "N") {
                    if let Some(n_dict) = normal.dict() {
                        if let Some(resources) = self.store.dict_get(n_dict, "Resources") {
                            self.check_resources(&resources, page_dict)?;
                        }
                    }
                }
            }
        }
        if self.transparent {
            return Ok(());
        }
        // Heuristics for annotations whose appearance is synthesized.
        if let Some(subtype) = self.store.dict_get_name(annot_dict, "Subtype") {
            if subtype == "Highlight" {
                self.transparent = true;
                return Ok(());
            }
        }
        if let Some(bm) = self.store.dict_get_name(annot_dict, "BM") {
            if bm != "Normal" && bm != "Compatible" {
                self.transparent = true;
                return Ok(());
            }
        }
        if let Some(ca) = self.store.dict_get_number(annot_dict, "CA") {
            if ca != 1.0 {
                self.transparent = true;
                return Ok(());
            }
        }
        if let Some(ca) = self.store.dict_get_number(annot_dict, "ca") {
            if ca != 1.0 {
                self.transparent = true;
            }
        }
        Ok(())
    }

    fn check_annots(&mut self, annots: &[Object], page_dict: &Dict) -> Result<()> {
        for value in annots {
            self.loops.mark()?;
            let r = (|| -> Result<()> {
                let (annot, num) = self.store.resolve(value);
                if let Some(num) = num {
                    if self.loops.check_and_add(num) {
                        return Ok(());
                    }
                }
                let dict = annot
                    .as_dict()
                    .ok_or_else(|| Error::typecheck("annotation is not a dictionary"))?;
                self.check_annot(dict, page_dict)
            })();
            self.loops.clear_to_mark();
            self.checkpoint(r)?;
            if self.done() {
                break;
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Page entry point
    // ------------------------------------------------------------------

    fn check_page_inner(&mut self, page_dict: &Dict, scan_annots: bool) -> Result<()> {
        // The page group is interrogated for spot colorants only. Some
        // producers attach a transparency Group to every page whether the
        // content uses transparency or not, so its presence alone proves
        // nothing.
        if self.spots.is_some() {
            if let Some(group) = self.store.dict_get(page_dict, "Group") {
                if let Some(group_dict) = group.dict() {
                    if let Some(cs) = self.store.dict_get2(group_dict, "CS", "ColorSpace") {
                        self.loops.mark()?;
                        let r = self.check_colorspace_entry(&cs);
                        self.loops.clear_to_mark();
                        self.checkpoint(r)?;
                    }
                }
            }
        }

        if let Some(resources) = self.store.dict_get(page_dict, "Resources") {
            self.loops.mark()?;
            let r = self.check_resources(&resources, page_dict);
            self.loops.clear_to_mark();
            self.checkpoint(r)?;
        }

        if scan_annots && !self.done() {
            if let Some(annots) = self.store.dict_get(page_dict, "Annots") {
                if let Some(annots) = annots.as_array() {
                    self.loops.mark()?;
                    let r = self.check_annots(annots, page_dict);
                    self.loops.clear_to_mark();
                    self.checkpoint(r)?;
                }
            }
        }
        Ok(())
    }
}

// ============================================================================
// Public entry points
// ============================================================================

/// Scan a page's resource graph and, when `do_setup` is set, negotiate the
/// results with the device (spot colorant count, page erase after a
/// reconfiguring write).
pub fn check_page(
    ctx: &mut Context,
    device: &mut dyn Device,
    page_dict: &Dict,
    do_setup: bool,
) -> Result<PageUsage> {
    let spot_capable = matches!(
        device.read_param("PageSpotColors"),
        ParamStatus::Value(_) | ParamStatus::Absent
    );

    let Context {
        store,
        loops,
        options,
        ..
    } = &mut *ctx;

    let mut scanner = Scanner::new(store, loops, options.stop_on_error, spot_capable);
    scanner.check_page_inner(page_dict, options.render_annotations)?;

    let mut has_transparency = scanner.transparent;
    let num_spots = scanner.spots.as_ref().map_or(0, SpotSet::len);
    if options.disable_transparency && has_transparency {
        debug!("transparency detected but disabled by options");
        has_transparency = false;
    }

    ctx.page_has_transparency = has_transparency;
    ctx.page_num_spots = num_spots;
    ctx.spot_capable_device = spot_capable;

    // Only a page that actually names spots is worth a device
    // reconfiguration; zero-spot pages leave the device untouched.
    if do_setup && spot_capable && num_spots > 0 {
        let response = device.write_param("PageSpotColors", num_spots as i64)?;
        if response == WriteResponse::NeedsReopen {
            if let Err(e) = device.reopen() {
                if has_transparency {
                    device.abort_transparency();
                }
                return Err(e);
            }
            device.erase_page()?;
        }
    }

    Ok(PageUsage {
        has_transparency,
        num_spots,
        spot_capable,
    })
}

/// Scan a page and also return the spot colorant names themselves.
/// Identical walk to [`check_page`], without the device negotiation.
pub fn scan_page_spots(ctx: &mut Context, page_dict: &Dict) -> Result<(bool, SpotSet)> {
    let Context {
        store,
        loops,
        options,
        ..
    } = &mut *ctx;
    let mut scanner = Scanner::new(store, loops, options.stop_on_error, true);
    scanner.check_page_inner(page_dict, options.render_annotations)?;
    let transparent = scanner.transparent;
    let spots = scanner.spots.take().unwrap_or_default();
    Ok((transparent, spots))
}

/// Does this one pattern use transparency? Used when a pattern is
/// instantiated on a page already known to carry transparency: the tiling
/// machinery needs to know whether this particular pattern's cell must be
/// rendered through the transparency path. Spot collection is disabled so
/// the walk short-circuits as early as possible.
pub fn pattern_uses_transparency(
    store: &ObjectStore,
    loops: &mut LoopDetector,
    pattern_dict: &Dict,
    page_dict: &Dict,
    stop_on_error: bool,
) -> Result<bool> {
    let mut scanner = Scanner::new(store, loops, stop_on_error, false);
    loops_bracket(&mut scanner, |s| s.check_pattern(pattern_dict, page_dict))?;
    Ok(scanner.transparent)
}

fn loops_bracket(scanner: &mut Scanner<'_>, f: impl FnOnce(&mut Scanner<'_>) -> Result<()>) -> Result<()> {
    scanner.loops.mark()?;
    let r = f(scanner);
    scanner.loops.clear_to_mark();
    r
}
