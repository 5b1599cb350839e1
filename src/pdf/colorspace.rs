//! Colorspace construction from document objects
//!
//! Turns ColorSpace entries (names and array forms) into resolved
//! [`Colorspace`] values, and walks them for spot colorants during the
//! pre-rendering scan.

use tracing::debug;

use crate::fitz::colorspace::Colorspace;
use crate::fitz::error::{Error, Result};
use crate::fitz::stream::Stream;
use crate::pdf::check::SpotSet;
use crate::pdf::loop_detect::LoopDetector;
use crate::pdf::object::{Object, ObjectStore};

// Process colorants and the two reserved names never count as spots.
const PROCESS_COLORANTS: &[&str] = &["Cyan", "Magenta", "Yellow", "Black", "All", "None"];

fn is_spot_name(name: &str) -> bool {
    !PROCESS_COLORANTS.contains(&name)
}

// ============================================================================
// Factory
// ============================================================================

/// Build a colorspace from a ColorSpace entry (already fetched from a
/// resource dictionary or an image dictionary).
pub fn create_colorspace(store: &ObjectStore, obj: &Object) -> Result<Colorspace> {
    create_inner(store, obj, 0)
}

fn create_inner(store: &ObjectStore, obj: &Object, depth: usize) -> Result<Colorspace> {
    if depth > 8 {
        return Err(Error::limit("colorspace nesting too deep"));
    }
    let (resolved, _) = store.resolve(obj);
    match resolved.as_ref() {
        Object::Name(n) => colorspace_from_name(n.as_str()),
        Object::Array(arr) => {
            if arr.is_empty() {
                return Err(Error::typecheck("empty colorspace array"));
            }
            let (head, _) = store.resolve(&arr[0]);
            let head_name = head
                .as_name()
                .ok_or_else(|| Error::typecheck("colorspace array must start with a name"))?;
            match head_name.as_str() {
                "ICCBased" => icc_from_array(store, arr),
                "Indexed" | "I" => indexed_from_array(store, arr, depth),
                "Separation" => separation_from_array(store, arr, depth),
                "DeviceN" => devicen_from_array(store, arr, depth),
                "CalRGB" => Ok(Colorspace::DeviceRgb),
                "CalGray" => Ok(Colorspace::DeviceGray),
                "Lab" => Ok(Colorspace::Lab),
                "Pattern" => {
                    let base = match arr.get(1) {
                        Some(b) => Some(Box::new(create_inner(store, b, depth + 1)?)),
                        None => None,
                    };
                    Ok(Colorspace::Pattern { base })
                }
                other => {
                    // Single-element array forms of the device spaces.
                    if arr.len() == 1 {
                        colorspace_from_name(other)
                    } else {
                        Err(Error::undefined(format!("unknown colorspace family {}", other)))
                    }
                }
            }
        }
        other => Err(Error::typecheck(format!(
            "expected colorspace name or array, got {}",
            other.type_name()
        ))),
    }
}

fn colorspace_from_name(name: &str) -> Result<Colorspace> {
    match name {
        "DeviceGray" | "G" => Ok(Colorspace::DeviceGray),
        "DeviceRGB" | "RGB" => Ok(Colorspace::DeviceRgb),
        "DeviceCMYK" | "CMYK" => Ok(Colorspace::DeviceCmyk),
        "Pattern" => Ok(Colorspace::Pattern { base: None }),
        other => Err(Error::undefined(format!("unknown colorspace name {}", other))),
    }
}

fn icc_from_array(store: &ObjectStore, arr: &[Object]) -> Result<Colorspace> {
    let profile = arr
        .get(1)
        .ok_or_else(|| Error::typecheck("ICCBased colorspace missing profile stream"))?;
    let (profile, _) = store.resolve(profile);
    let dict = profile
        .dict()
        .ok_or_else(|| Error::typecheck("ICCBased profile must be a stream"))?;
    let n = store
        .dict_get_int(dict, "N")
        .ok_or_else(|| Error::typecheck("ICC profile stream missing N"))?;
    match n {
        1 | 3 | 4 => Ok(Colorspace::Icc { n: n as u8 }),
        _ => Err(Error::range(format!("ICC component count {} out of range", n))),
    }
}

fn indexed_from_array(store: &ObjectStore, arr: &[Object], depth: usize) -> Result<Colorspace> {
    if arr.len() < 3 {
        return Err(Error::typecheck("Indexed colorspace needs base and hival"));
    }
    let base = create_inner(store, &arr[1], depth + 1)?;
    let (hival_obj, _) = store.resolve(&arr[2]);
    let hival = hival_obj
        .as_int()
        .ok_or_else(|| Error::typecheck("Indexed hival must be an integer"))?;
    if !(0..=255).contains(&hival) {
        return Err(Error::range(format!("Indexed hival {} out of range", hival)));
    }
    Ok(Colorspace::Indexed {
        base: Box::new(base),
        hival: hival as i32,
    })
}

fn separation_from_array(store: &ObjectStore, arr: &[Object], depth: usize) -> Result<Colorspace> {
    if arr.len() < 3 {
        return Err(Error::typecheck("Separation colorspace needs colorant and alternate"));
    }
    let (colorant, _) = store.resolve(&arr[1]);
    let colorant = colorant
        .as_name()
        .ok_or_else(|| Error::typecheck("Separation colorant must be a name"))?
        .as_str()
        .to_string();
    let base = create_inner(store, &arr[2], depth + 1)?;
    Ok(Colorspace::Separation {
        colorant,
        base: Box::new(base),
    })
}

fn devicen_from_array(store: &ObjectStore, arr: &[Object], depth: usize) -> Result<Colorspace> {
    if arr.len() < 3 {
        return Err(Error::typecheck("DeviceN colorspace needs colorants and alternate"));
    }
    let (names, _) = store.resolve(&arr[1]);
    let names = names
        .as_array()
        .ok_or_else(|| Error::typecheck("DeviceN colorants must be an array"))?;
    let mut colorants = Vec::with_capacity(names.len());
    for n in names {
        let (n, _) = store.resolve(n);
        let name = n
            .as_name()
            .ok_or_else(|| Error::typecheck("DeviceN colorant must be a name"))?;
        colorants.push(name.as_str().to_string());
    }
    let base = create_inner(store, &arr[2], depth + 1)?;
    Ok(Colorspace::DeviceN {
        colorants,
        base: Box::new(base),
    })
}

// ============================================================================
// ICC profiles embedded in image streams
// ============================================================================

/// Build a colorspace from an ICC profile embedded at a byte range of an
/// encoded stream (JPX images carry these). Component count comes from the
/// profile's data colour space field.
pub fn icc_colorspace_from_stream(source: &Stream, offset: u64, length: u32) -> Result<Colorspace> {
    if length < 20 {
        return Err(Error::syntax("embedded ICC profile too short"));
    }
    let header = source.slice_at(offset, 20)?;
    let n = match &header[16..20] {
        b"GRAY" => 1,
        b"RGB " => 3,
        b"CMYK" => 4,
        b"Lab " => 3,
        other => {
            return Err(Error::unsupported(format!(
                "ICC data colour space {:?}",
                String::from_utf8_lossy(other)
            )))
        }
    };
    Ok(Colorspace::Icc { n })
}

// ============================================================================
// Spot colorant extraction
// ============================================================================

/// Walk a ColorSpace entry and record any spot colorants it names.
/// Separation and DeviceN introduce colorants; Indexed defers to its base;
/// DeviceN attribute dictionaries may hide further Separation spaces.
pub fn check_for_spots(
    store: &ObjectStore,
    loops: &mut LoopDetector,
    obj: &Object,
    spots: &mut SpotSet,
) -> Result<()> {
    let (resolved, num) = store.resolve(obj);
    if let Some(num) = num {
        if loops.check_and_add(num) {
            return Ok(());
        }
    }
    let arr = match resolved.as_array() {
        Some(a) if !a.is_empty() => a,
        _ => return Ok(()),
    };
    let (head, _) = store.resolve(&arr[0]);
    let head = match head.as_name() {
        Some(n) => n.as_str().to_string(),
        None => return Ok(()),
    };
    match head.as_str() {
        "Separation" => {
            if let Some(colorant) = arr.get(1) {
                let (colorant, _) = store.resolve(colorant);
                if let Some(name) = colorant.as_name() {
                    if is_spot_name(name.as_str()) {
                        spots.insert(name.clone());
                    }
                }
            }
        }
        "DeviceN" => {
            if let Some(names) = arr.get(1) {
                let (names, _) = store.resolve(names);
                if let Some(names) = names.as_array() {
                    for n in names {
                        let (n, _) = store.resolve(n);
                        if let Some(name) = n.as_name() {
                            if is_spot_name(name.as_str()) {
                                spots.insert(name.clone());
                            }
                        }
                    }
                }
            }
            // Attribute dictionary may carry per-colorant Separation spaces.
            if let Some(attrs) = arr.get(4) {
                let (attrs, _) = store.resolve(attrs);
                if let Some(attrs) = attrs.as_dict() {
                    if let Some(colorants) = store.dict_get(attrs, "Colorants") {
                        if let Some(colorants) = colorants.as_dict() {
                            for value in colorants.values() {
                                check_for_spots(store, loops, value, spots)?;
                            }
                        }
                    }
                }
            }
        }
        "Indexed" | "I" => {
            if let Some(base) = arr.get(1) {
                check_for_spots(store, loops, base, spots)?;
            }
        }
        other => {
            debug!(family = other, "no spot colorants in colorspace family");
        }
    }
    Ok(())
}
