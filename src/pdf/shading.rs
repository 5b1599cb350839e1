//! Shading construction from document dictionaries

use crate::fitz::error::{Error, Result};
use crate::fitz::geometry::Rect;
use crate::fitz::shading::Shading;
use crate::pdf::colorspace::create_colorspace;
use crate::pdf::object::{Object, ObjectStore};

use smallvec::SmallVec;

/// Build a shading from a Shading entry. Dictionaries and streams are both
/// accepted; mesh shadings (types 4-7) keep their vertex data in the stream
/// and only their parameters are resolved here.
pub fn build_shading(store: &ObjectStore, obj: &Object) -> Result<Shading> {
    let (resolved, _) = store.resolve(obj);
    let dict = resolved
        .dict()
        .ok_or_else(|| Error::typecheck("Shading must be a dictionary or stream"))?;

    let shading_type = store
        .dict_get_int(dict, "ShadingType")
        .ok_or_else(|| Error::typecheck("Shading missing ShadingType"))?;
    if !(1..=7).contains(&shading_type) {
        return Err(Error::range(format!("ShadingType {} out of range", shading_type)));
    }
    let shading_type = shading_type as i32;

    if shading_type >= 4 && resolved.stream_data().is_none() {
        return Err(Error::typecheck("mesh shading must be a stream"));
    }

    let cs_obj = store
        .dict_get(dict, "ColorSpace")
        .ok_or_else(|| Error::typecheck("Shading missing ColorSpace"))?;
    let colorspace = create_colorspace(store, &cs_obj)?;

    let mut coords: SmallVec<[f32; 6]> = SmallVec::new();
    match shading_type {
        2 | 3 => {
            let want = if shading_type == 2 { 4 } else { 6 };
            let obj = store
                .dict_get(dict, "Coords")
                .ok_or_else(|| Error::typecheck("axial/radial shading missing Coords"))?;
            let values = store.to_float_array(&obj)?;
            if values.len() != want {
                return Err(Error::range(format!(
                    "Coords has {} elements, expected {}",
                    values.len(),
                    want
                )));
            }
            coords.extend(values);
        }
        _ => {}
    }

    let domain = match store.dict_get(dict, "Domain") {
        Some(obj) => {
            let values = store.to_float_array(&obj)?;
            if values.len() != 2 {
                return Err(Error::range("Domain must have 2 elements"));
            }
            [values[0], values[1]]
        }
        None => [0.0, 1.0],
    };

    let extend = match store.dict_get(dict, "Extend") {
        Some(obj) => {
            let arr = obj
                .as_array()
                .ok_or_else(|| Error::typecheck("Extend must be an array"))?;
            if arr.len() != 2 {
                return Err(Error::range("Extend must have 2 elements"));
            }
            let a = store.resolve(&arr[0]).0.as_bool().unwrap_or(false);
            let b = store.resolve(&arr[1]).0.as_bool().unwrap_or(false);
            [a, b]
        }
        None => [false, false],
    };

    let bbox = match store.dict_get(dict, "BBox") {
        Some(obj) => {
            let values = store.to_float_array(&obj)?;
            Some(Rect::from_array(&values)?)
        }
        None => None,
    };

    Ok(Shading {
        shading_type,
        colorspace,
        coords,
        domain,
        extend,
        bbox,
    })
}
