//! Image XObjects and inline images
//!
//! The pipeline goes: parse the image dictionary (with its abbreviated
//! inline forms), substitute a print-preferred Alternate if one exists,
//! pre-scan JPX data for the header fields PDF leaves implicit, resolve
//! masking, settle the colorspace, and finally feed decoded scanlines to
//! the device plane by plane.

use byteorder::{BigEndian, ByteOrder};
use smallvec::SmallVec;
use std::io::SeekFrom;
use tracing::{debug, warn};

use crate::fitz::colorspace::Colorspace;
use crate::fitz::device::Device;
use crate::fitz::error::{Error, Result};
use crate::fitz::geometry::Matrix;
use crate::fitz::image::{row_bytes, PixelImage, PixelImageKind, StencilMask};
use crate::fitz::stream::{decode_filters, Filter, Stream};
use crate::pdf::colorspace::{create_colorspace, icc_colorspace_from_stream};
use crate::pdf::interpret::Context;
use crate::pdf::object::{Dict, Name, ObjHandle, Object};

// ============================================================================
// Image dictionary
// ============================================================================

/// Everything an image dictionary can tell us, with abbreviated keys
/// folded in and defaults applied.
#[derive(Debug, Clone)]
pub struct ImageInfo {
    pub width: u32,
    pub height: u32,
    pub bpc: u8,
    pub image_mask: bool,
    pub interpolate: bool,
    pub length: Option<i64>,
    pub smask_in_data: i64,
    pub is_jpx: bool,
    pub mask: Option<ObjHandle>,
    pub smask: Option<ObjHandle>,
    pub colorspace: Option<ObjHandle>,
    pub decode: Option<Vec<f32>>,
    pub alternates: Option<ObjHandle>,
    pub intent: Option<Name>,
    pub name: Option<Name>,
    pub struct_parent: Option<i64>,
    pub oc: Option<ObjHandle>,
    pub filters: Vec<Filter>,
}

pub fn image_info(store: &crate::pdf::object::ObjectStore, dict: &Dict) -> Result<ImageInfo> {
    let width = store
        .dict_get2(dict, "Width", "W")
        .and_then(|o| o.as_int())
        .ok_or_else(|| Error::syntax("image missing Width"))?;
    let height = store
        .dict_get2(dict, "Height", "H")
        .and_then(|o| o.as_int())
        .ok_or_else(|| Error::syntax("image missing Height"))?;
    if !(0..=i64::from(u32::MAX)).contains(&width) || !(0..=i64::from(u32::MAX)).contains(&height) {
        return Err(Error::range(format!(
            "image dimensions {}x{} out of range",
            width, height
        )));
    }

    let image_mask = store
        .dict_get2(dict, "ImageMask", "IM")
        .and_then(|o| o.as_bool())
        .unwrap_or(false);

    let bpc = match store
        .dict_get2(dict, "BitsPerComponent", "BPC")
        .and_then(|o| o.as_int())
    {
        Some(b) => {
            if ![1, 2, 4, 8, 16].contains(&b) {
                return Err(Error::range(format!("BitsPerComponent {} invalid", b)));
            }
            if image_mask && b != 1 {
                return Err(Error::range("image mask must have 1 bit per component"));
            }
            b as u8
        }
        None => 1,
    };

    let mut filters = Vec::new();
    let mut is_jpx = false;
    if let Some(filter) = store.dict_get2(dict, "Filter", "F") {
        let names: Vec<Name> = match filter.as_ref() {
            Object::Name(n) => vec![n.clone()],
            Object::Array(arr) => {
                let mut v = Vec::with_capacity(arr.len());
                for f in arr {
                    let (f, _) = store.resolve(f);
                    let n = f
                        .as_name()
                        .ok_or_else(|| Error::typecheck("Filter array must contain names"))?;
                    v.push(n.clone());
                }
                v
            }
            _ => return Err(Error::typecheck("Filter must be a name or array")),
        };
        for n in &names {
            if *n == "JPXDecode" {
                is_jpx = true;
            }
            filters.push(Filter::from_name(n.as_str()));
        }
    }

    let decode = match store.dict_get2(dict, "Decode", "D") {
        Some(obj) => Some(store.to_float_array(&obj)?),
        None => None,
    };

    Ok(ImageInfo {
        width: width as u32,
        height: height as u32,
        bpc,
        image_mask,
        interpolate: store
            .dict_get2(dict, "Interpolate", "I")
            .and_then(|o| o.as_bool())
            .unwrap_or(false),
        length: store.dict_get_int(dict, "Length"),
        smask_in_data: store.dict_get_int(dict, "SMaskInData").unwrap_or(0),
        is_jpx,
        mask: store.dict_get(dict, "Mask"),
        smask: store.dict_get(dict, "SMask"),
        colorspace: store.dict_get2(dict, "ColorSpace", "CS"),
        decode,
        alternates: store.dict_get(dict, "Alternates"),
        intent: store.dict_get_name(dict, "Intent"),
        name: store.dict_get_name(dict, "Name"),
        struct_parent: store.dict_get_int(dict, "StructParent"),
        oc: store.dict_get(dict, "OC"),
        filters,
    })
}

/// Pick the first Alternate marked DefaultForPrinting and return its image.
fn select_alternate(store: &crate::pdf::object::ObjectStore, alternates: &Object) -> Option<ObjHandle> {
    let arr = alternates.as_array()?;
    for entry in arr {
        let (entry, _) = store.resolve(entry);
        let dict = entry.as_dict()?;
        if store.dict_get_bool(dict, "DefaultForPrinting").unwrap_or(false) {
            return store.dict_get(dict, "Image");
        }
    }
    None
}

// ============================================================================
// JPX header pre-scan
// ============================================================================

const fn box_tag(b: &[u8; 4]) -> u32 {
    u32::from_be_bytes(*b)
}

const TAG_JP2H: u32 = box_tag(b"jp2h");
const TAG_IHDR: u32 = box_tag(b"ihdr");
const TAG_BPCC: u32 = box_tag(b"bpcc");
const TAG_COLR: u32 = box_tag(b"colr");
const TAG_PCLR: u32 = box_tag(b"pclr");
const TAG_CDEF: u32 = box_tag(b"cdef");

const LEN_IHDR: usize = 14;
// Only parameter boxes are read in full; anything bigger gets truncated.
const LEN_DATA: usize = 2048;

/// What the JP2 header boxes say about the codestream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JpxInfo {
    pub comps: u16,
    pub bpc: u8,
    /// Enumerated colourspace from the colr box; 0 when an ICC profile is
    /// present instead.
    pub cs_enum: u32,
    /// Byte range of an embedded ICC profile within the encoded stream.
    pub icc_range: Option<(u64, u32)>,
}

/// Read one box header: returns (tag, payload length).
fn get_box(s: &mut Stream) -> Result<(u32, u64)> {
    let mut hdr = [0u8; 8];
    s.read_exact(&mut hdr)?;
    let box_len = BigEndian::read_u32(&hdr[0..4]) as u64;
    let tag = BigEndian::read_u32(&hdr[4..8]);
    if box_len == 1 {
        let mut ext = [0u8; 8];
        s.read_exact(&mut ext)?;
        let big = BigEndian::read_u64(&ext);
        if big < 16 {
            return Err(Error::limit("JPX extended box length too small"));
        }
        return Ok((tag, big - 16));
    }
    if box_len < 8 {
        return Err(Error::limit("JPX box length too small"));
    }
    Ok((tag, box_len - 8))
}

/// Scan the JP2 box structure up front for the fields the image pipeline
/// needs before the codestream is decoded: component count, bit depth and
/// colourspace. The cursor starts at the beginning of the encoded data.
/// Data with no JP2 header box at all (a bare codestream, say) is not an
/// error; there is simply nothing to report.
pub fn scan_jpx_header(source: &mut Stream) -> Result<Option<JpxInfo>> {
    // Walk top-level boxes until the JP2 header box.
    let header_len = loop {
        if source.remaining() == 0 {
            debug!("no JP2 header box in JPX data");
            return Ok(None);
        }
        let (tag, len) = get_box(source).map_err(|e| {
            warn!("invalid JPX header");
            e
        })?;
        if len as usize > source.remaining() {
            warn!("invalid JPX header");
            return Err(Error::syntax("JPX box extends past end of data"));
        }
        if tag == TAG_JP2H {
            break len;
        }
        source.skip(len)?;
    };
    let header_end = source.tell() + header_len;

    // The image header box must come first and has a fixed size.
    let (tag, len) = get_box(source)?;
    if tag != TAG_IHDR || len != LEN_IHDR as u64 {
        return Err(Error::syntax("JPX image header box malformed"));
    }
    let mut ihdr = [0u8; LEN_IHDR];
    source.read_exact(&mut ihdr)?;
    let comps = BigEndian::read_u16(&ihdr[8..10]);
    let raw_bpc = ihdr[10];
    let mut bpc: u8 = if raw_bpc != 255 { raw_bpc + 1 } else { 0 };

    let mut cs_enum = 0u32;
    let mut icc_range = None;
    let mut have_colr = false;

    while source.tell() < header_end {
        let (tag, len) = get_box(source)?;
        let payload_len = len as usize;
        let take = payload_len.min(LEN_DATA);
        if take > source.remaining() {
            return Err(Error::syntax("JPX box extends past end of data"));
        }
        let payload_start = source.tell();
        let mut data = vec![0u8; take];
        source.read_exact(&mut data)?;
        match tag {
            TAG_BPCC => {
                if let Some(&first) = data.first() {
                    if data.iter().take(comps as usize).any(|&d| d != first) {
                        warn!("JPX components have differing bit depths");
                    }
                    bpc = first + 1;
                }
            }
            TAG_COLR if !have_colr => {
                have_colr = true;
                match data.first() {
                    Some(1) if data.len() >= 7 => {
                        cs_enum = BigEndian::read_u32(&data[3..7]);
                    }
                    Some(2) if payload_len > 3 => {
                        icc_range = Some((payload_start + 3, (payload_len - 3) as u32));
                        cs_enum = 0;
                    }
                    _ => {
                        debug!("JPX colr box with unusable method");
                    }
                }
            }
            TAG_PCLR => {
                if data.len() >= 4 {
                    bpc = (data[3] & 7) + 1;
                }
            }
            TAG_CDEF => {
                debug!("JPX channel definition box not supported");
            }
            _ => {}
        }
        if payload_len > take {
            source.skip((payload_len - take) as u64)?;
        }
    }

    if bpc == 0 {
        return Err(Error::syntax("JPX bit depth unresolved"));
    }
    Ok(Some(JpxInfo {
        comps,
        bpc,
        cs_enum,
        icc_range,
    }))
}

fn jpx_enum_colorspace(cs_enum: u32) -> Result<Colorspace> {
    match cs_enum {
        12 => Ok(Colorspace::DeviceCmyk),
        16 | 18 => Ok(Colorspace::DeviceRgb),
        17 => Ok(Colorspace::DeviceGray),
        20 | 24 => {
            debug!(cs_enum, "approximating JPX colourspace with DeviceRGB");
            Ok(Colorspace::DeviceRgb)
        }
        other => Err(Error::unsupported(format!(
            "JPX enumerated colourspace {}",
            other
        ))),
    }
}

// ============================================================================
// Rendering
// ============================================================================

enum MaskState {
    None,
    /// Sample ranges that read as transparent.
    ColorKey(Vec<i64>),
    /// A fully pre-read stencil plane.
    Stencil { mask: StencilMask, data: Vec<u8> },
}

fn resolve_mask(store: &crate::pdf::object::ObjectStore, info: &ImageInfo) -> Result<MaskState> {
    let mask_obj = match &info.mask {
        Some(m) => m,
        None => return Ok(MaskState::None),
    };
    match mask_obj.as_ref() {
        Object::Array(arr) => {
            let mut ranges = Vec::with_capacity(arr.len());
            for v in arr {
                let (v, _) = store.resolve(v);
                let n = v
                    .as_int()
                    .ok_or_else(|| Error::typecheck("Mask range entries must be integers"))?;
                ranges.push(n);
            }
            Ok(MaskState::ColorKey(ranges))
        }
        Object::Stream { dict, data } => {
            let mask_info = image_info(store, dict)?;
            if !mask_info.image_mask {
                return Err(Error::typecheck("Mask stream must be an image mask"));
            }
            let decoded = decode_filters(data, &mask_info.filters)?;
            let mask = StencilMask {
                width: mask_info.width,
                height: mask_info.height,
                bpc: 1,
                decode: match &mask_info.decode {
                    Some(d) => SmallVec::from_slice(d),
                    None => SmallVec::from_slice(&[0.0, 1.0]),
                },
                matrix: image_matrix(mask_info.width, mask_info.height),
            };
            let expected = mask.data_bytes();
            if decoded.len() < expected {
                return Err(Error::syntax("stencil mask data too short"));
            }
            Ok(MaskState::Stencil {
                mask,
                data: decoded[..expected].to_vec(),
            })
        }
        other => {
            Err(Error::typecheck(format!(
                "Mask must be an array or stream, got {}",
                other.type_name()
            )))
        }
    }
}

fn image_matrix(width: u32, height: u32) -> Matrix {
    Matrix::new(width as f32, 0.0, 0.0, -(height as f32), 0.0, height as f32)
}

fn default_decode(colorspace: Option<&Colorspace>, comps: u8) -> SmallVec<[f32; 8]> {
    if let Some(Colorspace::Indexed { hival, .. }) = colorspace {
        return SmallVec::from_slice(&[0.0, *hival as f32]);
    }
    let mut d = SmallVec::new();
    for _ in 0..comps {
        d.push(0.0);
        d.push(1.0);
    }
    d
}

/// Render a fully described image by feeding scanlines to the device,
/// tracking how much of each plane the device consumed. `total` is the
/// byte count to deliver; for data left encoded for a downstream codec
/// it is the encoded length rather than the raster size.
fn render_image(
    device: &mut dyn Device,
    pim: &PixelImage,
    data: &[u8],
    mask_data: Option<&[u8]>,
    total: usize,
) -> Result<()> {
    let line = pim.row_bytes();
    if data.len() < total {
        return Err(Error::syntax("image data too short for declared dimensions"));
    }

    device.begin_image(pim)?;
    let fed = (|| -> Result<()> {
        let mut main_used = 0usize;
        let mut mask_used = 0usize;
        while main_used < total {
            // Offer up to the next scanline boundary.
            let line_end = total.min(main_used + (line - main_used % line));
            let main_plane = &data[main_used..line_end];
            let progressed = match mask_data {
                Some(mask) => {
                    let planes = [&mask[mask_used.min(mask.len())..], main_plane];
                    let mut used = [0usize; 2];
                    device.image_planes(&planes, &mut used)?;
                    mask_used += used[0];
                    main_used += used[1];
                    used[0] + used[1] > 0
                }
                None => {
                    let planes = [main_plane];
                    let mut used = [0usize; 1];
                    device.image_planes(&planes, &mut used)?;
                    main_used += used[0];
                    used[0] > 0
                }
            };
            if !progressed {
                return Err(Error::generic("device consumed no image data"));
            }
        }
        Ok(())
    })();
    let ended = device.end_image();
    fed?;
    ended
}

/// Render one image object. `source` is the enclosing content stream and
/// is required (and consumed from) only for inline images.
pub fn do_image(
    ctx: &mut Context,
    device: &mut dyn Device,
    image: &Object,
    mut source: Option<&mut Stream>,
    inline: bool,
) -> Result<()> {
    let mut image = ctx.store.resolve(image).0;
    let dict = image
        .dict()
        .ok_or_else(|| Error::typecheck("image is not a dictionary or stream"))?;
    let mut info = image_info(&ctx.store, dict)?;

    // A print-preferred alternate replaces the image wholesale.
    if !inline {
        if let Some(alternates) = info.alternates.clone() {
            if let Some(substitute) = select_alternate(&ctx.store, &alternates) {
                debug!("substituting DefaultForPrinting alternate image");
                image = substitute;
                let dict = image
                    .dict()
                    .ok_or_else(|| Error::typecheck("alternate image is not a stream"))?;
                info = image_info(&ctx.store, dict)?;
            }
        }
    }

    if info.width == 0 || info.height == 0 {
        debug!("image with zero extent, nothing to draw");
        return Ok(());
    }

    // JPX data carries its own header; scan it before settling layout.
    let encoded = Stream::from_slice(image.stream_data().unwrap_or(&[]));
    let jpx = if info.is_jpx && !inline {
        scan_jpx_header(&mut encoded.clone())?
    } else {
        None
    };

    if info.smask.is_some() {
        warn!("ignoring unsupported image SMask");
    }

    // Settle components, colorspace and bit depth.
    let mut bpc = info.bpc;
    let (comps, colorspace): (u8, Option<Colorspace>) = if info.image_mask {
        (1, None)
    } else if let Some(cs_obj) = &info.colorspace {
        let cs = create_colorspace(&ctx.store, cs_obj)?;
        (cs.n(), Some(cs))
    } else if let Some(jpx) = &jpx {
        let cs = match jpx.icc_range {
            Some((off, len)) => icc_colorspace_from_stream(&encoded, off, len)?,
            None => jpx_enum_colorspace(jpx.cs_enum)?,
        };
        bpc = if jpx.bpc == 12 { 16 } else { jpx.bpc };
        if ctx.options.debug_images {
            debug!(comps = jpx.comps, bpc, cs_enum = jpx.cs_enum, "JPX header scan");
        }
        (cs.n(), Some(cs))
    } else {
        // No colorspace and no way to infer one: swallow the data rather
        // than guess at its meaning.
        let comps = device.components();
        debug!(comps, "image without colorspace, flushing data");
        if inline {
            if let Some(src) = source.as_deref_mut() {
                let skip = row_bytes(info.width, comps, bpc) * info.height as usize;
                src.seek(SeekFrom::Current(skip as i64))?;
            }
        }
        return Ok(());
    };

    if let Some(jpx) = &jpx {
        if jpx.comps as u8 != comps {
            debug!(
                header = jpx.comps,
                colorspace = comps,
                "JPX component count disagrees with colorspace"
            );
        }
    }

    // Masking.
    let mask = resolve_mask(&ctx.store, &info)?;
    let kind = match &mask {
        MaskState::None if info.image_mask => PixelImageKind::ImageMask,
        MaskState::None => PixelImageKind::Direct,
        MaskState::ColorKey(ranges) => {
            if ranges.len() != 2 * comps as usize {
                return Err(Error::range(format!(
                    "color key mask has {} entries, expected {}",
                    ranges.len(),
                    2 * comps
                )));
            }
            let mut r: SmallVec<[u32; 8]> = SmallVec::new();
            for &v in ranges {
                if v < 0 || v >= (1i64 << bpc.min(31)) {
                    return Err(Error::range("color key value exceeds sample range"));
                }
                r.push(v as u32);
            }
            PixelImageKind::ColorKeyMask { ranges: r }
        }
        MaskState::Stencil { mask, .. } => PixelImageKind::StencilMask {
            mask: Box::new(mask.clone()),
        },
    };

    let decode = match &info.decode {
        Some(d) => {
            if d.len() != 2 * comps as usize {
                return Err(Error::range(format!(
                    "Decode has {} entries, expected {}",
                    d.len(),
                    2 * comps
                )));
            }
            SmallVec::from_slice(d)
        }
        None => default_decode(colorspace.as_ref(), comps),
    };

    let pim = PixelImage {
        width: info.width,
        height: info.height,
        bpc,
        n: comps,
        colorspace,
        decode,
        interpolate: info.interpolate,
        matrix: image_matrix(info.width, info.height),
        kind,
    };

    // Decode pixel data. Inline images read from the enclosing content
    // stream; referenced images carry their own.
    let data = if inline {
        let src = source
            .as_deref_mut()
            .ok_or_else(|| Error::generic("inline image without a source stream"))?;
        let total = pim.data_bytes();
        if info.filters.is_empty() {
            let mut buf = vec![0u8; total];
            src.read_exact(&mut buf)?;
            bytes::Bytes::from(buf)
        } else {
            let encoded = match info.length {
                Some(len) if len >= 0 => {
                    let mut buf = vec![0u8; len as usize];
                    src.read_exact(&mut buf)?;
                    buf
                }
                _ => {
                    let mut buf = vec![0u8; src.remaining()];
                    src.read(&mut buf);
                    buf
                }
            };
            decode_filters(&encoded, &info.filters)?
        }
    } else {
        decode_filters(image.stream_data().unwrap_or(&[]), &info.filters)?
    };

    // Data bound for a downstream codec is delivered whole and encoded.
    let still_encoded = info.filters.last().map_or(false, Filter::is_passthrough);
    let total = if still_encoded {
        data.len()
    } else {
        pim.data_bytes()
    };

    match &mask {
        MaskState::Stencil { data: mask_data, .. } => {
            render_image(device, &pim, &data, Some(mask_data), total)
        }
        _ => render_image(device, &pim, &data, None, total),
    }
}

// ============================================================================
// Operators
// ============================================================================

/// The `Do` operator: paint a named XObject from the current resources.
pub fn do_xobject(
    ctx: &mut Context,
    device: &mut dyn Device,
    stream_dict: &Dict,
    page_dict: &Dict,
    name: &Name,
) -> Result<()> {
    ctx.loops.mark()?;
    let r = do_xobject_inner(ctx, device, stream_dict, page_dict, name);
    ctx.loops.clear_to_mark();
    match r {
        Ok(()) => Ok(()),
        Err(e) if ctx.options.stop_on_error => Err(e),
        Err(e) => {
            warn!(xobject = %name, error = %e, "ignoring failed XObject");
            Ok(())
        }
    }
}

fn do_xobject_inner(
    ctx: &mut Context,
    device: &mut dyn Device,
    stream_dict: &Dict,
    page_dict: &Dict,
    name: &Name,
) -> Result<()> {
    let (xobject, num) = ctx
        .store
        .find_resource_with_num("XObject", name, stream_dict, page_dict)?;
    if let Some(num) = num {
        if ctx.loops.check_and_add(num) {
            debug!(xobject = %name, "circular XObject reference, not painting");
            return Ok(());
        }
    }
    let dict = xobject
        .dict()
        .ok_or_else(|| Error::typecheck("XObject is not a stream"))?;
    match ctx.store.dict_get_name(dict, "Subtype") {
        Some(subtype) if subtype == "Image" => do_image(ctx, device, &xobject, None, false),
        Some(subtype) if subtype == "Form" => ctx.run_content(device, &xobject, page_dict),
        Some(subtype) if subtype == "PS" => {
            warn!("ignoring deprecated PostScript XObject");
            Ok(())
        }
        other => Err(Error::typecheck(format!(
            "XObject with bad Subtype {:?}",
            other
        ))),
    }
}

/// The `BI`/`ID`/`EI` inline image: the dictionary has been parsed by the
/// tokenizer and `source` sits at the first data byte.
pub fn do_inline_image(
    ctx: &mut Context,
    device: &mut dyn Device,
    image_dict: Dict,
    source: &mut Stream,
) -> Result<()> {
    do_image(ctx, device, &Object::Dict(image_dict), Some(source), true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dict;
    use crate::fitz::device::{DeviceEvent, RecordingDevice};
    use crate::pdf::object::{ObjRef, ObjectStore};

    fn gray_image_dict(w: i64, h: i64) -> Dict {
        dict![
            "Subtype" => Object::Name(Name::new("Image")),
            "Width" => Object::Int(w),
            "Height" => Object::Int(h),
            "BitsPerComponent" => Object::Int(8),
            "ColorSpace" => Object::Name(Name::new("DeviceGray")),
        ]
    }

    fn ctx() -> Context {
        Context::new(ObjectStore::new())
    }

    // ---- dictionary parsing ----

    #[test]
    fn test_info_requires_dimensions() {
        let store = ObjectStore::new();
        let d = dict!["Width" => Object::Int(4)];
        assert!(matches!(image_info(&store, &d), Err(Error::Syntax(_))));
    }

    #[test]
    fn test_info_abbreviated_keys() {
        let store = ObjectStore::new();
        let d = dict![
            "W" => Object::Int(4),
            "H" => Object::Int(2),
            "BPC" => Object::Int(4),
            "IM" => Object::Bool(false),
            "F" => Object::Name(Name::new("AHx")),
        ];
        let info = image_info(&store, &d).unwrap();
        assert_eq!((info.width, info.height, info.bpc), (4, 2, 4));
        assert_eq!(info.filters, vec![Filter::AsciiHex]);
    }

    #[test]
    fn test_info_rejects_oversized_dimensions() {
        let store = ObjectStore::new();
        let d = dict![
            "W" => Object::Int(1i64 << 33),
            "H" => Object::Int(1),
        ];
        assert!(matches!(image_info(&store, &d), Err(Error::Range(_))));
        let d = dict![
            "W" => Object::Int(1),
            "H" => Object::Int(-1),
        ];
        assert!(matches!(image_info(&store, &d), Err(Error::Range(_))));
    }

    #[test]
    fn test_info_bpc_defaults_to_one() {
        let store = ObjectStore::new();
        let d = dict!["W" => Object::Int(1), "H" => Object::Int(1)];
        assert_eq!(image_info(&store, &d).unwrap().bpc, 1);
    }

    #[test]
    fn test_info_rejects_bad_bpc() {
        let store = ObjectStore::new();
        let d = dict![
            "W" => Object::Int(1),
            "H" => Object::Int(1),
            "BPC" => Object::Int(3),
        ];
        assert!(matches!(image_info(&store, &d), Err(Error::Range(_))));
    }

    #[test]
    fn test_info_mask_with_deep_bpc_rejected() {
        let store = ObjectStore::new();
        let d = dict![
            "W" => Object::Int(1),
            "H" => Object::Int(1),
            "IM" => Object::Bool(true),
            "BPC" => Object::Int(8),
        ];
        assert!(matches!(image_info(&store, &d), Err(Error::Range(_))));
    }

    #[test]
    fn test_info_detects_jpx_filter() {
        let store = ObjectStore::new();
        let d = dict![
            "W" => Object::Int(1),
            "H" => Object::Int(1),
            "Filter" => Object::Array(vec![
                Object::Name(Name::new("ASCIIHexDecode")),
                Object::Name(Name::new("JPXDecode")),
            ]),
        ];
        assert!(image_info(&store, &d).unwrap().is_jpx);
    }

    // ---- JPX scanner ----

    fn jpx_box(tag: &[u8; 4], payload: &[u8]) -> Vec<u8> {
        let mut v = Vec::with_capacity(8 + payload.len());
        v.extend_from_slice(&((payload.len() as u32) + 8).to_be_bytes());
        v.extend_from_slice(tag);
        v.extend_from_slice(payload);
        v
    }

    fn ihdr_payload(comps: u16, raw_bpc: u8) -> Vec<u8> {
        let mut p = vec![0u8; LEN_IHDR];
        p[0..4].copy_from_slice(&32u32.to_be_bytes()); // height
        p[4..8].copy_from_slice(&32u32.to_be_bytes()); // width
        p[8..10].copy_from_slice(&comps.to_be_bytes());
        p[10] = raw_bpc;
        p
    }

    fn jp2_with(inner: Vec<Vec<u8>>) -> Vec<u8> {
        let mut header = Vec::new();
        for b in inner {
            header.extend_from_slice(&b);
        }
        let mut out = jpx_box(b"jP  ", &[0x0d, 0x0a, 0x87, 0x0a]);
        out.extend(jpx_box(b"ftyp", b"jp2 \x00\x00\x00\x00jp2 "));
        out.extend(jpx_box(b"jp2h", &header));
        out
    }

    #[test]
    fn test_jpx_scan_enumerated_colourspace() {
        let mut colr = vec![1u8, 0, 0];
        colr.extend_from_slice(&16u32.to_be_bytes()); // sRGB
        let data = jp2_with(vec![
            jpx_box(b"ihdr", &ihdr_payload(3, 7)),
            jpx_box(b"colr", &colr),
        ]);
        let info = scan_jpx_header(&mut Stream::from_vec(data)).unwrap().unwrap();
        assert_eq!(info.comps, 3);
        assert_eq!(info.bpc, 8);
        assert_eq!(info.cs_enum, 16);
        assert!(info.icc_range.is_none());
    }

    #[test]
    fn test_jpx_scan_icc_profile_range() {
        let mut colr = vec![2u8, 0, 0];
        colr.extend_from_slice(&[0xAA; 40]); // profile bytes
        let data = jp2_with(vec![
            jpx_box(b"ihdr", &ihdr_payload(4, 7)),
            jpx_box(b"colr", &colr),
        ]);
        let info = scan_jpx_header(&mut Stream::from_vec(data.clone()))
            .unwrap()
            .unwrap();
        let (off, len) = info.icc_range.unwrap();
        assert_eq!(len, 40);
        assert_eq!(&data[off as usize..off as usize + 4], &[0xAA; 4]);
        assert_eq!(info.cs_enum, 0);
    }

    #[test]
    fn test_jpx_scan_bpcc_overrides_depth() {
        let data = jp2_with(vec![
            jpx_box(b"ihdr", &ihdr_payload(3, 255)),
            jpx_box(b"bpcc", &[11, 11, 11]),
        ]);
        let info = scan_jpx_header(&mut Stream::from_vec(data)).unwrap().unwrap();
        assert_eq!(info.bpc, 12);
    }

    #[test]
    fn test_jpx_scan_palette_depth() {
        let data = jp2_with(vec![
            jpx_box(b"ihdr", &ihdr_payload(1, 7)),
            jpx_box(b"pclr", &[0, 16, 1, 0x07]),
        ]);
        let info = scan_jpx_header(&mut Stream::from_vec(data)).unwrap().unwrap();
        assert_eq!(info.bpc, 8);
    }

    #[test]
    fn test_jpx_scan_first_colr_wins() {
        let mut colr1 = vec![1u8, 0, 0];
        colr1.extend_from_slice(&17u32.to_be_bytes());
        let mut colr2 = vec![1u8, 0, 0];
        colr2.extend_from_slice(&16u32.to_be_bytes());
        let data = jp2_with(vec![
            jpx_box(b"ihdr", &ihdr_payload(1, 7)),
            jpx_box(b"colr", &colr1),
            jpx_box(b"colr", &colr2),
        ]);
        let info = scan_jpx_header(&mut Stream::from_vec(data)).unwrap().unwrap();
        assert_eq!(info.cs_enum, 17);
    }

    #[test]
    fn test_jpx_scan_without_header_box() {
        // Signature and file-type boxes only; the header box never comes.
        let mut data = jpx_box(b"jP  ", &[0x0d, 0x0a, 0x87, 0x0a]);
        data.extend(jpx_box(b"ftyp", b"jp2 \x00\x00\x00\x00jp2 "));
        assert_eq!(scan_jpx_header(&mut Stream::from_vec(data)).unwrap(), None);
    }

    #[test]
    fn test_jpx_scan_malformed_ihdr() {
        let data = jp2_with(vec![jpx_box(b"ihdr", &[0u8; 10])]);
        assert!(scan_jpx_header(&mut Stream::from_vec(data)).is_err());
    }

    #[test]
    fn test_jpx_scan_truncated_box() {
        let mut data = jpx_box(b"jP  ", &[0x0d, 0x0a, 0x87, 0x0a]);
        data.extend_from_slice(&100u32.to_be_bytes());
        data.extend_from_slice(b"ftyp");
        assert!(scan_jpx_header(&mut Stream::from_vec(data)).is_err());
    }

    #[test]
    fn test_jpx_scan_tiny_box_length() {
        let mut data = vec![];
        data.extend_from_slice(&4u32.to_be_bytes());
        data.extend_from_slice(b"jp2h");
        let err = scan_jpx_header(&mut Stream::from_vec(data)).unwrap_err();
        assert!(matches!(err, Error::Limit(_)));
    }

    // ---- rendering ----

    #[test]
    fn test_gray_image_renders_line_at_a_time() {
        let mut ctx = ctx();
        let mut dev = RecordingDevice::new();
        let image = Object::Stream {
            dict: gray_image_dict(4, 3),
            data: vec![0u8; 12],
        };
        do_image(&mut ctx, &mut dev, &image, None, false).unwrap();
        assert!(matches!(
            dev.events.first(),
            Some(DeviceEvent::BeginImage { width: 4, height: 3, n: 1, bpc: 8, kind: "direct" })
        ));
        assert_eq!(dev.count(|e| matches!(e, DeviceEvent::ImagePlanes { .. })), 3);
        assert!(matches!(dev.events.last(), Some(DeviceEvent::EndImage)));
    }

    #[test]
    fn test_partial_consumption_resumes() {
        let mut ctx = ctx();
        let mut dev = RecordingDevice {
            plane_budget: Some(3),
            ..RecordingDevice::new()
        };
        let image = Object::Stream {
            dict: gray_image_dict(4, 2),
            data: vec![0u8; 8],
        };
        do_image(&mut ctx, &mut dev, &image, None, false).unwrap();
        let fed: usize = dev
            .events
            .iter()
            .filter_map(|e| match e {
                DeviceEvent::ImagePlanes { plane_sizes } => Some(plane_sizes.iter().sum::<usize>()),
                _ => None,
            })
            .sum();
        assert_eq!(fed, 8);
    }

    #[test]
    fn test_short_data_is_syntax_error() {
        let mut ctx = ctx();
        let mut dev = RecordingDevice::new();
        let image = Object::Stream {
            dict: gray_image_dict(4, 3),
            data: vec![0u8; 5],
        };
        assert!(matches!(
            do_image(&mut ctx, &mut dev, &image, None, false),
            Err(Error::Syntax(_))
        ));
    }

    #[test]
    fn test_zero_extent_image_draws_nothing() {
        let mut ctx = ctx();
        let mut dev = RecordingDevice::new();
        let image = Object::Stream {
            dict: gray_image_dict(0, 3),
            data: vec![],
        };
        do_image(&mut ctx, &mut dev, &image, None, false).unwrap();
        assert!(dev.events.is_empty());
    }

    #[test]
    fn test_image_mask_kind() {
        let mut ctx = ctx();
        let mut dev = RecordingDevice::new();
        let image = Object::Stream {
            dict: dict![
                "Width" => Object::Int(8),
                "Height" => Object::Int(2),
                "ImageMask" => Object::Bool(true),
            ],
            data: vec![0u8; 2],
        };
        do_image(&mut ctx, &mut dev, &image, None, false).unwrap();
        assert!(matches!(
            dev.events.first(),
            Some(DeviceEvent::BeginImage { kind: "imagemask", bpc: 1, n: 1, .. })
        ));
    }

    #[test]
    fn test_color_key_mask() {
        let mut ctx = ctx();
        let mut dev = RecordingDevice::new();
        let mut d = gray_image_dict(2, 2);
        d.insert(
            Name::new("Mask"),
            Object::Array(vec![Object::Int(250), Object::Int(255)]),
        );
        let image = Object::Stream { dict: d, data: vec![0u8; 4] };
        do_image(&mut ctx, &mut dev, &image, None, false).unwrap();
        assert!(matches!(
            dev.events.first(),
            Some(DeviceEvent::BeginImage { kind: "colorkey", .. })
        ));
    }

    #[test]
    fn test_color_key_mask_wrong_arity() {
        let mut ctx = ctx();
        let mut dev = RecordingDevice::new();
        let mut d = gray_image_dict(2, 2);
        d.insert(Name::new("Mask"), Object::Array(vec![Object::Int(250)]));
        let image = Object::Stream { dict: d, data: vec![0u8; 4] };
        assert!(matches!(
            do_image(&mut ctx, &mut dev, &image, None, false),
            Err(Error::Range(_))
        ));
    }

    #[test]
    fn test_stencil_mask_feeds_two_planes() {
        let mut ctx = ctx();
        let mut dev = RecordingDevice::new();
        let mask = Object::Stream {
            dict: dict![
                "Width" => Object::Int(8),
                "Height" => Object::Int(2),
                "ImageMask" => Object::Bool(true),
            ],
            data: vec![0xFFu8; 2],
        };
        let mut d = gray_image_dict(8, 2);
        d.insert(Name::new("Mask"), mask);
        let image = Object::Stream { dict: d, data: vec![0u8; 16] };
        do_image(&mut ctx, &mut dev, &image, None, false).unwrap();
        assert!(matches!(
            dev.events.first(),
            Some(DeviceEvent::BeginImage { kind: "stencil", .. })
        ));
        match &dev.events[1] {
            DeviceEvent::ImagePlanes { plane_sizes } => assert_eq!(plane_sizes.len(), 2),
            other => panic!("expected planes, got {:?}", other),
        }
    }

    #[test]
    fn test_stencil_mask_must_be_image_mask() {
        let mut ctx = ctx();
        let mut dev = RecordingDevice::new();
        let mask = Object::Stream {
            dict: gray_image_dict(8, 2),
            data: vec![0u8; 16],
        };
        let mut d = gray_image_dict(8, 2);
        d.insert(Name::new("Mask"), mask);
        let image = Object::Stream { dict: d, data: vec![0u8; 16] };
        assert!(matches!(
            do_image(&mut ctx, &mut dev, &image, None, false),
            Err(Error::Type(_))
        ));
    }

    #[test]
    fn test_decode_defaults_for_indexed() {
        let mut ctx = ctx();
        let mut dev = RecordingDevice::new();
        let mut d = dict![
            "Width" => Object::Int(2),
            "Height" => Object::Int(1),
            "BitsPerComponent" => Object::Int(8),
        ];
        d.insert(
            Name::new("ColorSpace"),
            Object::Array(vec![
                Object::Name(Name::new("Indexed")),
                Object::Name(Name::new("DeviceRGB")),
                Object::Int(15),
                Object::String(vec![0; 48]),
            ]),
        );
        let image = Object::Stream { dict: d, data: vec![0u8; 2] };
        // Renders as a 1-component image over the palette.
        do_image(&mut ctx, &mut dev, &image, None, false).unwrap();
        assert!(matches!(
            dev.events.first(),
            Some(DeviceEvent::BeginImage { n: 1, .. })
        ));
    }

    #[test]
    fn test_no_colorspace_flushes_silently() {
        let mut ctx = ctx();
        let mut dev = RecordingDevice::new();
        let image = Object::Stream {
            dict: dict![
                "Width" => Object::Int(4),
                "Height" => Object::Int(4),
                "BitsPerComponent" => Object::Int(8),
            ],
            data: vec![0u8; 48],
        };
        do_image(&mut ctx, &mut dev, &image, None, false).unwrap();
        assert!(dev.events.is_empty());
    }

    #[test]
    fn test_inline_no_colorspace_skips_data() {
        let mut ctx = ctx();
        let mut dev = RecordingDevice {
            native_components: 3,
            ..RecordingDevice::new()
        };
        let d = dict![
            "W" => Object::Int(2),
            "H" => Object::Int(2),
            "BPC" => Object::Int(8),
        ];
        let mut src = Stream::from_vec(vec![0u8; 20]);
        do_inline_image(&mut ctx, &mut dev, d, &mut src).unwrap();
        // 2*2 pixels, 3 components, 8 bpc = 12 bytes skipped.
        assert_eq!(src.tell(), 12);
        assert!(dev.events.is_empty());
    }

    #[test]
    fn test_inline_image_reads_exact_bytes() {
        let mut ctx = ctx();
        let mut dev = RecordingDevice::new();
        let d = dict![
            "W" => Object::Int(2),
            "H" => Object::Int(2),
            "BPC" => Object::Int(8),
            "CS" => Object::Name(Name::new("G")),
        ];
        let mut src = Stream::from_vec(vec![9u8; 10]);
        do_inline_image(&mut ctx, &mut dev, d, &mut src).unwrap();
        assert_eq!(src.tell(), 4);
        assert_eq!(dev.count(|e| matches!(e, DeviceEvent::EndImage)), 1);
    }

    #[test]
    fn test_alternate_substitution() {
        let mut store = ObjectStore::new();
        store.insert(
            10,
            Object::Stream {
                dict: gray_image_dict(2, 1),
                data: vec![0u8; 2],
            },
        );
        store.insert(
            11,
            Object::Array(vec![Object::Dict(dict![
                "DefaultForPrinting" => Object::Bool(true),
                "Image" => Object::Ref(ObjRef::new(10, 0)),
            ])]),
        );
        let mut ctx = Context::new(store);
        let mut dev = RecordingDevice::new();
        let image = Object::Stream {
            dict: dict![
                "Width" => Object::Int(64),
                "Height" => Object::Int(64),
                "BitsPerComponent" => Object::Int(8),
                "ColorSpace" => Object::Name(Name::new("DeviceRGB")),
                "Alternates" => Object::Ref(ObjRef::new(11, 0)),
            ],
            data: vec![0u8; 64 * 64 * 3],
        };
        do_image(&mut ctx, &mut dev, &image, None, false).unwrap();
        // The 2x1 alternate was painted, not the 64x64 original.
        assert!(matches!(
            dev.events.first(),
            Some(DeviceEvent::BeginImage { width: 2, height: 1, .. })
        ));
    }

    #[test]
    fn test_alternate_not_for_printing_ignored() {
        let mut store = ObjectStore::new();
        store.insert(
            11,
            Object::Array(vec![Object::Dict(dict![
                "DefaultForPrinting" => Object::Bool(false),
                "Image" => Object::Int(0),
            ])]),
        );
        let mut ctx = Context::new(store);
        let mut dev = RecordingDevice::new();
        let mut d = gray_image_dict(2, 1);
        d.insert(Name::new("Alternates"), Object::Ref(ObjRef::new(11, 0)));
        let image = Object::Stream { dict: d, data: vec![0u8; 2] };
        do_image(&mut ctx, &mut dev, &image, None, false).unwrap();
        assert!(matches!(
            dev.events.first(),
            Some(DeviceEvent::BeginImage { width: 2, .. })
        ));
    }

    // ---- Do operator ----

    fn page_with_xobject(xobj: Object) -> Dict {
        dict![
            "Resources" => Object::Dict(dict![
                "XObject" => Object::Dict(dict!["X0" => xobj]),
            ]),
        ]
    }

    #[test]
    fn test_do_paints_image_xobject() {
        let mut ctx = ctx();
        let mut dev = RecordingDevice::new();
        let page = page_with_xobject(Object::Stream {
            dict: gray_image_dict(2, 2),
            data: vec![0u8; 4],
        });
        do_xobject(&mut ctx, &mut dev, &Dict::new(), &page, &Name::new("X0")).unwrap();
        assert_eq!(dev.count(|e| matches!(e, DeviceEvent::EndImage)), 1);
        assert_eq!(ctx.loops.depth(), 0);
    }

    #[test]
    fn test_do_missing_xobject_tolerated() {
        let mut ctx = ctx();
        let mut dev = RecordingDevice::new();
        do_xobject(&mut ctx, &mut dev, &Dict::new(), &Dict::new(), &Name::new("X9")).unwrap();
        assert!(dev.events.is_empty());
    }

    #[test]
    fn test_do_missing_xobject_fatal_when_strict() {
        let mut ctx = Context::with_options(
            ObjectStore::new(),
            crate::pdf::interpret::InterpreterOptions {
                stop_on_error: true,
                ..Default::default()
            },
        );
        let mut dev = RecordingDevice::new();
        let r = do_xobject(&mut ctx, &mut dev, &Dict::new(), &Dict::new(), &Name::new("X9"));
        assert!(matches!(r, Err(Error::Undefined(_))));
    }

    #[test]
    fn test_do_ps_xobject_swallowed() {
        let mut ctx = ctx();
        let mut dev = RecordingDevice::new();
        let page = page_with_xobject(Object::Stream {
            dict: dict!["Subtype" => Object::Name(Name::new("PS"))],
            data: b"postscript".to_vec(),
        });
        do_xobject(&mut ctx, &mut dev, &Dict::new(), &page, &Name::new("X0")).unwrap();
        assert!(dev.events.is_empty());
    }
}
