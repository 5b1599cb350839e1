//! Image rendering end to end: XObject dispatch, inline images, masks
//! and the JPX header pre-scan.

use std::io::Write;

use pdfink::dict;
use pdfink::fitz::device::{DeviceEvent, RecordingDevice};
use pdfink::fitz::stream::Stream;
use pdfink::pdf::image::{do_inline_image, do_xobject};
use pdfink::pdf::{Context, Dict, Name, ObjRef, Object, ObjectStore};

fn page_with_xobjects(entries: Vec<(&str, Object)>) -> Dict {
    let mut xobjects = Dict::new();
    for (name, obj) in entries {
        xobjects.insert(Name::new(name), obj);
    }
    dict![
        "Resources" => Object::Dict(dict![
            "XObject" => Object::Dict(xobjects),
        ]),
    ]
}

fn rgb_image(width: i64, height: i64) -> Object {
    Object::Stream {
        dict: dict![
            "Subtype" => Object::Name(Name::new("Image")),
            "Width" => Object::Int(width),
            "Height" => Object::Int(height),
            "BitsPerComponent" => Object::Int(8),
            "ColorSpace" => Object::Name(Name::new("DeviceRGB")),
        ],
        data: vec![0u8; (width * height * 3) as usize],
    }
}

#[test]
fn rgb_xobject_renders_by_scanline() {
    let mut ctx = Context::new(ObjectStore::new());
    let mut dev = RecordingDevice::new();
    let page = page_with_xobjects(vec![("Im0", rgb_image(4, 2))]);
    do_xobject(&mut ctx, &mut dev, &Dict::new(), &page, &Name::new("Im0")).unwrap();
    assert!(matches!(
        dev.events.first(),
        Some(DeviceEvent::BeginImage { width: 4, height: 2, n: 3, bpc: 8, .. })
    ));
    assert_eq!(dev.count(|e| matches!(e, DeviceEvent::ImagePlanes { .. })), 2);
    assert!(matches!(dev.events.last(), Some(DeviceEvent::EndImage)));
}

#[test]
fn image_referenced_indirectly() {
    let mut store = ObjectStore::new();
    store.insert(3, rgb_image(2, 2));
    let mut ctx = Context::new(store);
    let mut dev = RecordingDevice::new();
    let page = page_with_xobjects(vec![("Im0", Object::Ref(ObjRef::new(3, 0)))]);
    do_xobject(&mut ctx, &mut dev, &Dict::new(), &page, &Name::new("Im0")).unwrap();
    assert_eq!(dev.count(|e| matches!(e, DeviceEvent::EndImage)), 1);
}

#[test]
fn flate_compressed_image_is_decoded() {
    let raw = vec![0x55u8; 8]; // 4x2 gray
    let mut enc = flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::fast());
    enc.write_all(&raw).unwrap();
    let compressed = enc.finish().unwrap();

    let mut ctx = Context::new(ObjectStore::new());
    let mut dev = RecordingDevice::new();
    let image = Object::Stream {
        dict: dict![
            "Subtype" => Object::Name(Name::new("Image")),
            "Width" => Object::Int(4),
            "Height" => Object::Int(2),
            "BitsPerComponent" => Object::Int(8),
            "ColorSpace" => Object::Name(Name::new("DeviceGray")),
            "Filter" => Object::Name(Name::new("FlateDecode")),
        ],
        data: compressed,
    };
    let page = page_with_xobjects(vec![("Im0", image)]);
    do_xobject(&mut ctx, &mut dev, &Dict::new(), &page, &Name::new("Im0")).unwrap();
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
fn stencil_masked_image_carries_mask_plane() {
    let mask = Object::Stream {
        dict: dict![
            "Width" => Object::Int(16),
            "Height" => Object::Int(2),
            "ImageMask" => Object::Bool(true),
        ],
        data: vec![0xF0u8; 4],
    };
    let mut image_dict = dict![
        "Subtype" => Object::Name(Name::new("Image")),
        "Width" => Object::Int(16),
        "Height" => Object::Int(2),
        "BitsPerComponent" => Object::Int(8),
        "ColorSpace" => Object::Name(Name::new("DeviceGray")),
    ];
    image_dict.insert(Name::new("Mask"), mask);
    let image = Object::Stream {
        dict: image_dict,
        data: vec![0u8; 32],
    };

    let mut ctx = Context::new(ObjectStore::new());
    let mut dev = RecordingDevice::new();
    let page = page_with_xobjects(vec![("Im0", image)]);
    do_xobject(&mut ctx, &mut dev, &Dict::new(), &page, &Name::new("Im0")).unwrap();
    assert!(matches!(
        dev.events.first(),
        Some(DeviceEvent::BeginImage { kind: "stencil", .. })
    ));
    match &dev.events[1] {
        DeviceEvent::ImagePlanes { plane_sizes } => {
            assert_eq!(plane_sizes.len(), 2);
            assert_eq!(plane_sizes[0], 4); // whole mask up front
        }
        other => panic!("expected planes, got {:?}", other),
    }
}

#[test]
fn broken_image_tolerated_in_lenient_mode() {
    let mut ctx = Context::new(ObjectStore::new());
    let mut dev = RecordingDevice::new();
    let image = Object::Stream {
        dict: dict![
            "Subtype" => Object::Name(Name::new("Image")),
            "Width" => Object::Int(4),
            // Height missing
        ],
        data: Vec::new(),
    };
    let page = page_with_xobjects(vec![("Im0", image)]);
    do_xobject(&mut ctx, &mut dev, &Dict::new(), &page, &Name::new("Im0")).unwrap();
    assert!(dev.events.is_empty());
}

#[test]
fn inline_image_consumes_its_data_only() {
    let mut ctx = Context::new(ObjectStore::new());
    let mut dev = RecordingDevice::new();
    let d = dict![
        "W" => Object::Int(3),
        "H" => Object::Int(2),
        "BPC" => Object::Int(8),
        "CS" => Object::Name(Name::new("G")),
    ];
    let mut content = Stream::from_vec(vec![7u8; 32]);
    do_inline_image(&mut ctx, &mut dev, d, &mut content).unwrap();
    assert_eq!(content.tell(), 6);
    assert_eq!(dev.count(|e| matches!(e, DeviceEvent::EndImage)), 1);
}

// ---- JPX ----

fn jpx_box(tag: &[u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut v = Vec::with_capacity(8 + payload.len());
    v.extend_from_slice(&((payload.len() as u32) + 8).to_be_bytes());
    v.extend_from_slice(tag);
    v.extend_from_slice(payload);
    v
}

fn jp2_gray_header() -> Vec<u8> {
    let mut ihdr = vec![0u8; 14];
    ihdr[0..4].copy_from_slice(&2u32.to_be_bytes());
    ihdr[4..8].copy_from_slice(&2u32.to_be_bytes());
    ihdr[8..10].copy_from_slice(&1u16.to_be_bytes()); // 1 component
    ihdr[10] = 7; // 8 bits
    let mut colr = vec![1u8, 0, 0];
    colr.extend_from_slice(&17u32.to_be_bytes()); // greyscale

    let mut header = jpx_box(b"ihdr", &ihdr);
    header.extend(jpx_box(b"colr", &colr));

    let mut data = jpx_box(b"jP  ", &[0x0d, 0x0a, 0x87, 0x0a]);
    data.extend(jpx_box(b"ftyp", b"jp2 \x00\x00\x00\x00jp2 "));
    data.extend(jpx_box(b"jp2h", &header));
    data
}

#[test]
fn jpx_image_takes_layout_from_its_header() {
    let mut ctx = Context::new(ObjectStore::new());
    let mut dev = RecordingDevice::new();
    let image = Object::Stream {
        dict: dict![
            "Subtype" => Object::Name(Name::new("Image")),
            "Width" => Object::Int(2),
            "Height" => Object::Int(2),
            // No ColorSpace and no BitsPerComponent: both come from the
            // codestream header.
            "Filter" => Object::Name(Name::new("JPXDecode")),
        ],
        data: jp2_gray_header(),
    };
    let page = page_with_xobjects(vec![("Im0", image)]);
    do_xobject(&mut ctx, &mut dev, &Dict::new(), &page, &Name::new("Im0")).unwrap();
    assert!(matches!(
        dev.events.first(),
        Some(DeviceEvent::BeginImage { n: 1, bpc: 8, .. })
    ));
    assert!(matches!(dev.events.last(), Some(DeviceEvent::EndImage)));
}

#[test]
fn jpx_image_without_header_box_is_skipped() {
    let mut ctx = Context::new(ObjectStore::new());
    let mut dev = RecordingDevice::new();
    // Well-formed boxes, but no jp2h anywhere: nothing to infer a
    // colorspace from, so the image is quietly passed over.
    let mut data = jpx_box(b"jP  ", &[0x0d, 0x0a, 0x87, 0x0a]);
    data.extend(jpx_box(b"ftyp", b"jp2 \x00\x00\x00\x00jp2 "));
    let image = Object::Stream {
        dict: dict![
            "Subtype" => Object::Name(Name::new("Image")),
            "Width" => Object::Int(2),
            "Height" => Object::Int(2),
            "Filter" => Object::Name(Name::new("JPXDecode")),
        ],
        data,
    };
    let page = page_with_xobjects(vec![("Im0", image)]);
    do_xobject(&mut ctx, &mut dev, &Dict::new(), &page, &Name::new("Im0")).unwrap();
    assert!(dev.events.is_empty());
}

#[test]
fn jpx_image_with_garbage_header_fails_strict() {
    let mut ctx = Context::with_options(
        ObjectStore::new(),
        pdfink::InterpreterOptions {
            stop_on_error: true,
            ..Default::default()
        },
    );
    let mut dev = RecordingDevice::new();
    let image = Object::Stream {
        dict: dict![
            "Subtype" => Object::Name(Name::new("Image")),
            "Width" => Object::Int(2),
            "Height" => Object::Int(2),
            "Filter" => Object::Name(Name::new("JPXDecode")),
        ],
        data: vec![0u8; 6],
    };
    let page = page_with_xobjects(vec![("Im0", image)]);
    let r = do_xobject(&mut ctx, &mut dev, &Dict::new(), &page, &Name::new("Im0"));
    assert!(r.is_err());
}
