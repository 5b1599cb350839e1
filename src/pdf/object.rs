//! PDF object model
//!
//! Objects are plain values; indirect references are resolved through an
//! [`ObjectStore`], which hands out cheap reference-counted handles. Names
//! are interned so the hot comparisons against well-known keys stay cheap.

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::sync::{Arc, LazyLock};

use crate::fitz::error::{Error, Result};

// ============================================================================
// Name
// ============================================================================

/// An interned PDF name.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Name(Arc<str>);

const COMMON_NAME_STRS: &[&str] = &[
    "Type", "Subtype", "Length", "Filter", "F", "DecodeParms", "DP", "Width", "W", "Height", "H",
    "BitsPerComponent", "BPC", "ImageMask", "IM", "Interpolate", "I", "Decode", "D", "ColorSpace",
    "CS", "Intent", "Alternates", "Name", "StructParent", "Mask", "SMask", "SMaskInData", "OC",
    "Image", "Form", "PS", "XObject", "Pattern", "Shading", "Font", "ExtGState", "Resources",
    "Group", "G", "Annots", "AP", "N", "BM", "CA", "ca", "Normal", "Compatible", "Highlight",
    "PatternType", "PaintType", "TilingType", "BBox", "XStep", "YStep", "Matrix", "ShadingType",
    "Coords", "Domain", "Extend", "DeviceGray", "DeviceRGB", "DeviceCMYK", "RGB", "CMYK",
    "Indexed", "Separation", "DeviceN", "ICCBased", "CalRGB", "CalGray", "Lab", "None", "All",
    "Type3", "CharProcs", "DefaultForPrinting", "FlateDecode", "DCTDecode", "JPXDecode",
];

static COMMON_NAMES: LazyLock<HashMap<&'static str, Name>> = LazyLock::new(|| {
    COMMON_NAME_STRS
        .iter()
        .map(|s| (*s, Name(Arc::from(*s))))
        .collect()
});

impl Name {
    pub fn new(s: &str) -> Name {
        match COMMON_NAMES.get(s) {
            Some(n) => n.clone(),
            None => Name(Arc::from(s)),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.0)
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Name {
    fn from(s: &str) -> Name {
        Name::new(s)
    }
}

impl PartialEq<str> for Name {
    fn eq(&self, other: &str) -> bool {
        self.as_str() == other
    }
}

impl PartialEq<&str> for Name {
    fn eq(&self, other: &&str) -> bool {
        self.as_str() == *other
    }
}

// ============================================================================
// Object
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjRef {
    pub num: u32,
    pub gen: u16,
}

impl ObjRef {
    pub fn new(num: u32, gen: u16) -> ObjRef {
        ObjRef { num, gen }
    }
}

pub type Dict = HashMap<Name, Object>;

#[derive(Debug, Clone, PartialEq)]
pub enum Object {
    Null,
    Bool(bool),
    Int(i64),
    Real(f64),
    String(Vec<u8>),
    Name(Name),
    Array(Vec<Object>),
    Dict(Dict),
    Stream { dict: Dict, data: Vec<u8> },
    Ref(ObjRef),
}

impl Object {
    pub fn is_null(&self) -> bool {
        matches!(self, Object::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Object::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Object::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric value of an Int or Real.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Object::Int(i) => Some(*i as f64),
            Object::Real(r) => Some(*r),
            _ => None,
        }
    }

    pub fn as_name(&self) -> Option<&Name> {
        match self {
            Object::Name(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Object]> {
        match self {
            Object::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&Dict> {
        match self {
            Object::Dict(d) => Some(d),
            _ => None,
        }
    }

    /// The dictionary of a Dict or of a Stream. Streams are dictionaries
    /// with data attached, and most lookups accept either.
    pub fn dict(&self) -> Option<&Dict> {
        match self {
            Object::Dict(d) => Some(d),
            Object::Stream { dict, .. } => Some(dict),
            _ => None,
        }
    }

    pub fn stream_data(&self) -> Option<&[u8]> {
        match self {
            Object::Stream { data, .. } => Some(data),
            _ => None,
        }
    }

    pub fn as_ref_num(&self) -> Option<u32> {
        match self {
            Object::Ref(r) => Some(r.num),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Object::Null => "null",
            Object::Bool(_) => "boolean",
            Object::Int(_) => "integer",
            Object::Real(_) => "real",
            Object::String(_) => "string",
            Object::Name(_) => "name",
            Object::Array(_) => "array",
            Object::Dict(_) => "dictionary",
            Object::Stream { .. } => "stream",
            Object::Ref(_) => "reference",
        }
    }
}

/// Shared handle to a resolved object.
pub type ObjHandle = Rc<Object>;

// ============================================================================
// ObjectStore
// ============================================================================

// Indirect references may chain; cap the walk so a malicious chain of
// refs-to-refs cannot spin forever.
const MAX_REF_CHAIN: usize = 32;

/// Holds the document's indirect objects, keyed by object number.
#[derive(Debug, Default)]
pub struct ObjectStore {
    objects: HashMap<u32, ObjHandle>,
}

impl ObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, num: u32, obj: Object) {
        self.objects.insert(num, Rc::new(obj));
    }

    pub fn get(&self, num: u32) -> Option<ObjHandle> {
        self.objects.get(&num).cloned()
    }

    /// Resolve `obj`, following indirect references. Returns the resolved
    /// handle and the object number of the final reference followed, if
    /// any. Dangling references resolve to Null.
    pub fn resolve(&self, obj: &Object) -> (ObjHandle, Option<u32>) {
        let mut num = match obj {
            Object::Ref(r) => r.num,
            other => return (Rc::new(other.clone()), None),
        };
        for _ in 0..MAX_REF_CHAIN {
            match self.objects.get(&num) {
                Some(handle) => match handle.as_ref() {
                    Object::Ref(r) => num = r.num,
                    _ => return (handle.clone(), Some(num)),
                },
                None => return (Rc::new(Object::Null), Some(num)),
            }
        }
        (Rc::new(Object::Null), Some(num))
    }

    // ------------------------------------------------------------------
    // knownget family: absent keys and null values both read as "not there"
    // ------------------------------------------------------------------

    pub fn dict_get(&self, dict: &Dict, key: &str) -> Option<ObjHandle> {
        self.dict_get_with_num(dict, key).map(|(h, _)| h)
    }

    pub fn dict_get_with_num(&self, dict: &Dict, key: &str) -> Option<(ObjHandle, Option<u32>)> {
        let raw = dict.get(&Name::new(key))?;
        let (resolved, num) = self.resolve(raw);
        if resolved.is_null() {
            None
        } else {
            Some((resolved, num))
        }
    }

    /// Look up `key`, falling back to its abbreviated form.
    pub fn dict_get2(&self, dict: &Dict, key: &str, abbrev: &str) -> Option<ObjHandle> {
        self.dict_get(dict, key).or_else(|| self.dict_get(dict, abbrev))
    }

    pub fn dict_get_int(&self, dict: &Dict, key: &str) -> Option<i64> {
        self.dict_get(dict, key).and_then(|o| o.as_int())
    }

    pub fn dict_get_number(&self, dict: &Dict, key: &str) -> Option<f64> {
        self.dict_get(dict, key).and_then(|o| o.as_number())
    }

    pub fn dict_get_bool(&self, dict: &Dict, key: &str) -> Option<bool> {
        self.dict_get(dict, key).and_then(|o| o.as_bool())
    }

    pub fn dict_get_name(&self, dict: &Dict, key: &str) -> Option<Name> {
        self.dict_get(dict, key).and_then(|o| o.as_name().cloned())
    }

    /// Resolve every element of a numeric array.
    pub fn to_float_array(&self, obj: &Object) -> Result<Vec<f32>> {
        let arr = obj
            .as_array()
            .ok_or_else(|| Error::typecheck(format!("expected array, got {}", obj.type_name())))?;
        let mut out = Vec::with_capacity(arr.len());
        for elem in arr {
            let (resolved, _) = self.resolve(elem);
            let n = resolved.as_number().ok_or_else(|| {
                Error::typecheck(format!("expected number in array, got {}", resolved.type_name()))
            })?;
            out.push(n as f32);
        }
        Ok(out)
    }

    // ------------------------------------------------------------------
    // Resource lookup
    // ------------------------------------------------------------------

    /// Find a named resource of the given category, searching the content
    /// stream's own Resources first and the page's Resources second.
    pub fn find_resource(
        &self,
        category: &str,
        name: &Name,
        stream_dict: &Dict,
        page_dict: &Dict,
    ) -> Result<ObjHandle> {
        self.find_resource_with_num(category, name, stream_dict, page_dict)
            .map(|(h, _)| h)
    }

    /// As [`find_resource`](Self::find_resource), also reporting the object
    /// number when the resource was an indirect object, for loop guarding.
    pub fn find_resource_with_num(
        &self,
        category: &str,
        name: &Name,
        stream_dict: &Dict,
        page_dict: &Dict,
    ) -> Result<(ObjHandle, Option<u32>)> {
        for scope in [stream_dict, page_dict] {
            if let Some(resources) = self.dict_get(scope, "Resources") {
                if let Some(res_dict) = resources.dict() {
                    if let Some(cat) = self.dict_get(res_dict, category) {
                        if let Some(cat_dict) = cat.dict() {
                            if let Some(found) = self.dict_get_with_num(cat_dict, name.as_str()) {
                                return Ok(found);
                            }
                        }
                    }
                }
            }
        }
        Err(Error::undefined(format!(
            "resource /{} not found in {}",
            name, category
        )))
    }
}

// ============================================================================
// Construction helpers
// ============================================================================

/// Build a [`Dict`] from key/value pairs. Mostly useful in tests, but also
/// for synthesizing substitute dictionaries (e.g. image Alternates).
#[macro_export]
macro_rules! dict {
    ($($key:expr => $value:expr),* $(,)?) => {{
        let mut d = $crate::pdf::object::Dict::new();
        $(d.insert($crate::pdf::object::Name::new($key), $value);)*
        d
    }};
}
