//! Colorspace value types
//!
//! These are the resolved colorspaces the device sees. Construction from
//! document objects lives on the PDF side, as does the spot-colorant walk;
//! this module only knows component counts.

#[derive(Debug, Clone, PartialEq)]
pub enum Colorspace {
    DeviceGray,
    DeviceRgb,
    DeviceCmyk,
    Lab,
    /// ICC profile based space; only the component count matters here.
    Icc { n: u8 },
    Indexed {
        base: Box<Colorspace>,
        hival: i32,
    },
    Separation {
        colorant: String,
        base: Box<Colorspace>,
    },
    DeviceN {
        colorants: Vec<String>,
        base: Box<Colorspace>,
    },
    Pattern {
        base: Option<Box<Colorspace>>,
    },
}

impl Colorspace {
    /// Number of components a sample in this space carries.
    pub fn n(&self) -> u8 {
        match self {
            Colorspace::DeviceGray => 1,
            Colorspace::DeviceRgb => 3,
            Colorspace::DeviceCmyk => 4,
            Colorspace::Lab => 3,
            Colorspace::Icc { n } => *n,
            Colorspace::Indexed { .. } => 1,
            Colorspace::Separation { .. } => 1,
            Colorspace::DeviceN { colorants, .. } => colorants.len() as u8,
            Colorspace::Pattern { base } => base.as_ref().map_or(1, |b| b.n()),
        }
    }

    pub fn is_indexed(&self) -> bool {
        matches!(self, Colorspace::Indexed { .. })
    }
}
