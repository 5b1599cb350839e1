//! Device abstraction
//!
//! The interpreter drives a [`Device`]: images arrive as a begin / planes /
//! end sequence, patterns may be handed over wholesale when the device can
//! accumulate them, and page-level configuration goes through a small
//! parameter protocol.

use crate::fitz::error::Result;
use crate::fitz::geometry::{Matrix, Rect};
use crate::fitz::image::{PixelImage, PixelImageKind};

// ============================================================================
// Capability and parameter protocol
// ============================================================================

/// Three-way answer to a device capability query. `NotApplicable` is for
/// devices the question does not even apply to, and is distinct from an
/// applicable-but-unsupported answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Supported,
    Unsupported,
    NotApplicable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum DeviceQuery {
    /// Can the device record a pattern's cell once and tile it itself?
    PatternAccumulation,
}

/// Result of reading a negotiated device parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamStatus {
    /// The parameter is known and currently set to this value.
    Value(i64),
    /// The parameter is known to the device but has no value yet.
    Absent,
    /// The device does not recognize the parameter at all.
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteResponse {
    Done,
    /// The write closed the device; it must be reopened before use.
    NeedsReopen,
}

// ============================================================================
// Device trait
// ============================================================================

pub trait Device {
    // ---- parameter negotiation ----

    fn read_param(&self, key: &str) -> ParamStatus {
        let _ = key;
        ParamStatus::Rejected
    }

    fn write_param(&mut self, key: &str, value: i64) -> Result<WriteResponse> {
        let _ = (key, value);
        Ok(WriteResponse::Done)
    }

    fn reopen(&mut self) -> Result<()> {
        Ok(())
    }

    fn erase_page(&mut self) -> Result<()> {
        Ok(())
    }

    /// Tear down any transparency compositor state after a failed setup.
    fn abort_transparency(&mut self) {}

    // ---- capabilities and geometry ----

    fn query(&self, q: DeviceQuery) -> Capability {
        let _ = q;
        Capability::NotApplicable
    }

    /// Native component count, used for images that carry no colorspace.
    fn components(&self) -> u8 {
        3
    }

    fn initial_matrix(&self) -> Matrix {
        Matrix::IDENTITY
    }

    fn clip_rect(&mut self, r: Rect) {
        let _ = r;
    }

    // ---- images ----

    fn begin_image(&mut self, image: &PixelImage) -> Result<()> {
        let _ = image;
        Ok(())
    }

    /// Feed one call's worth of plane data. On return `used[i]` holds the
    /// byte count consumed from `planes[i]`. The default consumes
    /// everything offered.
    fn image_planes(&mut self, planes: &[&[u8]], used: &mut [usize]) -> Result<()> {
        for (i, plane) in planes.iter().enumerate() {
            used[i] = plane.len();
        }
        Ok(())
    }

    fn end_image(&mut self) -> Result<()> {
        Ok(())
    }

    // ---- shadings ----

    fn fill_shading(&mut self, shading: &crate::fitz::shading::Shading, ctm: Matrix) -> Result<()> {
        let _ = (shading, ctm);
        Ok(())
    }

    // ---- pattern accumulation ----

    fn begin_pattern_accum(&mut self, id: u64) -> Result<()> {
        let _ = id;
        Ok(())
    }

    fn end_pattern_accum(&mut self, id: u64) -> Result<()> {
        let _ = id;
        Ok(())
    }
}

/// A device that swallows everything. Useful as a rendering sink when only
/// side effects of interpretation matter.
#[derive(Debug, Default)]
pub struct NullDevice;

impl Device for NullDevice {}

// ============================================================================
// Recording device
// ============================================================================

/// Everything observable a [`RecordingDevice`] saw, in call order.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    BeginImage {
        width: u32,
        height: u32,
        n: u8,
        bpc: u8,
        kind: &'static str,
    },
    ImagePlanes {
        plane_sizes: Vec<usize>,
    },
    EndImage,
    FillShading {
        shading_type: i32,
    },
    WriteParam {
        key: String,
        value: i64,
    },
    Reopen,
    ErasePage,
    AbortTransparency,
    ClipRect(Rect),
    BeginPatternAccum(u64),
    EndPatternAccum(u64),
}

/// A configurable device that records every call it receives. This is the
/// primary test double, and doubles as a tracing aid.
#[derive(Debug)]
pub struct RecordingDevice {
    pub events: Vec<DeviceEvent>,
    /// Answer for `read_param("PageSpotColors")`.
    pub spot_param: ParamStatus,
    pub write_response: WriteResponse,
    pub pattern_accum: Capability,
    pub native_components: u8,
    pub fail_reopen: bool,
    /// Per-call byte budget for plane consumption; `None` consumes all.
    pub plane_budget: Option<usize>,
}

impl Default for RecordingDevice {
    fn default() -> Self {
        RecordingDevice {
            events: Vec::new(),
            spot_param: ParamStatus::Rejected,
            write_response: WriteResponse::Done,
            pattern_accum: Capability::NotApplicable,
            native_components: 3,
            fail_reopen: false,
            plane_budget: None,
        }
    }
}

impl RecordingDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spot_capable() -> Self {
        RecordingDevice {
            spot_param: ParamStatus::Absent,
            ..Self::default()
        }
    }

    pub fn count<F: Fn(&DeviceEvent) -> bool>(&self, f: F) -> usize {
        self.events.iter().filter(|e| f(e)).count()
    }
}

impl Device for RecordingDevice {
    fn read_param(&self, key: &str) -> ParamStatus {
        if key == "PageSpotColors" {
            self.spot_param
        } else {
            ParamStatus::Rejected
        }
    }

    fn write_param(&mut self, key: &str, value: i64) -> Result<WriteResponse> {
        self.events.push(DeviceEvent::WriteParam {
            key: key.to_string(),
            value,
        });
        Ok(self.write_response)
    }

    fn reopen(&mut self) -> Result<()> {
        self.events.push(DeviceEvent::Reopen);
        if self.fail_reopen {
            return Err(crate::fitz::error::Error::generic("device reopen failed"));
        }
        Ok(())
    }

    fn erase_page(&mut self) -> Result<()> {
        self.events.push(DeviceEvent::ErasePage);
        Ok(())
    }

    fn abort_transparency(&mut self) {
        self.events.push(DeviceEvent::AbortTransparency);
    }

    fn query(&self, q: DeviceQuery) -> Capability {
        match q {
            DeviceQuery::PatternAccumulation => self.pattern_accum,
        }
    }

    fn components(&self) -> u8 {
        self.native_components
    }

    fn clip_rect(&mut self, r: Rect) {
        self.events.push(DeviceEvent::ClipRect(r));
    }

    fn begin_image(&mut self, image: &PixelImage) -> Result<()> {
        let kind = match image.kind {
            PixelImageKind::Direct => "direct",
            PixelImageKind::ImageMask => "imagemask",
            PixelImageKind::ColorKeyMask { .. } => "colorkey",
            PixelImageKind::StencilMask { .. } => "stencil",
        };
        self.events.push(DeviceEvent::BeginImage {
            width: image.width,
            height: image.height,
            n: image.n,
            bpc: image.bpc,
            kind,
        });
        Ok(())
    }

    fn image_planes(&mut self, planes: &[&[u8]], used: &mut [usize]) -> Result<()> {
        let mut sizes = Vec::with_capacity(planes.len());
        for (i, plane) in planes.iter().enumerate() {
            let take = match self.plane_budget {
                Some(budget) => plane.len().min(budget),
                None => plane.len(),
            };
            used[i] = take;
            sizes.push(take);
        }
        self.events.push(DeviceEvent::ImagePlanes { plane_sizes: sizes });
        Ok(())
    }

    fn end_image(&mut self) -> Result<()> {
        self.events.push(DeviceEvent::EndImage);
        Ok(())
    }

    fn fill_shading(&mut self, shading: &crate::fitz::shading::Shading, _ctm: Matrix) -> Result<()> {
        self.events.push(DeviceEvent::FillShading {
            shading_type: shading.shading_type,
        });
        Ok(())
    }

    fn begin_pattern_accum(&mut self, id: u64) -> Result<()> {
        self.events.push(DeviceEvent::BeginPatternAccum(id));
        Ok(())
    }

    fn end_pattern_accum(&mut self, id: u64) -> Result<()> {
        self.events.push(DeviceEvent::EndPatternAccum(id));
        Ok(())
    }
}
