use std::fmt;
use std::str::FromStr;

mod atomic;
mod buffer;
mod props;

pub use atomic::*;
pub use buffer::*;
pub use props::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct FramebufferId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct CrtcId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct ConnectorId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct EncoderId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct PlaneId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct PropertyId(pub u32);

/// A GEM handle, local to the card's open file description.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct BufferObjectId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ObjectId {
    Crtc(CrtcId),
    Connector(ConnectorId),
    Encoder(EncoderId),
    Framebuffer(FramebufferId),
    Plane(PlaneId),
}

impl ObjectId {
    pub fn as_raw_type_and_id(self) -> (u32, u32) {
        use crate::ioctl;
        match self {
            ObjectId::Crtc(id) => (ioctl::DRM_MODE_OBJECT_CRTC, id.0),
            ObjectId::Connector(id) => (ioctl::DRM_MODE_OBJECT_CONNECTOR, id.0),
            ObjectId::Encoder(id) => (ioctl::DRM_MODE_OBJECT_ENCODER, id.0),
            ObjectId::Framebuffer(id) => (ioctl::DRM_MODE_OBJECT_FB, id.0),
            ObjectId::Plane(id) => (ioctl::DRM_MODE_OBJECT_PLANE, id.0),
        }
    }
}

impl From<CrtcId> for ObjectId {
    fn from(value: CrtcId) -> Self {
        Self::Crtc(value)
    }
}

impl From<ConnectorId> for ObjectId {
    fn from(value: ConnectorId) -> Self {
        Self::Connector(value)
    }
}

impl From<EncoderId> for ObjectId {
    fn from(value: EncoderId) -> Self {
        Self::Encoder(value)
    }
}

impl From<FramebufferId> for ObjectId {
    fn from(value: FramebufferId) -> Self {
        Self::Framebuffer(value)
    }
}

impl From<PlaneId> for ObjectId {
    fn from(value: PlaneId) -> Self {
        Self::Plane(value)
    }
}

/// The global object lists of a card. `crtc_ids` is in pipe order, which is
/// the order the `possible_crtcs` bitmasks of encoders and planes refer to.
#[derive(Debug, Clone, Default)]
pub struct CardResources {
    pub crtc_ids: Vec<CrtcId>,
    pub connector_ids: Vec<ConnectorId>,
    pub encoder_ids: Vec<EncoderId>,
    pub plane_ids: Vec<PlaneId>,
}

#[derive(Debug, Clone)]
pub struct ConnectorState {
    pub id: ConnectorId,
    pub connector_type: ConnectorType,
    pub connector_type_id: u32,
    pub connection_state: ConnectionState,
    pub width_mm: u32,
    pub height_mm: u32,
    pub modes: Vec<ModeInfo>,
    pub encoder_ids: Vec<EncoderId>,
}

impl ConnectorState {
    /// The kernel's name for the connector, like `HDMI-A-1`.
    pub fn name(&self) -> String {
        format!("{}-{}", self.connector_type, self.connector_type_id)
    }
}

#[derive(Debug, PartialEq, Eq, Copy, Clone)]
#[repr(u32)]
pub enum ConnectionState {
    Connected = 1,
    Disconnected = 2,
    Unknown = 3,
}

impl From<u32> for ConnectionState {
    fn from(value: u32) -> Self {
        match value {
            1 => Self::Connected,
            2 => Self::Disconnected,
            _ => Self::Unknown,
        }
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[repr(u32)]
pub enum ConnectorType {
    Unknown = 0,
    Vga = 1,
    DviI = 2,
    DviD = 3,
    DviA = 4,
    Composite = 5,
    SVideo = 6,
    Lvds = 7,
    Component = 8,
    NinePinDin = 9,
    DisplayPort = 10,
    HdmiA = 11,
    HdmiB = 12,
    Tv = 13,
    Edp = 14,
    Virtual = 15,
    Dsi = 16,
    Dpi = 17,
    Writeback = 18,
    Spi = 19,
    Usb = 20,
    Other = !0, // Not used by kernel, but used by us if kernel returns something we don't know
}

impl ConnectorType {
    const NAMES: [(ConnectorType, &'static str); 21] = [
        (Self::Unknown, "Unknown"),
        (Self::Vga, "VGA"),
        (Self::DviI, "DVI-I"),
        (Self::DviD, "DVI-D"),
        (Self::DviA, "DVI-A"),
        (Self::Composite, "Composite"),
        (Self::SVideo, "SVIDEO"),
        (Self::Lvds, "LVDS"),
        (Self::Component, "Component"),
        (Self::NinePinDin, "DIN"),
        (Self::DisplayPort, "DP"),
        (Self::HdmiA, "HDMI-A"),
        (Self::HdmiB, "HDMI-B"),
        (Self::Tv, "TV"),
        (Self::Edp, "eDP"),
        (Self::Virtual, "Virtual"),
        (Self::Dsi, "DSI"),
        (Self::Dpi, "DPI"),
        (Self::Writeback, "Writeback"),
        (Self::Spi, "SPI"),
        (Self::Usb, "USB"),
    ];

    /// The name the kernel uses for this connector type.
    pub fn name(self) -> &'static str {
        Self::NAMES
            .iter()
            .find(|(typ, _)| *typ == self)
            .map_or("Other", |(_, name)| name)
    }
}

impl From<u32> for ConnectorType {
    #[inline]
    fn from(value: u32) -> Self {
        if value < 21 {
            // Safety: all values in this range are valid representations
            // of this enum, as described above.
            unsafe { core::mem::transmute(value) }
        } else {
            Self::Other
        }
    }
}

impl fmt::Display for ConnectorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown connector type {0:?}")]
pub struct UnknownConnectorType(pub String);

impl FromStr for ConnectorType {
    type Err = UnknownConnectorType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::NAMES
            .iter()
            .find(|(_, name)| name.eq_ignore_ascii_case(s))
            .map(|(typ, _)| *typ)
            .ok_or_else(|| UnknownConnectorType(s.to_owned()))
    }
}

#[derive(Debug, Clone)]
pub struct EncoderState {
    pub encoder_id: EncoderId,
    pub encoder_type: u32,
    pub current_crtc_id: CrtcId,
    /// Bit `n` is set if the encoder can be driven by the CRTC at index `n`
    /// of [`CardResources::crtc_ids`].
    pub possible_crtcs: u32,
}

#[derive(Debug, Clone)]
pub struct PlaneState {
    pub id: PlaneId,
    pub crtc_id: CrtcId,
    pub fb_id: FramebufferId,
    /// Same indexing as [`EncoderState::possible_crtcs`].
    pub possible_crtcs: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModeInfo {
    pub name: String,
    /// Pixel clock in kHz.
    pub clock: u32,
    pub hdisplay: u16,
    pub hsync_start: u16,
    pub hsync_end: u16,
    pub htotal: u16,
    pub hskew: u16,
    pub vdisplay: u16,
    pub vsync_start: u16,
    pub vsync_end: u16,
    pub vtotal: u16,
    pub vscan: u16,
    pub vrefresh: u32,
    pub flags: u32,
    pub typ: u32,
}

impl ModeInfo {
    #[inline]
    pub fn is_preferred(&self) -> bool {
        (self.typ & crate::ioctl::DRM_MODE_TYPE_PREFERRED) != 0
    }

    /// Duration of one frame in nanoseconds, derived from the timings rather
    /// than the rounded `vrefresh`.
    pub fn vsync_period_ns(&self) -> u64 {
        let pixels_per_frame = u64::from(self.htotal) * u64::from(self.vtotal);
        if self.clock == 0 || pixels_per_frame == 0 {
            return 0;
        }
        // clock is in kHz, so one pixel takes 1e6 / clock nanoseconds.
        pixels_per_frame * 1_000_000 / u64::from(self.clock)
    }
}

impl fmt::Display for ModeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{}@{} ({} kHz)",
            self.hdisplay, self.vdisplay, self.vrefresh, self.clock
        )
    }
}

impl From<crate::ioctl::DrmModeInfo> for ModeInfo {
    fn from(value: crate::ioctl::DrmModeInfo) -> Self {
        let name: Vec<u8> = value
            .name
            .iter()
            .map(|c| *c as u8)
            .take_while(|c| *c != 0)
            .collect();
        Self {
            name: String::from_utf8_lossy(&name).into_owned(),
            clock: value.clock,
            hdisplay: value.hdisplay,
            hsync_start: value.hsync_start,
            hsync_end: value.hsync_end,
            htotal: value.htotal,
            hskew: value.hskew,
            vdisplay: value.vdisplay,
            vsync_start: value.vsync_start,
            vsync_end: value.vsync_end,
            vtotal: value.vtotal,
            vscan: value.vscan,
            vrefresh: value.vrefresh,
            flags: value.flags,
            typ: value.typ,
        }
    }
}

impl From<&ModeInfo> for crate::ioctl::DrmModeInfo {
    fn from(value: &ModeInfo) -> Self {
        let mut name_raw = [0 as core::ffi::c_char; crate::ioctl::DRM_DISPLAY_MODE_LEN];
        // Keep the trailing NUL.
        for (dst, src) in name_raw[..crate::ioctl::DRM_DISPLAY_MODE_LEN - 1]
            .iter_mut()
            .zip(value.name.bytes())
        {
            *dst = src as core::ffi::c_char;
        }
        Self {
            clock: value.clock,
            hdisplay: value.hdisplay,
            hsync_start: value.hsync_start,
            hsync_end: value.hsync_end,
            htotal: value.htotal,
            hskew: value.hskew,
            vdisplay: value.vdisplay,
            vsync_start: value.vsync_start,
            vsync_end: value.vsync_end,
            vtotal: value.vtotal,
            vscan: value.vscan,
            vrefresh: value.vrefresh,
            flags: value.flags,
            typ: value.typ,
            name: name_raw,
        }
    }
}
