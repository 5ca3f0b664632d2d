use super::{CrtcId, FramebufferId, PropertyId};

/// One property attached to a KMS object, as reported by the kernel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectProperty {
    pub prop_id: PropertyId,
    pub name: String,
    pub value: u64,
}

/// The properties the composer reads or writes.
///
/// DRM only identifies properties by numeric ids that are assigned at
/// runtime, so these are resolved by name once per object and then looked
/// up through a [`PropertyTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KnownProperty {
    /// Plane: `type` enum (overlay, primary, cursor).
    PlaneType,
    /// Plane: framebuffer to scan out.
    FbId,
    /// Plane or connector: CRTC the object is attached to.
    CrtcId,
    /// CRTC: pointer to an `i32` the kernel fills with a completion fence fd.
    OutFencePtr,
}

impl KnownProperty {
    pub const ALL: [KnownProperty; 4] = [
        Self::PlaneType,
        Self::FbId,
        Self::CrtcId,
        Self::OutFencePtr,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            Self::PlaneType => "type",
            Self::FbId => "FB_ID",
            Self::CrtcId => "CRTC_ID",
            Self::OutFencePtr => "OUT_FENCE_PTR",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|prop| prop.name() == name)
    }

    const fn index(self) -> usize {
        self as usize
    }
}

/// Property ids and current values of one object, keyed by
/// [`KnownProperty`]. Properties the object doesn't have read as `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropertyTable {
    entries: [Option<(PropertyId, u64)>; KnownProperty::ALL.len()],
}

impl PropertyTable {
    pub fn from_properties<'a>(props: impl IntoIterator<Item = &'a ObjectProperty>) -> Self {
        let mut ret = Self::default();
        for prop in props {
            let Some(known) = KnownProperty::from_name(&prop.name) else {
                continue;
            };
            // First one wins, like a linear scan by name would.
            let slot = &mut ret.entries[known.index()];
            if slot.is_none() {
                *slot = Some((prop.prop_id, prop.value));
            }
        }
        ret
    }

    #[inline]
    pub fn id(&self, prop: KnownProperty) -> Option<PropertyId> {
        self.entries[prop.index()].map(|(id, _)| id)
    }

    #[inline]
    pub fn value(&self, prop: KnownProperty) -> Option<u64> {
        self.entries[prop.index()].map(|(_, value)| value)
    }

    pub fn plane_type(&self) -> Option<PlaneType> {
        self.value(KnownProperty::PlaneType).map(PlaneType::from)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaneType {
    Overlay,
    Primary,
    Cursor,
    Unknown(u64),
}

impl From<u64> for PlaneType {
    fn from(value: u64) -> Self {
        match value {
            crate::ioctl::DRM_PLANE_TYPE_OVERLAY => Self::Overlay,
            crate::ioctl::DRM_PLANE_TYPE_PRIMARY => Self::Primary,
            crate::ioctl::DRM_PLANE_TYPE_CURSOR => Self::Cursor,
            other => Self::Unknown(other),
        }
    }
}

/// Trait implemented by types that can be used directly as raw property
/// values in an [`super::AtomicRequest`].
pub trait AsRawPropertyValue {
    fn as_raw_property_value(&self) -> u64;
}

macro_rules! trivial_as_property_value {
    ($t:ty) => {
        impl AsRawPropertyValue for $t {
            #[inline(always)]
            fn as_raw_property_value(&self) -> u64 {
                *self as u64
            }
        }
    };
}

trivial_as_property_value!(u64);
trivial_as_property_value!(u32);

macro_rules! object_id_as_property_value {
    ($t:ty) => {
        impl AsRawPropertyValue for $t {
            #[inline(always)]
            fn as_raw_property_value(&self) -> u64 {
                self.0 as u64
            }
        }
    };
}

object_id_as_property_value!(CrtcId);
object_id_as_property_value!(FramebufferId);
