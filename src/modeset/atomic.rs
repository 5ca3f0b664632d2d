use core::iter;
use core::ops::BitOr;

use std::collections::BTreeMap;

use super::{AsRawPropertyValue, CrtcId, ObjectId, PropertyId};

/// An atomic modesetting commit request.
#[derive(Debug, Default)]
pub struct AtomicRequest {
    objs: BTreeMap<u32, AtomicRequestObj>,
    total_props: u32,
    out_fence: Option<(u32, PropertyId)>,
}

#[derive(Debug, Default)]
struct AtomicRequestObj {
    prop_ids: Vec<u32>,
    prop_values: Vec<u64>,
}

impl AtomicRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_property(
        &mut self,
        obj_id: impl Into<ObjectId>,
        prop_id: PropertyId,
        value: impl AsRawPropertyValue,
    ) {
        let (_, obj_id) = obj_id.into().as_raw_type_and_id();
        self.push(obj_id, prop_id, value.as_raw_property_value());
    }

    /// Ask the kernel to create a completion fence for `crtc` through its
    /// `OUT_FENCE_PTR` property.
    ///
    /// The property's value is a userspace pointer that only exists while
    /// the commit is being submitted, so it is filled in by
    /// [`crate::Card`] at submission time.
    pub fn request_out_fence(&mut self, crtc: CrtcId, prop_id: PropertyId) {
        self.push(crtc.0, prop_id, 0);
        self.out_fence = Some((crtc.0, prop_id));
    }

    /// The CRTC and property an out-fence was requested through, if any.
    pub fn out_fence(&self) -> Option<(CrtcId, PropertyId)> {
        self.out_fence.map(|(obj, prop)| (CrtcId(obj), prop))
    }

    /// The value queued for a property, if any.
    pub fn property_value(&self, obj_id: impl Into<ObjectId>, prop_id: PropertyId) -> Option<u64> {
        let (_, obj_id) = obj_id.into().as_raw_type_and_id();
        let obj = self.objs.get(&obj_id)?;
        iter::zip(obj.prop_ids.iter(), obj.prop_values.iter())
            .find(|(id, _)| **id == prop_id.0)
            .map(|(_, value)| *value)
    }

    /// Every queued write as `(raw object id, property, value)`, ordered by
    /// object id. The out-fence property reads as zero here.
    pub fn properties(&self) -> impl Iterator<Item = (u32, PropertyId, u64)> + '_ {
        self.objs.iter().flat_map(|(obj_id, obj)| {
            iter::zip(obj.prop_ids.iter(), obj.prop_values.iter())
                .map(move |(prop_id, value)| (*obj_id, PropertyId(*prop_id), *value))
        })
    }

    /// Total number of property writes in the request.
    pub fn len(&self) -> usize {
        self.total_props as usize
    }

    pub fn is_empty(&self) -> bool {
        self.total_props == 0
    }

    fn push(&mut self, obj_id: u32, prop_id: PropertyId, value: u64) {
        let obj = self.objs.entry(obj_id).or_default();

        // We'll reserve first to make sure that running out of memory can't
        // cause these two vecs to end up with different lengths when we're done.
        obj.prop_ids.reserve(1);
        obj.prop_values.reserve(1);

        obj.prop_ids.push(prop_id.0);
        obj.prop_values.push(value);
        self.total_props += 1; // panics if request contains more than u32::MAX total properties
        if self.objs.len() > (u32::MAX as usize) {
            panic!("too many distinct objects in request");
        }
    }

    /// Flatten the request into the parallel arrays the atomic ioctl takes.
    /// `out_fence_slot` is written into the out-fence property, if one was
    /// requested.
    pub(crate) fn for_ioctl_req(&self, out_fence_slot: *mut i32) -> AtomicRequestRawParts {
        let obj_count = self.objs.len();
        let mut obj_ids = Vec::<u32>::with_capacity(obj_count);
        let mut obj_prop_counts = Vec::<u32>::with_capacity(obj_count);
        let total_prop_count = self.total_props as usize;
        let mut prop_ids = Vec::<u32>::with_capacity(total_prop_count);
        let mut prop_values = Vec::<u64>::with_capacity(total_prop_count);

        for (obj_id, obj) in self.objs.iter() {
            obj_ids.push(*obj_id);
            obj_prop_counts.push(obj.prop_ids.len() as u32);

            for (prop_id, value) in iter::zip(
                obj.prop_ids.iter().copied(),
                obj.prop_values.iter().copied(),
            ) {
                let value = match self.out_fence {
                    Some((fence_obj, fence_prop))
                        if fence_obj == *obj_id && fence_prop.0 == prop_id =>
                    {
                        out_fence_slot as u64
                    }
                    _ => value,
                };
                prop_ids.push(prop_id);
                prop_values.push(value);
            }
        }

        AtomicRequestRawParts {
            obj_ids,
            obj_prop_counts,
            prop_ids,
            prop_values,
        }
    }
}

pub(crate) struct AtomicRequestRawParts {
    pub(crate) obj_ids: Vec<u32>,
    pub(crate) obj_prop_counts: Vec<u32>,
    pub(crate) prop_ids: Vec<u32>,
    pub(crate) prop_values: Vec<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AtomicCommitFlags(pub(crate) u32);

impl AtomicCommitFlags {
    pub const TEST_ONLY: Self = Self(crate::ioctl::DRM_MODE_ATOMIC_TEST_ONLY);
    pub const NONBLOCK: Self = Self(crate::ioctl::DRM_MODE_ATOMIC_NONBLOCK);
    pub const ALLOW_MODESET: Self = Self(crate::ioctl::DRM_MODE_ATOMIC_ALLOW_MODESET);

    #[inline]
    pub fn contains(self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }

    #[inline]
    pub fn bits(self) -> u32 {
        self.0
    }
}

impl BitOr for AtomicCommitFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}
