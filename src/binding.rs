//! Attaching a connector to a CRTC and primary plane.

use crate::device::KmsDevice;
use crate::mode::{select_mode, ModeRequest};
use crate::modeset::{
    CardResources, ConnectorState, KnownProperty, ObjectId, PlaneId, PlaneType, PropertyId,
    PropertyTable,
};
use crate::output::DisplayOutput;
use crate::result::{BindError, Error};

/// Tracks which CRTCs, by index into [`CardResources::crtc_ids`], are
/// already driving a display.
///
/// A CRTC is only claimed once a bind that uses it succeeds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CrtcAllocator {
    used: u32,
}

impl CrtcAllocator {
    /// Bitmasks are 32 bits wide, so higher indices can't be expressed.
    pub const MAX_CRTCS: usize = 32;

    pub fn new() -> Self {
        Self::default()
    }

    /// The lowest unclaimed index below `count` whose bit is set in
    /// `possible`.
    pub fn find_free(&self, possible: u32, count: usize) -> Option<usize> {
        (0..count.min(Self::MAX_CRTCS))
            .find(|&pipe| possible & (1 << pipe) != 0 && !self.is_claimed(pipe))
    }

    pub fn claim(&mut self, pipe: usize) {
        debug_assert!(pipe < Self::MAX_CRTCS);
        self.used |= 1 << pipe;
    }

    #[inline]
    pub fn is_claimed(&self, pipe: usize) -> bool {
        pipe < Self::MAX_CRTCS && self.used & (1 << pipe) != 0
    }

    /// Bitmask of claimed indices.
    #[inline]
    pub fn claimed(&self) -> u32 {
        self.used
    }
}

/// The primary plane of a pipe and the property ids a flip writes to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaneBinding {
    pub id: PlaneId,
    pub fb_id_prop: Option<PropertyId>,
    pub crtc_id_prop: Option<PropertyId>,
}

/// Bind `connector` to a free CRTC and its primary plane, and pick its mode.
///
/// A pipe without a primary plane, or objects lacking some property, still
/// bind: the atomic path then leaves those properties out.
pub fn bind_connector<D: KmsDevice + ?Sized>(
    dev: &D,
    resources: &CardResources,
    connector: &ConnectorState,
    request: &ModeRequest,
    crtcs: &mut CrtcAllocator,
) -> Result<DisplayOutput, BindError> {
    let encoder_id = *connector
        .encoder_ids
        .first()
        .ok_or(BindError::NoEncoder(connector.id))?;
    let encoder = dev.encoder_state(encoder_id)?;

    let pipe = crtcs
        .find_free(encoder.possible_crtcs, resources.crtc_ids.len())
        .ok_or(BindError::NoFreeCrtc(connector.id))?;
    let crtc_id = resources.crtc_ids[pipe];

    tracing::info!(
        "there are {} modes on connector {:?}, type {}",
        connector.modes.len(),
        connector.id,
        connector.connector_type,
    );
    for mode in &connector.modes {
        tracing::trace!(
            "  {}@{}Hz flags:{:#x} type:{:#x}",
            mode.name,
            mode.vrefresh,
            mode.flags,
            mode.typ
        );
    }
    let mode =
        select_mode(&connector.modes, request).map_err(|e| BindError::Mode(connector.id, e))?;
    tracing::info!("the best mode is {mode}");

    let plane = find_primary_plane(dev, resources, pipe);
    match &plane {
        Some(plane) => tracing::info!(
            plane = ?plane.id,
            fb_prop = ?plane.fb_id_prop,
            crtc_prop = ?plane.crtc_id_prop,
            "found primary plane"
        ),
        None => tracing::warn!(?crtc_id, "no primary plane for pipe {pipe}"),
    }

    let crtc_props = dev.object_properties(ObjectId::Crtc(crtc_id))?;
    let out_fence_prop = PropertyTable::from_properties(&crtc_props).id(KnownProperty::OutFencePtr);
    tracing::info!(?crtc_id, ?out_fence_prop, "resolved out-fence property");

    crtcs.claim(pipe);

    Ok(DisplayOutput::new(
        connector,
        crtc_id,
        pipe,
        plane,
        out_fence_prop,
        mode,
    ))
}

fn find_primary_plane<D: KmsDevice + ?Sized>(
    dev: &D,
    resources: &CardResources,
    pipe: usize,
) -> Option<PlaneBinding> {
    resources.plane_ids.iter().find_map(|&id| {
        let plane = dev
            .plane_state(id)
            .inspect_err(|err| tracing::warn!("failed to get plane {id:?}: {err}"))
            .ok()?;
        if plane.possible_crtcs & (1 << pipe) == 0 {
            return None;
        }
        let props = plane_properties(dev, id)
            .inspect_err(|err| tracing::warn!("failed to get properties of plane {id:?}: {err}"))
            .ok()?;
        (props.plane_type() == Some(PlaneType::Primary)).then(|| PlaneBinding {
            id,
            fb_id_prop: props.id(KnownProperty::FbId),
            crtc_id_prop: props.id(KnownProperty::CrtcId),
        })
    })
}

fn plane_properties<D: KmsDevice + ?Sized>(dev: &D, id: PlaneId) -> Result<PropertyTable, Error> {
    let props = dev.object_properties(ObjectId::Plane(id))?;
    Ok(PropertyTable::from_properties(&props))
}
