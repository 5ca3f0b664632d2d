//! Per-display state and the commit path.

use std::os::fd::OwnedFd;

use crate::binding::PlaneBinding;
use crate::device::KmsDevice;
use crate::ioctl;
use crate::modeset::{
    AtomicCommitFlags, AtomicRequest, ConnectorId, ConnectorState, CrtcId, FramebufferId,
    ModeInfo, PropertyId,
};
use crate::result::{Error, PostError};

/// DPI reported for displays that don't know their physical size.
pub const DEFAULT_DPI: u32 = 75;

/// Where a display is in its bring-up.
///
/// A display that was never bound has no [`DisplayOutput`] at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitState {
    /// The next post does a blocking legacy modeset.
    FirstFramePending,
    /// Posts are non-blocking atomic flips.
    SteadyState,
}

/// One bound display pipeline: connector, CRTC, primary plane and mode.
#[derive(Debug, Clone)]
pub struct DisplayOutput {
    pub connector_id: ConnectorId,
    pub crtc_id: CrtcId,
    /// Index of [`Self::crtc_id`] in the card's CRTC list.
    pub pipe: usize,
    pub plane: Option<PlaneBinding>,
    pub out_fence_prop: Option<PropertyId>,
    pub mode: ModeInfo,
    pub xdpi: u32,
    pub ydpi: u32,
    /// DRM fourcc every framebuffer on this display is created with.
    pub drm_format: u32,
    state: CommitState,
    scanout: Option<FramebufferId>,
}

/// What a host needs to describe a display to its clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayAttributes {
    pub width: u32,
    pub height: u32,
    pub refresh: u32,
    pub vsync_period_ns: u64,
    pub xdpi: u32,
    pub ydpi: u32,
    pub drm_format: u32,
}

fn dpi(pixels: u16, mm: u32) -> u32 {
    (f64::from(pixels) * 25.4 / f64::from(mm)) as u32
}

impl DisplayOutput {
    pub fn new(
        connector: &ConnectorState,
        crtc_id: CrtcId,
        pipe: usize,
        plane: Option<PlaneBinding>,
        out_fence_prop: Option<PropertyId>,
        mode: ModeInfo,
    ) -> Self {
        let (xdpi, ydpi) = if connector.width_mm != 0 && connector.height_mm != 0 {
            (
                dpi(mode.hdisplay, connector.width_mm),
                dpi(mode.vdisplay, connector.height_mm),
            )
        } else {
            (DEFAULT_DPI, DEFAULT_DPI)
        };
        Self {
            connector_id: connector.id,
            crtc_id,
            pipe,
            plane,
            out_fence_prop,
            mode,
            xdpi,
            ydpi,
            drm_format: ioctl::DRM_FORMAT_ABGR8888,
            state: CommitState::FirstFramePending,
            scanout: None,
        }
    }

    #[inline]
    pub fn state(&self) -> CommitState {
        self.state
    }

    pub fn attributes(&self) -> DisplayAttributes {
        DisplayAttributes {
            width: u32::from(self.mode.hdisplay),
            height: u32::from(self.mode.vdisplay),
            refresh: self.mode.vrefresh,
            vsync_period_ns: self.mode.vsync_period_ns(),
            xdpi: self.xdpi,
            ydpi: self.ydpi,
            drm_format: self.drm_format,
        }
    }

    /// The atomic request that flips the primary plane to `fb` and asks for
    /// an out-fence. Properties that weren't found at bind time are left out.
    pub fn flip_request(&self, fb: FramebufferId) -> AtomicRequest {
        let mut req = AtomicRequest::new();
        if let Some(prop) = self.out_fence_prop {
            req.request_out_fence(self.crtc_id, prop);
        }
        if let Some(plane) = &self.plane {
            if let Some(prop) = plane.fb_id_prop {
                req.set_property(plane.id, prop, fb);
            }
            if let Some(prop) = plane.crtc_id_prop {
                req.set_property(plane.id, prop, self.crtc_id);
            }
        }
        req
    }

    /// Show `fb` on this display.
    ///
    /// The first frame is a blocking modeset and yields no fence. After that
    /// every frame is a non-blocking atomic flip whose out-fence, if the CRTC
    /// supports one, belongs to the caller. A failed flip other than
    /// [`Error::Busy`] sends the display back to a full modeset.
    pub fn present<D: KmsDevice + ?Sized>(
        &mut self,
        dev: &D,
        fb: FramebufferId,
    ) -> Result<Option<OwnedFd>, PostError> {
        let crtc = self.crtc_id;
        match self.state {
            CommitState::FirstFramePending => {
                dev.set_crtc(crtc, fb, &[self.connector_id], &self.mode)
                    .map_err(|err| {
                        tracing::error!(?crtc, ?fb, "modeset failed: {err}");
                        PostError::ModeSet(err)
                    })?;
                self.scanout = Some(fb);
                self.transition(CommitState::SteadyState, "modeset done");
                Ok(None)
            }
            CommitState::SteadyState => {
                let req = self.flip_request(fb);
                let flags = AtomicCommitFlags::NONBLOCK | AtomicCommitFlags::ALLOW_MODESET;
                match dev.atomic_commit(&req, flags) {
                    Ok(fence) => {
                        tracing::trace!(?crtc, ?fb, has_fence = fence.is_some(), "flipped");
                        self.scanout = Some(fb);
                        Ok(fence)
                    }
                    Err(Error::Busy) => {
                        tracing::debug!(?crtc, ?fb, "flip rejected, previous one pending");
                        Err(PostError::Commit(Error::Busy))
                    }
                    Err(err) => {
                        tracing::warn!(?crtc, ?fb, "failed to perform page flip: {err}");
                        self.transition(CommitState::FirstFramePending, "atomic commit failed");
                        Err(PostError::Commit(err))
                    }
                }
            }
        }
    }

    /// The framebuffer most recently handed to the kernel for this display.
    #[inline]
    pub fn scanout(&self) -> Option<FramebufferId> {
        self.scanout
    }

    /// Note that `fb` no longer exists. Removing the framebuffer a CRTC
    /// scans out disables that CRTC, so the next frame needs a full modeset.
    pub(crate) fn framebuffer_removed(&mut self, fb: FramebufferId) {
        if self.scanout == Some(fb) {
            self.scanout = None;
            self.transition(CommitState::FirstFramePending, "scanout framebuffer removed");
        }
    }

    fn transition(&mut self, to: CommitState, reason: &'static str) {
        if self.state != to {
            let crtc = self.crtc_id;
            tracing::info!(?crtc, from = ?self.state, ?to, reason, "display state change");
            self.state = to;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mode::generate_cvt_mode;
    use crate::modeset::{ConnectionState, ConnectorType, PlaneId};

    fn connector(width_mm: u32, height_mm: u32) -> ConnectorState {
        ConnectorState {
            id: ConnectorId(40),
            connector_type: ConnectorType::HdmiA,
            connector_type_id: 1,
            connection_state: ConnectionState::Connected,
            width_mm,
            height_mm,
            modes: Vec::new(),
            encoder_ids: Vec::new(),
        }
    }

    fn output(plane: Option<PlaneBinding>, fence: Option<PropertyId>) -> DisplayOutput {
        DisplayOutput::new(
            &connector(0, 0),
            CrtcId(31),
            0,
            plane,
            fence,
            generate_cvt_mode(1920, 1080, 60),
        )
    }

    #[test]
    fn dpi_from_physical_size() {
        let out = DisplayOutput::new(
            &connector(509, 286),
            CrtcId(31),
            0,
            None,
            None,
            generate_cvt_mode(1920, 1080, 60),
        );
        // 1920 * 25.4 / 509 = 95.8, 1080 * 25.4 / 286 = 95.9
        assert_eq!((out.xdpi, out.ydpi), (95, 95));

        let out = output(None, None);
        assert_eq!((out.xdpi, out.ydpi), (DEFAULT_DPI, DEFAULT_DPI));
        assert_eq!(out.state(), CommitState::FirstFramePending);
    }

    #[test]
    fn attributes_follow_mode() {
        let attrs = output(None, None).attributes();
        assert_eq!((attrs.width, attrs.height, attrs.refresh), (1920, 1080, 60));
        // 2576 * 1118 pixels at 173MHz.
        assert_eq!(attrs.vsync_period_ns, 16_647_213);
        assert_eq!(attrs.drm_format, ioctl::DRM_FORMAT_ABGR8888);
    }

    #[test]
    fn flip_request_writes_fence_fb_and_crtc() {
        let plane = PlaneBinding {
            id: PlaneId(60),
            fb_id_prop: Some(PropertyId(17)),
            crtc_id_prop: Some(PropertyId(18)),
        };
        let req = output(Some(plane), Some(PropertyId(7))).flip_request(FramebufferId(200));
        assert_eq!(req.out_fence(), Some((CrtcId(31), PropertyId(7))));
        let props: Vec<_> = req.properties().collect();
        assert_eq!(
            props,
            vec![
                (31, PropertyId(7), 0),
                (60, PropertyId(17), 200),
                (60, PropertyId(18), 31),
            ]
        );
    }

    #[test]
    fn removing_the_shown_framebuffer_forces_a_modeset() {
        let mut out = output(None, None);
        out.state = CommitState::SteadyState;
        out.scanout = Some(FramebufferId(200));

        out.framebuffer_removed(FramebufferId(201));
        assert_eq!(out.state(), CommitState::SteadyState);

        out.framebuffer_removed(FramebufferId(200));
        assert_eq!(out.state(), CommitState::FirstFramePending);
        assert_eq!(out.scanout(), None);
    }

    #[test]
    fn flip_request_skips_unresolved_properties() {
        let plane = PlaneBinding {
            id: PlaneId(60),
            fb_id_prop: Some(PropertyId(17)),
            crtc_id_prop: None,
        };
        let req = output(Some(plane), None).flip_request(FramebufferId(200));
        assert_eq!(req.out_fence(), None);
        assert_eq!(req.len(), 1);
        assert_eq!(req.property_value(PlaneId(60), PropertyId(17)), Some(200));

        assert!(output(None, None).flip_request(FramebufferId(200)).is_empty());
    }
}
