//! The kernel display-device boundary.
//!
//! The composer only ever talks to the kernel through [`KmsDevice`], so the
//! discovery, binding and commit logic can be driven by
//! the in-memory `FakeCard` as well as by a real [`Card`].

use std::os::fd::{AsRawFd, BorrowedFd, FromRawFd, OwnedFd};

use crate::ioctl;
use crate::modeset::{
    AtomicCommitFlags, AtomicRequest, BufferObjectId, CardResources, ConnectionState,
    ConnectorId, ConnectorState, ConnectorType, CrtcId, EncoderId, EncoderState,
    FramebufferId, FramebufferRequest, ModeInfo, ObjectId, ObjectProperty, PlaneId,
    PlaneState, PropertyId,
};
use crate::result::Error;
use crate::Card;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientCap {
    /// Expose primary and cursor planes alongside overlays.
    UniversalPlanes,
    /// Expose atomic properties and the atomic commit ioctl.
    Atomic,
}

impl ClientCap {
    pub fn name(self) -> &'static str {
        match self {
            ClientCap::UniversalPlanes => "universal planes",
            ClientCap::Atomic => "atomic",
        }
    }

    fn raw(self) -> ioctl::DrmClientCap {
        match self {
            ClientCap::UniversalPlanes => ioctl::DRM_CLIENT_CAP_UNIVERSAL_PLANES,
            ClientCap::Atomic => ioctl::DRM_CLIENT_CAP_ATOMIC,
        }
    }
}

/// The operations the composer needs from a DRM/KMS device.
///
/// Methods take `&self`: the kernel serializes requests on one file
/// description, and callers are expected to serialize per display.
pub trait KmsDevice {
    fn set_client_cap(&self, cap: ClientCap, value: u64) -> Result<(), Error>;

    /// CRTCs, connectors, encoders and planes. Requires
    /// [`ClientCap::UniversalPlanes`] to see primary planes.
    fn resources(&self) -> Result<CardResources, Error>;

    fn connector_state(&self, id: ConnectorId) -> Result<ConnectorState, Error>;

    fn encoder_state(&self, id: EncoderId) -> Result<EncoderState, Error>;

    fn plane_state(&self, id: PlaneId) -> Result<PlaneState, Error>;

    /// All properties attached to an object, with their names resolved.
    fn object_properties(&self, obj: ObjectId) -> Result<Vec<ObjectProperty>, Error>;

    /// Import a dma-buf as a GEM buffer object.
    fn prime_fd_to_handle(&self, fd: BorrowedFd<'_>) -> Result<BufferObjectId, Error>;

    fn close_buffer_object(&self, handle: BufferObjectId) -> Result<(), Error>;

    fn add_framebuffer(&self, req: &FramebufferRequest) -> Result<FramebufferId, Error>;

    fn remove_framebuffer(&self, fb: FramebufferId) -> Result<(), Error>;

    /// Legacy blocking modeset of `crtc` to scan out `fb` on `connectors`.
    fn set_crtc(
        &self,
        crtc: CrtcId,
        fb: FramebufferId,
        connectors: &[ConnectorId],
        mode: &ModeInfo,
    ) -> Result<(), Error>;

    /// Submit an atomic commit. Returns the out-fence when the request asked
    /// for one through [`AtomicRequest::request_out_fence`] and the kernel
    /// produced it; the caller owns it.
    fn atomic_commit(
        &self,
        req: &AtomicRequest,
        flags: AtomicCommitFlags,
    ) -> Result<Option<OwnedFd>, Error>;
}

impl<T: KmsDevice + ?Sized> KmsDevice for &T {
    fn set_client_cap(&self, cap: ClientCap, value: u64) -> Result<(), Error> {
        (**self).set_client_cap(cap, value)
    }

    fn resources(&self) -> Result<CardResources, Error> {
        (**self).resources()
    }

    fn connector_state(&self, id: ConnectorId) -> Result<ConnectorState, Error> {
        (**self).connector_state(id)
    }

    fn encoder_state(&self, id: EncoderId) -> Result<EncoderState, Error> {
        (**self).encoder_state(id)
    }

    fn plane_state(&self, id: PlaneId) -> Result<PlaneState, Error> {
        (**self).plane_state(id)
    }

    fn object_properties(&self, obj: ObjectId) -> Result<Vec<ObjectProperty>, Error> {
        (**self).object_properties(obj)
    }

    fn prime_fd_to_handle(&self, fd: BorrowedFd<'_>) -> Result<BufferObjectId, Error> {
        (**self).prime_fd_to_handle(fd)
    }

    fn close_buffer_object(&self, handle: BufferObjectId) -> Result<(), Error> {
        (**self).close_buffer_object(handle)
    }

    fn add_framebuffer(&self, req: &FramebufferRequest) -> Result<FramebufferId, Error> {
        (**self).add_framebuffer(req)
    }

    fn remove_framebuffer(&self, fb: FramebufferId) -> Result<(), Error> {
        (**self).remove_framebuffer(fb)
    }

    fn set_crtc(
        &self,
        crtc: CrtcId,
        fb: FramebufferId,
        connectors: &[ConnectorId],
        mode: &ModeInfo,
    ) -> Result<(), Error> {
        (**self).set_crtc(crtc, fb, connectors, mode)
    }

    fn atomic_commit(
        &self,
        req: &AtomicRequest,
        flags: AtomicCommitFlags,
    ) -> Result<Option<OwnedFd>, Error> {
        (**self).atomic_commit(req, flags)
    }
}

impl Card {
    fn plane_ids(&self) -> Result<Vec<PlaneId>, Error> {
        let f = self.file();
        loop {
            let mut tmp = ioctl::DrmModeGetPlaneRes::zeroed();
            crate::drm_ioctl!(f, ioctl::DRM_IOCTL_MODE_GETPLANERESOURCES, &mut tmp)?;
            let count = tmp.count_planes();

            let mut ids = vec![0_u32; count as usize];
            let mut tmp = ioctl::DrmModeGetPlaneRes::zeroed();
            unsafe { tmp.set_plane_id_ptr(ids.as_mut_ptr(), count) };
            crate::drm_ioctl!(f, ioctl::DRM_IOCTL_MODE_GETPLANERESOURCES, &mut tmp)?;
            if tmp.count_planes() != count {
                // A plane appeared in between the two requests.
                continue;
            }
            return Ok(ids.into_iter().map(PlaneId).collect());
        }
    }

    fn property_name(&self, id: PropertyId) -> Result<String, Error> {
        let mut tmp = ioctl::DrmModeGetProperty::zeroed();
        tmp.prop_id = id.0;
        crate::drm_ioctl!(self.file(), ioctl::DRM_IOCTL_MODE_GETPROPERTY, &mut tmp)?;
        let raw = tmp.name.split(|c| *c == 0).next().unwrap_or(&[]);
        Ok(String::from_utf8_lossy(raw).into_owned())
    }
}

impl KmsDevice for Card {
    fn set_client_cap(&self, cap: ClientCap, value: u64) -> Result<(), Error> {
        let tmp = ioctl::DrmSetClientCap {
            capability: cap.raw(),
            value,
        };
        crate::drm_ioctl!(self.file(), ioctl::DRM_IOCTL_SET_CLIENT_CAP, &tmp)?;
        Ok(())
    }

    fn resources(&self) -> Result<CardResources, Error> {
        let f = self.file();
        loop {
            let mut tmp = ioctl::DrmModeCardRes::zeroed();
            crate::drm_ioctl!(f, ioctl::DRM_IOCTL_MODE_GETRESOURCES, &mut tmp)?;
            let crtc_count = tmp.count_crtcs();
            let connector_count = tmp.count_connectors();
            let encoder_count = tmp.count_encoders();

            let mut crtc_ids = vec![0_u32; crtc_count as usize];
            let mut connector_ids = vec![0_u32; connector_count as usize];
            let mut encoder_ids = vec![0_u32; encoder_count as usize];
            let mut tmp = ioctl::DrmModeCardRes::zeroed();
            unsafe {
                tmp.set_crtc_id_ptr(crtc_ids.as_mut_ptr(), crtc_count);
                tmp.set_connector_id_ptr(connector_ids.as_mut_ptr(), connector_count);
                tmp.set_encoder_id_ptr(encoder_ids.as_mut_ptr(), encoder_count);
            }
            crate::drm_ioctl!(f, ioctl::DRM_IOCTL_MODE_GETRESOURCES, &mut tmp)?;
            if tmp.count_crtcs() != crtc_count
                || tmp.count_connectors() != connector_count
                || tmp.count_encoders() != encoder_count
            {
                // Something was hotplugged between the two requests.
                continue;
            }

            return Ok(CardResources {
                crtc_ids: crtc_ids.into_iter().map(CrtcId).collect(),
                connector_ids: connector_ids.into_iter().map(ConnectorId).collect(),
                encoder_ids: encoder_ids.into_iter().map(EncoderId).collect(),
                plane_ids: self.plane_ids()?,
            });
        }
    }

    fn connector_state(&self, id: ConnectorId) -> Result<ConnectorState, Error> {
        let f = self.file();
        loop {
            // With a zero mode count the kernel also re-probes the connector.
            let mut tmp = ioctl::DrmModeGetConnector::zeroed();
            tmp.connector_id = id.0;
            crate::drm_ioctl!(f, ioctl::DRM_IOCTL_MODE_GETCONNECTOR, &mut tmp)?;
            let mode_count = tmp.count_modes();
            let encoder_count = tmp.count_encoders();

            let mut modes = vec![ioctl::DrmModeInfo::zeroed(); mode_count as usize];
            let mut encoders = vec![0_u32; encoder_count as usize];
            let mut tmp = ioctl::DrmModeGetConnector::zeroed();
            tmp.connector_id = id.0;
            tmp.clear_props_ptrs();
            unsafe {
                tmp.set_modes_ptr(modes.as_mut_ptr(), mode_count);
                tmp.set_encoders_ptr(encoders.as_mut_ptr(), encoder_count);
            }
            crate::drm_ioctl!(f, ioctl::DRM_IOCTL_MODE_GETCONNECTOR, &mut tmp)?;
            if tmp.count_modes() != mode_count || tmp.count_encoders() != encoder_count {
                continue;
            }

            return Ok(ConnectorState {
                id,
                connector_type: ConnectorType::from(tmp.connector_type),
                connector_type_id: tmp.connector_type_id,
                connection_state: ConnectionState::from(tmp.connection),
                width_mm: tmp.mm_width,
                height_mm: tmp.mm_height,
                modes: modes.into_iter().map(ModeInfo::from).collect(),
                encoder_ids: encoders.into_iter().map(EncoderId).collect(),
            });
        }
    }

    fn encoder_state(&self, id: EncoderId) -> Result<EncoderState, Error> {
        let mut tmp = ioctl::DrmModeGetEncoder::zeroed();
        tmp.encoder_id = id.0;
        crate::drm_ioctl!(self.file(), ioctl::DRM_IOCTL_MODE_GETENCODER, &mut tmp)?;
        Ok(EncoderState {
            encoder_id: id,
            encoder_type: tmp.encoder_type,
            current_crtc_id: CrtcId(tmp.crtc_id),
            possible_crtcs: tmp.possible_crtcs,
        })
    }

    fn plane_state(&self, id: PlaneId) -> Result<PlaneState, Error> {
        // The format list is left out; the composer only scans out ABGR8888.
        let mut tmp = ioctl::DrmModeGetPlane::zeroed();
        tmp.plane_id = id.0;
        crate::drm_ioctl!(self.file(), ioctl::DRM_IOCTL_MODE_GETPLANE, &mut tmp)?;
        Ok(PlaneState {
            id,
            crtc_id: CrtcId(tmp.crtc_id),
            fb_id: FramebufferId(tmp.fb_id),
            possible_crtcs: tmp.possible_crtcs,
        })
    }

    fn object_properties(&self, obj: ObjectId) -> Result<Vec<ObjectProperty>, Error> {
        let f = self.file();
        let (obj_type, obj_id) = obj.as_raw_type_and_id();
        let (ids, values) = loop {
            let mut tmp = ioctl::DrmModeObjGetProperties::zeroed();
            tmp.obj_id = obj_id;
            tmp.obj_type = obj_type;
            crate::drm_ioctl!(f, ioctl::DRM_IOCTL_MODE_OBJ_GETPROPERTIES, &mut tmp)?;
            let count = tmp.count_props();

            let mut ids = vec![0_u32; count as usize];
            let mut values = vec![0_u64; count as usize];
            let mut tmp = ioctl::DrmModeObjGetProperties::zeroed();
            tmp.obj_id = obj_id;
            tmp.obj_type = obj_type;
            unsafe { tmp.set_prop_ptrs(ids.as_mut_ptr(), values.as_mut_ptr(), count) };
            crate::drm_ioctl!(f, ioctl::DRM_IOCTL_MODE_OBJ_GETPROPERTIES, &mut tmp)?;
            if tmp.count_props() == count {
                break (ids, values);
            }
        };

        ids.into_iter()
            .zip(values)
            .map(|(id, value)| {
                let prop_id = PropertyId(id);
                Ok(ObjectProperty {
                    prop_id,
                    name: self.property_name(prop_id)?,
                    value,
                })
            })
            .collect()
    }

    fn prime_fd_to_handle(&self, fd: BorrowedFd<'_>) -> Result<BufferObjectId, Error> {
        let mut tmp = ioctl::DrmPrimeHandle::zeroed();
        tmp.fd = fd.as_raw_fd();
        crate::drm_ioctl!(self.file(), ioctl::DRM_IOCTL_PRIME_FD_TO_HANDLE, &mut tmp)?;
        Ok(BufferObjectId(tmp.handle))
    }

    fn close_buffer_object(&self, handle: BufferObjectId) -> Result<(), Error> {
        let tmp = ioctl::DrmGemClose {
            handle: handle.0,
            pad: 0,
        };
        crate::drm_ioctl!(self.file(), ioctl::DRM_IOCTL_GEM_CLOSE, &tmp)?;
        Ok(())
    }

    fn add_framebuffer(&self, req: &FramebufferRequest) -> Result<FramebufferId, Error> {
        let mut tmp = req.to_ioctl();
        crate::drm_ioctl!(self.file(), ioctl::DRM_IOCTL_MODE_ADDFB2, &mut tmp)?;
        Ok(FramebufferId(tmp.fb_id))
    }

    fn remove_framebuffer(&self, fb: FramebufferId) -> Result<(), Error> {
        let mut fb_id = fb.0;
        crate::drm_ioctl!(self.file(), ioctl::DRM_IOCTL_MODE_RMFB, &mut fb_id)?;
        Ok(())
    }

    fn set_crtc(
        &self,
        crtc: CrtcId,
        fb: FramebufferId,
        connectors: &[ConnectorId],
        mode: &ModeInfo,
    ) -> Result<(), Error> {
        let connector_ids: Vec<u32> = connectors.iter().map(|c| c.0).collect();
        let mut tmp = ioctl::DrmModeCrtc::zeroed();
        tmp.crtc_id = crtc.0;
        tmp.fb_id = fb.0;
        tmp.mode_valid = 1;
        tmp.mode = mode.into();
        unsafe { tmp.set_set_connectors_ptr(connector_ids.as_ptr(), connector_ids.len() as u32) };
        crate::drm_ioctl!(self.file(), ioctl::DRM_IOCTL_MODE_SETCRTC, &mut tmp)?;
        Ok(())
    }

    fn atomic_commit(
        &self,
        req: &AtomicRequest,
        flags: AtomicCommitFlags,
    ) -> Result<Option<OwnedFd>, Error> {
        let mut out_fence: i32 = -1;
        let raw = req.for_ioctl_req(&mut out_fence);
        let mut tmp = ioctl::DrmModeAtomic::zeroed();
        tmp.flags = flags.bits();
        unsafe {
            tmp.set_ptrs(ioctl::DrmModeAtomicPtrs {
                objs_ptr: raw.obj_ids.as_ptr(),
                count_props_ptr: raw.obj_prop_counts.as_ptr(),
                count_objs: raw.obj_ids.len() as u32,
                props_ptr: raw.prop_ids.as_ptr(),
                prop_values_ptr: raw.prop_values.as_ptr(),
            })
        };
        crate::drm_ioctl!(self.file(), ioctl::DRM_IOCTL_MODE_ATOMIC, &mut tmp)?;

        if req.out_fence().is_none() || out_fence < 0 {
            return Ok(None);
        }
        // Safety: the kernel just installed this descriptor for us and
        // nothing else refers to it.
        Ok(Some(unsafe { OwnedFd::from_raw_fd(out_fence) }))
    }
}
