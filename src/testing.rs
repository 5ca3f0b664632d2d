//! An in-memory display device for tests.
//!
//! [`FakeCard`] implements [`KmsDevice`] over a small model of CRTCs, planes,
//! encoders and connectors. It records every request it receives as a
//! [`KernelCall`] and can be told to fail specific requests, so composer
//! behavior can be checked without display hardware.
//!
//! ```
//! use kms_hwc::modeset::ConnectorType;
//! use kms_hwc::testing::{FakeCard, FakeConnector};
//! use kms_hwc::{HwcConfig, HwcContext};
//!
//! let mut card = FakeCard::with_pipes(2);
//! card.add_connector(FakeConnector::new(ConnectorType::HdmiA));
//! let mut hwc = HwcContext::new(card, &HwcConfig::default()).unwrap();
//!
//! let mut buffer = hwc.device().buffer(1920, 1080).unwrap();
//! assert!(hwc.post(0, &mut buffer).unwrap().is_none());
//! assert!(hwc.post(0, &mut buffer).unwrap().is_some());
//! ```

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::os::fd::{BorrowedFd, OwnedFd};

use crate::device::{ClientCap, KmsDevice};
use crate::handle::BufferHandle;
use crate::ioctl;
use crate::mode::generate_cvt_mode;
use crate::modeset::{
    AtomicCommitFlags, AtomicRequest, BufferObjectId, CardResources, ConnectionState,
    ConnectorId, ConnectorState, ConnectorType, CrtcId, EncoderId, EncoderState, FramebufferId,
    FramebufferRequest, KnownProperty, ModeInfo, ObjectId, ObjectProperty, PlaneId, PlaneState,
    PlaneType, PropertyId,
};
use crate::result::Error;

/// Property ids the fake assigns. Like a real card, one property has the
/// same id on every object that carries it.
pub const PROP_TYPE: PropertyId = PropertyId(10);
pub const PROP_FB_ID: PropertyId = PropertyId(11);
pub const PROP_CRTC_ID: PropertyId = PropertyId(12);
pub const PROP_CRTC_X: PropertyId = PropertyId(13);
pub const PROP_ACTIVE: PropertyId = PropertyId(20);
pub const PROP_MODE_ID: PropertyId = PropertyId(21);
pub const PROP_OUT_FENCE_PTR: PropertyId = PropertyId(22);

/// A request received by a [`FakeCard`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KernelCall {
    SetClientCap(ClientCap, u64),
    GetResources,
    GetConnector(ConnectorId),
    GetEncoder(EncoderId),
    GetPlane(PlaneId),
    GetProperties(ObjectId),
    PrimeFdToHandle,
    CloseBufferObject(BufferObjectId),
    AddFramebuffer(FramebufferRequest),
    RemoveFramebuffer(FramebufferId),
    SetCrtc {
        crtc: CrtcId,
        fb: FramebufferId,
        connectors: Vec<ConnectorId>,
        mode: ModeInfo,
    },
    AtomicCommit {
        flags: AtomicCommitFlags,
        /// `(raw object id, property, value)`, out-fence pointer as zero.
        props: Vec<(u32, PropertyId, u64)>,
    },
}

impl KernelCall {
    /// Whether this call changes what is on screen.
    pub fn is_commit(&self) -> bool {
        matches!(self, KernelCall::SetCrtc { .. } | KernelCall::AtomicCommit { .. })
    }
}

/// A mode as a display's EDID would advertise it.
pub fn edid_mode(width: u16, height: u16, refresh: u32, clock: u32, preferred: bool) -> ModeInfo {
    let mut mode = generate_cvt_mode(u32::from(width), u32::from(height), refresh);
    mode.clock = clock;
    mode.typ = ioctl::DRM_MODE_TYPE_DRIVER;
    if preferred {
        mode.typ |= ioctl::DRM_MODE_TYPE_PREFERRED;
    }
    mode
}

/// Description of a connector to add to a [`FakeCard`].
#[derive(Debug, Clone)]
pub struct FakeConnector {
    connector_type: ConnectorType,
    connection: ConnectionState,
    modes: Vec<ModeInfo>,
    width_mm: u32,
    height_mm: u32,
    possible_crtcs: u32,
    has_encoder: bool,
}

impl FakeConnector {
    /// A connected display advertising 1920x1080@60 (preferred),
    /// 1280x720@60 and 720x576@50, with no physical size, that any CRTC can
    /// drive.
    pub fn new(connector_type: ConnectorType) -> Self {
        Self {
            connector_type,
            connection: ConnectionState::Connected,
            modes: vec![
                edid_mode(1920, 1080, 60, 148500, true),
                edid_mode(1280, 720, 60, 74250, false),
                edid_mode(720, 576, 50, 27000, false),
            ],
            width_mm: 0,
            height_mm: 0,
            possible_crtcs: u32::MAX,
            has_encoder: true,
        }
    }

    pub fn connection(mut self, connection: ConnectionState) -> Self {
        self.connection = connection;
        self
    }

    pub fn disconnected(self) -> Self {
        self.connection(ConnectionState::Disconnected)
    }

    pub fn modes(mut self, modes: Vec<ModeInfo>) -> Self {
        self.modes = modes;
        self
    }

    pub fn size_mm(mut self, width: u32, height: u32) -> Self {
        self.width_mm = width;
        self.height_mm = height;
        self
    }

    /// CRTCs, by pipe index bit, the connector's encoder can use.
    pub fn possible_crtcs(mut self, mask: u32) -> Self {
        self.possible_crtcs = mask;
        self
    }

    pub fn without_encoder(mut self) -> Self {
        self.has_encoder = false;
        self
    }
}

#[derive(Debug)]
struct Plane {
    id: PlaneId,
    ty: PlaneType,
    possible_crtcs: u32,
    crtc: Option<CrtcId>,
    fb: Option<FramebufferId>,
}

#[derive(Debug)]
struct Connector {
    id: ConnectorId,
    type_id: u32,
    desc: FakeConnector,
    encoder: Option<EncoderId>,
}

#[derive(Debug, Default)]
struct Failures {
    client_cap: HashMap<ClientCap, Error>,
    resources: Option<Error>,
    connectors: HashMap<ConnectorId, Error>,
    planes: HashMap<PlaneId, Error>,
    prime: VecDeque<Error>,
    add_fb: VecDeque<Error>,
    set_crtc: VecDeque<Error>,
    commit: VecDeque<Error>,
}

#[derive(Debug, Default)]
struct State {
    next_id: u32,
    crtcs: Vec<(CrtcId, bool)>,
    planes: Vec<Plane>,
    encoders: Vec<(EncoderId, u32)>,
    connectors: Vec<Connector>,
    buffer_objects: BTreeSet<BufferObjectId>,
    framebuffers: BTreeMap<FramebufferId, FramebufferRequest>,
    scanout: HashMap<CrtcId, FramebufferId>,
    calls: Vec<KernelCall>,
    failures: Failures,
}

impl State {
    fn alloc_id(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }

    fn plane_mut(&mut self, id: u32) -> Option<&mut Plane> {
        self.planes.iter_mut().find(|p| p.id.0 == id)
    }
}

/// An in-memory [`KmsDevice`].
#[derive(Debug)]
pub struct FakeCard {
    state: RefCell<State>,
}

impl Default for FakeCard {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeCard {
    /// A card with no objects at all.
    pub fn new() -> Self {
        Self {
            state: RefCell::new(State {
                next_id: 30,
                ..State::default()
            }),
        }
    }

    /// A card with `pipes` CRTCs, each with an overlay plane and a primary
    /// plane (in that order) that only it can use.
    pub fn with_pipes(pipes: usize) -> Self {
        let mut card = Self::new();
        for pipe in 0..pipes {
            card.add_crtc();
            card.add_plane(PlaneType::Overlay, 1 << pipe);
            card.add_plane(PlaneType::Primary, 1 << pipe);
        }
        card
    }

    pub fn add_crtc(&mut self) -> CrtcId {
        self.add_crtc_with_out_fence(true)
    }

    /// Add a CRTC that has no `OUT_FENCE_PTR` property when `out_fence` is
    /// false.
    pub fn add_crtc_with_out_fence(&mut self, out_fence: bool) -> CrtcId {
        let state = self.state.get_mut();
        let id = CrtcId(state.alloc_id());
        state.crtcs.push((id, out_fence));
        id
    }

    pub fn add_plane(&mut self, ty: PlaneType, possible_crtcs: u32) -> PlaneId {
        let state = self.state.get_mut();
        let id = PlaneId(state.alloc_id());
        state.planes.push(Plane {
            id,
            ty,
            possible_crtcs,
            crtc: None,
            fb: None,
        });
        id
    }

    pub fn add_connector(&mut self, desc: FakeConnector) -> ConnectorId {
        let state = self.state.get_mut();
        let encoder = desc.has_encoder.then(|| {
            let id = EncoderId(state.alloc_id());
            state.encoders.push((id, desc.possible_crtcs));
            id
        });
        let id = ConnectorId(state.alloc_id());
        let type_id = 1 + state
            .connectors
            .iter()
            .filter(|c| c.desc.connector_type == desc.connector_type)
            .count() as u32;
        state.connectors.push(Connector {
            id,
            type_id,
            desc,
            encoder,
        });
        id
    }

    /// The primary plane only the CRTC at `pipe` can use.
    ///
    /// # Panics
    ///
    /// If there is no such plane.
    pub fn primary_plane(&self, pipe: usize) -> PlaneId {
        let state = self.state.borrow();
        let plane = state
            .planes
            .iter()
            .find(|p| p.ty == PlaneType::Primary && p.possible_crtcs == 1 << pipe);
        match plane {
            Some(plane) => plane.id,
            None => panic!("no primary plane for pipe {pipe}"),
        }
    }

    /// A buffer the card can import, backed by `/dev/null`.
    pub fn buffer(&self, width: u32, height: u32) -> std::io::Result<BufferHandle> {
        let fd = OwnedFd::from(std::fs::File::open("/dev/null")?);
        // HAL_PIXEL_FORMAT_RGBA_8888
        Ok(BufferHandle::new(fd, width, height, 1, width * 4))
    }

    pub fn calls(&self) -> Vec<KernelCall> {
        self.state.borrow().calls.clone()
    }

    pub fn take_calls(&self) -> Vec<KernelCall> {
        std::mem::take(&mut self.state.borrow_mut().calls)
    }

    pub fn clear_calls(&self) {
        self.state.borrow_mut().calls.clear();
    }

    /// The framebuffer a CRTC is currently scanning out.
    pub fn scanout(&self, crtc: CrtcId) -> Option<FramebufferId> {
        self.state.borrow().scanout.get(&crtc).copied()
    }

    pub fn has_framebuffer(&self, fb: FramebufferId) -> bool {
        self.state.borrow().framebuffers.contains_key(&fb)
    }

    /// Number of imported buffer objects that haven't been closed.
    pub fn open_buffer_objects(&self) -> usize {
        self.state.borrow().buffer_objects.len()
    }

    pub fn fail_client_cap(&self, cap: ClientCap, err: Error) {
        self.state.borrow_mut().failures.client_cap.insert(cap, err);
    }

    pub fn fail_resources(&self, err: Error) {
        self.state.borrow_mut().failures.resources = Some(err);
    }

    /// Make every query of `id` fail.
    pub fn fail_connector_query(&self, id: ConnectorId, err: Error) {
        self.state.borrow_mut().failures.connectors.insert(id, err);
    }

    /// Make every query of `id` fail.
    pub fn fail_plane_query(&self, id: PlaneId, err: Error) {
        self.state.borrow_mut().failures.planes.insert(id, err);
    }

    pub fn fail_next_prime_import(&self, err: Error) {
        self.state.borrow_mut().failures.prime.push_back(err);
    }

    pub fn fail_next_add_framebuffer(&self, err: Error) {
        self.state.borrow_mut().failures.add_fb.push_back(err);
    }

    pub fn fail_next_set_crtc(&self, err: Error) {
        self.state.borrow_mut().failures.set_crtc.push_back(err);
    }

    pub fn fail_next_commit(&self, err: Error) {
        self.state.borrow_mut().failures.commit.push_back(err);
    }

    fn record(&self, call: KernelCall) -> std::cell::RefMut<'_, State> {
        let mut state = self.state.borrow_mut();
        state.calls.push(call);
        state
    }
}

fn prop(prop_id: PropertyId, name: KnownProperty, value: u64) -> ObjectProperty {
    ObjectProperty {
        prop_id,
        name: name.name().to_owned(),
        value,
    }
}

fn other_prop(prop_id: PropertyId, name: &str, value: u64) -> ObjectProperty {
    ObjectProperty {
        prop_id,
        name: name.to_owned(),
        value,
    }
}

fn raw_plane_type(ty: PlaneType) -> u64 {
    match ty {
        PlaneType::Overlay => ioctl::DRM_PLANE_TYPE_OVERLAY,
        PlaneType::Primary => ioctl::DRM_PLANE_TYPE_PRIMARY,
        PlaneType::Cursor => ioctl::DRM_PLANE_TYPE_CURSOR,
        PlaneType::Unknown(v) => v,
    }
}

impl KmsDevice for FakeCard {
    fn set_client_cap(&self, cap: ClientCap, value: u64) -> Result<(), Error> {
        let state = self.record(KernelCall::SetClientCap(cap, value));
        match state.failures.client_cap.get(&cap) {
            Some(err) => Err(*err),
            None => Ok(()),
        }
    }

    fn resources(&self) -> Result<CardResources, Error> {
        let state = self.record(KernelCall::GetResources);
        if let Some(err) = state.failures.resources {
            return Err(err);
        }
        Ok(CardResources {
            crtc_ids: state.crtcs.iter().map(|(id, _)| *id).collect(),
            connector_ids: state.connectors.iter().map(|c| c.id).collect(),
            encoder_ids: state.encoders.iter().map(|(id, _)| *id).collect(),
            plane_ids: state.planes.iter().map(|p| p.id).collect(),
        })
    }

    fn connector_state(&self, id: ConnectorId) -> Result<ConnectorState, Error> {
        let state = self.record(KernelCall::GetConnector(id));
        if let Some(err) = state.failures.connectors.get(&id) {
            return Err(*err);
        }
        let conn = state
            .connectors
            .iter()
            .find(|c| c.id == id)
            .ok_or(Error::NonExist)?;
        Ok(ConnectorState {
            id,
            connector_type: conn.desc.connector_type,
            connector_type_id: conn.type_id,
            connection_state: conn.desc.connection,
            width_mm: conn.desc.width_mm,
            height_mm: conn.desc.height_mm,
            modes: conn.desc.modes.clone(),
            encoder_ids: conn.encoder.into_iter().collect(),
        })
    }

    fn encoder_state(&self, id: EncoderId) -> Result<EncoderState, Error> {
        let state = self.record(KernelCall::GetEncoder(id));
        let (_, possible_crtcs) = state
            .encoders
            .iter()
            .find(|(enc, _)| *enc == id)
            .ok_or(Error::NonExist)?;
        Ok(EncoderState {
            encoder_id: id,
            // DRM_MODE_ENCODER_TMDS
            encoder_type: 2,
            current_crtc_id: CrtcId(0),
            possible_crtcs: *possible_crtcs,
        })
    }

    fn plane_state(&self, id: PlaneId) -> Result<PlaneState, Error> {
        let state = self.record(KernelCall::GetPlane(id));
        if let Some(err) = state.failures.planes.get(&id) {
            return Err(*err);
        }
        let plane = state
            .planes
            .iter()
            .find(|p| p.id == id)
            .ok_or(Error::NonExist)?;
        Ok(PlaneState {
            id,
            crtc_id: plane.crtc.unwrap_or(CrtcId(0)),
            fb_id: plane.fb.unwrap_or(FramebufferId(0)),
            possible_crtcs: plane.possible_crtcs,
        })
    }

    fn object_properties(&self, obj: ObjectId) -> Result<Vec<ObjectProperty>, Error> {
        let state = self.record(KernelCall::GetProperties(obj));
        match obj {
            ObjectId::Crtc(id) => {
                let (_, out_fence) = state
                    .crtcs
                    .iter()
                    .find(|(crtc, _)| *crtc == id)
                    .ok_or(Error::NonExist)?;
                let mut props = vec![
                    other_prop(PROP_ACTIVE, "ACTIVE", 0),
                    other_prop(PROP_MODE_ID, "MODE_ID", 0),
                ];
                if *out_fence {
                    props.push(prop(PROP_OUT_FENCE_PTR, KnownProperty::OutFencePtr, 0));
                }
                Ok(props)
            }
            ObjectId::Plane(id) => {
                let plane = state
                    .planes
                    .iter()
                    .find(|p| p.id == id)
                    .ok_or(Error::NonExist)?;
                let fb = plane.fb.map_or(0, |fb| u64::from(fb.0));
                let crtc = plane.crtc.map_or(0, |c| u64::from(c.0));
                Ok(vec![
                    prop(PROP_TYPE, KnownProperty::PlaneType, raw_plane_type(plane.ty)),
                    prop(PROP_FB_ID, KnownProperty::FbId, fb),
                    prop(PROP_CRTC_ID, KnownProperty::CrtcId, crtc),
                    other_prop(PROP_CRTC_X, "CRTC_X", 0),
                ])
            }
            _ => Ok(Vec::new()),
        }
    }

    fn prime_fd_to_handle(&self, _fd: BorrowedFd<'_>) -> Result<BufferObjectId, Error> {
        let mut state = self.record(KernelCall::PrimeFdToHandle);
        if let Some(err) = state.failures.prime.pop_front() {
            return Err(err);
        }
        let bo = BufferObjectId(state.alloc_id());
        state.buffer_objects.insert(bo);
        Ok(bo)
    }

    fn close_buffer_object(&self, handle: BufferObjectId) -> Result<(), Error> {
        let mut state = self.record(KernelCall::CloseBufferObject(handle));
        if state.buffer_objects.remove(&handle) {
            Ok(())
        } else {
            Err(Error::Invalid)
        }
    }

    fn add_framebuffer(&self, req: &FramebufferRequest) -> Result<FramebufferId, Error> {
        let mut state = self.record(KernelCall::AddFramebuffer(req.clone()));
        if let Some(err) = state.failures.add_fb.pop_front() {
            return Err(err);
        }
        if !state.buffer_objects.contains(&req.handle) {
            return Err(Error::NonExist);
        }
        let fb = FramebufferId(state.alloc_id());
        state.framebuffers.insert(fb, req.clone());
        Ok(fb)
    }

    fn remove_framebuffer(&self, fb: FramebufferId) -> Result<(), Error> {
        let mut state = self.record(KernelCall::RemoveFramebuffer(fb));
        if state.framebuffers.remove(&fb).is_none() {
            return Err(Error::NonExist);
        }
        state.scanout.retain(|_, shown| *shown != fb);
        Ok(())
    }

    fn set_crtc(
        &self,
        crtc: CrtcId,
        fb: FramebufferId,
        connectors: &[ConnectorId],
        mode: &ModeInfo,
    ) -> Result<(), Error> {
        let mut state = self.record(KernelCall::SetCrtc {
            crtc,
            fb,
            connectors: connectors.to_vec(),
            mode: mode.clone(),
        });
        if let Some(err) = state.failures.set_crtc.pop_front() {
            return Err(err);
        }
        if !state.crtcs.iter().any(|(id, _)| *id == crtc) || !state.framebuffers.contains_key(&fb) {
            return Err(Error::NonExist);
        }
        state.scanout.insert(crtc, fb);
        Ok(())
    }

    fn atomic_commit(
        &self,
        req: &AtomicRequest,
        flags: AtomicCommitFlags,
    ) -> Result<Option<OwnedFd>, Error> {
        let mut state = self.record(KernelCall::AtomicCommit {
            flags,
            props: req.properties().collect(),
        });
        if let Some(err) = state.failures.commit.pop_front() {
            return Err(err);
        }

        // Check everything first so a rejected commit changes nothing.
        for (obj, prop, value) in req.properties() {
            let fb = FramebufferId(value as u32);
            if prop == PROP_FB_ID && value != 0 && !state.framebuffers.contains_key(&fb) {
                return Err(Error::NonExist);
            }
            let known = state.crtcs.iter().any(|(id, _)| id.0 == obj)
                || state.planes.iter().any(|p| p.id.0 == obj);
            if !known {
                return Err(Error::NonExist);
            }
        }
        if flags.contains(AtomicCommitFlags::TEST_ONLY) {
            return Ok(None);
        }

        for (obj, prop, value) in req.properties() {
            let Some(plane) = state.plane_mut(obj) else {
                continue;
            };
            if prop == PROP_FB_ID {
                plane.fb = (value != 0).then_some(FramebufferId(value as u32));
            } else if prop == PROP_CRTC_ID {
                plane.crtc = (value != 0).then_some(CrtcId(value as u32));
            }
        }
        let shown: Vec<_> = state
            .planes
            .iter()
            .filter(|p| p.ty == PlaneType::Primary)
            .filter_map(|p| Some((p.crtc?, p.fb?)))
            .collect();
        state.scanout.extend(shown);

        if req.out_fence().is_none() {
            return Ok(None);
        }
        let fence = std::fs::File::open("/dev/null").map_err(|_| Error::SystemMem)?;
        Ok(Some(fence.into()))
    }
}
