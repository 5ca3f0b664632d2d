//! End-to-end composer behavior against the in-memory card.

use kms_hwc::config::ModeOverride;
use kms_hwc::modeset::{AtomicCommitFlags, ConnectionState, ConnectorType, PlaneType};
use kms_hwc::output::CommitState;
use kms_hwc::result::{Error, InitError, PostError};
use kms_hwc::testing::{
    edid_mode, FakeCard, FakeConnector, KernelCall, PROP_CRTC_ID, PROP_FB_ID, PROP_OUT_FENCE_PTR,
};
use kms_hwc::{ClientCap, DisplayId, HwcConfig, HwcContext};

fn single_hdmi() -> HwcContext<FakeCard> {
    let mut card = FakeCard::with_pipes(2);
    card.add_connector(FakeConnector::new(ConnectorType::HdmiA));
    let hwc = HwcContext::new(card, &HwcConfig::default()).unwrap();
    hwc.device().clear_calls();
    hwc
}

fn commits(hwc: &HwcContext<FakeCard>) -> Vec<KernelCall> {
    hwc.device()
        .take_calls()
        .into_iter()
        .filter(KernelCall::is_commit)
        .collect()
}

#[test]
fn init_enables_caps_and_binds_primary() {
    let mut card = FakeCard::with_pipes(2);
    let conn = card.add_connector(FakeConnector::new(ConnectorType::HdmiA).size_mm(509, 286));
    let hwc = HwcContext::new(card, &HwcConfig::default()).unwrap();

    let calls = hwc.device().calls();
    assert_eq!(
        &calls[..3],
        &[
            KernelCall::SetClientCap(ClientCap::UniversalPlanes, 1),
            KernelCall::SetClientCap(ClientCap::Atomic, 1),
            KernelCall::GetResources,
        ]
    );

    let out = hwc.output(DisplayId::Primary).unwrap();
    assert_eq!(out.connector_id, conn);
    assert_eq!(out.pipe, 0);
    assert_eq!(out.plane.unwrap().id, hwc.device().primary_plane(0));
    assert_eq!(out.out_fence_prop, Some(PROP_OUT_FENCE_PTR));
    assert!(!hwc.is_secondary_active());
    assert_eq!(hwc.commit_state(DisplayId::Primary), Some(CommitState::FirstFramePending));
    assert_eq!(hwc.commit_state(DisplayId::Secondary), None);

    let attrs = hwc.display_attributes(DisplayId::Primary).unwrap();
    assert_eq!((attrs.width, attrs.height, attrs.refresh), (1920, 1080, 60));
    assert_eq!((attrs.xdpi, attrs.ydpi), (95, 95));
    assert_eq!(hwc.display_attributes(DisplayId::Secondary), None);
}

#[test]
fn first_post_is_a_legacy_modeset() {
    let mut hwc = single_hdmi();
    let mut buffer = hwc.device().buffer(1920, 1080).unwrap();

    let fence = hwc.post(0, &mut buffer).unwrap();
    assert!(fence.is_none());
    assert_eq!(hwc.commit_state(DisplayId::Primary), Some(CommitState::SteadyState));

    let out = hwc.output(DisplayId::Primary).unwrap().clone();
    let fb = buffer.framebuffer_id().unwrap();
    assert_eq!(
        commits(&hwc),
        vec![KernelCall::SetCrtc {
            crtc: out.crtc_id,
            fb,
            connectors: vec![out.connector_id],
            mode: out.mode.clone(),
        }]
    );
    assert_eq!(hwc.device().scanout(out.crtc_id), Some(fb));
}

#[test]
fn later_posts_are_fenced_atomic_flips() {
    let mut hwc = single_hdmi();
    let mut first = hwc.device().buffer(1920, 1080).unwrap();
    let mut second = hwc.device().buffer(1920, 1080).unwrap();
    hwc.post(0, &mut first).unwrap();
    hwc.device().clear_calls();

    let fence = hwc.post(0, &mut second).unwrap();
    assert!(fence.is_some());

    let out = hwc.output(DisplayId::Primary).unwrap().clone();
    let plane = out.plane.unwrap().id;
    let fb = second.framebuffer_id().unwrap();
    assert_eq!(
        commits(&hwc),
        vec![KernelCall::AtomicCommit {
            flags: AtomicCommitFlags::NONBLOCK | AtomicCommitFlags::ALLOW_MODESET,
            props: vec![
                (out.crtc_id.0, PROP_OUT_FENCE_PTR, 0),
                (plane.0, PROP_FB_ID, u64::from(fb.0)),
                (plane.0, PROP_CRTC_ID, u64::from(out.crtc_id.0)),
            ],
        }]
    );
    assert_eq!(hwc.device().scanout(out.crtc_id), Some(fb));
    assert_eq!(hwc.commit_state(DisplayId::Primary), Some(CommitState::SteadyState));
}

#[test]
fn no_fence_without_out_fence_property() {
    let mut card = FakeCard::new();
    card.add_crtc_with_out_fence(false);
    card.add_plane(PlaneType::Primary, 0b1);
    card.add_connector(FakeConnector::new(ConnectorType::HdmiA));
    let mut hwc = HwcContext::new(card, &HwcConfig::default()).unwrap();
    assert_eq!(hwc.output(DisplayId::Primary).unwrap().out_fence_prop, None);

    let mut buffer = hwc.device().buffer(1920, 1080).unwrap();
    assert!(hwc.post(0, &mut buffer).unwrap().is_none());
    hwc.device().clear_calls();
    assert!(hwc.post(0, &mut buffer).unwrap().is_none());

    let [KernelCall::AtomicCommit { props, .. }] = &commits(&hwc)[..] else {
        panic!("expected one atomic commit");
    };
    assert!(props.iter().all(|(_, prop, _)| *prop != PROP_OUT_FENCE_PTR));
    assert_eq!(props.len(), 2);
}

#[test]
fn failed_flip_falls_back_to_modeset() {
    let mut hwc = single_hdmi();
    let mut buffer = hwc.device().buffer(1920, 1080).unwrap();
    hwc.post(0, &mut buffer).unwrap();

    hwc.device().fail_next_commit(Error::Invalid);
    let err = hwc.post(0, &mut buffer).unwrap_err();
    assert!(matches!(err, PostError::Commit(Error::Invalid)));
    assert_eq!(err.errno(), -22);
    assert_eq!(hwc.commit_state(DisplayId::Primary), Some(CommitState::FirstFramePending));
    hwc.device().clear_calls();

    assert!(hwc.post(0, &mut buffer).unwrap().is_none());
    assert!(matches!(&commits(&hwc)[..], [KernelCall::SetCrtc { .. }]));
    assert_eq!(hwc.commit_state(DisplayId::Primary), Some(CommitState::SteadyState));
}

#[test]
fn busy_flip_keeps_steady_state() {
    let mut hwc = single_hdmi();
    let mut buffer = hwc.device().buffer(1920, 1080).unwrap();
    hwc.post(0, &mut buffer).unwrap();

    hwc.device().fail_next_commit(Error::Busy);
    let err = hwc.post(0, &mut buffer).unwrap_err();
    assert!(matches!(err, PostError::Commit(Error::Busy)));
    assert_eq!(err.errno(), -16);
    assert_eq!(hwc.commit_state(DisplayId::Primary), Some(CommitState::SteadyState));
    hwc.device().clear_calls();

    assert!(hwc.post(0, &mut buffer).unwrap().is_some());
    assert!(matches!(&commits(&hwc)[..], [KernelCall::AtomicCommit { .. }]));
}

#[test]
fn failed_modeset_stays_pending() {
    let mut hwc = single_hdmi();
    let mut buffer = hwc.device().buffer(1920, 1080).unwrap();

    hwc.device().fail_next_set_crtc(Error::Invalid);
    assert!(matches!(
        hwc.post(0, &mut buffer),
        Err(PostError::ModeSet(Error::Invalid))
    ));
    assert_eq!(hwc.commit_state(DisplayId::Primary), Some(CommitState::FirstFramePending));
    // The framebuffer survives for the retry.
    let fb = buffer.framebuffer_id().unwrap();
    assert!(hwc.device().has_framebuffer(fb));
    hwc.device().clear_calls();

    assert!(hwc.post(0, &mut buffer).unwrap().is_none());
    let calls = hwc.device().take_calls();
    assert!(matches!(&calls[..], [KernelCall::SetCrtc { fb: shown, .. }] if *shown == fb));
}

#[test]
fn invalid_display_is_rejected_without_kernel_calls() {
    let mut hwc = single_hdmi();
    let mut buffer = hwc.device().buffer(1920, 1080).unwrap();

    let err = hwc.post(2, &mut buffer).unwrap_err();
    assert!(matches!(err, PostError::InvalidDisplay(2)));
    assert_eq!(err.errno(), -22);
    // No secondary display was found either.
    assert!(matches!(
        hwc.post(1, &mut buffer),
        Err(PostError::InvalidDisplay(1))
    ));
    assert!(hwc.device().calls().is_empty());
    assert_eq!(buffer.framebuffer_id(), None);
}

#[test]
fn retired_buffer_is_rejected_without_kernel_calls() {
    let mut hwc = single_hdmi();
    let mut buffer = hwc.device().buffer(1920, 1080).unwrap();
    buffer.retire();

    let err = hwc.post(0, &mut buffer).unwrap_err();
    assert!(matches!(err, PostError::InvalidHandle(_)));
    assert_eq!(err.errno(), -22);
    assert!(hwc.device().calls().is_empty());
}

#[test]
fn framebuffer_registration_happens_once() {
    let mut hwc = single_hdmi();
    let mut buffer = hwc.device().buffer(1920, 1080).unwrap();
    for _ in 0..3 {
        hwc.post(0, &mut buffer).unwrap();
    }
    let add_fbs = hwc
        .device()
        .calls()
        .iter()
        .filter(|c| matches!(c, KernelCall::AddFramebuffer(_)))
        .count();
    assert_eq!(add_fbs, 1);
    assert_eq!(hwc.device().open_buffer_objects(), 0);
}

#[test]
fn framebuffer_failure_aborts_post() {
    let mut hwc = single_hdmi();
    let mut buffer = hwc.device().buffer(1920, 1080).unwrap();

    hwc.device().fail_next_add_framebuffer(Error::GraphicsMem);
    let err = hwc.post(0, &mut buffer).unwrap_err();
    assert!(matches!(err, PostError::Framebuffer(Error::GraphicsMem)));
    assert_eq!(err.errno(), -28);
    assert!(commits(&hwc).is_empty());
    assert_eq!(buffer.framebuffer_id(), None);
    assert_eq!(hwc.commit_state(DisplayId::Primary), Some(CommitState::FirstFramePending));

    assert!(hwc.post(0, &mut buffer).is_ok());
}

#[test]
fn release_buffer_removes_framebuffer() {
    let mut hwc = single_hdmi();
    let mut buffer = hwc.device().buffer(1920, 1080).unwrap();
    hwc.post(0, &mut buffer).unwrap();
    let fb = buffer.framebuffer_id().unwrap();

    hwc.release_buffer(&mut buffer).unwrap();
    assert_eq!(buffer.framebuffer_id(), None);
    assert!(!hwc.device().has_framebuffer(fb));
    assert_eq!(
        hwc.commit_state(DisplayId::Primary),
        Some(CommitState::FirstFramePending)
    );

    // Posting again registers a new framebuffer and sets the mode again,
    // since removing the shown framebuffer turned the CRTC off.
    hwc.device().clear_calls();
    hwc.post(0, &mut buffer).unwrap();
    assert_ne!(buffer.framebuffer_id(), None);
    assert!(matches!(&commits(&hwc)[..], [KernelCall::SetCrtc { .. }]));
}

#[test]
fn releasing_an_offscreen_buffer_keeps_flipping() {
    let mut hwc = single_hdmi();
    let mut front = hwc.device().buffer(1920, 1080).unwrap();
    let mut back = hwc.device().buffer(1920, 1080).unwrap();
    hwc.post(0, &mut front).unwrap();
    hwc.post(0, &mut back).unwrap();

    hwc.release_buffer(&mut front).unwrap();
    assert_eq!(hwc.commit_state(DisplayId::Primary), Some(CommitState::SteadyState));
    assert_eq!(
        hwc.output(DisplayId::Primary).unwrap().scanout(),
        back.framebuffer_id()
    );

    hwc.device().clear_calls();
    hwc.post(0, &mut back).unwrap();
    assert!(matches!(&commits(&hwc)[..], [KernelCall::AtomicCommit { .. }]));
}

#[test]
fn closest_mode_override_wins_over_preferred() {
    let mut card = FakeCard::with_pipes(1);
    card.add_connector(FakeConnector::new(ConnectorType::HdmiA).modes(vec![
        edid_mode(1920, 1080, 60, 148500, true),
        edid_mode(1280, 720, 60, 74250, false),
    ]));
    let config = HwcConfig {
        mode: Some("1280x720".parse().unwrap()),
        ..HwcConfig::default()
    };
    let hwc = HwcContext::new(card, &config).unwrap();

    let mode = &hwc.output(DisplayId::Primary).unwrap().mode;
    assert_eq!((mode.hdisplay, mode.vdisplay, mode.vrefresh), (1280, 720, 60));
    assert_eq!(mode.clock, 75000);
}

#[test]
fn preferred_mode_by_default() {
    let mut card = FakeCard::with_pipes(1);
    card.add_connector(FakeConnector::new(ConnectorType::HdmiA).modes(vec![
        edid_mode(1280, 720, 60, 74250, false),
        edid_mode(1920, 1080, 60, 148500, true),
        edid_mode(1920, 1080, 50, 148500, true),
    ]));
    let hwc = HwcContext::new(card, &HwcConfig::default()).unwrap();

    let mode = &hwc.output(DisplayId::Primary).unwrap().mode;
    assert_eq!((mode.hdisplay, mode.vdisplay, mode.vrefresh), (1920, 1080, 60));
    assert!(mode.is_preferred());
}

#[test]
fn forced_mode_is_synthesized_and_posted_at_that_size() {
    let mut card = FakeCard::with_pipes(1);
    card.add_connector(FakeConnector::new(ConnectorType::HdmiA));
    let config = HwcConfig {
        forced_mode: Some(ModeOverride::new(1024, 600, 60)),
        ..HwcConfig::default()
    };
    let mut hwc = HwcContext::new(card, &config).unwrap();

    let mode = hwc.output(DisplayId::Primary).unwrap().mode.clone();
    assert_eq!((mode.hdisplay, mode.vdisplay, mode.clock), (1024, 600, 49000));
    assert!(!mode.is_preferred());

    let mut buffer = hwc.device().buffer(1024, 600).unwrap();
    hwc.device().clear_calls();
    hwc.post(0, &mut buffer).unwrap();
    let calls = hwc.device().take_calls();
    let Some(KernelCall::AddFramebuffer(req)) =
        calls.iter().find(|c| matches!(c, KernelCall::AddFramebuffer(_)))
    else {
        panic!("no framebuffer added: {calls:?}");
    };
    assert_eq!((req.width, req.height, req.pitch), (1024, 600, 4096));
}

#[test]
fn second_connector_of_same_type_becomes_secondary() {
    let mut card = FakeCard::with_pipes(2);
    let dsi = card.add_connector(FakeConnector::new(ConnectorType::Dsi));
    let first = card.add_connector(FakeConnector::new(ConnectorType::HdmiA));
    let second = card.add_connector(
        FakeConnector::new(ConnectorType::HdmiA)
            .modes(vec![edid_mode(1280, 1024, 60, 108000, true)]),
    );
    let mut hwc = HwcContext::new(card, &HwcConfig::default()).unwrap();

    assert!(hwc.is_secondary_active());
    let primary = hwc.output(DisplayId::Primary).unwrap().clone();
    let secondary = hwc.output(DisplayId::Secondary).unwrap().clone();
    assert_eq!(primary.connector_id, first);
    assert_eq!(secondary.connector_id, second);
    assert_ne!(secondary.connector_id, dsi);
    assert_eq!((primary.pipe, secondary.pipe), (0, 1));
    assert_eq!(secondary.plane.unwrap().id, hwc.device().primary_plane(1));

    // The two displays move through their states independently.
    let mut a = hwc.device().buffer(1920, 1080).unwrap();
    let mut b = hwc.device().buffer(1280, 1024).unwrap();
    hwc.post(0, &mut a).unwrap();
    assert_eq!(hwc.commit_state(DisplayId::Primary), Some(CommitState::SteadyState));
    assert_eq!(hwc.commit_state(DisplayId::Secondary), Some(CommitState::FirstFramePending));

    hwc.device().clear_calls();
    assert!(hwc.post(1, &mut b).unwrap().is_none());
    let calls = hwc.device().take_calls();
    let Some(KernelCall::AddFramebuffer(req)) =
        calls.iter().find(|c| matches!(c, KernelCall::AddFramebuffer(_)))
    else {
        panic!("expected a new framebuffer: {calls:?}");
    };
    assert_eq!((req.width, req.height), (1280, 1024));
    assert!(matches!(
        calls.last(),
        Some(KernelCall::SetCrtc { crtc, .. }) if *crtc == secondary.crtc_id
    ));

    assert!(hwc.post(1, &mut b).unwrap().is_some());
    assert!(hwc.post(0, &mut a).unwrap().is_some());
}

#[test]
fn secondary_without_free_crtc_is_skipped() {
    let mut card = FakeCard::with_pipes(1);
    card.add_connector(FakeConnector::new(ConnectorType::HdmiA));
    card.add_connector(FakeConnector::new(ConnectorType::HdmiA));
    let hwc = HwcContext::new(card, &HwcConfig::default()).unwrap();

    assert!(!hwc.is_secondary_active());
    assert_eq!(hwc.output(DisplayId::Primary).unwrap().pipe, 0);
}

#[test]
fn falls_back_to_first_connected_connector() {
    let mut card = FakeCard::with_pipes(1);
    card.add_connector(FakeConnector::new(ConnectorType::HdmiA).disconnected());
    card.add_connector(FakeConnector::new(ConnectorType::Composite).disconnected());
    let dsi = card.add_connector(FakeConnector::new(ConnectorType::Dsi));
    card.add_connector(FakeConnector::new(ConnectorType::Dpi));
    let hwc = HwcContext::new(card, &HwcConfig::default()).unwrap();

    assert_eq!(hwc.output(DisplayId::Primary).unwrap().connector_id, dsi);
    assert!(!hwc.is_secondary_active());
}

#[test]
fn falls_back_to_last_queryable_connector() {
    let mut card = FakeCard::with_pipes(1);
    card.add_connector(FakeConnector::new(ConnectorType::HdmiA).disconnected());
    let composite = card.add_connector(
        FakeConnector::new(ConnectorType::Composite).connection(ConnectionState::Unknown),
    );
    let broken = card.add_connector(FakeConnector::new(ConnectorType::Dsi).disconnected());
    card.fail_connector_query(broken, Error::Invalid);
    let hwc = HwcContext::new(card, &HwcConfig::default()).unwrap();

    assert_eq!(hwc.output(DisplayId::Primary).unwrap().connector_id, composite);
}

#[test]
fn no_connectors_is_fatal() {
    let card = FakeCard::with_pipes(1);
    let err = HwcContext::new(card, &HwcConfig::default()).unwrap_err();
    assert!(matches!(err, InitError::NoUsableConnector));
    assert_eq!(err.errno(), -22);
}

#[test]
fn primary_bind_failure_is_fatal() {
    let mut card = FakeCard::with_pipes(1);
    card.add_connector(FakeConnector::new(ConnectorType::HdmiA).modes(Vec::new()));
    let err = HwcContext::new(card, &HwcConfig::default()).unwrap_err();
    assert!(matches!(err, InitError::Bind(_)));
}

#[test]
fn client_cap_failure_is_fatal() {
    let mut card = FakeCard::with_pipes(1);
    card.add_connector(FakeConnector::new(ConnectorType::HdmiA));
    card.fail_client_cap(ClientCap::Atomic, Error::NotSupported);
    let err = HwcContext::new(card, &HwcConfig::default()).unwrap_err();
    assert!(matches!(err, InitError::ClientCap("atomic", Error::NotSupported)));
    assert_eq!(err.errno(), -95);
}

#[test]
fn resource_failure_is_fatal() {
    let mut card = FakeCard::with_pipes(1);
    card.add_connector(FakeConnector::new(ConnectorType::HdmiA));
    card.fail_resources(Error::Permission);
    let err = HwcContext::new(card, &HwcConfig::default()).unwrap_err();
    assert!(matches!(err, InitError::Resources(Error::Permission)));
    assert_eq!(err.errno(), -1);
}

#[test]
fn configured_connector_type_is_tried_first() {
    let mut card = FakeCard::with_pipes(2);
    card.add_connector(FakeConnector::new(ConnectorType::HdmiA));
    let dsi = card.add_connector(FakeConnector::new(ConnectorType::Dsi));
    let config = HwcConfig {
        connector_type: ConnectorType::Dsi,
        ..HwcConfig::default()
    };
    let hwc = HwcContext::new(card, &config).unwrap();

    assert_eq!(hwc.output(DisplayId::Primary).unwrap().connector_id, dsi);
    assert!(!hwc.is_secondary_active());
}
