//! The composer: up to two displays on one card.

use std::ffi::CString;
use std::os::fd::OwnedFd;
use std::os::unix::ffi::OsStrExt;

use crate::binding::{bind_connector, CrtcAllocator};
use crate::config::HwcConfig;
use crate::device::{ClientCap, KmsDevice};
use crate::discovery::{find_connector, queryable_connectors};
use crate::framebuffer::{register_framebuffer, release_framebuffer};
use crate::handle::BufferHandle;
use crate::mode::ModeRequest;
use crate::modeset::CardResources;
use crate::output::{CommitState, DisplayAttributes, DisplayOutput};
use crate::result::{Error, InitError, PostError, ProbeError};
use crate::Card;

/// The displays a host can post to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u64)]
pub enum DisplayId {
    Primary = 0,
    Secondary = 1,
}

impl TryFrom<u64> for DisplayId {
    type Error = PostError;

    fn try_from(value: u64) -> Result<Self, PostError> {
        match value {
            0 => Ok(DisplayId::Primary),
            1 => Ok(DisplayId::Secondary),
            other => Err(PostError::InvalidDisplay(other)),
        }
    }
}

impl From<DisplayId> for u64 {
    fn from(value: DisplayId) -> Self {
        value as u64
    }
}

/// A bound primary display and, if one was found, a secondary display,
/// each with its own commit state.
///
/// Callers serialize calls per display; nothing here blocks other than the
/// kernel requests themselves.
#[derive(Debug)]
pub struct HwcContext<D: KmsDevice = Card> {
    dev: D,
    primary: DisplayOutput,
    secondary: Option<DisplayOutput>,
}

impl HwcContext<Card> {
    /// Open the device named in `config` and bring up its displays.
    pub fn open(config: &HwcConfig) -> Result<Self, InitError> {
        let path = CString::new(config.device_path.as_os_str().as_bytes())
            .map_err(|_| InitError::Open(ProbeError::InvalidPath))?;
        let card = Card::open(&path).map_err(|err| {
            tracing::error!("failed to open {}: {err}", config.device_path.display());
            InitError::Open(err)
        })?;
        Self::new(card, config)
    }
}

impl<D: KmsDevice> HwcContext<D> {
    /// Bring up the displays of an already open device.
    ///
    /// The primary display is the first connected connector of the
    /// configured type, and the secondary display the next one of the same
    /// type. Without a connected connector of that type, the first connected
    /// connector of any type is used, or failing that the last one that
    /// could be queried at all.
    pub fn new(dev: D, config: &HwcConfig) -> Result<Self, InitError> {
        for cap in [ClientCap::UniversalPlanes, ClientCap::Atomic] {
            dev.set_client_cap(cap, 1).map_err(|err| {
                tracing::error!("failed to set {} cap: {err}", cap.name());
                InitError::ClientCap(cap.name(), err)
            })?;
        }

        let resources = dev.resources().map_err(|err| {
            tracing::error!("failed to get modeset resources: {err}");
            InitError::Resources(err)
        })?;

        let request = config.mode_request();
        let mut crtcs = CrtcAllocator::new();

        let ty = config.connector_type;
        let (primary, secondary) = match find_connector(&dev, &resources, ty, None) {
            Some(found) => {
                tracing::info!("primary display on {}", found.state.name());
                let primary = bind_connector(&dev, &resources, &found.state, &request, &mut crtcs)
                    .inspect_err(|err| tracing::error!("failed to bind primary display: {err}"))?;

                let secondary = find_connector(&dev, &resources, ty, Some(found.index))
                    .and_then(|second| {
                        tracing::info!("secondary display on {}", second.state.name());
                        bind_connector(&dev, &resources, &second.state, &request, &mut crtcs)
                            .inspect_err(|err| {
                                tracing::warn!("secondary display unavailable: {err}")
                            })
                            .ok()
                    });
                (primary, secondary)
            }
            None => (
                Self::bind_fallback(&dev, &resources, &request, &mut crtcs)?,
                None,
            ),
        };

        Ok(Self {
            dev,
            primary,
            secondary,
        })
    }

    fn bind_fallback(
        dev: &D,
        resources: &CardResources,
        request: &ModeRequest,
        crtcs: &mut CrtcAllocator,
    ) -> Result<DisplayOutput, InitError> {
        let candidates = queryable_connectors(dev, resources);

        for found in candidates.iter().filter(|c| c.is_connected()) {
            match bind_connector(dev, resources, &found.state, request, crtcs) {
                Ok(output) => {
                    tracing::info!("primary display on {}", found.state.name());
                    return Ok(output);
                }
                Err(err) => tracing::warn!("cannot use {}: {err}", found.state.name()),
            }
        }

        let Some(last) = candidates.last() else {
            tracing::error!("failed to find a valid crtc/connector/mode combination");
            return Err(InitError::NoUsableConnector);
        };
        tracing::warn!(
            "no connected connector found, enforcing the use of {}",
            last.state.name()
        );
        Ok(bind_connector(dev, resources, &last.state, request, crtcs)?)
    }

    /// Show `buffer` on `display`.
    ///
    /// Returns the fence that signals when the buffer is on screen, or `None`
    /// when the frame was presented synchronously or the display can't
    /// produce fences. The display id is checked before anything else, so a
    /// bad id never reaches the kernel.
    pub fn post(
        &mut self,
        display: u64,
        buffer: &mut BufferHandle,
    ) -> Result<Option<OwnedFd>, PostError> {
        let id = DisplayId::try_from(display)?;
        buffer.validate()?;

        let output = match id {
            DisplayId::Primary => &mut self.primary,
            DisplayId::Secondary => self
                .secondary
                .as_mut()
                .ok_or(PostError::InvalidDisplay(display))?,
        };

        let fb = register_framebuffer(&self.dev, output, buffer).map_err(|err| {
            tracing::error!("unable to post without fb");
            PostError::Framebuffer(err)
        })?;
        output.present(&self.dev, fb)
    }

    /// Remove the framebuffer registered for `buffer`. Call this before the
    /// buffer is freed or its contents change size.
    ///
    /// The kernel turns off a CRTC whose scanout framebuffer is removed, so a
    /// display that was showing `buffer` goes back to
    /// [`CommitState::FirstFramePending`] and the next post modesets it.
    pub fn release_buffer(&mut self, buffer: &mut BufferHandle) -> Result<(), Error> {
        let Some(fb) = buffer.framebuffer_id() else {
            return Ok(());
        };
        release_framebuffer(&self.dev, buffer)?;
        self.primary.framebuffer_removed(fb);
        if let Some(secondary) = self.secondary.as_mut() {
            secondary.framebuffer_removed(fb);
        }
        Ok(())
    }

    pub fn is_secondary_active(&self) -> bool {
        self.secondary.is_some()
    }

    pub fn output(&self, display: DisplayId) -> Option<&DisplayOutput> {
        match display {
            DisplayId::Primary => Some(&self.primary),
            DisplayId::Secondary => self.secondary.as_ref(),
        }
    }

    pub fn display_attributes(&self, display: DisplayId) -> Option<DisplayAttributes> {
        self.output(display).map(DisplayOutput::attributes)
    }

    /// `None` for a display that isn't active.
    pub fn commit_state(&self, display: DisplayId) -> Option<CommitState> {
        self.output(display).map(DisplayOutput::state)
    }

    #[inline]
    pub fn device(&self) -> &D {
        &self.dev
    }

    pub fn into_device(self) -> D {
        self.dev
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_ids() {
        assert_eq!(DisplayId::try_from(0).unwrap(), DisplayId::Primary);
        assert_eq!(DisplayId::try_from(1).unwrap(), DisplayId::Secondary);
        assert!(matches!(
            DisplayId::try_from(2),
            Err(PostError::InvalidDisplay(2))
        ));
        assert_eq!(u64::from(DisplayId::Secondary), 1);
    }

    #[test]
    fn unrepresentable_path() {
        let config = HwcConfig {
            device_path: std::path::PathBuf::from("/dev/dri/\0card0"),
            ..HwcConfig::default()
        };
        assert!(matches!(
            HwcContext::open(&config),
            Err(InitError::Open(ProbeError::InvalidPath))
        ));
    }

    #[test]
    fn missing_device_node() {
        let config = HwcConfig {
            device_path: "/nonexistent/dri/card0".into(),
            ..HwcConfig::default()
        };
        let err = HwcContext::open(&config).unwrap_err();
        assert!(matches!(err, InitError::Open(ProbeError::Other(_))));
        assert_eq!(err.errno(), -2);
    }

    #[test]
    fn regular_file_is_not_a_card() {
        let config = HwcConfig {
            device_path: "/dev/null".into(),
            ..HwcConfig::default()
        };
        assert!(matches!(
            HwcContext::open(&config),
            Err(InitError::Open(ProbeError::NotDrmCard))
        ));
    }
}
