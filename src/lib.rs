//! Hardware composer core for DRM/KMS displays.
//!
//! [`HwcContext`] discovers up to two connected displays on a card, picks a
//! mode for each, binds them to a CRTC and primary plane, and then presents
//! dma-buf backed [`handle::BufferHandle`]s: the first frame on each display
//! goes through a blocking legacy modeset, every later frame through a
//! non-blocking atomic commit that hands back a completion fence.
//!
//! All kernel access goes through the [`device::KmsDevice`] trait, which
//! [`Card`] implements with raw `ioctl` requests and
//! `testing::FakeCard` implements in memory when the `testing` feature is
//! enabled.

/// Low-level `ioctl`-based access to DRM devices.
pub mod ioctl;
pub mod modeset;
pub mod result;

pub mod binding;
pub mod config;
pub mod context;
pub mod device;
pub mod discovery;
pub mod framebuffer;
pub mod handle;
pub mod mode;
pub mod output;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

mod util;

pub use config::HwcConfig;
pub use context::{DisplayId, HwcContext};
pub use device::{ClientCap, KmsDevice};

use result::ProbeError;

/// Issue a DRM ioctl on a `linux_io::File`, restarting it when interrupted
/// the way libdrm's `drmIoctl` does.
macro_rules! drm_ioctl {
    ($f:expr, $req:expr, $arg:expr) => {
        loop {
            match $f.ioctl($req, $arg) {
                Err(linux_io::result::EINTR | linux_io::result::EAGAIN) => continue,
                ret => break ret.map_err($crate::result::Error::from),
            }
        }
    };
}

pub(crate) use drm_ioctl;

/// An open DRM card device node.
#[repr(transparent)]
pub struct Card {
    f: linux_io::File<ioctl::DrmCardDevice>,
}

impl Card {
    pub fn open(path: &core::ffi::CStr) -> Result<Self, ProbeError> {
        let f = linux_io::File::open(path, linux_io::OpenOptions::read_write())?;
        Self::from_file(f)
    }

    pub fn from_file<D>(f: linux_io::File<D>) -> Result<Self, ProbeError> {
        // We'll use the VERSION ioctl to decide whether this file
        // seems to be a DRM card device. To do that we need to
        // first optimistically convert it to a DrmCardDevice,
        // so that our ioctl constant will be compatible.
        // Safety: We'll return this new f only if our ioctl
        // probe is successful, which therefore suggests that
        // this ought to be a DRM card device.
        let f: linux_io::File<ioctl::DrmCardDevice> = unsafe { f.to_device(ioctl::DrmCardDevice) };
        let mut v = ioctl::DrmVersion::zeroed();
        f.ioctl(ioctl::DRM_IOCTL_VERSION, &mut v)?;
        Ok(Self { f })
    }

    pub fn close(self) -> linux_io::result::Result<()> {
        self.f.close()
    }

    pub(crate) fn file(&self) -> &linux_io::File<ioctl::DrmCardDevice> {
        &self.f
    }
}

impl core::fmt::Debug for Card {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Card").finish_non_exhaustive()
    }
}

impl<D> TryFrom<linux_io::File<D>> for Card {
    type Error = ProbeError;

    #[inline(always)]
    fn try_from(value: linux_io::File<D>) -> Result<Self, ProbeError> {
        Card::from_file(value)
    }
}
