//! Shareable graphics buffers as handed over by the allocator.
//!
//! A [`BufferHandle`] is validated once where it enters the composer and then
//! passed around by reference. Handles that arrive in the allocator's native
//! layout are checked field by field by [`BufferHandle::from_raw`].

use std::os::fd::{AsFd, BorrowedFd, OwnedFd, RawFd};

use crate::modeset::FramebufferId;

/// Tag shared by every handle the allocator produces.
pub const HANDLE_MAGIC: u32 = 0x3141592;

/// Layout version of [`BufferHandle`].
pub const HANDLE_VERSION: u32 = 1;

/// Size of the `native_handle` header (`version`, `numFds`, `numInts`),
/// which is also the value its `version` field must hold.
pub const NATIVE_HANDLE_HEADER_SIZE: usize = 3 * core::mem::size_of::<i32>();

/// The allocator's handle layout: a `native_handle` header followed by one
/// file descriptor and the buffer description.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawBufferHandle {
    pub version: i32,
    pub num_fds: i32,
    pub num_ints: i32,
    pub prime_fd: RawFd,
    pub magic: u32,
    pub width: u32,
    pub height: u32,
    pub format: u32,
    pub stride: u32,
    pub fb_id: u32,
    pub usage: u64,
}

impl RawBufferHandle {
    pub const NUM_FDS: i32 = 1;
    pub const NUM_INTS: i32 = ((core::mem::size_of::<Self>() - NATIVE_HANDLE_HEADER_SIZE)
        / core::mem::size_of::<i32>()) as i32
        - Self::NUM_FDS;

    /// Check the header and magic the way the allocator lays them out.
    pub fn validate(&self) -> Result<(), HandleError> {
        if self.version != NATIVE_HANDLE_HEADER_SIZE as i32
            || self.num_fds != Self::NUM_FDS
            || self.num_ints != Self::NUM_INTS
        {
            return Err(HandleError::Layout {
                version: self.version,
                num_fds: self.num_fds,
                num_ints: self.num_ints,
            });
        }
        if self.magic != HANDLE_MAGIC {
            return Err(HandleError::Magic(self.magic));
        }
        if self.prime_fd < 0 {
            return Err(HandleError::Fd(self.prime_fd));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandleError {
    #[error("handle header does not match (version {version}, {num_fds} fds, {num_ints} ints)")]
    Layout {
        version: i32,
        num_fds: i32,
        num_ints: i32,
    },
    #[error("bad handle magic {0:#x}")]
    Magic(u32),
    #[error("unsupported handle version {0}")]
    Version(u32),
    #[error("handle carries invalid file descriptor {0}")]
    Fd(RawFd),
    #[error("could not duplicate the buffer file descriptor: {0}")]
    Dup(std::io::ErrorKind),
}

/// One dma-buf backed buffer, plus the framebuffer the composer registered
/// for it.
#[derive(Debug)]
pub struct BufferHandle {
    magic: u32,
    version: u32,
    fd: OwnedFd,
    pub width: u32,
    pub height: u32,
    /// Allocator pixel format.
    pub format: u32,
    /// Row pitch in bytes.
    pub stride: u32,
    fb_id: Option<FramebufferId>,
}

impl BufferHandle {
    pub fn new(fd: OwnedFd, width: u32, height: u32, format: u32, stride: u32) -> Self {
        Self {
            magic: HANDLE_MAGIC,
            version: HANDLE_VERSION,
            fd,
            width,
            height,
            format,
            stride,
            fb_id: None,
        }
    }

    /// Take over a handle in the allocator's native layout. The descriptor
    /// is duplicated, so `raw` keeps ownership of its own.
    ///
    /// # Safety
    ///
    /// If `raw` passes validation, `raw.prime_fd` must be an open file
    /// descriptor for the duration of this call.
    pub unsafe fn from_raw(raw: &RawBufferHandle) -> Result<Self, HandleError> {
        raw.validate()?;
        let borrowed = unsafe { BorrowedFd::borrow_raw(raw.prime_fd) };
        let fd = borrowed
            .try_clone_to_owned()
            .map_err(|e| HandleError::Dup(e.kind()))?;
        let mut ret = Self::new(fd, raw.width, raw.height, raw.format, raw.stride);
        ret.fb_id = (raw.fb_id != 0).then_some(FramebufferId(raw.fb_id));
        Ok(ret)
    }

    pub fn validate(&self) -> Result<(), HandleError> {
        if self.magic != HANDLE_MAGIC {
            return Err(HandleError::Magic(self.magic));
        }
        if self.version != HANDLE_VERSION {
            return Err(HandleError::Version(self.version));
        }
        Ok(())
    }

    /// Mark the handle as freed by its allocator. Any later use is rejected
    /// by [`Self::validate`].
    pub fn retire(&mut self) {
        self.magic = 0;
    }

    #[inline]
    pub fn fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }

    /// The kernel framebuffer registered for this buffer, if any.
    #[inline]
    pub fn framebuffer_id(&self) -> Option<FramebufferId> {
        self.fb_id
    }

    pub(crate) fn set_framebuffer_id(&mut self, fb: FramebufferId) {
        self.fb_id = Some(fb);
    }

    pub(crate) fn take_framebuffer_id(&mut self) -> Option<FramebufferId> {
        self.fb_id.take()
    }
}

impl AsFd for BufferHandle {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::fd::AsRawFd;

    fn dev_null() -> std::fs::File {
        std::fs::File::open("/dev/null").unwrap()
    }

    fn raw_for(fd: RawFd) -> RawBufferHandle {
        RawBufferHandle {
            version: NATIVE_HANDLE_HEADER_SIZE as i32,
            num_fds: RawBufferHandle::NUM_FDS,
            num_ints: RawBufferHandle::NUM_INTS,
            prime_fd: fd,
            magic: HANDLE_MAGIC,
            width: 1920,
            height: 1080,
            format: 1,
            stride: 7680,
            fb_id: 0,
            usage: 0,
        }
    }

    #[test]
    fn native_layout_matches_allocator() {
        assert_eq!(core::mem::size_of::<RawBufferHandle>(), 48);
        assert_eq!(RawBufferHandle::NUM_INTS, 8);
    }

    #[test]
    fn raw_handle_is_validated_before_use() {
        let file = dev_null();
        let good = raw_for(file.as_raw_fd());
        assert_eq!(good.validate(), Ok(()));

        let mut bad = good;
        bad.magic = 0xdead;
        assert_eq!(bad.validate(), Err(HandleError::Magic(0xdead)));

        let mut bad = good;
        bad.num_fds = 2;
        assert!(matches!(bad.validate(), Err(HandleError::Layout { num_fds: 2, .. })));

        let mut bad = good;
        bad.prime_fd = -1;
        assert_eq!(bad.validate(), Err(HandleError::Fd(-1)));
        assert!(matches!(
            unsafe { BufferHandle::from_raw(&bad) },
            Err(HandleError::Fd(-1))
        ));
    }

    #[test]
    fn from_raw_keeps_cached_framebuffer() {
        let file = dev_null();
        let mut raw = raw_for(file.as_raw_fd());
        raw.fb_id = 42;
        let handle = unsafe { BufferHandle::from_raw(&raw) }.unwrap();
        assert_eq!(handle.framebuffer_id(), Some(FramebufferId(42)));
        assert_eq!((handle.width, handle.height, handle.stride), (1920, 1080, 7680));
        assert_ne!(handle.fd().as_raw_fd(), file.as_raw_fd());
    }

    #[test]
    fn retired_handle_is_rejected() {
        let mut handle = BufferHandle::new(dev_null().into(), 64, 64, 1, 256);
        assert_eq!(handle.validate(), Ok(()));
        handle.retire();
        assert_eq!(handle.validate(), Err(HandleError::Magic(0)));
    }
}
