use super::BufferObjectId;

/// A single-plane framebuffer to register with `ADDFB2`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FramebufferRequest {
    pub width: u32,
    pub height: u32,
    /// DRM fourcc code.
    pub pixel_format: u32,
    pub handle: BufferObjectId,
    pub pitch: u32,
    pub offset: u32,
    pub modifier: u64,
}

impl FramebufferRequest {
    /// A linear framebuffer of a 32 bits per pixel format, with rows packed
    /// back to back.
    pub fn linear_32bpp(
        width: u32,
        height: u32,
        pixel_format: u32,
        handle: BufferObjectId,
    ) -> Self {
        Self {
            width,
            height,
            pixel_format,
            handle,
            pitch: width * 4,
            offset: 0,
            modifier: crate::ioctl::DRM_FORMAT_MOD_LINEAR,
        }
    }

    pub(crate) fn to_ioctl(&self) -> crate::ioctl::DrmModeFbCmd2 {
        let mut raw = crate::ioctl::DrmModeFbCmd2::zeroed();
        raw.width = self.width;
        raw.height = self.height;
        raw.pixel_format = self.pixel_format;
        raw.flags = crate::ioctl::DRM_MODE_FB_MODIFIERS;
        raw.handles[0] = self.handle.0;
        raw.pitches[0] = self.pitch;
        raw.offsets[0] = self.offset;
        raw.modifier[0] = self.modifier;
        raw
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_request_packs_rows() {
        let format = crate::ioctl::DRM_FORMAT_ABGR8888;
        let req = FramebufferRequest::linear_32bpp(1920, 1080, format, BufferObjectId(3));
        assert_eq!(req.pitch, 7680);
        let raw = req.to_ioctl();
        assert_eq!(raw.handles, [3, 0, 0, 0]);
        assert_eq!(raw.pitches, [7680, 0, 0, 0]);
        assert_eq!(raw.modifier, [crate::ioctl::DRM_FORMAT_MOD_LINEAR; 4]);
        assert_eq!(raw.flags, crate::ioctl::DRM_MODE_FB_MODIFIERS);
        assert_eq!(raw.pixel_format, 0x3432_4241);
    }
}
