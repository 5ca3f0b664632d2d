//! Kernel framebuffers for imported buffers.

use crate::device::KmsDevice;
use crate::handle::BufferHandle;
use crate::modeset::{FramebufferId, FramebufferRequest};
use crate::output::DisplayOutput;
use crate::result::Error;
use crate::util::Cleanup;

/// Make sure `handle` has a framebuffer that `output` can scan out.
///
/// A handle is registered at most once; later calls return the cached id
/// without touching the kernel. The framebuffer takes the display's mode
/// size and pixel format, with packed rows and a linear layout.
pub fn register_framebuffer<D: KmsDevice + ?Sized>(
    dev: &D,
    output: &DisplayOutput,
    handle: &mut BufferHandle,
) -> Result<FramebufferId, Error> {
    if let Some(fb) = handle.framebuffer_id() {
        return Ok(fb);
    }

    let bo = dev
        .prime_fd_to_handle(handle.fd())
        .inspect_err(|err| tracing::error!("failed to import buffer: {err}"))?;
    // The framebuffer keeps its own reference to the buffer object.
    let _close_bo = Cleanup::new(|| {
        if let Err(err) = dev.close_buffer_object(bo) {
            tracing::warn!(?bo, "failed to close buffer object: {err}");
        }
    });

    let req = FramebufferRequest::linear_32bpp(
        u32::from(output.mode.hdisplay),
        u32::from(output.mode.vdisplay),
        output.drm_format,
        bo,
    );
    tracing::debug!(
        width = req.width,
        height = req.height,
        format = req.pixel_format,
        ?bo,
        pitch = req.pitch,
        "adding framebuffer"
    );
    let fb = dev
        .add_framebuffer(&req)
        .inspect_err(|err| tracing::error!("could not create drm fb: {err}"))?;
    handle.set_framebuffer_id(fb);
    Ok(fb)
}

/// Remove the framebuffer registered for `handle`, if any. On failure the
/// handle keeps its framebuffer so the removal can be retried.
pub fn release_framebuffer<D: KmsDevice + ?Sized>(
    dev: &D,
    handle: &mut BufferHandle,
) -> Result<(), Error> {
    let Some(fb) = handle.take_framebuffer_id() else {
        return Ok(());
    };
    if let Err(err) = dev.remove_framebuffer(fb) {
        tracing::warn!(?fb, "failed to remove framebuffer: {err}");
        handle.set_framebuffer_id(fb);
        return Err(err);
    }
    Ok(())
}
