//! Display mode selection.
//!
//! A mode comes either from the connector's advertised list or, when a
//! forced override asks for something the display doesn't advertise, from
//! the VESA CVT timing formula.

use crate::config::ModeOverride;
use crate::ioctl;
use crate::modeset::ModeInfo;
use crate::result::ModeError;

/// Which mode the composer should pick for a display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModeRequest {
    /// The first mode the display marks as preferred.
    #[default]
    Preferred,
    /// The advertised mode whose resolution is closest to this one.
    Closest(ModeOverride),
    /// Exactly this mode, generated if the display doesn't advertise it.
    Forced(ModeOverride),
}

impl ModeRequest {
    fn target(&self) -> Option<&ModeOverride> {
        match self {
            ModeRequest::Preferred => None,
            ModeRequest::Closest(o) | ModeRequest::Forced(o) => {
                Some(o).filter(|o| o.has_resolution())
            }
        }
    }
}

/// Pick a mode from `modes` for `request`, then apply
/// [`avoid_wifi_interference`].
pub fn select_mode(modes: &[ModeInfo], request: &ModeRequest) -> Result<ModeInfo, ModeError> {
    let target = request.target();

    if let Some(t) = target.filter(|t| t.refresh != 0) {
        let exact = modes.iter().find(|m| {
            u32::from(m.hdisplay) == t.width
                && u32::from(m.vdisplay) == t.height
                && m.vrefresh == t.refresh
        });
        if let Some(mode) = exact {
            tracing::debug!("found exact match for {t}");
            return Ok(avoid_wifi_interference(mode.clone()));
        }
        if let ModeRequest::Forced(forced) = request {
            let mode = forced_mode(forced)?;
            tracing::debug!("generated {mode} for forced override {forced}");
            return Ok(avoid_wifi_interference(mode));
        }
    }

    let first = modes.first().ok_or(ModeError::NoModes)?;

    let mut best = None;
    let mut dist = i64::MAX;
    for mode in modes {
        let d = match target {
            Some(t) => {
                let dx = i64::from(mode.hdisplay) - i64::from(t.width);
                let dy = i64::from(mode.vdisplay) - i64::from(t.height);
                dx * dx + dy * dy
            }
            None if mode.is_preferred() => 0,
            None => dist,
        };
        if d < dist {
            best = Some(mode);
            dist = d;
            if dist == 0 {
                break;
            }
        }
    }

    Ok(avoid_wifi_interference(best.unwrap_or(first).clone()))
}

fn forced_mode(forced: &ModeOverride) -> Result<ModeInfo, ModeError> {
    let invalid = ModeError::InvalidForcedMode {
        width: forced.width,
        height: forced.height,
        refresh: forced.refresh,
    };
    // The frame must leave room for the minimum vsync and back porch, and
    // the result has to fit the kernel's 16-bit timings.
    let frame_us = 1_000_000.0 / f64::from(forced.refresh);
    if frame_us <= MIN_VSYNC_PLUS_BP
        || forced.width > u32::from(u16::MAX) / 2
        || forced.height > u32::from(u16::MAX) / 2
    {
        return Err(invalid);
    }
    Ok(generate_cvt_mode(forced.width, forced.height, forced.refresh))
}

/// Pixel clocks in this range (kHz) interfere with 2.4GHz Wi-Fi.
pub const WIFI_INTERFERENCE_CLOCKS: core::ops::Range<u32> = 74200..74500;

/// Clock used instead of one in [`WIFI_INTERFERENCE_CLOCKS`].
pub const WIFI_SAFE_CLOCK: u32 = 75000;

pub fn avoid_wifi_interference(mut mode: ModeInfo) -> ModeInfo {
    if WIFI_INTERFERENCE_CLOCKS.contains(&mode.clock) {
        tracing::debug!("trimming display clock from {} to {WIFI_SAFE_CLOCK}", mode.clock);
        mode.clock = WIFI_SAFE_CLOCK;
    }
    mode
}

const CELL_GRAN: f64 = 8.0;
const MIN_PORCH: f32 = 1.0;
const V_SYNC_RQD: f32 = 3.0;
const H_SYNC_PERCENT: f64 = 8.0;
/// Minimum time of vsync plus back porch, in microseconds.
const MIN_VSYNC_PLUS_BP: f64 = 550.0;
// Blanking formula gradient, offset and scaling factors.
const BLANK_M: f64 = 600.0;
const BLANK_C: f64 = 40.0;
const BLANK_K: f64 = 128.0;
const BLANK_J: f64 = 20.0;
const C_PRIME: f64 = ((BLANK_C - BLANK_J) * BLANK_K / 256.0) + BLANK_J;
const M_PRIME: f64 = BLANK_K / 256.0 * BLANK_M;

#[inline]
fn rint(v: f64) -> f64 {
    v.round_ties_even()
}

/// Generate a progressive, margin-free mode with the VESA CVT formula.
///
/// Intermediate values are kept at `f32` precision, with the constant
/// arithmetic between them in `f64`, so the timings come out identical to
/// other implementations of the same formula.
pub fn generate_cvt_mode(width: u32, height: u32, refresh: u32) -> ModeInfo {
    let freq = refresh as f32;

    let h_pixels_rnd = (rint(f64::from(width as f32) / CELL_GRAN) * CELL_GRAN) as f32;
    let v_lines_rnd = rint(f64::from(height as f32)) as f32;

    let h_period_est = (((1.0 / f64::from(freq)) - (MIN_VSYNC_PLUS_BP / 1_000_000.0))
        / f64::from(v_lines_rnd + MIN_PORCH)
        * 1_000_000.0) as f32;
    let vsync_plus_bp = rint(MIN_VSYNC_PLUS_BP / f64::from(h_period_est)) as f32;
    let total_v_lines = v_lines_rnd + vsync_plus_bp + MIN_PORCH;
    let v_field_rate_est =
        (1.0 / f64::from(h_period_est) / f64::from(total_v_lines) * 1_000_000.0) as f32;
    let h_period = h_period_est / (freq / v_field_rate_est);

    let total_active_pixels = h_pixels_rnd;
    let ideal_duty_cycle = (C_PRIME - (M_PRIME * f64::from(h_period) / 1000.0)) as f32;
    let h_blank = (rint(
        f64::from(total_active_pixels * ideal_duty_cycle)
            / (100.0 - f64::from(ideal_duty_cycle))
            / (2.0 * CELL_GRAN),
    ) * (2.0 * CELL_GRAN)) as f32;
    let total_pixels = total_active_pixels + h_blank;
    let pixel_freq = total_pixels / h_period;
    let h_sync =
        (rint(H_SYNC_PERCENT / 100.0 * f64::from(total_pixels) / CELL_GRAN) * CELL_GRAN) as f32;
    let h_front_porch = ((f64::from(h_blank) / 2.0) - f64::from(h_sync)) as f32;

    let hdisplay = h_pixels_rnd as u16;
    let vdisplay = v_lines_rnd as u16;
    ModeInfo {
        name: format!("{hdisplay}x{vdisplay}"),
        clock: (f64::from(pixel_freq).ceil() * 1000.0) as u32,
        hdisplay,
        hsync_start: (h_pixels_rnd + h_front_porch) as u16,
        hsync_end: (h_pixels_rnd + h_front_porch + h_sync) as u16,
        htotal: total_pixels as u16,
        hskew: 0,
        vdisplay,
        vsync_start: (v_lines_rnd + MIN_PORCH) as u16,
        vsync_end: (v_lines_rnd + MIN_PORCH + V_SYNC_RQD) as u16,
        vtotal: total_v_lines as u16,
        vscan: 0,
        vrefresh: refresh,
        flags: ioctl::DRM_MODE_FLAG_PHSYNC | ioctl::DRM_MODE_FLAG_PVSYNC,
        typ: ioctl::DRM_MODE_TYPE_DRIVER,
    }
}
