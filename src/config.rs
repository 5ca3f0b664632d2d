//! Composer configuration, read once at startup.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::mode::ModeRequest;
use crate::modeset::ConnectorType;

/// Environment variable naming the DRM device node.
pub const ENV_DEVICE: &str = "HWC_DRM_DEVICE";
/// Environment variable naming the connector type to prefer, like `HDMI-A`.
pub const ENV_CONNECTOR: &str = "HWC_DRM_CONNECTOR";
/// Environment variable holding a mode to match as closely as possible.
pub const ENV_MODE: &str = "HWC_DRM_MODE";
/// Environment variable holding a mode to use even if the display doesn't
/// advertise it.
pub const ENV_MODE_FORCE: &str = "HWC_DRM_MODE_FORCE";

pub const DEFAULT_DEVICE: &str = "/dev/dri/card0";

/// Refresh rate assumed when an override leaves it out.
pub const DEFAULT_REFRESH: u32 = 60;

/// A requested display mode, written as `<width>x<height>[@<refresh>]`.
///
/// Only the leading digits of the refresh rate are read, so `@60Hz` means
/// 60. A refresh rate without any digits falls back to [`DEFAULT_REFRESH`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModeOverride {
    pub width: u32,
    pub height: u32,
    pub refresh: u32,
}

impl ModeOverride {
    pub const fn new(width: u32, height: u32, refresh: u32) -> Self {
        Self {
            width,
            height,
            refresh,
        }
    }

    /// Whether both dimensions are given. An override without them selects
    /// nothing.
    #[inline]
    pub fn has_resolution(&self) -> bool {
        self.width != 0 && self.height != 0
    }
}

impl fmt::Display for ModeOverride {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}@{}", self.width, self.height, self.refresh)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid mode override {0:?}, expected <width>x<height>[@<refresh>]")]
pub struct InvalidModeOverride(pub String);

impl FromStr for ModeOverride {
    type Err = InvalidModeOverride;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || InvalidModeOverride(s.to_owned());
        let s = s.trim();
        let (res, refresh) = match s.split_once('@') {
            Some((res, refresh)) => (res, parse_refresh(refresh)),
            None => (s, DEFAULT_REFRESH),
        };
        let (width, height) = res.split_once(|c: char| c == 'x' || c == 'X').ok_or_else(err)?;
        let width: u32 = width.trim().parse().map_err(|_| err())?;
        let height: u32 = height.trim().parse().map_err(|_| err())?;

        let ret = Self::new(width, height, refresh);
        if !ret.has_resolution() {
            return Err(err());
        }
        Ok(ret)
    }
}

fn parse_refresh(s: &str) -> u32 {
    let s = s.trim_start();
    let digits = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    s[..digits].parse().unwrap_or(DEFAULT_REFRESH)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HwcConfig {
    pub device_path: PathBuf,
    /// Connector type tried first for both displays.
    pub connector_type: ConnectorType,
    /// Pick the advertised mode closest to this.
    pub mode: Option<ModeOverride>,
    /// Use exactly this mode, synthesizing it if the display doesn't
    /// advertise it. Ignored when [`Self::mode`] is set.
    pub forced_mode: Option<ModeOverride>,
}

impl Default for HwcConfig {
    fn default() -> Self {
        Self {
            device_path: PathBuf::from(DEFAULT_DEVICE),
            connector_type: ConnectorType::HdmiA,
            mode: None,
            forced_mode: None,
        }
    }
}

impl HwcConfig {
    /// Read the `HWC_DRM_*` environment variables. Unparseable values are
    /// logged and ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`Self::from_env`], reading variables through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(path) = lookup(ENV_DEVICE).filter(|p| !p.is_empty()) {
            config.device_path = PathBuf::from(path);
        }

        if let Some(name) = lookup(ENV_CONNECTOR) {
            match name.parse() {
                Ok(ty) => config.connector_type = ty,
                Err(err) => {
                    tracing::warn!("{ENV_CONNECTOR}: {err}, using {}", config.connector_type)
                }
            }
        }

        let parse_mode = |key: &str, value: String| match value.parse::<ModeOverride>() {
            Ok(mode) => Some(mode),
            Err(err) => {
                tracing::warn!("{key}: {err}");
                None
            }
        };

        // The forced override is only consulted when no closest-match
        // override is set to anything.
        match lookup(ENV_MODE).filter(|v| !v.is_empty()) {
            Some(value) => config.mode = parse_mode(ENV_MODE, value),
            None => {
                config.forced_mode = lookup(ENV_MODE_FORCE)
                    .filter(|v| !v.is_empty())
                    .and_then(|v| parse_mode(ENV_MODE_FORCE, v));
            }
        }

        config
    }

    pub fn mode_request(&self) -> ModeRequest {
        match (self.mode, self.forced_mode) {
            (Some(mode), _) => ModeRequest::Closest(mode),
            (None, Some(mode)) => ModeRequest::Forced(mode),
            (None, None) => ModeRequest::Preferred,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup<'a>(vars: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        let vars: HashMap<&str, &str> = vars.iter().copied().collect();
        move |key| vars.get(key).map(|v| v.to_string())
    }

    #[test]
    fn parses_mode_overrides() {
        assert_eq!("1280x720@50".parse(), Ok(ModeOverride::new(1280, 720, 50)));
        assert_eq!("1280x720".parse(), Ok(ModeOverride::new(1280, 720, 60)));
        assert_eq!(" 800X480 ".parse(), Ok(ModeOverride::new(800, 480, 60)));
        assert!("1280".parse::<ModeOverride>().is_err());
        assert!("0x720".parse::<ModeOverride>().is_err());
    }

    #[test]
    fn refresh_suffix_is_lenient() {
        assert_eq!("1920x1080@60Hz".parse(), Ok(ModeOverride::new(1920, 1080, 60)));
        assert_eq!("1920x1080@ 50".parse(), Ok(ModeOverride::new(1920, 1080, 50)));
        assert_eq!("1280x720@".parse(), Ok(ModeOverride::new(1280, 720, 60)));
        assert_eq!("1280x720@fast".parse(), Ok(ModeOverride::new(1280, 720, 60)));
        assert!("wide x tall".parse::<ModeOverride>().is_err());
    }

    #[test]
    fn defaults_without_environment() {
        let config = HwcConfig::from_lookup(lookup(&[]));
        assert_eq!(config, HwcConfig::default());
        assert_eq!(config.device_path, PathBuf::from("/dev/dri/card0"));
        assert_eq!(config.mode_request(), ModeRequest::Preferred);
    }

    #[test]
    fn reads_environment() {
        let config = HwcConfig::from_lookup(lookup(&[
            (ENV_DEVICE, "/dev/dri/card1"),
            (ENV_CONNECTOR, "dsi"),
            (ENV_MODE_FORCE, "1024x600@60"),
        ]));
        assert_eq!(config.device_path, PathBuf::from("/dev/dri/card1"));
        assert_eq!(config.connector_type, ConnectorType::Dsi);
        assert_eq!(
            config.mode_request(),
            ModeRequest::Forced(ModeOverride::new(1024, 600, 60))
        );
    }

    #[test]
    fn closest_match_shadows_forced_mode() {
        let config = HwcConfig::from_lookup(lookup(&[
            (ENV_MODE, "1280x720"),
            (ENV_MODE_FORCE, "1024x600@60"),
        ]));
        assert_eq!(config.forced_mode, None);
        assert_eq!(
            config.mode_request(),
            ModeRequest::Closest(ModeOverride::new(1280, 720, 60))
        );

        // Even a malformed closest-match override shadows the forced one.
        let config = HwcConfig::from_lookup(lookup(&[
            (ENV_MODE, "garbage"),
            (ENV_MODE_FORCE, "1024x600@60"),
        ]));
        assert_eq!(config.mode_request(), ModeRequest::Preferred);
    }

    #[test]
    fn empty_closest_match_leaves_forced_mode() {
        let config = HwcConfig::from_lookup(lookup(&[
            (ENV_MODE, ""),
            (ENV_MODE_FORCE, "1024x600@60"),
        ]));
        assert_eq!(config.mode, None);
        assert_eq!(
            config.mode_request(),
            ModeRequest::Forced(ModeOverride::new(1024, 600, 60))
        );
    }

    #[test]
    fn bad_connector_name_keeps_default() {
        let config = HwcConfig::from_lookup(lookup(&[(ENV_CONNECTOR, "SCART")]));
        assert_eq!(config.connector_type, ConnectorType::HdmiA);
    }
}
