use crate::handle::HandleError;
use crate::modeset::ConnectorId;

/// Classification of the errno values returned by DRM requests.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("invalid argument")]
    Invalid,
    #[error("no such object")]
    NonExist,
    #[error("out of memory")]
    SystemMem,
    #[error("out of graphics memory")]
    GraphicsMem,
    /// The device still has a previous update in flight.
    #[error("device or resource busy")]
    Busy,
    #[error("permission denied")]
    Permission,
    #[error("device disconnected")]
    Disconnected,
    #[error("operation not supported")]
    NotSupported,
    #[error("unexpected response from the kernel")]
    RemoteFailure,
    #[error("device I/O error")]
    Died,
    #[error("system error {0:?}")]
    Other(linux_io::result::Error),
}

impl Error {
    /// The negative errno value a HAL-style caller expects.
    pub fn errno(self) -> i32 {
        let raw: linux_io::result::Error = self.into();
        -raw.0
    }
}

impl From<linux_io::result::Error> for Error {
    fn from(value: linux_io::result::Error) -> Self {
        match value {
            linux_io::result::EINVAL => Self::Invalid,
            linux_io::result::ENOENT => Self::NonExist,
            linux_io::result::ENOMEM => Self::SystemMem,
            linux_io::result::ENOSPC => Self::GraphicsMem,
            linux_io::result::EBUSY => Self::Busy,
            linux_io::result::EPERM | linux_io::result::EACCES => Self::Permission,
            linux_io::result::ENODEV => Self::Disconnected,
            linux_io::result::EOPNOTSUPP => Self::NotSupported,
            linux_io::result::ENXIO => Self::RemoteFailure,
            linux_io::result::EIO => Self::Died,
            _ => Self::Other(value),
        }
    }
}

impl From<Error> for linux_io::result::Error {
    fn from(value: Error) -> Self {
        match value {
            Error::Invalid => linux_io::result::EINVAL,
            Error::NonExist => linux_io::result::ENOENT,
            Error::SystemMem => linux_io::result::ENOMEM,
            Error::GraphicsMem => linux_io::result::ENOSPC,
            Error::Busy => linux_io::result::EBUSY,
            Error::Permission => linux_io::result::EPERM,
            Error::Disconnected => linux_io::result::ENODEV,
            Error::NotSupported => linux_io::result::EOPNOTSUPP,
            Error::RemoteFailure => linux_io::result::ENXIO,
            Error::Died => linux_io::result::EIO,
            Error::Other(v) => v,
        }
    }
}

/// Failure to open a file as a DRM card.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("device path contains an interior NUL byte")]
    InvalidPath,
    #[error("file is not a DRM card")]
    NotDrmCard,
    #[error(transparent)]
    Other(Error),
}

impl From<linux_io::result::Error> for ProbeError {
    fn from(value: linux_io::result::Error) -> Self {
        match value {
            // ENOTTY, so the file doesn't support this ioctl request
            // and so presumably isn't a DRM card.
            linux_io::result::ENOTTY => ProbeError::NotDrmCard,
            _ => ProbeError::Other(value.into()),
        }
    }
}

/// Failure to pick a mode for a connector.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ModeError {
    #[error("connector advertises no modes")]
    NoModes,
    #[error("cannot synthesize a {width}x{height}@{refresh} mode")]
    InvalidForcedMode { width: u32, height: u32, refresh: u32 },
}

/// Failure to attach a connector to a CRTC and primary plane.
#[derive(Debug, thiserror::Error)]
pub enum BindError {
    #[error("connector {0:?} has no encoder")]
    NoEncoder(ConnectorId),
    #[error("no unclaimed CRTC can drive connector {0:?}")]
    NoFreeCrtc(ConnectorId),
    #[error("no usable mode on connector {0:?}")]
    Mode(ConnectorId, #[source] ModeError),
    #[error("kernel query failed")]
    Kernel(#[from] Error),
}

impl BindError {
    pub fn errno(&self) -> i32 {
        match self {
            BindError::Kernel(e) => e.errno(),
            _ => Error::Invalid.errno(),
        }
    }
}

/// Fatal failure while bringing up the composer. No display is usable
/// after any of these.
#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("could not open the display device")]
    Open(#[from] ProbeError),
    #[error("failed to enable the {0} client capability")]
    ClientCap(&'static str, #[source] Error),
    #[error("failed to get modeset resources")]
    Resources(#[source] Error),
    #[error("failed to find a valid crtc/connector/mode combination")]
    NoUsableConnector,
    #[error("failed to bind the primary display")]
    Bind(#[from] BindError),
}

impl InitError {
    pub fn errno(&self) -> i32 {
        match self {
            InitError::Open(ProbeError::Other(e)) => e.errno(),
            InitError::Open(ProbeError::NotDrmCard) => -linux_io::result::ENOTTY.0,
            InitError::ClientCap(_, e) | InitError::Resources(e) => e.errno(),
            InitError::Bind(e) => e.errno(),
            InitError::Open(ProbeError::InvalidPath) | InitError::NoUsableConnector => {
                Error::Invalid.errno()
            }
        }
    }
}

/// Failure of a single `post` call. None of these leave a half-applied
/// update behind.
#[derive(Debug, thiserror::Error)]
pub enum PostError {
    #[error("no display with id {0}")]
    InvalidDisplay(u64),
    #[error("invalid buffer handle")]
    InvalidHandle(#[from] HandleError),
    #[error("could not create a framebuffer for the buffer")]
    Framebuffer(#[source] Error),
    #[error("legacy modeset failed")]
    ModeSet(#[source] Error),
    #[error("atomic commit failed")]
    Commit(#[source] Error),
}

impl PostError {
    pub fn errno(&self) -> i32 {
        match self {
            PostError::InvalidDisplay(_) | PostError::InvalidHandle(_) => Error::Invalid.errno(),
            PostError::Framebuffer(e) | PostError::ModeSet(e) | PostError::Commit(e) => e.errno(),
        }
    }
}
