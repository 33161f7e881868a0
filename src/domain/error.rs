use thiserror::Error;

/// Failures surfaced to the application through method results and
/// stream error slots.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PluginError {
    #[error("The address argument cannot be null")]
    MissingAddress,

    #[error("The apdu command argument cannot be null")]
    MissingApduCommand,

    #[error("The apdu command could not be decoded: {0}")]
    InvalidApduCommand(String),

    #[error("The bluetooth device could not be found")]
    DeviceNotFound,

    #[error("Device not supported")]
    DeviceNotSupported,

    #[error("Location permissions are required")]
    NoPermissions,

    /// Transport error while exchanging APDUs; the message is the reader's error code
    #[error("{0}")]
    UnknownReaderError(i32),

    #[error("Method {0} is not implemented")]
    NotImplemented(String),

    #[error("The plugin is detached")]
    Detached,
}

impl PluginError {
    /// Stable error code sent across the method and event channels.
    pub const fn code(&self) -> &'static str {
        match self {
            Self::MissingAddress => "missing_address",
            Self::MissingApduCommand => "missing_apdu_command",
            Self::InvalidApduCommand(_) => "invalid_apdu_command",
            Self::DeviceNotFound => "device_not_found",
            Self::DeviceNotSupported => "device_not_supported",
            Self::NoPermissions => "no_permissions",
            Self::UnknownReaderError(_) => "unknown_reader_error",
            Self::NotImplemented(_) => "not_implemented",
            Self::Detached => "plugin_detached",
        }
    }
}

/// Result of a CONNECT / DISCONNECT / SEND_APDU call.
pub type MethodResult = Result<(), PluginError>;
