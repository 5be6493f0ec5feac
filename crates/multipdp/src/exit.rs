use std::fmt;
use std::io;

use multipdp_frame::FrameError;
use multipdp_mux::{ConfigError, ManagementError, ServiceError};
use multipdp_transport::TransportError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const CONFIG_INVALID: i32 = 78;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::NotFound | io::ErrorKind::InvalidInput => TRANSPORT_ERROR,
        io::ErrorKind::BrokenPipe | io::ErrorKind::UnexpectedEof => FAILURE,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::Open { ref source, .. }
            if source.kind() == io::ErrorKind::PermissionDenied =>
        {
            CliError::new(PERMISSION_DENIED, format!("{context}: {err}"))
        }
        TransportError::Io(source) => io_error(context, source),
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn frame_error(context: &str, err: FrameError) -> CliError {
    match err {
        FrameError::Io(source) => io_error(context, source),
        FrameError::PayloadTooLarge { .. } => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        FrameError::ConnectionClosed => CliError::new(FAILURE, format!("{context}: {err}")),
        other => CliError::new(DATA_INVALID, format!("{context}: {other}")),
    }
}

pub fn config_error(context: &str, err: ConfigError) -> CliError {
    CliError::new(CONFIG_INVALID, format!("{context}: {err}"))
}

pub fn management_error(context: &str, err: ManagementError) -> CliError {
    CliError::new(USAGE, format!("{context}: {err} (errno {})", err.errno()))
}

pub fn service_error(context: &str, err: ServiceError) -> CliError {
    match err {
        ServiceError::Transport(err) => transport_error(context, err),
        ServiceError::Config(err) => config_error(context, err),
        ServiceError::Reader(err) => frame_error(context, err),
        ServiceError::Spawn(err) => io_error(context, err),
        other => CliError::new(INTERNAL, format!("{context}: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_device_maps_to_transport_error() {
        let err = TransportError::Open {
            path: "/dev/missing".into(),
            source: io::Error::from(io::ErrorKind::NotFound),
        };
        assert_eq!(transport_error("open", err).code, TRANSPORT_ERROR);
    }

    #[test]
    fn denied_device_maps_to_permission_denied() {
        let err = TransportError::Open {
            path: "/dev/dpram1".into(),
            source: io::Error::from(io::ErrorKind::PermissionDenied),
        };
        assert_eq!(transport_error("open", err).code, PERMISSION_DENIED);
    }

    #[test]
    fn oversized_payload_is_data_invalid() {
        let err = FrameError::PayloadTooLarge { size: 2, max: 1 };
        assert_eq!(frame_error("encode", err).code, DATA_INVALID);
    }

    #[test]
    fn management_message_carries_errno() {
        let err = ManagementError::from(multipdp_mux::ActivationError::AlreadyActive(1));
        let cli = management_error("activate", err);
        assert_eq!(cli.code, USAGE);
        assert!(cli.message.contains("errno"));
    }
}
