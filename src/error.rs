//! Unified error taxonomy for the Sahara and Streaming DLOAD drivers.

use thiserror::Error;

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the transport, both protocol engines, and the workers.
#[derive(Debug, Error)]
pub enum Error {
    /// Serial port error from the `serialport` crate.
    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// Standard I/O error from the transport or from host-side file access.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No bytes arrived from the transport within the caller-supplied deadline.
    #[error("timed out waiting for {0} bytes")]
    Timeout(usize),

    /// Streaming DLOAD HDLC decode failure: bad CRC, dangling escape, or empty frame.
    #[error("HDLC framing error: {0}")]
    Framing(String),

    /// Unknown command, undersized packet, or an engine state that does not
    /// accept the attempted operation.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Hello negotiation could not agree on a mutually supported version.
    #[error("version unsupported: device requires >= {device_min}, host supports <= {host_max}")]
    VersionUnsupported { device_min: u32, host_max: u32 },

    /// The device itself reported a failure (nonzero status, `ERROR` frame).
    #[error("device reported error: {0}")]
    DeviceReported(String),

    /// Cooperative cancellation was observed. Both workers always finish
    /// answering an in-flight device request before honoring a cancel, so
    /// the engine is never left desynchronized and stays usable afterward.
    #[error("operation cancelled")]
    Cancelled,

    /// Host-side file I/O failed (opening an image, writing a dump).
    #[error("local I/O error: {0}")]
    LocalIo(String),
}

/// The eight error kinds from the design's error taxonomy. `Error` variants map
/// onto exactly one of these; front ends should branch on `kind()`, not on the
/// concrete variant, so new variants can be added without breaking callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    TransportError,
    TransportTimeout,
    FramingError,
    ProtocolError,
    VersionUnsupported,
    DeviceReportedError,
    Cancelled,
    LocalIoError,
}

impl Error {
    /// Classify this error into one of the taxonomy kinds from the design.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Serial(_) | Error::Io(_) => ErrorKind::TransportError,
            Error::Timeout(_) => ErrorKind::TransportTimeout,
            Error::Framing(_) => ErrorKind::FramingError,
            Error::Protocol(_) => ErrorKind::ProtocolError,
            Error::VersionUnsupported { .. } => ErrorKind::VersionUnsupported,
            Error::DeviceReported(_) => ErrorKind::DeviceReportedError,
            Error::Cancelled => ErrorKind::Cancelled,
            Error::LocalIo(_) => ErrorKind::LocalIoError,
        }
    }

    /// Whether an engine that produced this error may still be used without a
    /// transport reset. Mirrors the poisoning rules in SPEC_FULL §5/§7.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Error::Serial(_) | Error::Io(_) => false,
            Error::Timeout(_) => false,
            Error::Framing(_) => false,
            Error::Protocol(_) => false,
            Error::VersionUnsupported { .. } => false,
            Error::DeviceReported(_) => true,
            Error::Cancelled => true,
            Error::LocalIo(_) => true,
        }
    }

    /// Map this error onto the CLI exit codes from SPEC_FULL §6.
    pub fn exit_code(&self) -> i32 {
        match self.kind() {
            ErrorKind::TransportError | ErrorKind::TransportTimeout => 3,
            ErrorKind::FramingError | ErrorKind::ProtocolError | ErrorKind::VersionUnsupported => 4,
            ErrorKind::DeviceReportedError => 5,
            ErrorKind::Cancelled => 6,
            ErrorKind::LocalIoError => 3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_errors_are_unrecoverable() {
        let e = Error::Timeout(4);
        assert_eq!(e.kind(), ErrorKind::TransportTimeout);
        assert!(!e.is_recoverable());
        assert_eq!(e.exit_code(), 3);
    }

    #[test]
    fn device_reported_is_recoverable() {
        let e = Error::DeviceReported("status 7".into());
        assert!(e.is_recoverable());
        assert_eq!(e.exit_code(), 5);
    }

    #[test]
    fn cancelled_is_recoverable() {
        assert!(Error::Cancelled.is_recoverable());
        assert_eq!(Error::Cancelled.exit_code(), 6);
    }
}
