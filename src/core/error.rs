//! Error types for serial sessions

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use thiserror::Error;

/// Classification of a line error reported through `IoError`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LineErrorKind {
    /// Framing error (bad stop bit)
    Framing,
    /// Hardware overrun, a character was lost
    Overrun,
    /// Driver input buffer overflow
    RxOverflow,
    /// Parity error
    Parity,
    /// Driver output buffer full
    TxFull,
    /// Break condition received
    Break,
    /// Anything the OS did not classify
    Unknown,
}

impl LineErrorKind {
    /// Map an OS error from a read or write
    pub fn from_io(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::InvalidData => Self::Framing,
            io::ErrorKind::WriteZero | io::ErrorKind::TimedOut => Self::TxFull,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for LineErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Framing => "framing",
            Self::Overrun => "overrun",
            Self::RxOverflow => "rx-overflow",
            Self::Parity => "parity",
            Self::TxFull => "tx-full",
            Self::Break => "break",
            Self::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Serial session error
#[derive(Error, Debug)]
pub enum SerialError {
    /// The handle became invalid (unplugged, driver reset) or an accessor failed on it
    #[error("Device gone on {port} ({kind}): {message}")]
    DeviceGone {
        /// Port name
        port: String,
        /// Classified cause
        kind: LineErrorKind,
        /// OS message
        message: String,
    },

    /// A handle could not be created or opened
    #[error("Failed to open {port}: {reason}")]
    OpenFailed {
        /// Port name
        port: String,
        /// OS reason
        reason: String,
    },

    /// Settings violate an invariant or are not supported by the driver
    #[error("Invalid settings: {0}")]
    InvalidSettings(String),

    /// Operation requires an open line
    #[error("Port is not open")]
    NotOpen,

    /// Operation called in a sequence the handle does not allow
    #[error("Invalid call sequence: {0}")]
    InvalidSequence(&'static str),

    /// I/O error outside the line itself (config files, worker threads)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Profile could not be parsed or written
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result alias for serial operations
pub type SerialResult<T> = Result<T, SerialError>;

impl SerialError {
    /// `DeviceGone` built from an OS error
    pub fn device_gone(port: &str, err: &io::Error) -> Self {
        Self::DeviceGone {
            port: port.to_string(),
            kind: LineErrorKind::from_io(err),
            message: err.to_string(),
        }
    }

    /// Invalid call sequence or call in the wrong state
    pub fn is_programmer_error(&self) -> bool {
        matches!(self, Self::NotOpen | Self::InvalidSequence(_))
    }

    /// Hardware conditions worth retrying
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::DeviceGone { .. } | Self::OpenFailed { .. })
    }

    /// Classification for `IoError` notifications
    pub fn line_error_kind(&self) -> LineErrorKind {
        match self {
            Self::DeviceGone { kind, .. } => *kind,
            Self::Io(err) => LineErrorKind::from_io(err),
            _ => LineErrorKind::Unknown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_errors_classify() {
        let bad_frame = io::Error::new(io::ErrorKind::InvalidData, "bad stop bit");
        assert_eq!(LineErrorKind::from_io(&bad_frame), LineErrorKind::Framing);
        let stalled = io::Error::new(io::ErrorKind::TimedOut, "write timed out");
        assert_eq!(LineErrorKind::from_io(&stalled), LineErrorKind::TxFull);
        let other = io::Error::new(io::ErrorKind::Other, "EIO");
        assert_eq!(LineErrorKind::from_io(&other), LineErrorKind::Unknown);
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(LineErrorKind::RxOverflow.to_string(), "rx-overflow");
        assert_eq!(LineErrorKind::TxFull.to_string(), "tx-full");
    }

    #[test]
    fn test_classification() {
        let gone = SerialError::device_gone(
            "COM3",
            &io::Error::new(io::ErrorKind::BrokenPipe, "unplugged"),
        );
        assert!(gone.is_recoverable());
        assert!(!gone.is_programmer_error());
        assert_eq!(gone.line_error_kind(), LineErrorKind::Unknown);

        assert!(SerialError::NotOpen.is_programmer_error());
        assert!(!SerialError::InvalidSettings("x".into()).is_recoverable());
    }
}
