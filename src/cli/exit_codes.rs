//! CLI Exit Codes
//!
//! Standard exit codes for CLI operations and automation.

use crate::core::error::SerialError;
use std::process::ExitCode;

/// Exit code constants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitCodes;

impl ExitCodes {
    /// Success
    pub const SUCCESS: u8 = 0;

    /// General error
    pub const ERROR: u8 = 1;

    /// Invalid arguments
    pub const INVALID_ARGS: u8 = 2;

    /// Open failed
    pub const OPEN_FAILED: u8 = 3;

    /// No response within the wait window
    pub const TIMEOUT: u8 = 4;

    /// File not found
    pub const FILE_NOT_FOUND: u8 = 6;

    /// Permission denied
    pub const PERMISSION_DENIED: u8 = 7;

    /// Configuration error
    pub const CONFIG_ERROR: u8 = 8;

    /// Line error (framing, parity, overrun...)
    pub const LINE_ERROR: u8 = 9;

    /// User cancelled
    pub const CANCELLED: u8 = 11;

    /// Device vanished
    pub const DEVICE_GONE: u8 = 12;

    /// Port not found
    pub const PORT_NOT_FOUND: u8 = 14;

    /// Internal error
    pub const INTERNAL_ERROR: u8 = 127;

    /// Exit code for a session error
    pub fn for_error(err: &SerialError) -> u8 {
        match err {
            SerialError::DeviceGone { .. } => Self::DEVICE_GONE,
            SerialError::OpenFailed { reason, .. } => {
                let reason = reason.to_ascii_lowercase();
                if reason.contains("not found") || reason.contains("no such") {
                    Self::PORT_NOT_FOUND
                } else if reason.contains("permission") || reason.contains("access is denied") {
                    Self::PERMISSION_DENIED
                } else {
                    Self::OPEN_FAILED
                }
            }
            SerialError::InvalidSettings(_) => Self::INVALID_ARGS,
            SerialError::Config(_) => Self::CONFIG_ERROR,
            SerialError::Io(io) => CliResult::from_io_kind(io.kind()),
            SerialError::NotOpen | SerialError::InvalidSequence(_) => Self::INTERNAL_ERROR,
        }
    }
}

/// CLI operation result
#[derive(Debug)]
pub enum CliResult {
    /// Success
    Success,

    /// Error with code and message
    Error(u8, String),
}

impl CliResult {
    /// Success without message
    pub fn success() -> Self {
        Self::Success
    }

    /// Collapse a command outcome into the result the process exits with
    pub fn from_outcome(outcome: Result<(), CliResult>) -> Self {
        outcome.map_or_else(|err| err, |()| Self::success())
    }

    /// Error with explicit code
    pub fn error(code: u8, msg: impl Into<String>) -> Self {
        Self::Error(code, msg.into())
    }

    /// No response in time
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Error(ExitCodes::TIMEOUT, msg.into())
    }

    /// Get exit code
    pub fn code(&self) -> u8 {
        match self {
            Self::Success => ExitCodes::SUCCESS,
            Self::Error(code, _) => *code,
        }
    }

    /// Get message
    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Error(_, msg) => Some(msg),
            Self::Success => None,
        }
    }

    /// Convert to `ExitCode`
    pub fn to_exit_code(&self) -> ExitCode {
        ExitCode::from(self.code())
    }

    /// Is success?
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    fn from_io_kind(kind: std::io::ErrorKind) -> u8 {
        use std::io::ErrorKind;

        match kind {
            ErrorKind::NotFound => ExitCodes::FILE_NOT_FOUND,
            ErrorKind::PermissionDenied => ExitCodes::PERMISSION_DENIED,
            ErrorKind::TimedOut => ExitCodes::TIMEOUT,
            _ => ExitCodes::ERROR,
        }
    }
}

impl From<SerialError> for CliResult {
    fn from(err: SerialError) -> Self {
        Self::Error(ExitCodes::for_error(&err), err.to_string())
    }
}

impl From<std::io::Error> for CliResult {
    fn from(err: std::io::Error) -> Self {
        Self::Error(Self::from_io_kind(err.kind()), err.to_string())
    }
}

/// Exit code description
pub fn exit_code_description(code: u8) -> &'static str {
    match code {
        0 => "Success",
        1 => "General error",
        2 => "Invalid arguments",
        3 => "Open failed",
        4 => "No response",
        6 => "File not found",
        7 => "Permission denied",
        8 => "Configuration error",
        9 => "Line error",
        11 => "Operation cancelled",
        12 => "Device gone",
        14 => "Port not found",
        127 => "Internal error",
        _ => "Unknown error",
    }
}

/// Print exit code table
pub fn print_exit_codes() {
    println!("Exit Codes:");
    for code in [0, 1, 2, 3, 4, 6, 7, 8, 9, 11, 12, 14, 127] {
        println!("  {:>3}  {}", code, exit_code_description(code));
    }
}
