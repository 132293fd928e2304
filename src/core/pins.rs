//! Modem control line snapshot

use serde::{Deserialize, Serialize};
use std::fmt;

/// RTS/CTS/DTR/DSR/CD levels read from a handle at one instant.
///
/// Pins change underneath the caller; a snapshot is only good for the call
/// that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ControlPins {
    /// Request To Send
    pub rts: bool,
    /// Clear To Send
    pub cts: bool,
    /// Data Terminal Ready
    pub dtr: bool,
    /// Data Set Ready
    pub dsr: bool,
    /// Carrier Detect
    pub cd: bool,
}

impl fmt::Display for ControlPins {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pin = |name: &'static str, on: bool| if on { name.to_string() } else { name.to_lowercase() };
        write!(
            f,
            "{} {} {} {} {}",
            pin("RTS", self.rts),
            pin("CTS", self.cts),
            pin("DTR", self.dtr),
            pin("DSR", self.dsr),
            pin("CD", self.cd)
        )
    }
}
