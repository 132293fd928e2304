//! # Serline Core Library
//!
//! Serial-line session manager that keeps a port open across hot-unplug
//! and replug of USB-serial adapters:
//! - Line settings with RS-232, software, manual and RS-485 flow control
//! - Liveness monitoring of the open handle
//! - Automatic reopen at a fixed interval
//! - Buffered receive with change notifications
//! - Event callbacks and channel subscriptions
//! - Saved line profiles (TOML)
//! - CLI with exit codes
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use serline_core::{FlowControlMode, LineSettings, SerialEvent, Session};
//!
//! fn main() -> anyhow::Result<()> {
//!     let settings = LineSettings::new("/dev/ttyUSB0", 9600)
//!         .flow_control(FlowControlMode::Rs485)
//!         .auto_reopen(Duration::from_secs(1));
//!     let session = Session::new(settings)?;
//!     let events = session.subscribe();
//!     session.start()?;
//!
//!     session.send(b"\x01\x03\x00\x00\x00\x01")?;
//!
//!     for event in events {
//!         if let SerialEvent::DataReceived { .. } = event {
//!             println!("Received: {:02x?}", session.receive());
//!         }
//!     }
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod config;
pub mod core;

// Re-exports for convenience
pub use crate::cli::{CliResult, ExitCodes};
pub use crate::config::{Profile, SessionConfig};
pub use crate::core::dispatcher::{EventHandler, HandlerId, SerialEvent};
pub use crate::core::error::{LineErrorKind, SerialError, SerialResult};
pub use crate::core::pins::ControlPins;
pub use crate::core::session::{Session, SessionState, SessionStats, StateTransition};
pub use crate::core::settings::{FlowControlMode, LineSettings, Parity, PinLevels, StopBits};
pub use crate::core::transport::{
    list_ports, NativeDevice, NativeDriver, NotificationSink, PortDriver, PortInfo, SerialDevice,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
