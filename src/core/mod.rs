//! Core module containing the session machinery
//!
//! This module provides:
//! - Line settings and the flow-control pin table
//! - Device seam and the native serial backend
//! - Port handle wrapper enforcing the create/open/release lifecycle
//! - Receive buffer shared with the device's notification thread
//! - Liveness monitor and reopen scheduler
//! - Session state machine with its event dispatcher and teardown worker

pub mod buffer;
pub mod dispatcher;
pub mod error;
pub mod pins;
pub mod port;
pub mod session;
pub mod settings;
pub mod teardown;
pub mod timer;
pub mod transport;
