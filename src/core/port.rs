//! Port handle wrapper
//!
//! Owns at most one device at a time and enforces its lifecycle:
//! `create` -> `apply_settings`/pins -> `open` -> `release`. A device is
//! never reopened; every open attempt starts with a fresh `create`.
//!
//! There is no `read` or `bytes_to_read` here: received bytes are pushed by
//! the device through the [`NotificationSink`] given to `open`, and closing
//! is `release` followed by the teardown worker's `close`.

use super::error::{SerialError, SerialResult};
use super::pins::ControlPins;
use super::settings::LineSettings;
use super::transport::{NotificationSink, PortDriver, SerialDevice};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Empty,
    Created,
    Open,
    Released,
}

/// Exclusive owner of the current device
pub struct PortHandle {
    driver: Arc<dyn PortDriver>,
    device: Option<Box<dyn SerialDevice>>,
    lifecycle: Lifecycle,
    port: String,
}

impl PortHandle {
    /// Empty wrapper around `driver`
    pub fn new(driver: Arc<dyn PortDriver>) -> Self {
        Self {
            driver,
            device: None,
            lifecycle: Lifecycle::Empty,
            port: String::new(),
        }
    }

    /// Create a fresh device. Fails if a device is still held.
    pub fn create(&mut self, settings: &LineSettings) -> SerialResult<()> {
        if self.device.is_some() {
            return Err(SerialError::InvalidSequence(
                "create called while a device is still held; release it first",
            ));
        }
        let device = self.driver.create(settings)?;
        self.device = Some(device);
        self.port = settings.port.clone();
        self.lifecycle = Lifecycle::Created;
        Ok(())
    }

    /// Open the created device
    pub fn open(&mut self, sink: NotificationSink) -> SerialResult<()> {
        if self.lifecycle != Lifecycle::Created {
            return Err(SerialError::InvalidSequence(
                "open requires a freshly created device",
            ));
        }
        self.device_mut()?.open(sink)?;
        self.lifecycle = Lifecycle::Open;
        Ok(())
    }

    /// Give up ownership of the device so it can be torn down elsewhere.
    ///
    /// Returns `None` when nothing is held.
    pub fn release(&mut self) -> Option<Box<dyn SerialDevice>> {
        let device = self.device.take()?;
        self.lifecycle = Lifecycle::Released;
        Some(device)
    }

    /// Name of the port the current (or last) device was created for
    pub fn port(&self) -> &str {
        &self.port
    }

    /// Whether an opened device is held and reports itself open
    pub fn is_open(&self) -> SerialResult<bool> {
        match (&self.device, self.lifecycle) {
            (Some(device), Lifecycle::Open) => device.is_open(),
            _ => Ok(false),
        }
    }

    /// Apply settings to the held device
    pub fn apply_settings(&mut self, settings: &LineSettings) -> SerialResult<()> {
        self.device_mut()?.apply_settings(settings)
    }

    /// Write to the open device
    pub fn write(&mut self, data: &[u8]) -> SerialResult<()> {
        self.open_device()?.write(data)
    }

    /// Drive RTS (deferred until open when called on a created device)
    pub fn set_rts(&mut self, level: bool) -> SerialResult<()> {
        self.device_mut()?.set_rts(level)
    }

    /// Drive DTR (deferred until open when called on a created device)
    pub fn set_dtr(&mut self, level: bool) -> SerialResult<()> {
        self.device_mut()?.set_dtr(level)
    }

    /// Start or end a break condition
    pub fn set_break(&mut self, on: bool) -> SerialResult<()> {
        self.open_device()?.set_break(on)
    }

    /// Read the control lines fresh from the device
    pub fn control_pins(&mut self) -> SerialResult<ControlPins> {
        self.open_device()?.control_pins()
    }

    fn device_mut(&mut self) -> SerialResult<&mut Box<dyn SerialDevice>> {
        self.device.as_mut().ok_or(SerialError::NotOpen)
    }

    fn open_device(&mut self) -> SerialResult<&mut Box<dyn SerialDevice>> {
        if self.lifecycle != Lifecycle::Open {
            return Err(SerialError::NotOpen);
        }
        self.device_mut()
    }
}
