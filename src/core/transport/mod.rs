//! Device seam between the session and the platform serial primitive
//!
//! - [`PortDriver`] creates a fresh, unopened [`SerialDevice`] per open attempt
//! - [`SerialDevice`] wraps one OS handle for one open/close cycle
//! - [`NotificationSink`] is how a device's own notification thread hands
//!   received bytes, pin changes and line errors back to the session

mod serial;

pub use serial::{list_ports, NativeDevice, NativeDriver, PortInfo};

use super::buffer::ReceiveBuffer;
use super::dispatcher::{Dispatch, SerialEvent};
use super::error::{LineErrorKind, SerialResult};
use super::pins::ControlPins;
use super::settings::LineSettings;
use crossbeam_channel::Sender;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::trace;

/// Factory for devices
#[cfg_attr(test, mockall::automock)]
pub trait PortDriver: Send + Sync {
    /// Create a new device for `settings.port`. The device is not opened.
    fn create(&self, settings: &LineSettings) -> SerialResult<Box<dyn SerialDevice>>;
}

/// One OS serial handle.
///
/// Any accessor may fail with `SerialError::DeviceGone` at any time; that is
/// the normal signal that the hardware was removed.
#[cfg_attr(test, mockall::automock)]
pub trait SerialDevice: Send {
    /// Apply line settings, before or after `open`
    fn apply_settings(&mut self, settings: &LineSettings) -> SerialResult<()>;

    /// Open the handle and start delivering notifications to `sink`
    fn open(&mut self, sink: NotificationSink) -> SerialResult<()>;

    /// Stop notifications and release the OS handle
    fn close(&mut self) -> SerialResult<()>;

    /// Whether the OS still reports the handle as open
    fn is_open(&self) -> SerialResult<bool>;

    /// Write all of `data`, blocking until the driver accepted it
    fn write(&mut self, data: &[u8]) -> SerialResult<()>;

    /// Drive RTS. Before `open` the level is applied when the handle opens.
    fn set_rts(&mut self, level: bool) -> SerialResult<()>;

    /// Drive DTR. Before `open` the level is applied when the handle opens.
    fn set_dtr(&mut self, level: bool) -> SerialResult<()>;

    /// Start (`true`) or end (`false`) a break condition
    fn set_break(&mut self, on: bool) -> SerialResult<()>;

    /// Read the control lines
    fn control_pins(&mut self) -> SerialResult<ControlPins>;
}

/// Where a device delivers asynchronous notifications.
///
/// A sink goes dead once the session retires the handle it was given to;
/// anything delivered afterwards is dropped.
#[derive(Clone)]
pub struct NotificationSink {
    port: Arc<str>,
    buffer: Arc<ReceiveBuffer>,
    events: Sender<Dispatch>,
    live: Arc<AtomicBool>,
}

impl NotificationSink {
    pub(crate) fn new(
        port: &str,
        buffer: Arc<ReceiveBuffer>,
        events: Sender<Dispatch>,
        live: Arc<AtomicBool>,
    ) -> Self {
        Self {
            port: Arc::from(port),
            buffer,
            events,
            live,
        }
    }

    /// Bytes arrived on the line
    pub fn data(&self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        match self.buffer.push_if_live(&self.live, bytes) {
            Some(buffered) => {
                self.emit(SerialEvent::DataReceived { buffered });
            }
            None => trace!(port = %self.port, len = bytes.len(), "Dropping bytes from retired handle"),
        }
    }

    /// A control line changed level
    pub fn pins_changed(&self, pins: ControlPins) {
        if self.is_live() {
            self.emit(SerialEvent::IoControlChanged { pins: Some(pins) });
        }
    }

    /// The line reported an error that did not (yet) kill the handle
    pub fn line_error(&self, kind: LineErrorKind, message: impl Into<String>) {
        if self.is_live() {
            self.emit(SerialEvent::IoError {
                kind,
                message: message.into(),
            });
        }
    }

    /// Whether the session still owns the handle this sink was given to
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    /// Port name the sink belongs to
    pub fn port(&self) -> &str {
        &self.port
    }

    fn emit(&self, event: SerialEvent) {
        // Receiver gone means the session is shutting down.
        let _ = self.events.send(Dispatch::Event(event));
    }
}

impl fmt::Debug for NotificationSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationSink")
            .field("port", &self.port)
            .field("live", &self.is_live())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dead_sink_drops_everything() {
        let buffer = Arc::new(ReceiveBuffer::new(1024));
        let (tx, rx) = crossbeam_channel::unbounded();
        let live = Arc::new(AtomicBool::new(true));
        let sink = NotificationSink::new("COM3", buffer.clone(), tx, live.clone());

        sink.data(b"hi");
        assert!(matches!(
            rx.try_recv(),
            Ok(Dispatch::Event(SerialEvent::DataReceived { buffered: 2 }))
        ));

        live.store(false, Ordering::SeqCst);
        sink.data(b"late");
        sink.line_error(LineErrorKind::Framing, "bad stop bit");
        sink.pins_changed(ControlPins::default());
        assert!(rx.try_recv().is_err());
        assert_eq!(&buffer.drain()[..], b"hi");
    }
}
