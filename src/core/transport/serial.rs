//! Serial device backed by the `serialport` crate
//!
//! `serialport` has no event callbacks, so each open handle gets a reader
//! thread that plays the role of the OS notification thread: it reads with a
//! short timeout, forwards bytes, and polls the input lines between reads.

use super::{NotificationSink, PortDriver, SerialDevice};
use crate::core::error::{LineErrorKind, SerialError, SerialResult};
use crate::core::pins::ControlPins;
use crate::core::settings::{FlowControlMode, LineSettings, Parity, StopBits};
use serde::{Deserialize, Serialize};
use serialport::SerialPort;
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

const READ_CHUNK: usize = 4096;

/// Creates [`NativeDevice`]s
#[derive(Debug, Clone)]
pub struct NativeDriver {
    read_timeout: Duration,
}

impl NativeDriver {
    /// `read_timeout` bounds how long the reader thread takes to notice a close
    pub fn new(read_timeout: Duration) -> Self {
        Self { read_timeout }
    }
}

impl Default for NativeDriver {
    fn default() -> Self {
        Self::new(Duration::from_millis(50))
    }
}

impl PortDriver for NativeDriver {
    fn create(&self, settings: &LineSettings) -> SerialResult<Box<dyn SerialDevice>> {
        Ok(Box::new(NativeDevice::new(&settings.port, self.read_timeout)))
    }
}

/// Output line levels as last driven, shared with the reader thread
#[derive(Debug, Default)]
struct OutputLevels {
    rts: AtomicBool,
    dtr: AtomicBool,
}

struct Reader {
    shutdown: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// One `serialport` handle for one open/close cycle
pub struct NativeDevice {
    name: String,
    read_timeout: Duration,
    settings: Option<LineSettings>,
    port: Option<Box<dyn SerialPort>>,
    reader: Option<Reader>,
    outputs: Arc<OutputLevels>,
    pending_rts: Option<bool>,
    pending_dtr: Option<bool>,
    opened: bool,
}

impl NativeDevice {
    /// Create an unopened device for `name`
    pub fn new(name: &str, read_timeout: Duration) -> Self {
        Self {
            name: name.to_string(),
            read_timeout,
            settings: None,
            port: None,
            reader: None,
            outputs: Arc::new(OutputLevels::default()),
            pending_rts: None,
            pending_dtr: None,
            opened: false,
        }
    }

    fn port_mut(&mut self) -> SerialResult<&mut Box<dyn SerialPort>> {
        self.port.as_mut().ok_or(SerialError::NotOpen)
    }

    fn configure(port: &mut dyn SerialPort, settings: &LineSettings) -> serialport::Result<()> {
        port.set_baud_rate(settings.baud_rate)?;
        port.set_data_bits(data_bits(settings.data_bits))?;
        port.set_parity(parity(settings.parity))?;
        port.set_stop_bits(stop_bits(settings.stop_bits))?;
        port.set_flow_control(flow_control(settings.flow_control))
    }
}

impl SerialDevice for NativeDevice {
    fn apply_settings(&mut self, settings: &LineSettings) -> SerialResult<()> {
        settings.validate()?;
        if matches!(settings.parity, Parity::Mark | Parity::Space) {
            return Err(SerialError::InvalidSettings(format!(
                "{:?} parity is not supported on {}",
                settings.parity, self.name
            )));
        }
        if settings.stop_bits == StopBits::OnePointFive {
            return Err(SerialError::InvalidSettings(format!(
                "1.5 stop bits are not supported on {}",
                self.name
            )));
        }
        if settings.parity_replacement.is_some() {
            debug!(port = %self.name, "Parity replacement byte is not supported by this driver, ignoring");
        }

        if let Some(port) = self.port.as_mut() {
            Self::configure(port.as_mut(), settings).map_err(|e| gone(&self.name, &e))?;
        }
        self.settings = Some(settings.clone());
        Ok(())
    }

    fn open(&mut self, sink: NotificationSink) -> SerialResult<()> {
        if self.opened {
            return Err(SerialError::InvalidSequence(
                "a device cannot be reopened; create a new one",
            ));
        }
        let settings = self
            .settings
            .clone()
            .ok_or(SerialError::InvalidSequence("settings must be applied before open"))?;

        let mut port = serialport::new(&self.name, settings.baud_rate)
            .data_bits(data_bits(settings.data_bits))
            .parity(parity(settings.parity))
            .stop_bits(stop_bits(settings.stop_bits))
            .flow_control(flow_control(settings.flow_control))
            .timeout(self.read_timeout)
            .open()
            .map_err(|e| open_error(&self.name, &e))?;
        self.opened = true;

        if let Some(rts) = self.pending_rts.take() {
            port.write_request_to_send(rts).map_err(|e| gone(&self.name, &e))?;
        }
        if let Some(dtr) = self.pending_dtr.take() {
            port.write_data_terminal_ready(dtr).map_err(|e| gone(&self.name, &e))?;
        }

        let reader_port = port.try_clone().map_err(|e| open_error(&self.name, &e))?;
        let shutdown = Arc::new(AtomicBool::new(false));
        let handle = spawn_reader(
            &self.name,
            reader_port,
            sink,
            shutdown.clone(),
            self.outputs.clone(),
        )
        .map_err(|e| SerialError::OpenFailed {
            port: self.name.clone(),
            reason: format!("could not start reader thread: {e}"),
        })?;

        self.reader = Some(Reader { shutdown, handle });
        self.port = Some(port);
        info!(port = %self.name, settings = %settings, "Serial port opened");
        Ok(())
    }

    fn close(&mut self) -> SerialResult<()> {
        if let Some(reader) = self.reader.take() {
            reader.shutdown.store(true, Ordering::SeqCst);
            if reader.handle.thread().id() == thread::current().id() {
                warn!(port = %self.name, "Close called on the reader thread, not joining it");
            } else if reader.handle.join().is_err() {
                warn!(port = %self.name, "Reader thread panicked");
            }
        }
        if self.port.take().is_some() {
            debug!(port = %self.name, "Serial port released");
        }
        Ok(())
    }

    fn is_open(&self) -> SerialResult<bool> {
        let reader_alive = self
            .reader
            .as_ref()
            .is_some_and(|reader| !reader.handle.is_finished());
        Ok(self.port.is_some() && reader_alive)
    }

    fn write(&mut self, data: &[u8]) -> SerialResult<()> {
        let name = self.name.clone();
        let port = self.port_mut()?;
        port.write_all(data)
            .and_then(|()| port.flush())
            .map_err(|e| SerialError::device_gone(&name, &e))
    }

    fn set_rts(&mut self, level: bool) -> SerialResult<()> {
        match self.port.as_mut() {
            Some(port) => port
                .write_request_to_send(level)
                .map_err(|e| gone(&self.name, &e))?,
            None => self.pending_rts = Some(level),
        }
        self.outputs.rts.store(level, Ordering::SeqCst);
        Ok(())
    }

    fn set_dtr(&mut self, level: bool) -> SerialResult<()> {
        match self.port.as_mut() {
            Some(port) => port
                .write_data_terminal_ready(level)
                .map_err(|e| gone(&self.name, &e))?,
            None => self.pending_dtr = Some(level),
        }
        self.outputs.dtr.store(level, Ordering::SeqCst);
        Ok(())
    }

    fn set_break(&mut self, on: bool) -> SerialResult<()> {
        let name = self.name.clone();
        let port = self.port_mut()?;
        let result = if on { port.set_break() } else { port.clear_break() };
        result.map_err(|e| gone(&name, &e))
    }

    fn control_pins(&mut self) -> SerialResult<ControlPins> {
        let name = self.name.clone();
        let outputs = self.outputs.clone();
        let port = self.port_mut()?;
        read_pins(port.as_mut(), &outputs).map_err(|e| gone(&name, &e))
    }
}

impl Drop for NativeDevice {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.as_ref() {
            reader.shutdown.store(true, Ordering::SeqCst);
        }
    }
}

fn spawn_reader(
    name: &str,
    mut port: Box<dyn SerialPort>,
    sink: NotificationSink,
    shutdown: Arc<AtomicBool>,
    outputs: Arc<OutputLevels>,
) -> io::Result<JoinHandle<()>> {
    let port_name = name.to_string();
    thread::Builder::new()
        .name(format!("serline-rx-{port_name}"))
        .spawn(move || {
            let mut buf = [0u8; READ_CHUNK];
            let mut last_pins = None;

            while !shutdown.load(Ordering::SeqCst) {
                match port.read(&mut buf) {
                    Ok(0) => {}
                    Ok(n) => sink.data(&buf[..n]),
                    Err(ref e)
                        if matches!(
                            e.kind(),
                            io::ErrorKind::TimedOut
                                | io::ErrorKind::WouldBlock
                                | io::ErrorKind::Interrupted
                        ) =>
                    {
                        // Idle line: emulate pin-change notifications.
                        if let Ok(pins) = read_pins(port.as_mut(), &outputs) {
                            if last_pins.is_some_and(|last| last != pins) {
                                sink.pins_changed(pins);
                            }
                            last_pins = Some(pins);
                        }
                    }
                    Err(e) => {
                        if !shutdown.load(Ordering::SeqCst) {
                            warn!(port = %port_name, error = %e, "Read failed, reader stopping");
                            sink.line_error(LineErrorKind::from_io(&e), e.to_string());
                        }
                        break;
                    }
                }
            }
            debug!(port = %port_name, "Reader thread exiting");
        })
}

fn read_pins(port: &mut dyn SerialPort, outputs: &OutputLevels) -> serialport::Result<ControlPins> {
    Ok(ControlPins {
        rts: outputs.rts.load(Ordering::SeqCst),
        cts: port.read_clear_to_send()?,
        dtr: outputs.dtr.load(Ordering::SeqCst),
        dsr: port.read_data_set_ready()?,
        cd: port.read_carrier_detect()?,
    })
}

fn data_bits(bits: u8) -> serialport::DataBits {
    match bits {
        5 => serialport::DataBits::Five,
        6 => serialport::DataBits::Six,
        7 => serialport::DataBits::Seven,
        _ => serialport::DataBits::Eight,
    }
}

fn parity(parity: Parity) -> serialport::Parity {
    match parity {
        Parity::Odd => serialport::Parity::Odd,
        Parity::Even => serialport::Parity::Even,
        Parity::None | Parity::Mark | Parity::Space => serialport::Parity::None,
    }
}

fn stop_bits(bits: StopBits) -> serialport::StopBits {
    match bits {
        StopBits::Two => serialport::StopBits::Two,
        StopBits::One | StopBits::OnePointFive => serialport::StopBits::One,
    }
}

fn flow_control(mode: FlowControlMode) -> serialport::FlowControl {
    // serialport cannot combine both handshakes; the hardware one wins.
    if mode.uses_hardware_handshake() {
        serialport::FlowControl::Hardware
    } else if mode.uses_software_handshake() {
        serialport::FlowControl::Software
    } else {
        serialport::FlowControl::None
    }
}

fn gone(port: &str, e: &serialport::Error) -> SerialError {
    let kind = match e.kind() {
        serialport::ErrorKind::Io(io_kind) => LineErrorKind::from_io(&io::Error::from(io_kind)),
        _ => LineErrorKind::Unknown,
    };
    SerialError::DeviceGone {
        port: port.to_string(),
        kind,
        message: e.to_string(),
    }
}

fn open_error(port: &str, e: &serialport::Error) -> SerialError {
    match e.kind() {
        serialport::ErrorKind::InvalidInput => SerialError::InvalidSettings(e.to_string()),
        serialport::ErrorKind::NoDevice => SerialError::OpenFailed {
            port: port.to_string(),
            reason: format!("port not found ({e})"),
        },
        serialport::ErrorKind::Io(io::ErrorKind::PermissionDenied) => SerialError::OpenFailed {
            port: port.to_string(),
            reason: format!("permission denied ({e})"),
        },
        _ => SerialError::OpenFailed {
            port: port.to_string(),
            reason: e.to_string(),
        },
    }
}

/// A serial port present on this machine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortInfo {
    /// Port name to open
    pub name: String,
    /// Bus the port hangs off, with USB ids when known
    pub kind: String,
}

/// List available serial ports
pub fn list_ports() -> SerialResult<Vec<PortInfo>> {
    let ports = serialport::available_ports().map_err(|e| SerialError::Io(e.into()))?;

    Ok(ports
        .into_iter()
        .map(|p| {
            let kind = match &p.port_type {
                serialport::SerialPortType::UsbPort(info) => {
                    format!("USB ({:04X}:{:04X})", info.vid, info.pid)
                }
                serialport::SerialPortType::PciPort => "PCI".to_string(),
                serialport::SerialPortType::BluetoothPort => "Bluetooth".to_string(),
                serialport::SerialPortType::Unknown => "Native".to_string(),
            };
            PortInfo {
                name: p.port_name,
                kind,
            }
        })
        .collect())
}
