//! Scripted in-memory serial line shared by the integration tests

#![allow(dead_code)]

use crossbeam_channel::Receiver;
use parking_lot::Mutex;
use serline_core::{
    ControlPins, LineErrorKind, LineSettings, NotificationSink, PortDriver, SerialDevice, SerialError,
    SerialEvent, SerialResult, Session, SessionConfig, SessionState,
};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Every call a fake device received, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Create,
    Apply,
    Rts(bool),
    Dtr(bool),
    Open,
    Write(Vec<u8>),
    Break(bool),
    Close,
}

#[derive(Default)]
struct Hardware {
    unplugged: bool,
    failing_opens: usize,
    failing_writes: bool,
    rejected_settings: bool,
    calls: Vec<Call>,
    sink: Option<NotificationSink>,
    rts: bool,
    dtr: bool,
    open_devices: usize,
}

/// The "hardware" behind every device the fake driver creates
#[derive(Clone, Default)]
pub struct FakeLine {
    hw: Arc<Mutex<Hardware>>,
}

impl FakeLine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn driver(&self) -> Arc<dyn PortDriver> {
        Arc::new(FakeDriver { hw: self.hw.clone() })
    }

    /// Make every accessor of the current device fail, and opens too
    pub fn unplug(&self) {
        self.hw.lock().unplugged = true;
    }

    pub fn replug(&self) {
        self.hw.lock().unplugged = false;
    }

    pub fn fail_next_opens(&self, count: usize) {
        self.hw.lock().failing_opens = count;
    }

    pub fn fail_writes(&self, fail: bool) {
        self.hw.lock().failing_writes = fail;
    }

    /// Make the driver refuse to create devices
    pub fn reject_settings(&self, reject: bool) {
        self.hw.lock().rejected_settings = reject;
    }

    /// Deliver bytes through the most recently opened device's sink
    pub fn inject(&self, bytes: &[u8]) {
        if let Some(sink) = self.sink() {
            sink.data(bytes);
        }
    }

    /// Sink handed to the most recently opened device
    pub fn sink(&self) -> Option<NotificationSink> {
        self.hw.lock().sink.clone()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.hw.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.hw.lock().calls.clear();
    }

    pub fn count(&self, call: &Call) -> usize {
        self.hw.lock().calls.iter().filter(|c| *c == call).count()
    }

    /// Devices opened and not yet closed
    pub fn open_devices(&self) -> usize {
        self.hw.lock().open_devices
    }
}

struct FakeDriver {
    hw: Arc<Mutex<Hardware>>,
}

impl PortDriver for FakeDriver {
    fn create(&self, settings: &LineSettings) -> SerialResult<Box<dyn SerialDevice>> {
        let mut hw = self.hw.lock();
        if hw.rejected_settings {
            return Err(SerialError::InvalidSettings(format!("{settings} not supported")));
        }
        hw.calls.push(Call::Create);
        Ok(Box::new(FakeDevice {
            hw: self.hw.clone(),
            port: settings.port.clone(),
            open: false,
        }))
    }
}

struct FakeDevice {
    hw: Arc<Mutex<Hardware>>,
    port: String,
    open: bool,
}

impl FakeDevice {
    fn gone(&self) -> SerialError {
        SerialError::DeviceGone {
            port: self.port.clone(),
            kind: LineErrorKind::Unknown,
            message: "device removed".into(),
        }
    }

    fn check(&self) -> SerialResult<parking_lot::MutexGuard<'_, Hardware>> {
        let hw = self.hw.lock();
        if hw.unplugged {
            return Err(self.gone());
        }
        Ok(hw)
    }
}

impl SerialDevice for FakeDevice {
    fn apply_settings(&mut self, _settings: &LineSettings) -> SerialResult<()> {
        self.check()?.calls.push(Call::Apply);
        Ok(())
    }

    fn open(&mut self, sink: NotificationSink) -> SerialResult<()> {
        let mut hw = self.hw.lock();
        if hw.unplugged || hw.failing_opens > 0 {
            hw.failing_opens = hw.failing_opens.saturating_sub(1);
            return Err(SerialError::OpenFailed {
                port: self.port.clone(),
                reason: "No such file or directory".into(),
            });
        }
        hw.calls.push(Call::Open);
        hw.sink = Some(sink);
        hw.open_devices += 1;
        self.open = true;
        Ok(())
    }

    fn close(&mut self) -> SerialResult<()> {
        let mut hw = self.hw.lock();
        hw.calls.push(Call::Close);
        if self.open {
            hw.open_devices -= 1;
        }
        self.open = false;
        Ok(())
    }

    fn is_open(&self) -> SerialResult<bool> {
        drop(self.check()?);
        Ok(self.open)
    }

    fn write(&mut self, data: &[u8]) -> SerialResult<()> {
        let mut hw = self.check()?;
        hw.calls.push(Call::Write(data.to_vec()));
        if hw.failing_writes {
            drop(hw);
            return Err(self.gone());
        }
        Ok(())
    }

    fn set_rts(&mut self, level: bool) -> SerialResult<()> {
        let mut hw = self.check()?;
        hw.calls.push(Call::Rts(level));
        hw.rts = level;
        Ok(())
    }

    fn set_dtr(&mut self, level: bool) -> SerialResult<()> {
        let mut hw = self.check()?;
        hw.calls.push(Call::Dtr(level));
        hw.dtr = level;
        Ok(())
    }

    fn set_break(&mut self, on: bool) -> SerialResult<()> {
        self.check()?.calls.push(Call::Break(on));
        Ok(())
    }

    fn control_pins(&mut self) -> SerialResult<ControlPins> {
        let hw = self.check()?;
        Ok(ControlPins {
            rts: hw.rts,
            dtr: hw.dtr,
            cts: hw.rts,
            dsr: hw.dtr,
            cd: false,
        })
    }
}

/// Liveness and reopen both tick every `TICK` in tests
pub const TICK: Duration = Duration::from_millis(20);

pub fn config() -> SessionConfig {
    SessionConfig::default().liveness_interval_ms(20)
}

pub fn session(line: &FakeLine, settings: LineSettings) -> Session {
    Session::with_driver(settings, config(), line.driver()).unwrap()
}

/// Poll until the session reaches `state`
pub fn wait_for_state(session: &Session, state: SessionState, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if session.state() == state {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    session.state() == state
}

/// Everything that arrives within `quiet` of the previous event
pub fn collect(events: &Receiver<SerialEvent>, quiet: Duration) -> Vec<SerialEvent> {
    std::iter::from_fn(|| events.recv_timeout(quiet).ok()).collect()
}

/// Only the state changes among `events`
pub fn states(events: &[SerialEvent]) -> Vec<SessionState> {
    events
        .iter()
        .filter_map(|event| match event {
            SerialEvent::IoChanged { state } => Some(*state),
            _ => None,
        })
        .collect()
}
