//! Session management for a serial line
//!
//! A [`Session`] is the only owner of the line's handle. It keeps the line
//! open across hot-unplug/replug:
//!
//! - `start()` creates and opens a fresh handle, then starts the liveness monitor
//! - when the monitor reports loss, the handle is retired and either the
//!   reopen scheduler takes over (auto-reopen) or the session resets
//! - `stop()` cancels everything and retires the handle from any state
//!
//! All state lives behind one lock. Retired handles are closed on the
//! teardown worker, never on the calling thread, and consumers are notified
//! through the event dispatcher thread.

use super::buffer::ReceiveBuffer;
use super::dispatcher::{EventDispatcher, HandlerId, SerialEvent};
use super::error::{LineErrorKind, SerialError, SerialResult};
use super::pins::ControlPins;
use super::port::PortHandle;
use super::settings::{FlowControlMode, LineSettings};
use super::teardown::TeardownWorker;
use super::timer::{LivenessMonitor, Probe, ReopenOutcome, ReopenScheduler};
use super::transport::{NativeDriver, NotificationSink, PortDriver};
use crate::config::SessionConfig;
use bytes::Bytes;
use chrono::{DateTime, Local};
use crossbeam_channel::Receiver;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    /// Never started, or stopped
    Reset,
    /// Handle is live
    Open,
    /// Handle lost, about to wait for the device
    Closed,
    /// Handle lost, reopen attempts running
    WaitingForReopen,
    /// Handle could not be created; only `stop()` leaves this state
    Error,
}

impl SessionState {
    /// Check if the line is open
    pub fn is_open(self) -> bool {
        self == Self::Open
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reset => write!(f, "Reset"),
            Self::Open => write!(f, "Open"),
            Self::Closed => write!(f, "Closed"),
            Self::WaitingForReopen => write!(f, "Waiting for reopen"),
            Self::Error => write!(f, "Error"),
        }
    }
}

/// State transition record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    /// Previous state
    pub from: SessionState,
    /// New state
    pub to: SessionState,
    /// Timestamp
    pub at: DateTime<Local>,
    /// Reason for transition
    pub reason: String,
}

/// Session statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStats {
    /// Bytes written by `send`
    pub bytes_sent: u64,
    /// Bytes received, drained or not
    pub bytes_received: u64,
    /// Reopen attempts made by the scheduler
    pub reopen_attempts: u64,
    /// Times the liveness monitor (or a failed settings change) lost the line
    pub losses: u64,
}

/// Current state plus the resources that only exist in that state
enum Phase {
    Reset,
    Open {
        generation: u64,
        live: Arc<AtomicBool>,
        liveness: LivenessMonitor,
    },
    Closed,
    WaitingForReopen {
        scheduler: ReopenScheduler,
    },
    Error,
}

impl Phase {
    fn state(&self) -> SessionState {
        match self {
            Self::Reset => SessionState::Reset,
            Self::Open { .. } => SessionState::Open,
            Self::Closed => SessionState::Closed,
            Self::WaitingForReopen { .. } => SessionState::WaitingForReopen,
            Self::Error => SessionState::Error,
        }
    }

    fn open_generation(&self) -> Option<u64> {
        match self {
            Self::Open { generation, .. } => Some(*generation),
            _ => None,
        }
    }
}

struct Core {
    phase: Phase,
    port: PortHandle,
    settings: LineSettings,
    generation: u64,
    history: VecDeque<StateTransition>,
    /// Last failure already reported while waiting for reopen
    reopen_error: Option<String>,
}

#[derive(Default)]
struct Counters {
    bytes_sent: AtomicU64,
    reopen_attempts: AtomicU64,
    losses: AtomicU64,
}

#[derive(Clone, Copy)]
enum OutputPin {
    Rts,
    Dtr,
}

struct Shared {
    id: Uuid,
    tag: String,
    config: SessionConfig,
    core: Mutex<Core>,
    buffer: Arc<ReceiveBuffer>,
    events: EventDispatcher,
    teardown: TeardownWorker,
    counters: Counters,
}

/// Serial line session.
///
/// Share it between threads with `Arc<Session>`. Dropping the session stops it.
pub struct Session {
    shared: Arc<Shared>,
}

impl Session {
    /// Session on a native serial port with default tunables
    pub fn new(settings: LineSettings) -> SerialResult<Self> {
        Self::with_config(settings, SessionConfig::default())
    }

    /// Session on a native serial port
    pub fn with_config(settings: LineSettings, config: SessionConfig) -> SerialResult<Self> {
        let driver = Arc::new(NativeDriver::new(config.read_timeout()));
        Self::with_driver(settings, config, driver)
    }

    /// Session on devices produced by `driver`
    pub fn with_driver(
        settings: LineSettings,
        config: SessionConfig,
        driver: Arc<dyn PortDriver>,
    ) -> SerialResult<Self> {
        settings.validate()?;

        let id = Uuid::new_v4();
        let tag = id.simple().to_string()[..8].to_string();
        let events = EventDispatcher::spawn(format!("serline-events-{tag}"))?;
        let teardown = TeardownWorker::spawn(format!("serline-teardown-{tag}"))?;
        info!(session = %id, settings = %settings, "Session created");

        let core = Core {
            phase: Phase::Reset,
            port: PortHandle::new(driver),
            settings,
            generation: 0,
            history: VecDeque::new(),
            reopen_error: None,
        };

        Ok(Self {
            shared: Arc::new(Shared {
                id,
                tag,
                buffer: Arc::new(ReceiveBuffer::new(config.receive_high_water)),
                config,
                core: Mutex::new(core),
                events,
                teardown,
                counters: Counters::default(),
            }),
        })
    }

    /// Get session ID
    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    /// Get current state
    pub fn state(&self) -> SessionState {
        self.shared.core.lock().phase.state()
    }

    /// Check if the line is open.
    ///
    /// Advisory only: the device can vanish right after this returns.
    pub fn is_open(&self) -> bool {
        self.state().is_open()
    }

    /// Current line settings
    pub fn settings(&self) -> LineSettings {
        self.shared.core.lock().settings.clone()
    }

    /// Open the line. No-op when already open.
    ///
    /// On failure an `IoError` is emitted and the error returned; with
    /// auto-reopen enabled the session keeps retrying in `WaitingForReopen`.
    pub fn start(&self) -> SerialResult<()> {
        self.shared.start()
    }

    /// Close the line from any state. Idempotent, callable from any thread
    /// including event handlers. The handle is closed in the background.
    pub fn stop(&self) {
        self.shared.stop();
    }

    /// Write `data`, blocking for the duration of the write.
    ///
    /// In RS-485 mode RTS is raised before and lowered after the write, and
    /// lowering is attempted even when the write fails.
    pub fn send(&self, data: &[u8]) -> SerialResult<()> {
        self.shared.send(data)
    }

    /// Take all buffered received bytes. Empty when not open; never blocks.
    pub fn receive(&self) -> Bytes {
        let core = self.shared.core.lock();
        if !core.phase.state().is_open() {
            return Bytes::new();
        }
        self.shared.buffer.drain()
    }

    /// Read the control lines fresh from the handle
    pub fn control_pins(&self) -> SerialResult<ControlPins> {
        let mut core = self.shared.core.lock();
        if !core.phase.state().is_open() {
            return Err(SerialError::NotOpen);
        }
        core.port.control_pins()
    }

    /// Replace the line settings. On an open line they are applied right away
    /// and the flow-control pin levels are re-initialized.
    pub fn apply_settings(&self, settings: LineSettings) -> SerialResult<()> {
        self.shared.apply_settings(settings)
    }

    /// Drive RTS. Requires an open line in manual flow control.
    pub fn set_rts(&self, level: bool) -> SerialResult<()> {
        self.shared.set_manual_pin(OutputPin::Rts, level)
    }

    /// Drive DTR. Requires an open line in manual flow control.
    pub fn set_dtr(&self, level: bool) -> SerialResult<()> {
        self.shared.set_manual_pin(OutputPin::Dtr, level)
    }

    /// Hold the line in break for `duration`
    pub fn send_break(&self, duration: Duration) -> SerialResult<()> {
        self.shared.send_break(duration)
    }

    /// Register an event callback. It runs on the dispatcher thread.
    pub fn on_event<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&SerialEvent) + Send + Sync + 'static,
    {
        self.shared.events.add_handler(Arc::new(handler))
    }

    /// Unregister an event callback
    pub fn remove_handler(&self, id: HandlerId) -> bool {
        self.shared.events.remove_handler(id)
    }

    /// Receive all events from now on through a channel
    pub fn subscribe(&self) -> Receiver<SerialEvent> {
        self.shared.events.subscribe()
    }

    /// Recent state transitions, oldest first
    pub fn history(&self) -> Vec<StateTransition> {
        self.shared.core.lock().history.iter().cloned().collect()
    }

    /// Get session statistics
    pub fn stats(&self) -> SessionStats {
        let counters = &self.shared.counters;
        SessionStats {
            bytes_sent: counters.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.shared.buffer.total_received(),
            reopen_attempts: counters.reopen_attempts.load(Ordering::Relaxed),
            losses: counters.losses.load(Ordering::Relaxed),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shared.stop();
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.shared.id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Shared {
    fn start(self: &Arc<Self>) -> SerialResult<()> {
        let mut core = self.core.lock();
        match core.phase.state() {
            SessionState::Open => return Ok(()),
            SessionState::Error => {
                return Err(SerialError::InvalidSequence(
                    "session is in the error state; stop it first",
                ))
            }
            _ => {}
        }

        let Err(err) = self.raise(&mut core, "started") else {
            return Ok(());
        };
        warn!(session = %self.id, port = %core.settings.port, error = %err, "Open failed");
        self.report(&err);

        if !err.is_recoverable() {
            self.fail(&mut core);
        } else if core.settings.auto_reopen {
            self.schedule_reopen(&mut core, "open failed, retrying", Some(&err));
        } else if core.phase.state() != SessionState::Reset {
            self.transition(&mut core, Phase::Reset, "open failed");
            self.emit_pins(&mut core);
        }
        Err(err)
    }

    fn stop(&self) {
        let mut core = self.core.lock();
        if core.phase.state() == SessionState::Reset {
            return;
        }
        self.transition(&mut core, Phase::Reset, "stopped");
        self.emit_pins(&mut core);
    }

    fn send(&self, data: &[u8]) -> SerialResult<()> {
        let mut core = self.core.lock();
        if !core.phase.state().is_open() {
            return Err(SerialError::NotOpen);
        }

        let result = if core.settings.flow_control == FlowControlMode::Rs485 {
            let raised = core.port.set_rts(true);
            let written = raised.and_then(|()| core.port.write(data));
            let lowered = core.port.set_rts(false);
            written.and(lowered)
        } else {
            core.port.write(data)
        };

        match result {
            Ok(()) => {
                self.counters
                    .bytes_sent
                    .fetch_add(data.len() as u64, Ordering::Relaxed);
                self.events.emit(SerialEvent::DataSent {
                    data: Bytes::copy_from_slice(data),
                });
                Ok(())
            }
            Err(err) => {
                warn!(session = %self.id, error = %err, "Send failed");
                self.report(&err);
                Err(err)
            }
        }
    }

    fn apply_settings(self: &Arc<Self>, settings: LineSettings) -> SerialResult<()> {
        settings.validate()?;
        let mut core = self.core.lock();
        let open = core.phase.state().is_open();
        if open && settings.port != core.settings.port {
            return Err(SerialError::InvalidSequence(
                "cannot change the port of an open session; stop it first",
            ));
        }

        let previous = std::mem::replace(&mut core.settings, settings.clone());
        if !open {
            return Ok(());
        }

        let result = core
            .port
            .apply_settings(&settings)
            .and_then(|()| apply_pin_levels(&mut core.port, &settings));
        match result {
            Ok(()) => {
                info!(session = %self.id, settings = %settings, "Settings applied");
                self.emit_pins(&mut core);
                Ok(())
            }
            Err(err) if err.is_recoverable() => {
                self.lose_line(&mut core, &err);
                Err(err)
            }
            Err(err) => {
                core.settings = previous;
                Err(err)
            }
        }
    }

    fn set_manual_pin(&self, pin: OutputPin, level: bool) -> SerialResult<()> {
        let mut core = self.core.lock();
        if !core.phase.state().is_open() {
            return Err(SerialError::NotOpen);
        }
        if core.settings.flow_control != FlowControlMode::Manual {
            return Err(SerialError::InvalidSequence(
                "manual pin control requires Manual flow control",
            ));
        }

        let result = match pin {
            OutputPin::Rts => core.port.set_rts(level),
            OutputPin::Dtr => core.port.set_dtr(level),
        };
        if let Err(err) = result {
            self.report(&err);
            return Err(err);
        }

        match pin {
            OutputPin::Rts => core.settings.manual_rts = level,
            OutputPin::Dtr => core.settings.manual_dtr = level,
        }
        self.emit_pins(&mut core);
        Ok(())
    }

    fn send_break(&self, duration: Duration) -> SerialResult<()> {
        let generation = {
            let mut core = self.core.lock();
            let generation = core.phase.open_generation().ok_or(SerialError::NotOpen)?;
            core.port.set_break(true)?;
            generation
        };

        thread::sleep(duration);

        let mut core = self.core.lock();
        if core.phase.open_generation() != Some(generation) {
            // The handle holding the break is gone.
            return Ok(());
        }
        core.port.set_break(false)
    }

    /// Create, configure and open a fresh handle, then enter `Open`.
    fn raise(self: &Arc<Self>, core: &mut Core, reason: &str) -> SerialResult<()> {
        let settings = core.settings.clone();
        core.port.create(&settings)?;
        core.generation += 1;
        let generation = core.generation;
        self.buffer.clear();

        let live = Arc::new(AtomicBool::new(true));
        let opened = self
            .configure_and_open(core, &settings, &live)
            .and_then(|()| self.start_liveness(generation).map_err(SerialError::from));
        let liveness = match opened {
            Ok(liveness) => liveness,
            Err(err) => {
                live.store(false, Ordering::SeqCst);
                self.retire_device(core);
                return Err(err);
            }
        };

        self.transition(
            core,
            Phase::Open {
                generation,
                live,
                liveness,
            },
            reason,
        );
        self.emit_pins(core);
        Ok(())
    }

    fn configure_and_open(
        &self,
        core: &mut Core,
        settings: &LineSettings,
        live: &Arc<AtomicBool>,
    ) -> SerialResult<()> {
        core.port.apply_settings(settings)?;
        apply_pin_levels(&mut core.port, settings)?;
        let sink = NotificationSink::new(
            &settings.port,
            self.buffer.clone(),
            self.events.sender(),
            live.clone(),
        );
        core.port.open(sink)
    }

    fn start_liveness(self: &Arc<Self>, generation: u64) -> io::Result<LivenessMonitor> {
        let probe_session = Arc::downgrade(self);
        let lost_session = Arc::downgrade(self);
        LivenessMonitor::start(
            format!("serline-alive-{}", self.tag),
            self.config.liveness_interval(),
            move || {
                probe_session
                    .upgrade()
                    .map_or(Probe::Retired, |session| session.probe(generation))
            },
            move |cause| {
                if let Some(session) = lost_session.upgrade() {
                    session.on_liveness_lost(generation, &cause);
                }
            },
        )
    }

    fn probe(&self, generation: u64) -> Probe {
        let mut core = self.core.lock();
        if core.phase.open_generation() != Some(generation) {
            return Probe::Retired;
        }
        match core.port.is_open() {
            Ok(true) => match core.port.control_pins() {
                Ok(_) => Probe::Alive,
                Err(err) => Probe::Lost(err),
            },
            Ok(false) => Probe::Lost(SerialError::DeviceGone {
                port: core.settings.port.clone(),
                kind: LineErrorKind::Unknown,
                message: "handle reports closed".into(),
            }),
            Err(err) => Probe::Lost(err),
        }
    }

    fn on_liveness_lost(self: &Arc<Self>, generation: u64, cause: &SerialError) {
        let mut core = self.core.lock();
        if core.phase.open_generation() != Some(generation) {
            debug!(session = %self.id, "Ignoring loss of a retired handle");
            return;
        }
        self.lose_line(&mut core, cause);
    }

    fn lose_line(self: &Arc<Self>, core: &mut Core, cause: &SerialError) {
        self.counters.losses.fetch_add(1, Ordering::Relaxed);
        warn!(session = %self.id, port = %core.settings.port, error = %cause, "Line lost");

        if core.settings.auto_reopen {
            self.transition(core, Phase::Closed, "line lost");
            self.emit_pins(core);
            self.schedule_reopen(core, "waiting for device", None);
        } else {
            self.report(cause);
            self.transition(core, Phase::Reset, "line lost");
            self.emit_pins(core);
        }
    }

    fn schedule_reopen(
        self: &Arc<Self>,
        core: &mut Core,
        reason: &str,
        reported: Option<&SerialError>,
    ) {
        core.reopen_error = reported.map(ToString::to_string);
        let session = Arc::downgrade(self);
        let scheduler = ReopenScheduler::start(
            format!("serline-reopen-{}", self.tag),
            core.settings.reopen_interval(),
            move || {
                session
                    .upgrade()
                    .map_or(ReopenOutcome::Abandon, |session| session.reopen_attempt())
            },
        );
        match scheduler {
            Ok(scheduler) => self.transition(core, Phase::WaitingForReopen { scheduler }, reason),
            Err(e) => {
                error!(session = %self.id, error = %e, "Could not start reopen scheduler");
                self.fail(core);
            }
        }
    }

    fn reopen_attempt(self: &Arc<Self>) -> ReopenOutcome {
        let mut core = self.core.lock();
        if core.phase.state() != SessionState::WaitingForReopen {
            return ReopenOutcome::Abandon;
        }
        let attempt = self.counters.reopen_attempts.fetch_add(1, Ordering::Relaxed) + 1;

        match self.raise(&mut core, "reopened") {
            Ok(()) => {
                info!(session = %self.id, attempt, "Line reopened");
                ReopenOutcome::Reopened
            }
            Err(err) if err.is_recoverable() => {
                // Report each distinct failure once per wait, not every tick.
                let message = err.to_string();
                if core.reopen_error.as_deref() == Some(message.as_str()) {
                    debug!(session = %self.id, attempt, error = %err, "Reopen attempt failed");
                } else {
                    warn!(session = %self.id, attempt, error = %err, "Reopen attempt failed");
                    self.report(&err);
                    core.reopen_error = Some(message);
                }
                ReopenOutcome::Retry
            }
            Err(err) => {
                self.report(&err);
                self.fail(&mut core);
                ReopenOutcome::Abandon
            }
        }
    }

    fn fail(&self, core: &mut Core) {
        self.transition(core, Phase::Error, "handle could not be created");
        self.emit_pins(core);
    }

    /// Swap in the next phase, retire whatever the old one owned, and
    /// announce the change.
    fn transition(&self, core: &mut Core, next: Phase, reason: &str) {
        let from = core.phase.state();
        let to = next.state();
        let previous = std::mem::replace(&mut core.phase, next);
        self.retire(core, previous);

        if from == to {
            return;
        }
        core.history.push_back(StateTransition {
            from,
            to,
            at: Local::now(),
            reason: reason.to_string(),
        });
        while core.history.len() > self.config.history_limit {
            core.history.pop_front();
        }
        info!(session = %self.id, from = ?from, to = ?to, reason, "State changed");
        self.events.emit(SerialEvent::IoChanged { state: to });
    }

    fn retire(&self, core: &mut Core, phase: Phase) {
        match phase {
            Phase::Open {
                live, mut liveness, ..
            } => {
                liveness.stop();
                live.store(false, Ordering::SeqCst);
                self.buffer.clear();
                self.retire_device(core);
            }
            Phase::WaitingForReopen { mut scheduler } => scheduler.stop(),
            Phase::Reset | Phase::Closed | Phase::Error => {}
        }
    }

    fn retire_device(&self, core: &mut Core) {
        if let Some(device) = core.port.release() {
            self.teardown.submit(core.port.port(), device);
        }
    }

    fn emit_pins(&self, core: &mut Core) {
        let pins = if core.phase.state().is_open() {
            core.port.control_pins().ok()
        } else {
            None
        };
        self.events.emit(SerialEvent::IoControlChanged { pins });
    }

    fn report(&self, err: &SerialError) {
        self.events.emit(SerialEvent::IoError {
            kind: err.line_error_kind(),
            message: err.to_string(),
        });
    }
}

/// Drive RTS/DTR to the levels the flow-control mode starts from
fn apply_pin_levels(port: &mut PortHandle, settings: &LineSettings) -> SerialResult<()> {
    let levels = settings.initial_pins();
    if let Some(rts) = levels.rts {
        port.set_rts(rts)?;
    }
    port.set_dtr(levels.dtr)
}
