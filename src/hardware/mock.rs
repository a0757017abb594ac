//! Mock Protocol Implementations
//!
//! Simulated message sources for tests and the demo binary, usable wherever a
//! [`ProtocolStrategy`] is expected.
//!
//! # Available Mocks
//!
//! - `ScriptedProtocol` - Replays a fixed script of messages and errors
//! - `SyntheticCanBus` - Endless stream of random CAN frames with injected errors
//!
//! Both block interruptibly: a communicator stopping them wakes any pending read
//! through the strategy's interrupter.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::communication::{CommunicationError, ErrorKind, Interrupt, ProtocolStrategy};
use crate::thread::StopSignal;

// =============================================================================
// ScriptedProtocol - Deterministic Replay
// =============================================================================

/// Call counters of a [`ScriptedProtocol`], readable after it moved into a
/// communicator.
#[derive(Debug, Clone, Default)]
pub struct ScriptProbe {
    reads: Arc<AtomicUsize>,
    reconnects: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
}

impl ScriptProbe {
    /// Calls to `read_message`.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Calls to `reconnect`.
    pub fn reconnects(&self) -> usize {
        self.reconnects.load(Ordering::SeqCst)
    }

    /// Calls to `close`.
    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

/// Protocol that replays a script.
///
/// Each read pops the next step. Once the script is exhausted reads block for the
/// idle timeout and report [`ErrorKind::Timeout`], or [`ErrorKind::Interrupted`]
/// after an interrupt; both are retryable, so the read loop idles until stopped.
///
/// # Example
///
/// ```rust
/// use sensor_gateway::communication::ErrorKind;
/// use sensor_gateway::hardware::mock::ScriptedProtocol;
///
/// let protocol = ScriptedProtocol::new("can0")
///     .then_message(1u32)
///     .then_error(ErrorKind::Crc)
///     .then_message(2);
/// assert_eq!(protocol.remaining(), 3);
/// ```
pub struct ScriptedProtocol<M> {
    name: String,
    script: VecDeque<Result<M, CommunicationError>>,
    failing_reconnects: usize,
    reconnect_error: ErrorKind,
    idle_timeout: Duration,
    release: Option<StopSignal>,
    wake: StopSignal,
    probe: ScriptProbe,
}

impl<M> ScriptedProtocol<M> {
    /// Empty script on channel `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            script: VecDeque::new(),
            failing_reconnects: 0,
            reconnect_error: ErrorKind::NotFound,
            idle_timeout: Duration::from_millis(10),
            release: None,
            wake: StopSignal::new(),
            probe: ScriptProbe::default(),
        }
    }

    /// Append a successful read.
    pub fn then_message(mut self, message: M) -> Self {
        self.script.push_back(Ok(message));
        self
    }

    /// Append a failed read classified from `kind`.
    pub fn then_error(mut self, kind: ErrorKind) -> Self {
        let error = CommunicationError::from_kind(self.name.clone(), kind, "scripted failure");
        self.script.push_back(Err(error));
        self
    }

    /// Append a failed read with an explicit error.
    pub fn then_raw_error(mut self, error: CommunicationError) -> Self {
        self.script.push_back(Err(error));
        self
    }

    /// Append every message of `messages`.
    pub fn then_messages(mut self, messages: impl IntoIterator<Item = M>) -> Self {
        self.script.extend(messages.into_iter().map(Ok));
        self
    }

    /// Fail the next `count` reconnect attempts with `kind`.
    pub fn failing_reconnects(mut self, count: usize, kind: ErrorKind) -> Self {
        self.failing_reconnects = count;
        self.reconnect_error = kind;
        self
    }

    /// How long an idle read blocks before reporting a timeout.
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Block every read until `release` is triggered.
    ///
    /// Lets a test register its consumers before the first message is produced.
    pub fn held_until(mut self, release: StopSignal) -> Self {
        self.release = Some(release);
        self
    }

    /// Steps not yet replayed.
    pub fn remaining(&self) -> usize {
        self.script.len()
    }

    /// Call counters shared with this protocol.
    pub fn probe(&self) -> ScriptProbe {
        self.probe.clone()
    }
}

impl<M: Default + Clone + Send + Sync + 'static> ProtocolStrategy for ScriptedProtocol<M> {
    type Message = M;

    fn name(&self) -> &str {
        &self.name
    }

    fn read_message(&mut self) -> Result<M, CommunicationError> {
        self.probe.reads.fetch_add(1, Ordering::SeqCst);
        if let Some(release) = &self.release {
            while !release.is_triggered() {
                if self.wake.wait_timeout(Duration::from_millis(1)) {
                    return Err(CommunicationError::from_kind(
                        self.name.clone(),
                        ErrorKind::Interrupted,
                        "interrupted while held",
                    ));
                }
            }
        }
        if let Some(step) = self.script.pop_front() {
            return step;
        }

        let kind = if self.wake.wait_timeout(self.idle_timeout) {
            ErrorKind::Interrupted
        } else {
            ErrorKind::Timeout
        };
        Err(CommunicationError::from_kind(self.name.clone(), kind, "script exhausted"))
    }

    fn reconnect(&mut self) -> Result<(), CommunicationError> {
        self.probe.reconnects.fetch_add(1, Ordering::SeqCst);
        if self.failing_reconnects > 0 {
            self.failing_reconnects -= 1;
            return Err(CommunicationError::from_kind(
                self.name.clone(),
                self.reconnect_error,
                "scripted reconnect failure",
            ));
        }
        debug!(channel = %self.name, "Scripted reconnect succeeded");
        Ok(())
    }

    fn close(&mut self) {
        self.probe.closes.fetch_add(1, Ordering::SeqCst);
    }

    fn interrupter(&self) -> Option<Arc<dyn Interrupt>> {
        Some(Arc::new(self.wake.clone()))
    }
}

// =============================================================================
// SyntheticCanBus - Random CAN Traffic
// =============================================================================

/// Classic CAN frame as delivered by a bus driver.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CanFrame {
    /// Arbitration id (11 or 29 bit).
    pub id: u32,
    /// Data length code, 0..=8.
    pub len: u8,
    /// Payload; bytes past `len` are zero.
    pub data: [u8; 8],
    /// Receive time in microseconds since the bus was opened.
    pub timestamp_us: u64,
}

impl CanFrame {
    /// The valid part of the payload.
    pub fn payload(&self) -> &[u8] {
        &self.data[..usize::from(self.len.min(8))]
    }
}

/// Bus producing random frames at a fixed interval.
///
/// A fraction of reads (`error_rate`) fail with retryable link errors (CRC mismatch
/// or timeout), which exercises the advisory path of the read loop. The generator
/// is seeded, so a given seed always yields the same traffic.
pub struct SyntheticCanBus {
    name: String,
    ids: Vec<u32>,
    interval: Duration,
    error_rate: f64,
    rng: StdRng,
    opened: Instant,
    wake: StopSignal,
}

impl SyntheticCanBus {
    /// Bus `name` sending one frame per `interval` from a fixed id set.
    pub fn new(name: impl Into<String>, interval: Duration, seed: u64) -> Self {
        Self {
            name: name.into(),
            ids: vec![0x0A0, 0x1F4, 0x2C1, 0x3E8],
            interval,
            error_rate: 0.0,
            rng: StdRng::seed_from_u64(seed),
            opened: Instant::now(),
            wake: StopSignal::new(),
        }
    }

    /// Fraction of reads that fail, clamped to 0.0..=1.0.
    pub fn with_error_rate(mut self, rate: f64) -> Self {
        self.error_rate = rate.clamp(0.0, 1.0);
        self
    }

    /// Arbitration ids to draw frames from. An empty list keeps the defaults.
    pub fn with_ids(mut self, ids: Vec<u32>) -> Self {
        if !ids.is_empty() {
            self.ids = ids;
        }
        self
    }

    fn next_frame(&mut self) -> CanFrame {
        let id = self.ids[self.rng.gen_range(0..self.ids.len())];
        let len: u8 = self.rng.gen_range(0..=8);
        let mut data = [0u8; 8];
        self.rng.fill(&mut data[..usize::from(len)]);
        CanFrame {
            id,
            len,
            data,
            timestamp_us: u64::try_from(self.opened.elapsed().as_micros()).unwrap_or(u64::MAX),
        }
    }
}

impl ProtocolStrategy for SyntheticCanBus {
    type Message = CanFrame;

    fn name(&self) -> &str {
        &self.name
    }

    fn read_message(&mut self) -> Result<CanFrame, CommunicationError> {
        if !self.interval.is_zero() && self.wake.wait_timeout(self.interval) {
            return Err(CommunicationError::from_kind(
                self.name.clone(),
                ErrorKind::Interrupted,
                "bus closed",
            ));
        }

        if self.error_rate > 0.0 && self.rng.gen_bool(self.error_rate) {
            let kind = if self.rng.gen_bool(0.5) {
                ErrorKind::Crc
            } else {
                ErrorKind::Timeout
            };
            return Err(CommunicationError::from_kind(
                self.name.clone(),
                kind,
                "injected bus error",
            ));
        }

        Ok(self.next_frame())
    }

    fn reconnect(&mut self) -> Result<(), CommunicationError> {
        debug!(channel = %self.name, "Synthetic bus reopened");
        self.opened = Instant::now();
        Ok(())
    }

    fn interrupter(&self) -> Option<Arc<dyn Interrupt>> {
        Some(Arc::new(self.wake.clone()))
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
