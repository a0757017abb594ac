//! Producer orchestration: a protocol read loop on an owned worker thread.
//!
//! A [`SensorCommunicator`] takes ownership of a [`ProtocolStrategy`], builds the ring
//! and subscription its messages are published to, and starts the read loop on a
//! [`HighIntegrityThread<Join>`]. The thread is spawned last, once every piece the
//! loop uses exists.
//!
//! Each iteration of the loop:
//! 1. blocks in [`ProtocolStrategy::read_message`],
//! 2. publishes the message on success,
//! 3. on failure applies the escalation policy of [`RecoveryAction`]:
//!    - `Retry`: log, emit [`CommunicatorEvent::Advisory`], read again,
//!    - `Reconnect`: close and reestablish the connection under the configured
//!      [`RetryPolicy`]; running out of attempts escalates the error to fatal,
//!    - `Abort`: record the error, emit [`CommunicatorEvent::Fatal`], stop.
//!
//! Shutdown triggers the [`StopSignal`], interrupts the strategy's blocking read
//! (when the strategy provides an [`Interrupt`] handle) and joins the worker.

use parking_lot::Mutex;
use std::fmt;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::communication::error::{CommunicationError, RecoveryAction};
use crate::config::GatewayConfig;
use crate::data::source::{channel, DataSource, Feed, Publisher};
use crate::error::GatewayResult;
use crate::error_recovery::{retry_with_policy, RetryError, RetryPolicy};
use crate::thread::{HighIntegrityThread, Join, StopSignal};

/// Wakes a strategy that is blocked in `read_message`.
pub trait Interrupt: Send + Sync {
    /// Make the current (or next) blocking read return promptly.
    fn interrupt(&self);
}

impl Interrupt for StopSignal {
    fn interrupt(&self) {
        self.trigger();
    }
}

/// Transport-specific message source driven by a [`SensorCommunicator`].
///
/// Implementations translate their raw driver status codes into a
/// [`CommunicationError`] before returning them.
pub trait ProtocolStrategy: Send + 'static {
    /// Message produced per successful read.
    type Message: Default + Clone + Send + Sync + 'static;

    /// Identifier used as error origin and in logs (channel or device name).
    fn name(&self) -> &str;

    /// Block until one message is available.
    fn read_message(&mut self) -> Result<Self::Message, CommunicationError>;

    /// Reestablish the connection after a close-required error.
    fn reconnect(&mut self) -> Result<(), CommunicationError>;

    /// Release the connection. Called before reconnecting and when the loop exits.
    fn close(&mut self) {}

    /// Handle that interrupts a blocking [`read_message`](Self::read_message).
    ///
    /// Strategies without one must return from `read_message` within a bounded time
    /// on their own, otherwise shutdown blocks on join.
    fn interrupter(&self) -> Option<Arc<dyn Interrupt>> {
        None
    }
}

/// Lifecycle notifications sent to the owner of a communicator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommunicatorEvent {
    /// The read loop is running.
    Started,
    /// A retryable error was absorbed.
    Advisory(CommunicationError),
    /// A close-required error triggered a reconnect.
    Reconnecting(CommunicationError),
    /// The connection was reestablished.
    Reconnected {
        /// Attempts the reconnect took.
        attempts: u32,
    },
    /// A fatal error stopped the read loop.
    Fatal(CommunicationError),
    /// The read loop exited.
    Stopped,
}

/// Counters maintained by the read loop.
#[derive(Debug, Default)]
pub struct CommunicatorStats {
    published: AtomicU64,
    advisories: AtomicU64,
    reconnects: AtomicU64,
}

impl CommunicatorStats {
    /// Messages published.
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// Retryable errors absorbed.
    pub fn advisories(&self) -> u64 {
        self.advisories.load(Ordering::Relaxed)
    }

    /// Successful reconnects.
    pub fn reconnects(&self) -> u64 {
        self.reconnects.load(Ordering::Relaxed)
    }
}

/// Settings of one communicator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommunicatorSettings {
    /// Pads in the output ring.
    pub ring_capacity: usize,
    /// Reconnect policy for close-required errors.
    pub retry_policy: RetryPolicy,
    /// Pause after a retryable error.
    pub retry_delay: Duration,
    /// Capacity of the event channel.
    pub event_capacity: usize,
}

impl Default for CommunicatorSettings {
    fn default() -> Self {
        Self::from_config(&GatewayConfig::default())
    }
}

impl CommunicatorSettings {
    /// Settings taken from the `ring` and `communicator` sections.
    pub fn from_config(config: &GatewayConfig) -> Self {
        Self {
            ring_capacity: config.ring.capacity,
            retry_policy: RetryPolicy::from(&config.communicator),
            retry_delay: config.communicator.retry_delay,
            event_capacity: config.communicator.event_capacity,
        }
    }

    /// Set the ring capacity
    pub fn with_ring_capacity(mut self, capacity: usize) -> Self {
        self.ring_capacity = capacity;
        self
    }

    /// Set the reconnect policy
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Set the pause after retryable errors
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }
}

/// Owns a protocol read loop and the data source it publishes into.
pub struct SensorCommunicator<M> {
    origin: String,
    feed: Feed<M>,
    stop: StopSignal,
    interrupter: Option<Arc<dyn Interrupt>>,
    events: broadcast::Sender<CommunicatorEvent>,
    stats: Arc<CommunicatorStats>,
    fatal: Arc<Mutex<Option<CommunicationError>>>,
    worker: HighIntegrityThread<Join>,
}

impl<M: Default + Clone + Send + Sync + 'static> SensorCommunicator<M> {
    /// Take ownership of `strategy` and start reading from it.
    ///
    /// # Errors
    /// - [`crate::GatewayError::InvalidCapacity`] for a zero ring capacity.
    /// - [`crate::GatewayError::ThreadSpawn`] if the worker cannot be started.
    pub fn start<S>(strategy: S, settings: CommunicatorSettings) -> GatewayResult<Self>
    where
        S: ProtocolStrategy<Message = M>,
    {
        let origin = strategy.name().to_string();
        let (publisher, feed) = channel(settings.ring_capacity)?;
        let stop = StopSignal::new();
        let interrupter = strategy.interrupter();
        let (events, _) = broadcast::channel(settings.event_capacity.max(1));
        let stats = Arc::new(CommunicatorStats::default());
        let fatal = Arc::new(Mutex::new(None));

        let read_loop = ReadLoop {
            origin: origin.clone(),
            strategy,
            publisher,
            stop: stop.clone(),
            events: events.clone(),
            stats: Arc::clone(&stats),
            fatal: Arc::clone(&fatal),
            retry_policy: settings.retry_policy,
            retry_delay: settings.retry_delay,
        };
        let worker = HighIntegrityThread::spawn(format!("{origin}-reader"), move || read_loop.run())?;

        Ok(Self {
            origin,
            feed,
            stop,
            interrupter,
            events,
            stats,
            fatal,
            worker,
        })
    }

    /// Start with settings taken from a gateway configuration.
    pub fn from_config<S>(strategy: S, config: &GatewayConfig) -> GatewayResult<Self>
    where
        S: ProtocolStrategy<Message = M>,
    {
        Self::start(strategy, CommunicatorSettings::from_config(config))
    }
}

impl<M> SensorCommunicator<M> {
    /// Name of the strategy this communicator reads from.
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Receive lifecycle events from now on.
    pub fn events(&self) -> broadcast::Receiver<CommunicatorEvent> {
        self.events.subscribe()
    }

    /// Read loop counters.
    pub fn stats(&self) -> &CommunicatorStats {
        &self.stats
    }

    /// The error that stopped the read loop, if any.
    pub fn fatal_error(&self) -> Option<CommunicationError> {
        self.fatal.lock().clone()
    }

    /// True while the read loop is executing.
    pub fn is_running(&self) -> bool {
        self.worker.is_running()
    }

    /// Stop the read loop and wait for the worker to exit.
    ///
    /// Idempotent. Returns the fatal error that ended the loop, if there was one.
    pub fn stop(&mut self) -> Option<CommunicationError> {
        if !self.stop.is_triggered() {
            info!(origin = %self.origin, "Stopping sensor communicator");
            self.stop.trigger();
            if let Some(interrupter) = &self.interrupter {
                interrupter.interrupt();
            }
        }
        self.worker.finish();
        self.fatal_error()
    }
}

impl<M> DataSource<M> for SensorCommunicator<M> {
    fn feed(&self) -> &Feed<M> {
        &self.feed
    }
}

impl<M> Drop for SensorCommunicator<M> {
    fn drop(&mut self) {
        self.stop();
    }
}

impl<M> fmt::Debug for SensorCommunicator<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SensorCommunicator")
            .field("origin", &self.origin)
            .field("worker", &self.worker)
            .field("published", &self.stats.published())
            .finish_non_exhaustive()
    }
}

/// State moved onto the worker thread.
struct ReadLoop<S: ProtocolStrategy> {
    origin: String,
    strategy: S,
    publisher: Publisher<S::Message>,
    stop: StopSignal,
    events: broadcast::Sender<CommunicatorEvent>,
    stats: Arc<CommunicatorStats>,
    fatal: Arc<Mutex<Option<CommunicationError>>>,
    retry_policy: RetryPolicy,
    retry_delay: Duration,
}

impl<S: ProtocolStrategy> ReadLoop<S> {
    fn run(mut self) {
        info!(origin = %self.origin, "Sensor read loop started");
        self.emit(CommunicatorEvent::Started);

        while !self.stop.is_triggered() {
            match self.strategy.read_message() {
                Ok(message) => {
                    self.publisher.publish(message);
                    self.stats.published.fetch_add(1, Ordering::Relaxed);
                }
                Err(err) => {
                    if self.handle_error(err).is_break() {
                        break;
                    }
                }
            }
        }

        self.strategy.close();
        info!(
            origin = %self.origin,
            published = self.stats.published(),
            "Sensor read loop stopped"
        );
        self.emit(CommunicatorEvent::Stopped);
    }

    fn handle_error(&mut self, err: CommunicationError) -> ControlFlow<()> {
        match err.recovery_action() {
            RecoveryAction::Retry => {
                if self.stop.is_triggered() {
                    return ControlFlow::Break(());
                }
                warn!(origin = %self.origin, error = %err, "Transient read error, retrying");
                self.stats.advisories.fetch_add(1, Ordering::Relaxed);
                self.emit(CommunicatorEvent::Advisory(err));
                if !self.retry_delay.is_zero() && self.stop.wait_timeout(self.retry_delay) {
                    return ControlFlow::Break(());
                }
                ControlFlow::Continue(())
            }
            RecoveryAction::Reconnect => self.reconnect(err),
            RecoveryAction::Abort => self.abort(err),
        }
    }

    fn reconnect(&mut self, cause: CommunicationError) -> ControlFlow<()> {
        warn!(origin = %self.origin, error = %cause, "Connection must be reestablished");
        self.emit(CommunicatorEvent::Reconnecting(cause.clone()));
        self.strategy.close();

        let strategy = &mut self.strategy;
        let result = retry_with_policy(
            &self.retry_policy,
            &self.stop,
            |err: &CommunicationError| !err.is_fatal(),
            |_| strategy.reconnect(),
        );

        match result {
            Ok(((), attempts)) => {
                self.stats.reconnects.fetch_add(1, Ordering::Relaxed);
                info!(origin = %self.origin, attempts, "Connection reestablished");
                self.emit(CommunicatorEvent::Reconnected { attempts });
                ControlFlow::Continue(())
            }
            Err(RetryError::Stopped) => ControlFlow::Break(()),
            Err(RetryError::Aborted(err)) => self.abort(err),
            Err(RetryError::Exhausted { attempts, last }) => {
                warn!(origin = %self.origin, attempts, "Reconnect attempts exhausted");
                self.abort(last.unwrap_or(cause).escalated())
            }
        }
    }

    fn abort(&mut self, err: CommunicationError) -> ControlFlow<()> {
        error!(origin = %self.origin, error = %err, "Fatal communication error, stopping read loop");
        *self.fatal.lock() = Some(err.clone());
        self.emit(CommunicatorEvent::Fatal(err));
        ControlFlow::Break(())
    }

    fn emit(&self, event: CommunicatorEvent) {
        // No receivers is fine; events are advisory.
        let _ = self.events.send(event);
    }
}
