//! # Sensor Gateway Core Library
//!
//! Concurrent transport substrate for sensor data: a hardware read loop runs on an
//! owned worker thread and publishes every message into a fixed-capacity broadcast
//! ring, from which any number of consumers read at their own pace. Translation
//! stages consume one stream and publish another, so pipelines are built by
//! chaining data sources.
//!
//! ## Crate Structure
//!
//! - **`data`**: The pad-linked [`RingBuffer`](data::ring_buffer::RingBuffer), the
//!   per-consumer [`Subscription`](data::subscription::Subscription) counters, and the
//!   [`DataSource`](data::source::DataSource) capability with its publisher and
//!   subscriber ends.
//! - **`thread`**: [`HighIntegrityThread`](thread::HighIntegrityThread), an owned
//!   worker thread that is joined or detached exactly once, plus the
//!   [`StopSignal`](thread::StopSignal) used for cooperative shutdown.
//! - **`communication`**: The transport error taxonomy and the
//!   [`SensorCommunicator`](communication::SensorCommunicator) read loop with its
//!   retry/reconnect/abort escalation.
//! - **`translation`**: One-in/one-out message translation stages.
//! - **`hardware`**: Simulated protocols for tests and the demo binary.
//! - **`config`**: Figment-based configuration (TOML file + environment).
//! - **`error`**: The crate-level [`GatewayError`].
//! - **`error_recovery`**: Retry policies used when reconnecting.
//! - **`logging`**: `tracing-subscriber` initialization.

pub mod communication;
pub mod config;
pub mod data;
pub mod error;
pub mod error_recovery;
pub mod hardware;
pub mod logging;
pub mod thread;
pub mod translation;

pub use communication::{CommunicationError, CommunicatorEvent, SensorCommunicator};
pub use data::source::{channel, DataSource, Feed, News, Publisher, Subscriber};
pub use error::{GatewayError, GatewayResult};
pub use thread::{Detach, HighIntegrityThread, Join, StopSignal};
pub use translation::{MessageTranslationStrategy, TranslationStage};
