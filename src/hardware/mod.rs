//! Hardware-facing protocol implementations.
//!
//! Real transports live outside this crate and plug in through
//! [`crate::communication::ProtocolStrategy`]; the simulated ones here drive tests
//! and the demo binary.

pub mod mock;

pub use mock::{CanFrame, ScriptProbe, ScriptedProtocol, SyntheticCanBus};
