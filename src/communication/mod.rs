//! Protocol-facing side of the gateway: error taxonomy and the sensor read loop.

pub mod communicator;
pub mod error;

pub use communicator::{
    CommunicatorEvent, CommunicatorSettings, CommunicatorStats, Interrupt, ProtocolStrategy,
    SensorCommunicator,
};
pub use error::{Category, CommunicationError, ErrorKind, RecoveryAction, Severity};
