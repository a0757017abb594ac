//! Broadcast data plane: ring storage, unread counters and the stage capability.
pub mod ring_buffer;
pub mod source;
pub mod subscription;
