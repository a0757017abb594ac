//! Transport error taxonomy.
//!
//! Every failure reported by a protocol strategy is classified exactly once, at the
//! boundary where the vendor error code is observed, into a [`CommunicationError`].
//! The read loop never looks at the code again: it only asks the two derived
//! predicates, [`CommunicationError::is_fatal`] and
//! [`CommunicationError::is_close_connection_required`], and maps them onto a
//! [`RecoveryAction`].
//!
//! | fatal | close required | action      |
//! |-------|----------------|-------------|
//! | no    | no             | `Retry`     |
//! | no    | yes            | `Reconnect` |
//! | yes   | any            | `Abort`     |
//!
//! The numeric codes follow the CAN driver error space (negative integers, `0` is
//! success). Codes the table does not know about are kept as
//! [`ErrorKind::Reserved`] so the original value is never lost.

use std::fmt;
use thiserror::Error;

// =============================================================================
// Category / Severity
// =============================================================================

/// Domain a transport failure belongs to.
///
/// Only [`Category::Communication`] errors can be handled without tearing down the
/// connection; every other domain forces a reconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    /// Transient link-level problems (timeouts, CRC errors, overflows).
    Communication,
    /// Device or driver is in a bad state.
    Hardware,
    /// Device/driver setup does not match what the gateway asked for.
    Configuration,
    /// Host-side resources (memory, files, licensing).
    System,
}

impl Category {
    /// Every category, in declaration order.
    pub const ALL: [Category; 4] = [
        Category::Communication,
        Category::Hardware,
        Category::Configuration,
        Category::System,
    ];
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Category::Communication => "COMMUNICATION_ERROR",
            Category::Hardware => "HARDWARE_ERROR",
            Category::Configuration => "CONFIGURATION_ERROR",
            Category::System => "SYSTEM_ERROR",
        };
        write!(f, "{}", label)
    }
}

/// Totally ordered severity scale. [`Severity::Emergency`] is the maximum and the
/// only fatal level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    /// Diagnostic noise.
    Debug,
    /// Informational.
    Info,
    /// Normal but significant.
    Notice,
    /// Degraded, recoverable in place.
    Warning,
    /// Operation failed.
    Error,
    /// Component unusable until recovered.
    Critical,
    /// Operator action needed soon.
    Alert,
    /// Producer must stop.
    Emergency,
}

impl Severity {
    /// Every severity, lowest first.
    pub const ALL: [Severity; 8] = [
        Severity::Debug,
        Severity::Info,
        Severity::Notice,
        Severity::Warning,
        Severity::Error,
        Severity::Critical,
        Severity::Alert,
        Severity::Emergency,
    ];
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Severity::Debug => "debug",
            Severity::Info => "info",
            Severity::Notice => "notice",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Critical => "critical",
            Severity::Alert => "alert",
            Severity::Emergency => "emergency",
        };
        write!(f, "{}", label)
    }
}

// =============================================================================
// ErrorKind
// =============================================================================

/// Named transport failure, mirroring the CAN driver status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Invalid argument passed to the driver.
    Parameter,
    /// Device or channel not found.
    NotFound,
    /// Driver ran out of memory.
    OutOfMemory,
    /// No channels available on the interface.
    NoChannels,
    /// Blocking call was interrupted.
    Interrupted,
    /// Blocking call timed out.
    Timeout,
    /// Library used before initialization.
    NotInitialized,
    /// No free handles.
    NoHandles,
    /// Handle is not valid (channel closed underneath us).
    InvalidHandle,
    /// Generic driver failure.
    Driver,
    /// Transmit buffer overflow.
    TransmitOverflow,
    /// Hardware reported a fault.
    Hardware,
    /// Dynamic library could not be loaded.
    DynamicLoad,
    /// Operation not supported by this device.
    NotSupported,
    /// Registry/system database error.
    Registry,
    /// Missing or invalid license.
    License,
    /// Internal driver error.
    Internal,
    /// Access denied.
    NoAccess,
    /// Driver does not implement the call.
    NotImplemented,
    /// Device or host file error.
    File,
    /// Disk error.
    Disk,
    /// CRC mismatch on received data.
    Crc,
    /// Device configuration error.
    Config,
    /// On-device script failure.
    Script,
    /// Caller supplied buffer too small.
    BufferTooSmall,
    /// Code outside the known table; the raw value is kept.
    Reserved(i32),
}

impl ErrorKind {
    /// Every named kind (without [`ErrorKind::Reserved`]).
    pub const NAMED: [ErrorKind; 25] = [
        ErrorKind::Parameter,
        ErrorKind::NotFound,
        ErrorKind::OutOfMemory,
        ErrorKind::NoChannels,
        ErrorKind::Interrupted,
        ErrorKind::Timeout,
        ErrorKind::NotInitialized,
        ErrorKind::NoHandles,
        ErrorKind::InvalidHandle,
        ErrorKind::Driver,
        ErrorKind::TransmitOverflow,
        ErrorKind::Hardware,
        ErrorKind::DynamicLoad,
        ErrorKind::NotSupported,
        ErrorKind::Registry,
        ErrorKind::License,
        ErrorKind::Internal,
        ErrorKind::NoAccess,
        ErrorKind::NotImplemented,
        ErrorKind::File,
        ErrorKind::Disk,
        ErrorKind::Crc,
        ErrorKind::Config,
        ErrorKind::Script,
        ErrorKind::BufferTooSmall,
    ];

    /// Map a raw driver status code onto a kind.
    pub fn from_code(code: i32) -> Self {
        match code {
            -1 => ErrorKind::Parameter,
            -3 => ErrorKind::NotFound,
            -4 => ErrorKind::OutOfMemory,
            -5 => ErrorKind::NoChannels,
            -6 => ErrorKind::Interrupted,
            -7 => ErrorKind::Timeout,
            -8 => ErrorKind::NotInitialized,
            -9 => ErrorKind::NoHandles,
            -10 => ErrorKind::InvalidHandle,
            -12 => ErrorKind::Driver,
            -13 => ErrorKind::TransmitOverflow,
            -15 => ErrorKind::Hardware,
            -16 => ErrorKind::DynamicLoad,
            -19 => ErrorKind::NotSupported,
            -28 => ErrorKind::Registry,
            -29 => ErrorKind::License,
            -30 => ErrorKind::Internal,
            -31 => ErrorKind::NoAccess,
            -32 => ErrorKind::NotImplemented,
            -33 => ErrorKind::File,
            -35 => ErrorKind::Disk,
            -36 => ErrorKind::Crc,
            -37 => ErrorKind::Config,
            -39 => ErrorKind::Script,
            -43 => ErrorKind::BufferTooSmall,
            other => ErrorKind::Reserved(other),
        }
    }

    /// Raw driver status code of this kind.
    pub fn code(self) -> i32 {
        match self {
            ErrorKind::Parameter => -1,
            ErrorKind::NotFound => -3,
            ErrorKind::OutOfMemory => -4,
            ErrorKind::NoChannels => -5,
            ErrorKind::Interrupted => -6,
            ErrorKind::Timeout => -7,
            ErrorKind::NotInitialized => -8,
            ErrorKind::NoHandles => -9,
            ErrorKind::InvalidHandle => -10,
            ErrorKind::Driver => -12,
            ErrorKind::TransmitOverflow => -13,
            ErrorKind::Hardware => -15,
            ErrorKind::DynamicLoad => -16,
            ErrorKind::NotSupported => -19,
            ErrorKind::Registry => -28,
            ErrorKind::License => -29,
            ErrorKind::Internal => -30,
            ErrorKind::NoAccess => -31,
            ErrorKind::NotImplemented => -32,
            ErrorKind::File => -33,
            ErrorKind::Disk => -35,
            ErrorKind::Crc => -36,
            ErrorKind::Config => -37,
            ErrorKind::Script => -39,
            ErrorKind::BufferTooSmall => -43,
            ErrorKind::Reserved(code) => code,
        }
    }

    /// Default (category, severity) for this kind.
    ///
    /// Link glitches retry in place, device/driver state problems reconnect, and
    /// anything a reconnect cannot fix (memory, licensing, unsupported calls) is fatal.
    pub fn classification(self) -> (Category, Severity) {
        match self {
            ErrorKind::Interrupted
            | ErrorKind::Timeout
            | ErrorKind::TransmitOverflow
            | ErrorKind::Crc
            | ErrorKind::BufferTooSmall => (Category::Communication, Severity::Warning),
            ErrorKind::Parameter => (Category::Communication, Severity::Error),

            ErrorKind::NotFound
            | ErrorKind::NoChannels
            | ErrorKind::NotInitialized
            | ErrorKind::NoHandles
            | ErrorKind::InvalidHandle
            | ErrorKind::Driver
            | ErrorKind::Hardware
            | ErrorKind::Reserved(_) => (Category::Hardware, Severity::Error),

            ErrorKind::Config | ErrorKind::Script => (Category::Configuration, Severity::Critical),
            ErrorKind::File | ErrorKind::Disk | ErrorKind::Registry => {
                (Category::System, Severity::Error)
            }

            ErrorKind::NotSupported | ErrorKind::NotImplemented => {
                (Category::Configuration, Severity::Emergency)
            }
            ErrorKind::OutOfMemory
            | ErrorKind::DynamicLoad
            | ErrorKind::License
            | ErrorKind::Internal
            | ErrorKind::NoAccess => (Category::System, Severity::Emergency),
        }
    }

    fn label(self) -> &'static str {
        match self {
            ErrorKind::Parameter => "parameter",
            ErrorKind::NotFound => "not found",
            ErrorKind::OutOfMemory => "out of memory",
            ErrorKind::NoChannels => "no channels",
            ErrorKind::Interrupted => "interrupted",
            ErrorKind::Timeout => "timeout",
            ErrorKind::NotInitialized => "not initialized",
            ErrorKind::NoHandles => "no handles",
            ErrorKind::InvalidHandle => "invalid handle",
            ErrorKind::Driver => "driver",
            ErrorKind::TransmitOverflow => "transmit overflow",
            ErrorKind::Hardware => "hardware",
            ErrorKind::DynamicLoad => "dynamic load",
            ErrorKind::NotSupported => "not supported",
            ErrorKind::Registry => "registry",
            ErrorKind::License => "license",
            ErrorKind::Internal => "internal",
            ErrorKind::NoAccess => "no access",
            ErrorKind::NotImplemented => "not implemented",
            ErrorKind::File => "file",
            ErrorKind::Disk => "disk",
            ErrorKind::Crc => "crc",
            ErrorKind::Config => "config",
            ErrorKind::Script => "script",
            ErrorKind::BufferTooSmall => "buffer too small",
            ErrorKind::Reserved(_) => "reserved",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code {})", self.label(), self.code())
    }
}

// =============================================================================
// CommunicationError
// =============================================================================

/// What the read loop does with a classified error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    /// Log and read again.
    Retry,
    /// Close the connection, reestablish it, then read again.
    Reconnect,
    /// Stop the producer and surface the error to its owner.
    Abort,
}

/// Immutable, classified transport failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{origin}: {kind} [{category}/{severity}]: {message}")]
pub struct CommunicationError {
    origin: String,
    category: Category,
    severity: Severity,
    kind: ErrorKind,
    message: String,
}

impl CommunicationError {
    /// Build an error with an explicit classification.
    pub fn new(
        origin: impl Into<String>,
        category: Category,
        severity: Severity,
        kind: ErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            origin: origin.into(),
            category,
            severity,
            kind,
            message: message.into(),
        }
    }

    /// Build an error classified by [`ErrorKind::classification`].
    pub fn from_kind(origin: impl Into<String>, kind: ErrorKind, message: impl Into<String>) -> Self {
        let (category, severity) = kind.classification();
        Self::new(origin, category, severity, kind, message)
    }

    /// Build an error from a raw driver status code.
    pub fn from_code(origin: impl Into<String>, code: i32, message: impl Into<String>) -> Self {
        Self::from_kind(origin, ErrorKind::from_code(code), message)
    }

    /// Source identifier (channel, device or strategy name).
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Error domain.
    pub fn category(&self) -> Category {
        self.category
    }

    /// Error severity.
    pub fn severity(&self) -> Severity {
        self.severity
    }

    /// Named kind.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Raw driver status code.
    pub fn code(&self) -> i32 {
        self.kind.code()
    }

    /// Human-readable diagnostic.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// True iff the severity is [`Severity::Emergency`].
    pub fn is_fatal(&self) -> bool {
        self.severity == Severity::Emergency
    }

    /// True unless the category is [`Category::Communication`].
    pub fn is_close_connection_required(&self) -> bool {
        self.category != Category::Communication
    }

    /// Loop-level action for this error.
    pub fn recovery_action(&self) -> RecoveryAction {
        if self.is_fatal() {
            RecoveryAction::Abort
        } else if self.is_close_connection_required() {
            RecoveryAction::Reconnect
        } else {
            RecoveryAction::Retry
        }
    }

    /// Same error raised to [`Severity::Emergency`].
    ///
    /// Used when recovery from a non-fatal error has been exhausted.
    pub fn escalated(self) -> Self {
        Self {
            severity: Severity::Emergency,
            ..self
        }
    }
}
