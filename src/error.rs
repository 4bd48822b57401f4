//! Master error types.

use crate::al_status_code::AlStatusCode;
use crate::coe::CoeAbortCode;
use crate::state::AlState;

/// Top level error returned by every fallible [`Master`](crate::Master) operation.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum Error {
    /// A low level error occurred sending or receiving a PDU.
    Pdu(PduError),
    /// A working counter (WKC) was returned but did not match the expected value.
    WorkingCounter {
        /// The expected working counter value.
        expected: u16,
        /// The actual value received.
        received: u16,
    },
    /// A wire operation did not complete within its configured timeout.
    Timeout,
    /// An EEPROM (SII) error was encountered.
    Eeprom(EepromError),
    /// A mailbox error was encountered.
    Mailbox(MailboxError),
    /// An item in a list could not be found.
    NotFound {
        /// Item kind.
        item: Item,
        /// An index into a list of items, if relevant.
        index: Option<usize>,
    },
    /// There is a problem with the discovered/verified slave topology.
    ///
    /// Carries the index of the first slave whose identity did not match what was expected.
    Topology {
        /// Index of the first offending slave.
        slave_index: usize,
    },
    /// A slave failed to transition to a requested AL state.
    StateTransition {
        /// The state that was requested.
        expected: AlState,
        /// The state actually observed when the transition timed out.
        actual: AlState,
        /// AL status code read back from the slave, if any.
        al_status_code: Option<AlStatusCode>,
    },
    /// A slave reported an AL error outside of a state transition.
    SubDevice(AlStatusCode),
    /// An invalid slave index was used to address an operation.
    SlaveNotFound(usize),
    /// An unknown variable name was used in a mapping lookup.
    UnknownVariable,
    /// Five consecutive cyclic exchanges timed out (`-2` from the wire driver).
    CommsLost,
    /// Five consecutive cyclic exchanges returned a working counter mismatch (`-4`).
    PdoIntegrity,
    /// The wire driver reported a fatal, non-recoverable failure.
    Driver(DriverFailure),
    /// A slave's process-data block mixed explicit `pdoByteOffset` addressing with
    /// process-image `bitOffset` addressing for its entries. The two styles must never be mixed
    /// for one slave.
    MixedProcessDataAddressing {
        /// Index of the offending slave.
        slave_index: usize,
    },
    /// An init command's SDO download payload did not fit in the fixed 4-byte value field.
    InitCommandValueTooLong {
        /// Number of bytes the caller supplied.
        len: usize,
    },
    /// The master has been closed and can no longer perform wire operations.
    Closed,
}

impl std::error::Error for Error {}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Pdu(e) => write!(f, "pdu: {e}"),
            Self::WorkingCounter { expected, received } => {
                write!(f, "working counter expected {expected}, got {received}")
            }
            Self::Timeout => f.write_str("timeout"),
            Self::Eeprom(e) => write!(f, "eeprom: {e}"),
            Self::Mailbox(e) => write!(f, "mailbox: {e}"),
            Self::NotFound { item, index } => {
                write!(f, "{item:?} not found (index {index:?})")
            }
            Self::Topology { slave_index } => {
                write!(f, "topology mismatch at slave index {slave_index}")
            }
            Self::StateTransition {
                expected,
                actual,
                al_status_code,
            } => write!(
                f,
                "state transition to {expected} failed, actual state {actual} (AL status: {al_status_code:?})"
            ),
            Self::SubDevice(code) => write!(f, "slave reported AL error: {code}"),
            Self::SlaveNotFound(idx) => write!(f, "slave index {idx} out of range"),
            Self::UnknownVariable => f.write_str("unknown variable name"),
            Self::CommsLost => f.write_str("five consecutive PDU timeouts: communications lost"),
            Self::PdoIntegrity => {
                f.write_str("five consecutive working counter mismatches: PDO integrity lost")
            }
            Self::Driver(e) => write!(f, "wire driver: {e}"),
            Self::MixedProcessDataAddressing { slave_index } => write!(
                f,
                "slave {slave_index} mixes legacy PdoOffset and process-image bitOffset addressing"
            ),
            Self::InitCommandValueTooLong { len } => write!(
                f,
                "init command value of {len} bytes does not fit the 32-bit value field"
            ),
            Self::Closed => f.write_str("master is closed"),
        }
    }
}

/// The kind of item being looked for when a [`Error::NotFound`] is raised.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum Item {
    /// A slave.
    Slave,
    /// A process data entry.
    PdoEntry,
    /// An EEPROM category.
    Category,
    /// A sync manager.
    SyncManager,
}

/// Low level PDU (process data unit) error.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum PduError {
    /// Failed to decode raw PDU data into the requested type.
    Decode,
    /// PDU data is too long to fit in the addressed PDI half.
    TooLong,
    /// The addressed slave was unreachable (no response at all).
    Unreachable,
}

impl core::fmt::Display for PduError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Decode => f.write_str("failed to decode PDU data into requested type"),
            Self::TooLong => f.write_str("data too long for target PDI half"),
            Self::Unreachable => f.write_str("slave unreachable"),
        }
    }
}

/// EEPROM (SII) error.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum EepromError {
    /// The SII category does not exist in this slave's EEPROM.
    NoCategory,
    /// EEPROM data failed to decode into the expected shape.
    Decode,
    /// The slave reported a checksum, device-info, command, or write error on its SII control
    /// register.
    DeviceError,
}

impl core::fmt::Display for EepromError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NoCategory => f.write_str("category not present"),
            Self::Decode => f.write_str("failed to decode EEPROM data"),
            Self::DeviceError => f.write_str("slave reported an SII control error"),
        }
    }
}

/// CoE mailbox error.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum MailboxError {
    /// An SDO request was aborted by the slave.
    Aborted {
        /// Abort code reported by the slave.
        code: CoeAbortCode,
        /// Object index.
        index: u16,
        /// Object sub-index.
        sub_index: u8,
    },
    /// The slave has no mailbox but an operation required one.
    NoMailbox,
    /// The mailbox response did not match the expected SDO/service shape.
    InvalidResponse,
    /// Resilient mailbox polling exhausted its retry budget without the toggle bit flipping.
    ResilientReadFailed,
}

impl core::fmt::Display for MailboxError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Aborted {
                code,
                index,
                sub_index,
            } => write!(f, "{index:#06x}:{sub_index} aborted: {code}"),
            Self::NoMailbox => f.write_str("slave has no mailbox"),
            Self::InvalidResponse => f.write_str("invalid mailbox response"),
            Self::ResilientReadFailed => f.write_str("resilient mailbox read failed"),
        }
    }
}

/// A fatal failure reported by the [`WireDriver`](crate::driver::WireDriver).
///
/// Anything other than a PDU timeout or working counter mismatch is considered unrecoverable;
/// the caller is expected to `close` the master and recreate it.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum DriverFailure {
    /// The underlying socket or link is down.
    LinkDown,
    /// The driver failed to initialize.
    InitFailed,
    /// Some other driver-specific failure.
    Other,
}

impl core::fmt::Display for DriverFailure {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::LinkDown => f.write_str("link down"),
            Self::InitFailed => f.write_str("driver failed to initialize"),
            Self::Other => f.write_str("other driver failure"),
        }
    }
}

impl From<PduError> for Error {
    fn from(e: PduError) -> Self {
        Self::Pdu(e)
    }
}

impl From<EepromError> for Error {
    fn from(e: EepromError) -> Self {
        Self::Eeprom(e)
    }
}

impl From<MailboxError> for Error {
    fn from(e: MailboxError) -> Self {
        Self::Mailbox(e)
    }
}

impl From<DriverFailure> for Error {
    fn from(e: DriverFailure) -> Self {
        Self::Driver(e)
    }
}
