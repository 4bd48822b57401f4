//! Typed event sink: a `tokio::sync::broadcast` fan-out of everything a caller (e.g. a PLC
//! runtime) subscribes to, instead of a callback registry.

use crate::mailbox::MailboxErrorEvent;
use crate::network::StateChangeEvent;

/// Diagnostic payload of one CoE emergency message, deduplicated per slave by
/// `(error_code, error_register)` against the last one emitted.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct EmergencyEvent {
    /// The slave this emergency was reported by.
    pub slave_index: usize,
    /// CoE emergency error code (ETG1000.6 5.6.1).
    pub error_code: u16,
    /// CoE emergency error register.
    pub error_register: u8,
}

/// Everything a [`crate::master::Master`] subscriber can receive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MasterEvent {
    /// A slave, or the bus as a whole, changed AL state.
    StateChange(StateChangeEvent),
    /// A CoE emergency message was observed and was not a duplicate of the last one.
    Emergency(EmergencyEvent),
    /// A mailbox soft failure (e.g. resilient read exhausted its retries).
    MailboxError(MailboxErrorEvent),
}

/// Default capacity of the broadcast channel backing [`crate::master::Master::subscribe`].
///
/// Sized generously above the slowest expected consumer's poll interval; a lagging subscriber
/// observes [`tokio::sync::broadcast::error::RecvError::Lagged`] rather than blocking the
/// publishing side.
pub const EVENT_CHANNEL_CAPACITY: usize = 64;
