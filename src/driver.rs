//! The wire driver boundary.
//!
//! Everything below this trait — frame construction, the raw socket, retransmission at the
//! datagram level — is an external collaborator (C1) and out of scope here. What the rest of the
//! crate needs from it is captured as [`WireDriver`].

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use crate::error::DriverFailure;

/// A boxed, `Send` future, used to make [`WireDriver`] object-safe without pulling in an
/// `async-trait`-style proc macro dependency.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// One EtherCAT service command, addressed either logically (broadcast/auto-increment) or to a
/// configured station address.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Command {
    /// Broadcast read. Every slave responds; WKC counts responders.
    Brd { register: u16 },
    /// Broadcast write.
    Bwr { register: u16 },
    /// Auto-increment (topological position) read. `address` is the signed position offset.
    Aprd { address: i16, register: u16 },
    /// Auto-increment write.
    Apwr { address: i16, register: u16 },
    /// Configured-address (fixed station) read.
    Fprd { address: u16, register: u16 },
    /// Configured-address write.
    Fpwr { address: u16, register: u16 },
    /// Logical read/write against the Process Data Image.
    Lrw { logical_address: u32 },
}

/// The outcome of handing one frame to the driver and waiting for its completion.
///
/// A structured stand-in for the historical wire convention of signalling PDU timeout, WKC
/// mismatch, and fatal driver conditions as distinguished sentinel values on a bare integer; this
/// enum carries each case as its own variant instead.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FrameOutcome {
    /// The datagram round-tripped and collected working counter `0`.
    Wkc(u16),
    /// No response arrived within the PDU timeout.
    PduTimeout,
    /// A response arrived but its working counter did not match what the caller expected.
    WkcMismatch { expected: u16, received: u16 },
    /// The driver reports a condition it cannot recover from on its own.
    Fatal(DriverFailure),
}

/// The 3-state value of a slave's mailbox toggle bit.
///
/// The historical wire convention folds "unknown" into the same sentinel space as `0`/`1` (as
/// the integer `2`). That sentinel is preserved here only at the [`WireDriver`] boundary (see
/// [`ToggleState::to_wire`]/[`ToggleState::from_wire`]); the rest of the crate uses this enum
/// instead of the raw integer.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum ToggleState {
    /// Toggle bit last observed clear.
    Zero,
    /// Toggle bit last observed set.
    One,
    /// No toggle observed yet for this slave.
    #[default]
    Unknown,
}

impl ToggleState {
    /// Encode as the historical `{0, 1, 2}` wire sentinel.
    pub fn to_wire(self) -> u8 {
        match self {
            Self::Zero => 0,
            Self::One => 1,
            Self::Unknown => 2,
        }
    }

    /// Decode from the historical `{0, 1, 2}` wire sentinel. Any other value is treated as
    /// `Unknown`.
    pub fn from_wire(value: u8) -> Self {
        match value {
            0 => Self::Zero,
            1 => Self::One,
            _ => Self::Unknown,
        }
    }

    /// The opposite single-bit value, used after observing the toggle flip.
    ///
    /// `Unknown` flips to `Zero`: spec §4.6's outcome table calls for "unknown -> 0" on the first
    /// new-mail observation for a slave, not "unknown -> 1".
    pub fn flipped(self) -> Self {
        match self {
            Self::Unknown => Self::Zero,
            Self::Zero => Self::One,
            Self::One => Self::Zero,
        }
    }
}

/// Outcome of one resilient mailbox check.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MailboxCheckOutcome {
    /// New mail is present; the toggle bit flipped.
    NewMail,
    /// Mailbox empty; toggle unchanged.
    Empty,
    /// The retry budget was exhausted without observing a flip.
    RetriesExhausted,
    /// Some other transient error, carried for diagnostics.
    Error(i32),
}

/// The single collaborator boundary between this crate and the physical bus.
///
/// A production implementation backs this with a raw L2 socket and the EtherCAT frame/datagram
/// format (out of scope here). Every method may suspend; callers are expected to
/// hold the single driver-owning lock ([`crate::master::Master`]) for the duration of the call.
pub trait WireDriver: Send {
    /// Send one datagram built from `command` carrying `data` and wait for its response,
    /// bounded by the configured PDU timeout.
    fn exchange<'a>(&'a mut self, command: Command, data: &'a mut [u8]) -> BoxFuture<'a, FrameOutcome>;

    /// Exchange the full Process Data Image in one logical read/write frame.
    fn exchange_pdi<'a>(&'a mut self, logical_address: u32, pdi: &'a mut [u8]) -> BoxFuture<'a, FrameOutcome>;

    /// Resilient mailbox poll: retries internally until the toggle bit flips from
    /// `last_toggle`, or a bounded retry budget is exhausted.
    fn check_mailbox(
        &mut self,
        slave_index: usize,
        status_register: u16,
        last_toggle: ToggleState,
    ) -> BoxFuture<'_, MailboxCheckOutcome>;

    /// Read the most recent CoE emergency reported anywhere on the bus, if any.
    fn last_emergency(&mut self) -> BoxFuture<'_, Option<(usize, u16, u8)>>;
}

impl fmt::Debug for dyn WireDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("dyn WireDriver")
    }
}

#[cfg(test)]
pub(crate) mod mock {
    //! A stub [`WireDriver`] used across the crate's unit tests. Not part of the public API.

    use super::*;
    use std::collections::VecDeque;

    /// A scriptable driver: each call to [`MockDriver::exchange`] pops the next queued outcome.
    #[derive(Default)]
    pub(crate) struct MockDriver {
        pub(crate) exchange_script: VecDeque<FrameOutcome>,
        pub(crate) mailbox_script: VecDeque<MailboxCheckOutcome>,
        pub(crate) emergency_script: VecDeque<Option<(usize, u16, u8)>>,
        /// Payloads to splice into `data` on successive reads, in order. Writes still record
        /// their outgoing bytes into `writes` regardless of whether a read payload is queued.
        pub(crate) read_payloads: VecDeque<Vec<u8>>,
        pub(crate) last_command: Option<Command>,
        pub(crate) writes: Vec<Vec<u8>>,
    }

    impl WireDriver for MockDriver {
        fn exchange<'a>(&'a mut self, command: Command, data: &'a mut [u8]) -> BoxFuture<'a, FrameOutcome> {
            self.last_command = Some(command);
            self.writes.push(data.to_vec());

            let is_read = matches!(command, Command::Brd { .. } | Command::Aprd { .. } | Command::Fprd { .. });
            if is_read {
                if let Some(payload) = self.read_payloads.pop_front() {
                    let len = payload.len().min(data.len());
                    data[..len].copy_from_slice(&payload[..len]);
                }
            }

            let outcome = self.exchange_script.pop_front().unwrap_or(FrameOutcome::Wkc(1));
            Box::pin(async move { outcome })
        }

        fn exchange_pdi<'a>(&'a mut self, _logical_address: u32, _pdi: &'a mut [u8]) -> BoxFuture<'a, FrameOutcome> {
            let outcome = self.exchange_script.pop_front().unwrap_or(FrameOutcome::Wkc(1));
            Box::pin(async move { outcome })
        }

        fn check_mailbox(
            &mut self,
            _slave_index: usize,
            _status_register: u16,
            _last_toggle: ToggleState,
        ) -> BoxFuture<'_, MailboxCheckOutcome> {
            let outcome = self.mailbox_script.pop_front().unwrap_or(MailboxCheckOutcome::Empty);
            Box::pin(async move { outcome })
        }

        fn last_emergency(&mut self) -> BoxFuture<'_, Option<(usize, u16, u8)>> {
            let outcome = self.emergency_script.pop_front().flatten();
            Box::pin(async move { outcome })
        }
    }
}
