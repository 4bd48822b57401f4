//! EtherCAT Application Layer (AL) state machine states.
//!
//! Read from and written to register `0x0130`/`0x0120`
//! ([`RegisterAddress::AlStatus`](crate::register::RegisterAddress::AlStatus) /
//! [`RegisterAddress::AlControl`](crate::register::RegisterAddress::AlControl)).
//!
//! Defined in ETG1000.6 6.4.1, Table 9.

/// The four EtherCAT device states this master drives slaves through.
///
/// `BOOT` is not modelled as its own variant: FoE is out of scope, nothing in the state
/// transition table routes through it, and a slave reporting it falls out as `Other(0x03)`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[repr(u8)]
pub enum AlState {
    /// No state recorded/read/known.
    #[default]
    None = 0x00,
    /// `INIT`.
    Init = 0x01,
    /// `PRE-OP`.
    PreOp = 0x02,
    /// `SAFE-OP`.
    SafeOp = 0x04,
    /// `OP`.
    Op = 0x08,
    /// A value not otherwise recognised (including `BOOT`, `0x03`), or a state combined with the
    /// AL error bit.
    Other(u8),
}

impl AlState {
    /// Mask applied to the raw AL status/control byte to strip the error bit (`0x10`).
    const STATE_MASK: u8 = 0x0f;

    /// Decode the low nibble of an AL status/control byte into a state.
    pub fn from_raw(value: u8) -> Self {
        match value & Self::STATE_MASK {
            0x00 => Self::None,
            0x01 => Self::Init,
            0x02 => Self::PreOp,
            0x04 => Self::SafeOp,
            0x08 => Self::Op,
            other => Self::Other(other),
        }
    }

    /// Encode back into the low nibble of an AL status/control byte.
    pub fn as_raw(self) -> u8 {
        match self {
            Self::None => 0x00,
            Self::Init => 0x01,
            Self::PreOp => 0x02,
            Self::SafeOp => 0x04,
            Self::Op => 0x08,
            Self::Other(v) => v & Self::STATE_MASK,
        }
    }

    /// Whether this state allows process data exchange ([`AlState::SafeOp`] or [`AlState::Op`]).
    pub fn exchanges_process_data(self) -> bool {
        matches!(self, Self::SafeOp | Self::Op)
    }
}

impl core::fmt::Display for AlState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Init => f.write_str("Init"),
            Self::PreOp => f.write_str("Pre-Operational"),
            Self::SafeOp => f.write_str("Safe-Operational"),
            Self::Op => f.write_str("Operational"),
            Self::Other(v) => write!(f, "Other({v:#03x})"),
        }
    }
}

/// A requested state transition, named after its source/destination pair.
///
/// Matches the `IP`/`PI`/`PS`/`SP`/`SO`/`OS`/`OI`/`SI`/`OP` transition codes used throughout
/// ETG1000.6 section 6.4.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Transition {
    /// `INIT` -> `PRE-OP`.
    IP,
    /// `PRE-OP` -> `INIT`.
    PI,
    /// `PRE-OP` -> `SAFE-OP`.
    PS,
    /// `SAFE-OP` -> `PRE-OP`.
    SP,
    /// `SAFE-OP` -> `OP`.
    SO,
    /// `OP` -> `SAFE-OP`.
    OS,
    /// `OP` -> `INIT`.
    OI,
    /// `SAFE-OP` -> `INIT`.
    SI,
    /// Shorthand alias for [`Transition::SO`], used when a whole boot sequence is requested.
    OP,
}

impl Transition {
    /// The state this transition ends in.
    pub fn target(self) -> AlState {
        match self {
            Self::IP | Self::SP => AlState::PreOp,
            Self::PI | Self::OI | Self::SI => AlState::Init,
            Self::PS | Self::OS => AlState::SafeOp,
            Self::SO | Self::OP => AlState::Op,
        }
    }

    /// Determine the transition implied by moving from `from` to `to`, if it is a single step
    /// recognised by the state machine.
    pub fn between(from: AlState, to: AlState) -> Option<Self> {
        use AlState::*;

        match (from, to) {
            (Init, PreOp) => Some(Self::IP),
            (PreOp, Init) => Some(Self::PI),
            (PreOp, SafeOp) => Some(Self::PS),
            (SafeOp, PreOp) => Some(Self::SP),
            (SafeOp, Op) => Some(Self::SO),
            (Op, SafeOp) => Some(Self::OS),
            (Op, Init) => Some(Self::OI),
            (SafeOp, Init) => Some(Self::SI),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_known_states() {
        for (raw, state) in [
            (0x00u8, AlState::None),
            (0x01, AlState::Init),
            (0x02, AlState::PreOp),
            (0x04, AlState::SafeOp),
            (0x08, AlState::Op),
        ] {
            assert_eq!(AlState::from_raw(raw), state);
            assert_eq!(state.as_raw(), raw);
        }
    }

    #[test]
    fn unrecognised_states_fall_out_as_other() {
        assert_eq!(AlState::from_raw(0x03), AlState::Other(0x03));
    }

    #[test]
    fn strips_error_bit() {
        assert_eq!(AlState::from_raw(0x04 | 0x10), AlState::SafeOp);
    }

    #[test]
    fn only_safeop_and_op_exchange_process_data() {
        assert!(!AlState::PreOp.exchanges_process_data());
        assert!(AlState::SafeOp.exchanges_process_data());
        assert!(AlState::Op.exchanges_process_data());
    }

    #[test]
    fn transition_lookup() {
        assert_eq!(
            Transition::between(AlState::PreOp, AlState::SafeOp),
            Some(Transition::PS)
        );
        assert_eq!(Transition::between(AlState::Init, AlState::Op), None);
    }
}
