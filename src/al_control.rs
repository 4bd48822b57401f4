//! AL control/status word shared by register `0x0120` (control) and `0x0130` (status).
//!
//! Defined in ETG1000.6 Table 9.

use crate::state::AlState;
use crate::wire::PduRead;

/// AL control/status word for an individual slave device.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct AlControl {
    /// Requested or reported state.
    pub state: AlState,
    /// Error acknowledge (control) / error indicator (status) flag, bit 4.
    pub error: bool,
}

impl AlControl {
    /// Build a control word requesting `state` with no error flag set.
    pub fn new(state: AlState) -> Self {
        Self {
            state,
            error: false,
        }
    }

    /// The control word sent to reset a slave from an error state back to `INIT`, acknowledging
    /// the AL error bit along the way.
    pub fn reset() -> Self {
        Self {
            state: AlState::Init,
            error: true,
        }
    }

    fn to_bits(self) -> u16 {
        let mut bits = u16::from(self.state.as_raw());

        if self.error {
            bits |= 0x10;
        }

        bits
    }

    fn from_bits(bits: u16) -> Self {
        Self {
            state: AlState::from_raw(bits as u8),
            error: bits & 0x10 != 0,
        }
    }
}

impl PduRead for AlControl {
    const LEN: u16 = 2;

    type Error = core::array::TryFromSliceError;

    fn try_from_slice(slice: &[u8]) -> Result<Self, Self::Error> {
        let raw = u16::from_le_bytes(slice.try_into()?);

        Ok(Self::from_bits(raw))
    }
}

impl AlControl {
    /// Encode this control word into its two little-endian wire bytes.
    ///
    /// `AlControl` is encoded into an owned two-byte array on demand rather than implementing
    /// [`PduData`](crate::wire::PduData), since there is no `[u8]` to borrow a packed bitfield
    /// from.
    pub fn encode(self) -> [u8; 2] {
        self.to_bits().to_le_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_state_and_error_bit() {
        let value = AlControl {
            state: AlState::SafeOp,
            error: true,
        };

        assert_eq!(value.encode(), [0x04 | 0x10, 0x00]);
    }

    #[test]
    fn round_trips() {
        let value = AlControl {
            state: AlState::SafeOp,
            error: true,
        };

        let parsed = AlControl::try_from_slice(&value.encode()).unwrap();

        assert_eq!(value, parsed);
    }

    #[test]
    fn rejects_short_slice() {
        assert!(AlControl::try_from_slice(&[0x04]).is_err());
    }
}
