//! Manual wire (de)serialization for PDU payloads.
//!
//! EtherCAT is little-endian on the wire end to end, so every primitive is converted with
//! `from_le_bytes`/`to_le_bytes`. Slave devices are addressed directly against the bytes of the
//! process data image; there is no intermediate framing to hide behind.

use std::array::TryFromSliceError;

/// Anything that can be read back out of a PDU's data section.
pub trait PduRead: Sized {
    /// Encoded length in bytes.
    const LEN: u16;

    /// The error produced when decoding fails.
    type Error;

    /// Decode `Self` from the front of `slice`.
    fn try_from_slice(slice: &[u8]) -> Result<Self, Self::Error>;
}

/// Anything that can additionally be written into a PDU's data section.
pub trait PduData: PduRead {
    /// Borrow the little-endian wire representation of this value.
    fn as_slice(&self) -> &[u8];
}

macro_rules! impl_pdudata {
    ($ty:ty) => {
        impl PduRead for $ty {
            const LEN: u16 = core::mem::size_of::<$ty>() as u16;
            type Error = TryFromSliceError;

            fn try_from_slice(slice: &[u8]) -> Result<Self, Self::Error> {
                Ok(Self::from_le_bytes(slice.try_into()?))
            }
        }

        impl PduData for $ty {
            fn as_slice(&self) -> &[u8] {
                // SAFETY: little-endian target is enforced below, and the slice borrows `self`
                // for exactly `size_of::<Self>()` bytes.
                #[allow(clippy::size_of_in_element_count)]
                unsafe {
                    core::slice::from_raw_parts(self as *const Self as *const u8, core::mem::size_of::<Self>())
                }
            }
        }
    };
}

#[cfg(not(target_endian = "little"))]
compile_error!("only little-endian targets are supported: primitive integers are cast to slices as-is");

impl_pdudata!(u8);
impl_pdudata!(u16);
impl_pdudata!(u32);
impl_pdudata!(u64);
impl_pdudata!(i8);
impl_pdudata!(i16);
impl_pdudata!(i32);
impl_pdudata!(i64);

impl<const N: usize> PduRead for [u8; N] {
    const LEN: u16 = N as u16;

    type Error = TryFromSliceError;

    fn try_from_slice(slice: &[u8]) -> Result<Self, Self::Error> {
        slice.try_into()
    }
}

impl<const N: usize> PduData for [u8; N] {
    fn as_slice(&self) -> &[u8] {
        self
    }
}

impl PduRead for () {
    const LEN: u16 = 0;

    type Error = core::convert::Infallible;

    fn try_from_slice(_slice: &[u8]) -> Result<Self, Self::Error> {
        Ok(())
    }
}

impl PduData for () {
    fn as_slice(&self) -> &[u8] {
        &[]
    }
}

/// A fixed-capacity ASCII/UTF-8 string read out of a `VISIBLE_STRING` SII/CoE field.
///
/// EtherCAT's `VISIBLE_STRING` type has no length prefix on the wire; the enclosing category or
/// SDO response supplies the byte count.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct VisibleString(String);

impl VisibleString {
    /// Borrow the decoded string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for VisibleString {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Error produced decoding a [`VisibleString`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct VisibleStringError;

impl PduRead for VisibleString {
    const LEN: u16 = 0;

    type Error = VisibleStringError;

    fn try_from_slice(slice: &[u8]) -> Result<Self, Self::Error> {
        let trimmed = slice
            .iter()
            .position(|&b| b == 0)
            .map(|pos| &slice[..pos])
            .unwrap_or(slice);

        core::str::from_utf8(trimmed)
            .map(|s| VisibleString(s.to_owned()))
            .map_err(|_| VisibleStringError)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_u16() {
        let value: u16 = 0xbeef;
        let bytes = value.as_slice().to_vec();
        assert_eq!(u16::try_from_slice(&bytes).unwrap(), value);
    }

    #[test]
    fn visible_string_strips_trailing_nul() {
        let decoded = VisibleString::try_from_slice(b"EL1018\0\0").unwrap();
        assert_eq!(decoded.as_str(), "EL1018");
    }
}
