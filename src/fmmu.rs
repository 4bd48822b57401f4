//! Fieldbus Memory Management Unit (FMMU) configuration.
//!
//! Used to map segments of the Process Data Image (PDI) onto a slave's physical (station)
//! memory space. Defined in ETG1000.4 Table 56.

use crate::wire::PduRead;

/// One FMMU entity's configuration, as written to `0x0600 + 0x10*n`.
#[derive(Default, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Fmmu {
    /// Start address, in octets, within the logical (process image) memory area.
    pub logical_start_address: u32,
    /// Length of the mapped region, in octets.
    pub length_bytes: u16,
    /// First valid bit within the first logical byte.
    pub logical_start_bit: u8,
    /// Last valid bit within the last logical byte.
    pub logical_end_bit: u8,
    /// Start address within the slave's physical memory.
    pub physical_start_address: u16,
    /// First valid bit within the first physical byte.
    pub physical_start_bit: u8,
    /// Whether reads from logical memory are mapped through.
    pub read_enable: bool,
    /// Whether writes to logical memory are mapped through.
    pub write_enable: bool,
    /// Whether this FMMU entity is active.
    pub enable: bool,
}

impl Fmmu {
    /// Packed, on-the-wire length of an FMMU entity (16 bytes, mostly reserved).
    pub const PACKED_LEN: usize = 16;

    /// Encode into the 16-byte wire layout.
    pub fn pack(&self) -> [u8; Self::PACKED_LEN] {
        let mut buf = [0u8; Self::PACKED_LEN];

        buf[0..4].copy_from_slice(&self.logical_start_address.to_le_bytes());
        buf[4..6].copy_from_slice(&self.length_bytes.to_le_bytes());
        buf[6] = self.logical_start_bit & 0x07;
        buf[7] = self.logical_end_bit & 0x07;
        buf[8..10].copy_from_slice(&self.physical_start_address.to_le_bytes());
        buf[10] = self.physical_start_bit & 0x07;

        let mut flags = 0u8;
        if self.read_enable {
            flags |= 0x01;
        }
        if self.write_enable {
            flags |= 0x02;
        }
        buf[11] = flags;
        buf[12] = u8::from(self.enable);

        buf
    }
}

impl PduRead for Fmmu {
    const LEN: u16 = Self::PACKED_LEN as u16;

    type Error = core::array::TryFromSliceError;

    fn try_from_slice(slice: &[u8]) -> Result<Self, Self::Error> {
        let array: [u8; Self::PACKED_LEN] = slice.try_into()?;

        Ok(Self {
            logical_start_address: u32::from_le_bytes(array[0..4].try_into()?),
            length_bytes: u16::from_le_bytes(array[4..6].try_into()?),
            logical_start_bit: array[6] & 0x07,
            logical_end_bit: array[7] & 0x07,
            physical_start_address: u16::from_le_bytes(array[8..10].try_into()?),
            physical_start_bit: array[10] & 0x07,
            read_enable: array[11] & 0x01 != 0,
            write_enable: array[11] & 0x02 != 0,
            enable: array[12] != 0,
        })
    }
}

impl core::fmt::Debug for Fmmu {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Fmmu")
            .field(
                "logical_start_address",
                &format_args!("{:#010x}", self.logical_start_address),
            )
            .field("length_bytes", &self.length_bytes)
            .field(
                "physical_start_address",
                &format_args!("{:#06x}", self.physical_start_address),
            )
            .field("read_enable", &self.read_enable)
            .field("write_enable", &self.write_enable)
            .field("enable", &self.enable)
            .finish()
    }
}

impl core::fmt::Display for Fmmu {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "logical {:#010x}:{}, size {}, physical {:#06x}:{}, {}{}, {}",
            self.logical_start_address,
            self.logical_start_bit,
            self.length_bytes,
            self.physical_start_address,
            self.physical_start_bit,
            if self.read_enable { "R" } else { "" },
            if self.write_enable { "W" } else { "" },
            if self.enable { "enabled" } else { "disabled" },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_zero() {
        assert_eq!(Fmmu::default().pack(), [0u8; Fmmu::PACKED_LEN]);
    }

    #[test]
    fn round_trips() {
        let fmmu = Fmmu {
            logical_start_address: 0x1000,
            length_bytes: 4,
            logical_start_bit: 0,
            logical_end_bit: 7,
            physical_start_address: 0x0f00,
            physical_start_bit: 0,
            read_enable: true,
            write_enable: false,
            enable: true,
        };

        let packed = fmmu.pack();
        let parsed = Fmmu::try_from_slice(&packed).unwrap();

        assert_eq!(fmmu, parsed);
    }
}
