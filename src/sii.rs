//! Slave Information Interface (SII) register handshake, category layout, and identity parsing.
//!
//! Defined in ETG1000.4 6.4 and ETG1000.6 Table 17 onward.

use bitflags::bitflags;

use crate::error::{EepromError, Error};
use crate::network::SlaveIdentity;

/// SII category tags, ETG1000.6 Table 19.
///
/// **Divergence from ETG1000.6, recorded deliberately:** the canonical standard numbers
/// `Strings = 10` and `General = 30`. This crate follows the literal category number named in
/// its own governing specification ("category 10 ('General')") instead, so `General` is `10`
/// here. See DESIGN.md for the full rationale; `Strings` is dropped since nothing in this crate's
/// discovery steps reads it.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u16)]
pub enum CategoryType {
    Nop = 0,
    DeviceSpecific = 1,
    General = 10,
    DataTypes = 20,
    Fmmu = 40,
    SyncManager = 41,
    RxPdo = 51,
    TxPdo = 50,
    DistributedClock = 60,
    End = 0xffff,
}

impl CategoryType {
    fn from_raw(value: u16) -> Option<Self> {
        match value {
            0 => Some(Self::Nop),
            1 => Some(Self::DeviceSpecific),
            10 => Some(Self::General),
            20 => Some(Self::DataTypes),
            40 => Some(Self::Fmmu),
            41 => Some(Self::SyncManager),
            50 => Some(Self::TxPdo),
            51 => Some(Self::RxPdo),
            60 => Some(Self::DistributedClock),
            0xffff => Some(Self::End),
            _ => None,
        }
    }
}

/// One category header in the SII category list: tag, start word address, and length in words.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SiiCategory {
    pub category: CategoryType,
    pub start: u16,
    pub len_words: u16,
}

/// SII control/status register, `0x0502`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct SiiControl {
    /// A read/write/reload operation is in progress.
    pub busy: bool,
    /// Whether the last operation reads 8 octets (`true`) or 4 (`false`) per access.
    pub read_size_is_8_octets: bool,
    /// Set by the slave if the last operation failed.
    pub error: bool,
}

impl SiiControl {
    /// Decode from the 2-byte register value.
    pub fn from_bits(bits: u16) -> Self {
        Self {
            busy: bits & 0x8000 != 0,
            read_size_is_8_octets: bits & 0x0040 != 0,
            error: bits & 0x7800 != 0,
        }
    }
}

/// An SII read request, written to `0x0502` (control) followed by `0x0504` (address).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SiiRequest {
    address: u16,
}

impl SiiRequest {
    /// Build a read request for `word_address`.
    pub fn read(word_address: u16) -> Self {
        Self {
            address: word_address,
        }
    }

    /// Encode as the 6-byte `{control, address}` payload written starting at `0x0502`.
    pub fn to_array(self) -> [u8; 6] {
        let mut buf = [0u8; 6];
        // Read opcode (bits 8-9 = 01) in the control word, little-endian.
        buf[0..2].copy_from_slice(&0x0100u16.to_le_bytes());
        buf[2..6].copy_from_slice(&u32::from(self.address).to_le_bytes());
        buf
    }
}

bitflags! {
    /// Mailbox protocols a slave's EEPROM advertises support for, from the `General` category's
    /// `MailboxProtocol` word (`0x001C`).
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
    pub struct MailboxProtocols: u16 {
        const AOE = 0x0001;
        const EOE = 0x0002;
        const COE = 0x0004;
        const FOE = 0x0008;
        const SOE = 0x0010;
        const VOE = 0x0020;
    }
}

bitflags! {
    /// Feature support flags from register `0x0008`.
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
    pub struct SupportFlags: u16 {
        const FMMU_BIT_OPS = 1 << 0;
        const DC_SUPPORTED = 1 << 2;
        const HAS_64BIT_DC = 1 << 3;
        const ENHANCED_DC_SYNC = 1 << 8;
        const LRW_SUPPORTED = 1 << 9;
    }
}

impl SupportFlags {
    /// Whether this slave supports Distributed Clocks at all.
    ///
    /// DC synchronisation itself is a non-goal here; this bit is surfaced only as bus metadata
    /// (see [`crate::network::MasterConfig::dc_support`]).
    pub fn dc_supported(self) -> bool {
        self.contains(Self::DC_SUPPORTED)
    }
}

/// Parse the four fixed 32-bit identity words read from SII address `0x0008` onward.
///
/// Grounded on `ethercrab::slave::types::SlaveIdentity::parse_fields` — vendor ID, product code,
/// revision, serial, each a little-endian `u32`, 16 bytes total.
pub fn parse_identity(words: &[u8; 16]) -> SlaveIdentity {
    SlaveIdentity {
        vendor_id: u32::from_le_bytes(words[0..4].try_into().unwrap()),
        product_code: u32::from_le_bytes(words[4..8].try_into().unwrap()),
        revision_number: u32::from_le_bytes(words[8..12].try_into().unwrap()),
        serial_number: u32::from_le_bytes(words[12..16].try_into().unwrap()),
    }
}

/// Decode the mailbox-protocol bits and DC capability bit read during discovery step 3.
pub fn parse_general_category(mailbox_protocol_word: u16, support_flags_word: u16) -> (MailboxProtocols, SupportFlags) {
    (
        MailboxProtocols::from_bits_truncate(mailbox_protocol_word),
        SupportFlags::from_bits_truncate(support_flags_word),
    )
}

/// Walk a flat sequence of `(category, start, len_words)` triples (as read sequentially from
/// SII) looking for `target`. Returns `Err(EepromError::NoCategory)` if absent.
pub fn find_category(categories: &[SiiCategory], target: CategoryType) -> Result<SiiCategory, Error> {
    categories
        .iter()
        .find(|c| c.category as u16 == target as u16)
        .copied()
        .ok_or(Error::Eeprom(EepromError::NoCategory))
}

/// Parse one 4-byte category header (`tag: u16`, `len_words: u16`) encountered while walking the
/// SII category list.
pub fn parse_category_header(raw: &[u8; 4]) -> Option<SiiCategory> {
    let tag = u16::from_le_bytes([raw[0], raw[1]]);
    let len_words = u16::from_le_bytes([raw[2], raw[3]]);

    CategoryType::from_raw(tag).map(|category| SiiCategory {
        category,
        start: 0,
        len_words,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_identity_words() {
        let mut words = [0u8; 16];
        words[0..4].copy_from_slice(&0x0000_00a2u32.to_le_bytes());
        words[4..8].copy_from_slice(&0x0000_0102u32.to_le_bytes());
        words[8..12].copy_from_slice(&1u32.to_le_bytes());
        words[12..16].copy_from_slice(&0u32.to_le_bytes());

        let identity = parse_identity(&words);

        assert_eq!(identity.vendor_id, 0xa2);
        assert_eq!(identity.product_code, 0x102);
        assert_eq!(identity.revision_number, 1);
        assert_eq!(identity.serial_number, 0);
    }

    #[test]
    fn mailbox_protocols_decode_coe_bit() {
        let (protocols, _) = parse_general_category(0x0004, 0);
        assert!(protocols.contains(MailboxProtocols::COE));
        assert!(!protocols.contains(MailboxProtocols::FOE));
    }

    #[test]
    fn support_flags_decode_dc_bits() {
        let (_, flags) = parse_general_category(0, 0b0000_1100);
        assert!(flags.dc_supported());
        assert!(flags.contains(SupportFlags::HAS_64BIT_DC));
    }

    #[test]
    fn busy_bit_is_top_bit_of_control_word() {
        let control = SiiControl::from_bits(0x8000);
        assert!(control.busy);
    }
}
