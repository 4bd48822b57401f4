//! Network Description — the authoritative, already-parsed configuration of one bus.
//!
//! ENI ingestion itself is out of scope; this module defines the shape a caller's ENI parser (or
//! the discovery engine) populates.

use crate::state::AlState;

/// Bus-wide configuration, independent of any individual slave.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MasterConfig {
    /// Cyclic exchange period, microseconds.
    pub cycle_period_us: u32,
    /// Sync manager watchdog timeout, milliseconds. `None` leaves the slave's power-on default.
    pub watchdog_timeout_ms: Option<u32>,
    /// Per-operation timeouts.
    pub timeouts: Timeouts,
    /// Number of times a single PDU is retried before its failure category is reported.
    pub pdu_retry_count: u8,
    /// Whether any slave on the bus advertises Distributed Clock support.
    ///
    /// DC synchronisation itself is a non-goal; this flag is carried purely as bus metadata.
    pub dc_support: bool,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            cycle_period_us: 10_000,
            watchdog_timeout_ms: None,
            timeouts: Timeouts::default(),
            pdu_retry_count: 3,
            dc_support: false,
        }
    }
}

/// Per-operation-class timeouts.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Timeouts {
    /// Single PDU round-trip, milliseconds.
    pub pdu_ms: u32,
    /// Waiting for an AL state transition to complete, milliseconds.
    pub state_transition_ms: u32,
    /// Waiting for a mailbox/SDO response, milliseconds.
    pub mailbox_ms: u32,
    /// Waiting for an SII/EEPROM access, milliseconds.
    pub eeprom_ms: u32,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            pdu_ms: 100,
            state_transition_ms: 5_000,
            mailbox_ms: 100,
            eeprom_ms: 100,
        }
    }
}

/// The authoritative configuration of one bus: master-level config plus the ordered slave list.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NetworkDescription {
    /// Bus-wide configuration.
    pub master: MasterConfig,
    /// Ordered slave list. Position in this sequence is the stable *slave index* used
    /// everywhere else in the crate.
    pub slaves: Vec<SlaveDescriptor>,
}

impl NetworkDescription {
    /// Total PDI output-half size, in bytes, across all slaves.
    pub fn total_output_size(&self) -> usize {
        self.slaves
            .iter()
            .filter_map(|s| s.process_data.as_ref())
            .map(|p| p.output_byte_offset as usize + p.output_byte_len())
            .max()
            .unwrap_or(0)
    }

    /// Total PDI input-half size, in bytes, across all slaves.
    pub fn total_input_size(&self) -> usize {
        self.slaves
            .iter()
            .filter_map(|s| s.process_data.as_ref())
            .map(|p| p.input_byte_offset as usize + p.input_byte_len())
            .max()
            .unwrap_or(0)
    }
}

/// A slave's 32-bit identity, read from SII or verified against a `NetworkDescription`.
///
/// Grounded on `ethercrab::slave::types::SlaveIdentity` — same four fields, same ordering.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SlaveIdentity {
    /// ETG-assigned vendor ID.
    pub vendor_id: u32,
    /// Vendor-assigned product code.
    pub product_code: u32,
    /// Revision number.
    pub revision_number: u32,
    /// Serial number; `0` if the slave does not report one.
    pub serial_number: u32,
}

/// Which style of per-entry offset a slave's process-data entries use. The two styles must never
/// be mixed for one slave.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ProcessDataAddressing {
    /// Legacy style: each entry names an explicit `pdoByteOffset` relative to its PDO.
    Legacy,
    /// Standard ENI style: each entry names a `bitOffset` relative to the slave's process-image
    /// half.
    ProcessImage,
}

/// One slave in the bus, as discovered or as supplied externally.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SlaveDescriptor {
    /// SII/CoE identity.
    pub identity: SlaveIdentity,
    /// Fixed station address configured during the Init->PreOp transition.
    pub configured_address: u16,
    /// Auto-increment (topological position) address, negative relative to the master.
    pub auto_increment_address: i16,
    /// Input/output process-data layout, if this slave exchanges cyclic data.
    pub process_data: Option<ProcessDataBlock>,
    /// Mailbox configuration.
    pub mailbox: MailboxConfig,
    /// Ordered init commands applied during state transitions.
    pub init_commands: Vec<InitCommand>,
}

impl SlaveDescriptor {
    /// Whether SII/PDO enumeration failed to produce cyclic process data for this slave.
    ///
    /// Such a slave is excluded from the cyclic frame.
    pub fn requires_manual_configuration(&self) -> bool {
        self.process_data.is_none()
    }
}

/// A slave's cyclic process-data layout: the byte/bit ranges it occupies in each PDI half, plus
/// the named entries within them.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ProcessDataBlock {
    /// Output-half byte offset.
    pub output_byte_offset: u32,
    /// Output-half bit length.
    pub output_bit_length: u32,
    /// Input-half byte offset.
    pub input_byte_offset: u32,
    /// Input-half bit length.
    pub input_bit_length: u32,
    /// Which addressing style `entries` uses. See [`ProcessDataAddressing`].
    pub addressing: ProcessDataAddressing,
    /// Named PDO entries.
    pub entries: Vec<ProcessDataEntry>,
}

impl ProcessDataBlock {
    /// Output-half length in whole bytes (bit length rounded up).
    pub fn output_byte_len(&self) -> usize {
        ((self.output_bit_length + 7) / 8) as usize
    }

    /// Input-half length in whole bytes (bit length rounded up).
    pub fn input_byte_len(&self) -> usize {
        ((self.input_bit_length + 7) / 8) as usize
    }
}

/// One named PDO entry within a slave's process-data block.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ProcessDataEntry {
    /// Variable name, as it will appear in the mapping table.
    pub name: String,
    /// CoE object index this entry maps to, if any.
    pub index: u16,
    /// CoE object sub-index.
    pub sub_index: u8,
    /// Width in bits.
    pub bit_length: u8,
    /// Wire data type.
    pub data_type: crate::mapping::DataType,
    /// Whether this entry lives in the outputs half.
    pub is_output: bool,
    /// Legacy addressing: byte offset relative to the owning PDO. Only meaningful when the
    /// owning [`ProcessDataBlock::addressing`] is [`ProcessDataAddressing::Legacy`].
    pub pdo_byte_offset: Option<u16>,
    /// Standard ENI addressing: bit offset relative to the slave's half. Only meaningful when
    /// the owning block's addressing is [`ProcessDataAddressing::ProcessImage`].
    pub bit_offset: Option<u32>,
}

/// Mailbox configuration for one slave.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MailboxConfig {
    /// Address of the mailbox status register, typically `0x080D`.
    pub status_register_address: u16,
    /// Physical start address of the slave's mailbox-out Sync Manager (master -> slave),
    /// conventionally `0x1000` for simple Class B devices. Read from the slave's SM0
    /// configuration during discovery in a full implementation; defaulted here since this crate
    /// does not model per-slave Sync Manager channel allocation end to end (see DESIGN.md).
    pub write_address: u16,
    /// Physical start address of the slave's mailbox-in Sync Manager (slave -> master),
    /// conventionally `0x1400` for simple Class B devices paired with the SM1 channel. Same
    /// caveat as `write_address`: defaulted, not individually discovered.
    pub read_address: u16,
    /// Recommended poll period, milliseconds.
    pub poll_period_ms: u32,
    /// CoE support.
    pub supports_coe: bool,
    /// EoE support (non-goal to act on, tracked for completeness).
    pub supports_eoe: bool,
    /// FoE support (non-goal to act on, tracked for completeness).
    pub supports_foe: bool,
}

/// One of the two-letter ESM transition codes (ETG1000.6 6.4.1).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TransitionCode {
    /// Init -> PreOp.
    Ip,
    /// PreOp -> Init.
    Pi,
    /// PreOp -> SafeOp.
    Ps,
    /// SafeOp -> PreOp.
    Sp,
    /// SafeOp -> Op.
    So,
    /// Op -> SafeOp.
    Os,
    /// Op -> Init.
    Oi,
    /// SafeOp -> Init.
    Si,
    /// Alias applied to commands that should run on every step of a boot sequence to Op.
    Op,
}

impl From<crate::state::Transition> for TransitionCode {
    fn from(t: crate::state::Transition) -> Self {
        match t {
            crate::state::Transition::IP => Self::Ip,
            crate::state::Transition::PI => Self::Pi,
            crate::state::Transition::PS => Self::Ps,
            crate::state::Transition::SP => Self::Sp,
            crate::state::Transition::SO => Self::So,
            crate::state::Transition::OS => Self::Os,
            crate::state::Transition::OI => Self::Oi,
            crate::state::Transition::SI => Self::Si,
            crate::state::Transition::OP => Self::Op,
        }
    }
}

/// Maximum payload width of an [`InitCommandVariant::CoeSdoDownload`], in bytes.
///
/// The wire format carries init-command values in a fixed 32-bit field; a caller-supplied
/// payload exceeding it is rejected (see [`crate::error::Error::InitCommandValueTooLong`]) rather
/// than silently truncated.
pub const INIT_COMMAND_MAX_VALUE_LEN: usize = 4;

/// The operation one init command performs.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum InitCommandVariant {
    /// Write `data` to register `ado` on the slave.
    RegisterWrite { ado: u16, data: Vec<u8> },
    /// Download `data` (at most [`INIT_COMMAND_MAX_VALUE_LEN`] bytes) to a CoE SDO.
    CoeSdoDownload {
        index: u16,
        sub_index: u8,
        data: Vec<u8>,
    },
    /// Write a SoE IDN.
    SoeWrite {
        op_code: u8,
        drive_no: u8,
        idn: u16,
        data: Vec<u8>,
    },
}

/// One init command: an operation, the transitions it applies to, and its retry/validation
/// policy.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct InitCommand {
    /// The operation to perform.
    pub variant: InitCommandVariant,
    /// The subset of transitions during which this command is applied.
    pub transitions: Vec<TransitionCode>,
    /// Number of additional attempts after the first failure.
    pub retries: u8,
    /// Expected working counter. `None` means "don't check".
    pub expected_wkc: Option<u16>,
}

impl InitCommand {
    /// Validate a [`InitCommandVariant::CoeSdoDownload`] payload against the 32-bit value field
    /// width.
    pub fn validate(&self) -> Result<(), crate::error::Error> {
        if let InitCommandVariant::CoeSdoDownload { data, .. } = &self.variant {
            if data.len() > INIT_COMMAND_MAX_VALUE_LEN {
                return Err(crate::error::Error::InitCommandValueTooLong { len: data.len() });
            }
        }

        Ok(())
    }
}

/// An observed state-change, delivered to subscribers of [`crate::master::Master::subscribe`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct StateChangeEvent {
    /// State before the transition.
    pub previous_state: AlState,
    /// State after the transition.
    pub current_state: AlState,
    /// The slave this applies to, or `None` for the bus-wide state.
    pub slave_index: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_sizes_follow_the_widest_slave() {
        let mut description = NetworkDescription::default();

        description.slaves.push(SlaveDescriptor {
            identity: SlaveIdentity::default(),
            configured_address: 0x1001,
            auto_increment_address: 0,
            process_data: Some(ProcessDataBlock {
                output_byte_offset: 0,
                output_bit_length: 8,
                input_byte_offset: 0,
                input_bit_length: 0,
                addressing: ProcessDataAddressing::ProcessImage,
                entries: Vec::new(),
            }),
            mailbox: MailboxConfig::default(),
            init_commands: Vec::new(),
        });

        description.slaves.push(SlaveDescriptor {
            identity: SlaveIdentity::default(),
            configured_address: 0x1002,
            auto_increment_address: -1,
            process_data: Some(ProcessDataBlock {
                output_byte_offset: 0,
                output_bit_length: 0,
                input_byte_offset: 1,
                input_bit_length: 32,
                addressing: ProcessDataAddressing::ProcessImage,
                entries: Vec::new(),
            }),
            mailbox: MailboxConfig::default(),
            init_commands: Vec::new(),
        });

        assert_eq!(description.total_output_size(), 1);
        assert_eq!(description.total_input_size(), 5);
    }

    #[test]
    fn init_command_rejects_oversized_sdo_payload() {
        let command = InitCommand {
            variant: InitCommandVariant::CoeSdoDownload {
                index: 0x1234,
                sub_index: 0,
                data: vec![0u8; 5],
            },
            transitions: vec![TransitionCode::Ps],
            retries: 0,
            expected_wkc: None,
        };

        assert!(matches!(
            command.validate(),
            Err(crate::error::Error::InitCommandValueTooLong { len: 5 })
        ));
    }
}
