//! The Mapping Engine (C3): binds named process-image variables to PDI byte/bit offsets.

use crate::network::{NetworkDescription, ProcessDataAddressing};

/// A wire data type a process-image variable may take.
///
/// All multi-byte values are little-endian on the wire and in the PDI.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DataType {
    Bool,
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
}

impl DataType {
    /// Width in bits.
    pub fn bit_size(self) -> u32 {
        match self {
            Self::Bool => 1,
            Self::I8 | Self::U8 => 8,
            Self::I16 | Self::U16 => 16,
            Self::I32 | Self::U32 | Self::F32 => 32,
            Self::I64 | Self::U64 | Self::F64 => 64,
        }
    }
}

/// A named variable's position in the PDI, bound once by [`MappingTable::build`].
#[derive(Debug, Clone, PartialEq)]
pub struct VariableMapping {
    /// Variable name.
    pub name: String,
    /// Byte offset into the whole PDI buffer (post output/input split).
    pub pdi_byte_offset: usize,
    /// Bit offset within `pdi_byte_offset`'s byte, present only for [`DataType::Bool`].
    pub bit_offset: Option<u8>,
    /// Wire data type.
    pub data_type: DataType,
    /// Whether this variable lives in the inputs half.
    pub is_input: bool,
    /// Width in bits.
    pub bit_size: u32,
    /// The slave index this variable was matched to.
    pub owning_slave_index: usize,
}

/// The two flat, ordered sequences (inputs / outputs) the cyclic exchange engine walks every
/// tick.
#[derive(Debug, Clone, Default)]
pub struct MappingTable {
    /// Output-half mappings, in the order they were bound.
    pub outputs: Vec<VariableMapping>,
    /// Input-half mappings, in the order they were bound.
    pub inputs: Vec<VariableMapping>,
}

impl MappingTable {
    /// Build the mapping table from a [`NetworkDescription`].
    ///
    /// Per variable, compute its global
    /// bit offset, then scan slaves in array order for the one whose half-range strictly
    /// half-open contains it. A variable with no containing slave is silently dropped, not
    /// treated as an error.
    ///
    /// Returns [`crate::error::Error::MixedProcessDataAddressing`] if any one slave's process
    /// data entries mix [`ProcessDataAddressing::Legacy`] and
    /// [`ProcessDataAddressing::ProcessImage`] styles. In practice this can only happen if a
    /// `NetworkDescription` is handed in externally with an inconsistent `addressing` tag
    /// relative to its entries' populated offset fields, since discovery itself always tags a
    /// block with a single, consistent style.
    pub fn build(description: &NetworkDescription) -> Result<Self, crate::error::Error> {
        let output_size = description.total_output_size();

        let mut table = Self::default();

        for (slave_index, slave) in description.slaves.iter().enumerate() {
            let Some(block) = slave.process_data.as_ref() else {
                continue;
            };

            for entry in &block.entries {
                match block.addressing {
                    ProcessDataAddressing::Legacy => {
                        if entry.bit_offset.is_some() {
                            return Err(crate::error::Error::MixedProcessDataAddressing { slave_index });
                        }
                    }
                    ProcessDataAddressing::ProcessImage => {
                        if entry.pdo_byte_offset.is_some() {
                            return Err(crate::error::Error::MixedProcessDataAddressing { slave_index });
                        }
                    }
                }

                let local_bit_offset = match block.addressing {
                    ProcessDataAddressing::Legacy => {
                        u32::from(entry.pdo_byte_offset.unwrap_or_default()) * 8
                    }
                    ProcessDataAddressing::ProcessImage => entry.bit_offset.unwrap_or_default(),
                };

                let start_bit = if entry.is_output {
                    block.output_byte_offset * 8
                } else {
                    block.input_byte_offset * 8
                };
                let half_len_bits = if entry.is_output {
                    block.output_bit_length
                } else {
                    block.input_bit_length
                };

                let global_bit_offset = start_bit + local_bit_offset;

                // Strict half-open containment: no cumulative-drift arithmetic.
                if !(start_bit..start_bit + half_len_bits).contains(&global_bit_offset) {
                    continue;
                }

                let mapping = VariableMapping {
                    name: entry.name.clone(),
                    pdi_byte_offset: if entry.is_output {
                        (global_bit_offset / 8) as usize
                    } else {
                        output_size + (global_bit_offset / 8) as usize
                    },
                    bit_offset: (entry.data_type == DataType::Bool)
                        .then_some((global_bit_offset % 8) as u8),
                    data_type: entry.data_type,
                    is_input: !entry.is_output,
                    bit_size: entry.data_type.bit_size(),
                    owning_slave_index: slave_index,
                };

                if mapping.is_input {
                    table.inputs.push(mapping);
                } else {
                    table.outputs.push(mapping);
                }
            }
        }

        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{
        MailboxConfig, ProcessDataBlock, ProcessDataEntry, SlaveDescriptor, SlaveIdentity,
    };

    fn slave(
        output_byte_offset: u32,
        output_bit_length: u32,
        input_byte_offset: u32,
        input_bit_length: u32,
        entries: Vec<ProcessDataEntry>,
    ) -> SlaveDescriptor {
        SlaveDescriptor {
            identity: SlaveIdentity::default(),
            configured_address: 0x1000,
            auto_increment_address: 0,
            process_data: Some(ProcessDataBlock {
                output_byte_offset,
                output_bit_length,
                input_byte_offset,
                input_bit_length,
                addressing: ProcessDataAddressing::ProcessImage,
                entries,
            }),
            mailbox: MailboxConfig::default(),
            init_commands: Vec::new(),
        }
    }

    fn entry(name: &str, data_type: DataType, is_output: bool, bit_offset: u32) -> ProcessDataEntry {
        ProcessDataEntry {
            name: name.to_string(),
            index: 0,
            sub_index: 0,
            bit_length: data_type.bit_size() as u8,
            data_type,
            is_output,
            pdo_byte_offset: None,
            bit_offset: Some(bit_offset),
        }
    }

    /// Two overlapping-byte, non-overlapping-bit variables map to the same PDI byte without clashing.
    #[test]
    fn mapping_by_explicit_range() {
        let mut description = NetworkDescription::default();
        description.slaves.push(slave(
            0,
            8,
            0,
            32,
            vec![
                entry("Out", DataType::U8, true, 0),
                entry("In_U16", DataType::U16, false, 0),
                entry("In_Bool", DataType::Bool, false, 24),
            ],
        ));

        let table = MappingTable::build(&description).unwrap();

        let out = table.outputs.iter().find(|m| m.name == "Out").unwrap();
        assert_eq!(out.pdi_byte_offset, 0);

        let in_u16 = table.inputs.iter().find(|m| m.name == "In_U16").unwrap();
        assert_eq!(in_u16.pdi_byte_offset, 1);

        let in_bool = table.inputs.iter().find(|m| m.name == "In_Bool").unwrap();
        assert_eq!(in_bool.pdi_byte_offset, 4);
        assert_eq!(in_bool.bit_offset, Some(0));
    }

    #[test]
    fn variable_outside_any_slave_range_is_dropped_not_errored() {
        let mut description = NetworkDescription::default();
        description.slaves.push(slave(
            0,
            8,
            0,
            0,
            vec![entry("Stray", DataType::U16, true, 16)],
        ));

        let table = MappingTable::build(&description).unwrap();
        assert!(table.outputs.is_empty());
    }

    #[test]
    fn mixed_addressing_is_rejected() {
        let mut description = NetworkDescription::default();
        let mut slave = slave(0, 8, 0, 0, Vec::new());
        slave.process_data.as_mut().unwrap().addressing = ProcessDataAddressing::Legacy;
        slave.process_data.as_mut().unwrap().entries.push(ProcessDataEntry {
            name: "Bad".into(),
            index: 0,
            sub_index: 0,
            bit_length: 8,
            data_type: DataType::U8,
            is_output: true,
            pdo_byte_offset: None,
            bit_offset: Some(0),
        });
        description.slaves.push(slave);

        assert!(matches!(
            MappingTable::build(&description),
            Err(crate::error::Error::MixedProcessDataAddressing { slave_index: 0 })
        ));
    }
}
