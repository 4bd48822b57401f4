//! Cyclic Exchange (C6): one logical read/write frame per `run_cycle` call.

use crate::driver::{FrameOutcome, WireDriver};
use crate::error::Error;
use crate::mapping::{DataType, MappingTable, VariableMapping};
use crate::pdi::Pdi;

/// Number of consecutive soft failures tolerated before the next one escalates to a fatal error.
///
/// 5 missed cycles at a 20 ms period is a 100 ms ride-through window.
const MISSED_CYCLE_LIMIT: u32 = 5;

/// Pending output values, held until the next `run_cycle` pre-transmit pass serializes any that
/// changed.
#[derive(Debug, Clone, Default)]
struct PendingValue {
    bits: u64,
    dirty: bool,
}

/// Drives the cyclic Tx/Rx loop: the PDI buffer, the mapping table that interprets it, a
/// last-known-value cache per output mapping (for the dirty check), and the ride-through counter.
pub struct CyclicExchange {
    pdi: Pdi,
    mapping: MappingTable,
    pending: Vec<PendingValue>,
    missed_cycles: u32,
}

impl CyclicExchange {
    /// Build a cyclic exchange engine over an already-sized `pdi` and its `mapping`.
    pub fn new(pdi: Pdi, mapping: MappingTable) -> Self {
        let pending = vec![PendingValue::default(); mapping.outputs.len()];

        Self {
            pdi,
            mapping,
            pending,
            missed_cycles: 0,
        }
    }

    /// The underlying PDI buffer, for bulk/advanced callers.
    pub fn pdi(&self) -> &Pdi {
        &self.pdi
    }

    /// Mutable access to the underlying PDI buffer.
    pub fn pdi_mut(&mut self) -> &mut Pdi {
        &mut self.pdi
    }

    /// The bound mapping table.
    pub fn mapping(&self) -> &MappingTable {
        &self.mapping
    }

    /// Stage a new value for an output variable. Applied to the PDI on the next `run_cycle` if it
    /// differs from the last transmitted value.
    pub fn set_output(&mut self, variable: &str, bits: u64) -> Result<(), Error> {
        let index = self
            .mapping
            .outputs
            .iter()
            .position(|m| m.name == variable)
            .ok_or(Error::UnknownVariable)?;

        self.pending[index] = PendingValue { bits, dirty: true };
        Ok(())
    }

    /// Read the last-deserialized value of an input variable.
    pub fn input(&self, variable: &str) -> Result<u64, Error> {
        let mapping = self
            .mapping
            .inputs
            .iter()
            .find(|m| m.name == variable)
            .ok_or(Error::UnknownVariable)?;

        Ok(read_bits(self.pdi.as_slice(), mapping))
    }

    /// Read a single byte anywhere in the PDI, bypassing the mapping table.
    pub fn read_slave_byte(&self, offset: usize) -> Option<u8> {
        self.pdi.get_byte(offset)
    }

    /// Write a single byte anywhere in the PDI, bypassing the mapping table.
    pub fn write_slave_byte(&mut self, offset: usize, value: u8) -> bool {
        self.pdi.set_byte(offset, value)
    }

    /// Run one full cycle: pre-transmit serialization, the logical exchange, ride-through
    /// accounting, and (on success) post-receive deserialization.
    ///
    /// Soft failures (`FrameOutcome::PduTimeout`/`WkcMismatch`) are swallowed up to
    /// [`MISSED_CYCLE_LIMIT`] consecutive occurrences and returned as `Ok(None)`; beyond that they
    /// escalate to [`Error::CommsLost`]/[`Error::PdoIntegrity`]. A success resets the counter and
    /// returns `Ok(Some(wkc))`.
    pub async fn run_cycle(&mut self, driver: &mut dyn WireDriver, logical_address: u32) -> Result<Option<u16>, Error> {
        self.pre_transmit();

        let outcome = driver.exchange_pdi(logical_address, self.pdi.as_mut_slice()).await;

        match outcome {
            FrameOutcome::Wkc(wkc) => {
                self.missed_cycles = 0;
                self.post_receive();
                Ok(Some(wkc))
            }
            FrameOutcome::PduTimeout => {
                self.missed_cycles += 1;
                if self.missed_cycles > MISSED_CYCLE_LIMIT {
                    Err(Error::CommsLost)
                } else {
                    Ok(None)
                }
            }
            FrameOutcome::WkcMismatch { .. } => {
                self.missed_cycles += 1;
                if self.missed_cycles > MISSED_CYCLE_LIMIT {
                    Err(Error::PdoIntegrity)
                } else {
                    Ok(None)
                }
            }
            FrameOutcome::Fatal(failure) => Err(Error::Driver(failure)),
        }
    }

    fn pre_transmit(&mut self) {
        for (index, mapping) in self.mapping.outputs.iter().enumerate() {
            let pending = &mut self.pending[index];
            if !pending.dirty {
                continue;
            }

            write_bits(self.pdi.outputs_mut(), mapping, pending.bits);
            pending.dirty = false;
        }
    }

    fn post_receive(&mut self) {
        // Input values are read on demand from the PDI via `input()`; nothing to cache here
        // beyond the buffer itself, which `exchange_pdi` already updated in place.
    }
}

fn write_bits(half: &mut [u8], mapping: &VariableMapping, value: u64) {
    if let Some(bit) = mapping.bit_offset {
        let byte = &mut half[mapping.pdi_byte_offset];
        let mask = 1u8 << bit;
        if value & 1 == 1 {
            *byte |= mask;
        } else {
            *byte &= !mask;
        }
        return;
    }

    let width = (mapping.bit_size as usize + 7) / 8;
    let bytes = value.to_le_bytes();
    half[mapping.pdi_byte_offset..mapping.pdi_byte_offset + width].copy_from_slice(&bytes[..width]);
}

fn read_bits(buffer: &[u8], mapping: &VariableMapping) -> u64 {
    if let Some(bit) = mapping.bit_offset {
        let byte = buffer[mapping.pdi_byte_offset];
        return u64::from((byte >> bit) & 1);
    }

    let width = (mapping.bit_size as usize + 7) / 8;
    let mut bytes = [0u8; 8];
    bytes[..width].copy_from_slice(&buffer[mapping.pdi_byte_offset..mapping.pdi_byte_offset + width]);
    u64::from_le_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::mock::MockDriver;
    use crate::mapping::VariableMapping;

    fn single_output_table() -> MappingTable {
        MappingTable {
            outputs: vec![VariableMapping {
                name: "Out".into(),
                pdi_byte_offset: 0,
                bit_offset: None,
                data_type: DataType::U8,
                is_input: false,
                bit_size: 8,
                owning_slave_index: 0,
            }],
            inputs: Vec::new(),
        }
    }

    #[tokio::test]
    async fn dirty_output_is_serialized_before_exchange() {
        let mut cyclic = CyclicExchange::new(Pdi::new(1, 0), single_output_table());
        cyclic.set_output("Out", 0x42).unwrap();

        let mut driver = MockDriver::default();
        driver.exchange_script.push_back(FrameOutcome::Wkc(1));

        cyclic.run_cycle(&mut driver, 0).await.unwrap();
        assert_eq!(cyclic.pdi().outputs()[0], 0x42);
    }

    /// Four timeouts then a success resets the
    /// counter, then six timeouts in a row escalate to `CommsLost` on the sixth.
    #[tokio::test]
    async fn ride_through_escalates_on_the_sixth_consecutive_timeout() {
        let mut cyclic = CyclicExchange::new(Pdi::new(0, 0), MappingTable::default());
        let mut driver = MockDriver::default();

        for _ in 0..4 {
            driver.exchange_script.push_back(FrameOutcome::PduTimeout);
        }
        driver.exchange_script.push_back(FrameOutcome::Wkc(1));

        for _ in 0..4 {
            assert_eq!(cyclic.run_cycle(&mut driver, 0).await.unwrap(), None);
        }
        assert_eq!(cyclic.run_cycle(&mut driver, 0).await.unwrap(), Some(1));
        assert_eq!(cyclic.missed_cycles, 0);

        for _ in 0..5 {
            driver.exchange_script.push_back(FrameOutcome::PduTimeout);
        }
        driver.exchange_script.push_back(FrameOutcome::PduTimeout);

        for _ in 0..5 {
            assert_eq!(cyclic.run_cycle(&mut driver, 0).await.unwrap(), None);
        }
        assert!(matches!(cyclic.run_cycle(&mut driver, 0).await, Err(Error::CommsLost)));
    }

    #[tokio::test]
    async fn wkc_mismatch_ride_through_escalates_to_pdo_integrity() {
        let mut cyclic = CyclicExchange::new(Pdi::new(0, 0), MappingTable::default());
        let mut driver = MockDriver::default();

        for _ in 0..6 {
            driver.exchange_script.push_back(FrameOutcome::WkcMismatch { expected: 2, received: 1 });
        }

        for _ in 0..5 {
            assert_eq!(cyclic.run_cycle(&mut driver, 0).await.unwrap(), None);
        }
        assert!(matches!(cyclic.run_cycle(&mut driver, 0).await, Err(Error::PdoIntegrity)));
    }

    #[tokio::test]
    async fn fatal_driver_failure_raises_immediately() {
        let mut cyclic = CyclicExchange::new(Pdi::new(0, 0), MappingTable::default());
        let mut driver = MockDriver::default();
        driver.exchange_script.push_back(FrameOutcome::Fatal(crate::error::DriverFailure::LinkDown));

        assert!(matches!(
            cyclic.run_cycle(&mut driver, 0).await,
            Err(Error::Driver(crate::error::DriverFailure::LinkDown))
        ));
    }

    #[tokio::test]
    async fn input_round_trips_through_post_receive() {
        let mapping = MappingTable {
            outputs: Vec::new(),
            inputs: vec![VariableMapping {
                name: "In".into(),
                pdi_byte_offset: 0,
                bit_offset: None,
                data_type: DataType::U16,
                is_input: true,
                bit_size: 16,
                owning_slave_index: 0,
            }],
        };
        let mut cyclic = CyclicExchange::new(Pdi::new(0, 2), mapping);

        let mut driver = MockDriver::default();
        driver.exchange_script.push_back(FrameOutcome::Wkc(1));
        cyclic.run_cycle(&mut driver, 0).await.unwrap();
        cyclic.pdi_mut().inputs_mut().copy_from_slice(&0x1234u16.to_le_bytes());

        assert_eq!(cyclic.input("In").unwrap(), 0x1234);
    }

    #[test]
    fn unknown_variable_is_an_error() {
        let mut cyclic = CyclicExchange::new(Pdi::new(1, 0), single_output_table());
        assert!(matches!(cyclic.set_output("Nope", 0), Err(Error::UnknownVariable)));
    }
}
