//! Master Facade (C9): the single entry point callers drive, orchestrating every other component
//! behind one lock shared with the two background poll loops.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;

use crate::coe::{self, CoeHeader, InitSdoHeader};
use crate::cyclic::CyclicExchange;
use crate::driver::WireDriver;
use crate::emergency::EmergencyPoller;
use crate::error::{Error, Item, MailboxError};
use crate::esm;
use crate::events::{EmergencyEvent, MasterEvent, EVENT_CHANNEL_CAPACITY};
use crate::mailbox::{MailboxHeader, MailboxPoller};
use crate::mapping::MappingTable;
use crate::network::{NetworkDescription, StateChangeEvent};
use crate::pdi::Pdi;
use crate::state::AlState;
use crate::transport::{Address, Transport};

/// Byte length of one mailbox header + CoE header + initiate-SDO header, the unit a mailbox-in
/// Sync Manager read/write is sized to for expedited transfers.
const MAILBOX_FRAME_LEN: usize = MailboxHeader::PACKED_LEN + CoeHeader::PACKED_LEN + InitSdoHeader::PACKED_LEN;

/// Logical address the process data image is exchanged at. A single-segment LRW is sufficient
/// for the bus sizes this crate targets; multi-segment logical addressing is a non-goal.
const LOGICAL_ADDRESS: u32 = 0x0001_0000;

/// The crate's single entry point. Owns the wire driver behind a mutex shared with the
/// background mailbox-resilience and emergency-channel loops spawned by [`Master::initialize`],
/// so a caller never needs to coordinate exclusive bus access by hand.
pub struct Master {
    driver: Arc<Mutex<Box<dyn WireDriver>>>,
    description: Arc<NetworkDescription>,
    cyclic: Mutex<CyclicExchange>,
    al_state: Mutex<AlState>,
    events_tx: broadcast::Sender<MasterEvent>,
    last_emergency: Arc<Mutex<Option<EmergencyEvent>>>,
    closed: Arc<AtomicBool>,
    mailbox_handle: Option<JoinHandle<()>>,
    emergency_handle: Option<JoinHandle<()>>,
}

impl Master {
    /// Build a master over an already-discovered (or externally supplied) [`NetworkDescription`].
    ///
    /// Builds the mapping table and allocates a zeroed PDI sized to the bus; the background
    /// loops are not started until [`Master::initialize`] is called.
    pub fn new(driver: Box<dyn WireDriver>, description: NetworkDescription) -> Result<Self, Error> {
        let output_size = description.total_output_size();
        let input_size = description.total_input_size();
        let mapping = MappingTable::build(&description)?;
        let pdi = Pdi::new(output_size, input_size);
        let (events_tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Ok(Self {
            driver: Arc::new(Mutex::new(driver)),
            description: Arc::new(description),
            cyclic: Mutex::new(CyclicExchange::new(pdi, mapping)),
            // Slaves power on into Init; a freshly constructed master assumes that baseline
            // rather than the unreachable `AlState::None`, so `request_state` can route from it.
            al_state: Mutex::new(AlState::Init),
            events_tx,
            last_emergency: Arc::new(Mutex::new(None)),
            closed: Arc::new(AtomicBool::new(false)),
            mailbox_handle: None,
            emergency_handle: None,
        })
    }

    /// Subscribe to the event stream (state changes, emergencies, mailbox soft failures).
    pub fn subscribe(&self) -> broadcast::Receiver<MasterEvent> {
        self.events_tx.subscribe()
    }

    /// Start the two background poll loops. Idempotent after `close`, a no-op.
    pub fn initialize(&mut self) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }

        self.mailbox_handle = Some(tokio::spawn(run_mailbox_loop(
            Arc::clone(&self.driver),
            Arc::clone(&self.description),
            self.events_tx.clone(),
            Arc::clone(&self.closed),
        )));

        self.emergency_handle = Some(tokio::spawn(run_emergency_loop(
            Arc::clone(&self.driver),
            Arc::clone(&self.description),
            self.events_tx.clone(),
            Arc::clone(&self.last_emergency),
            Arc::clone(&self.closed),
        )));
    }

    /// Compare every slave's live SII identity against [`NetworkDescription::slaves`], failing at
    /// the first mismatch.
    pub async fn verify_topology(&self) -> Result<(), Error> {
        self.ensure_open()?;
        let mut driver = self.driver.lock().await;
        esm::verify_topology(&mut **driver, &self.description).await
    }

    /// Drive every slave to `target`, applying init commands and the SM-watchdog pre-gate along
    /// the way, and broadcast the resulting [`StateChangeEvent`].
    pub async fn request_state(&self, target: AlState) -> Result<AlState, Error> {
        self.ensure_open()?;

        let current = *self.al_state.lock().await;
        let reached = {
            let mut driver = self.driver.lock().await;
            esm::request_state(&mut **driver, &self.description, current, target).await?
        };

        *self.al_state.lock().await = reached;

        let _ = self.events_tx.send(MasterEvent::StateChange(StateChangeEvent {
            previous_state: current,
            current_state: reached,
            slave_index: None,
        }));

        Ok(reached)
    }

    /// The last AL state `request_state` reached (or `AlState::None` before the first call).
    pub async fn al_state(&self) -> AlState {
        *self.al_state.lock().await
    }

    /// Run one cyclic exchange: serialize dirty outputs, perform the logical read/write, and
    /// ride through up to five consecutive soft failures before escalating.
    pub async fn run_cycle(&self) -> Result<Option<u16>, Error> {
        self.ensure_open()?;
        let mut driver = self.driver.lock().await;
        let mut cyclic = self.cyclic.lock().await;
        cyclic.run_cycle(&mut **driver, LOGICAL_ADDRESS).await
    }

    /// Stage a new value for a mapped output variable.
    pub async fn set_output(&self, variable: &str, bits: u64) -> Result<(), Error> {
        self.cyclic.lock().await.set_output(variable, bits)
    }

    /// Read the last-received value of a mapped input variable.
    pub async fn input(&self, variable: &str) -> Result<u64, Error> {
        self.cyclic.lock().await.input(variable)
    }

    /// Read one byte of a slave's process data image, addressed by an offset local to that
    /// slave's output half followed by its input half (see `resolve_pdo_byte_offset`), bypassing
    /// the mapping table.
    pub async fn read_pdo_byte(&self, slave_index: usize, offset: usize) -> Result<u8, Error> {
        let pdi_offset = self.resolve_pdo_byte_offset(slave_index, offset)?;
        self.cyclic
            .lock()
            .await
            .read_slave_byte(pdi_offset)
            .ok_or(Error::NotFound {
                item: Item::PdoEntry,
                index: Some(offset),
            })
    }

    /// Write one byte of a slave's process data image. See `read_pdo_byte` for the offset
    /// convention.
    pub async fn write_pdo_byte(&self, slave_index: usize, offset: usize, value: u8) -> Result<(), Error> {
        let pdi_offset = self.resolve_pdo_byte_offset(slave_index, offset)?;
        if self.cyclic.lock().await.write_slave_byte(pdi_offset, value) {
            Ok(())
        } else {
            Err(Error::NotFound {
                item: Item::PdoEntry,
                index: Some(offset),
            })
        }
    }

    /// Resolve a `(slave, local offset)` pair to a global PDI byte offset. A slave's addressable
    /// window is its output half followed by its input half — `offset` in `[0, output_len)`
    /// lands in the outputs half, `[output_len, output_len + input_len)` in the inputs half.
    fn resolve_pdo_byte_offset(&self, slave_index: usize, offset: usize) -> Result<usize, Error> {
        let slave = self
            .description
            .slaves
            .get(slave_index)
            .ok_or(Error::SlaveNotFound(slave_index))?;
        let block = slave.process_data.as_ref().ok_or(Error::SlaveNotFound(slave_index))?;

        let output_len = block.output_byte_len();
        if offset < output_len {
            return Ok(block.output_byte_offset as usize + offset);
        }

        let input_offset = offset - output_len;
        if input_offset >= block.input_byte_len() {
            return Err(Error::NotFound {
                item: Item::PdoEntry,
                index: Some(offset),
            });
        }

        Ok(self.description.total_output_size() + block.input_byte_offset as usize + input_offset)
    }

    /// Expedited SDO upload: write the request to the slave's mailbox-out SM, then poll its
    /// mailbox-in SM for the response.
    pub async fn sdo_read(&self, slave_index: usize, index: u16, sub_index: u8) -> Result<Vec<u8>, Error> {
        self.ensure_open()?;
        let slave = self.coe_slave(slave_index)?;

        let frame = coe::build_upload_frame(slave.configured_address, 1, index, sub_index);

        let mut driver = self.driver.lock().await;
        let mut transport = self.mailbox_transport(&mut driver);
        transport
            .write_register(Address::Configured(slave.configured_address), slave.mailbox.write_address, &frame)
            .await?;

        let response = self.poll_mailbox_response(&mut transport, slave.configured_address, slave.mailbox.read_address).await?;
        coe::parse_response_frame(&response, index, sub_index)
    }

    /// Expedited SDO download: write the request, then poll for the (non-payload-bearing)
    /// acknowledgement or abort.
    pub async fn sdo_write(&self, slave_index: usize, index: u16, sub_index: u8, data: &[u8]) -> Result<(), Error> {
        self.ensure_open()?;
        let slave = self.coe_slave(slave_index)?;

        let frame = coe::build_download_frame(slave.configured_address, 1, index, sub_index, data)?;

        let mut driver = self.driver.lock().await;
        let mut transport = self.mailbox_transport(&mut driver);
        transport
            .write_register(Address::Configured(slave.configured_address), slave.mailbox.write_address, &frame)
            .await?;

        let response = self.poll_mailbox_response(&mut transport, slave.configured_address, slave.mailbox.read_address).await?;
        coe::parse_response_frame(&response, index, sub_index).map(|_| ())
    }

    fn coe_slave(&self, slave_index: usize) -> Result<&crate::network::SlaveDescriptor, Error> {
        let slave = self
            .description
            .slaves
            .get(slave_index)
            .ok_or(Error::SlaveNotFound(slave_index))?;

        if !slave.mailbox.supports_coe {
            return Err(Error::Mailbox(MailboxError::NoMailbox));
        }

        Ok(slave)
    }

    fn mailbox_transport<'a>(&self, driver: &'a mut Box<dyn WireDriver>) -> Transport<'a> {
        Transport::new(
            &mut **driver,
            self.description.master.pdu_retry_count,
            Duration::from_millis(u64::from(self.description.master.timeouts.mailbox_ms)),
        )
    }

    /// Poll a slave's mailbox-in Sync Manager until its length field is non-zero or the
    /// configured mailbox timeout elapses.
    ///
    /// Grounded on `Transport::poll_sii_busy`'s busy-bit deadline loop: same shape, applied to a
    /// mailbox length field instead of an SII control bit.
    async fn poll_mailbox_response(
        &self,
        transport: &mut Transport<'_>,
        configured_address: u16,
        read_address: u16,
    ) -> Result<Vec<u8>, Error> {
        let deadline = Instant::now() + Duration::from_millis(u64::from(self.description.master.timeouts.mailbox_ms));

        loop {
            let raw: [u8; MAILBOX_FRAME_LEN] = transport.read_register(Address::Configured(configured_address), read_address).await?;

            if u16::from_le_bytes([raw[0], raw[1]]) != 0 {
                return Ok(raw.to_vec());
            }

            if Instant::now() >= deadline {
                return Err(Error::Timeout);
            }

            #[cfg(not(test))]
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    /// Read `length_words` SII words from a slave's EEPROM.
    pub async fn read_eeprom(&self, slave_index: usize, word_address: u16, length_words: u16) -> Result<Vec<u8>, Error> {
        self.ensure_open()?;
        let slave = self
            .description
            .slaves
            .get(slave_index)
            .ok_or(Error::SlaveNotFound(slave_index))?;

        let mut driver = self.driver.lock().await;
        let mut transport = Transport::new(
            &mut **driver,
            self.description.master.pdu_retry_count,
            Duration::from_millis(u64::from(self.description.master.timeouts.eeprom_ms)),
        );

        transport.read_sii(Address::Configured(slave.configured_address), word_address, length_words).await
    }

    /// The most recent CoE emergency observed by the background emergency loop, if any.
    pub async fn get_last_emergency(&self) -> Option<EmergencyEvent> {
        self.last_emergency.lock().await.clone()
    }

    /// Stop the background loops. Idempotent: a second call is a no-op. Every other method
    /// returns `Error::Closed` once this has run.
    pub async fn close(&mut self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Some(handle) = self.mailbox_handle.take() {
            handle.abort();
        }
        if let Some(handle) = self.emergency_handle.take() {
            handle.abort();
        }
    }

    fn ensure_open(&self) -> Result<(), Error> {
        if self.closed.load(Ordering::SeqCst) {
            Err(Error::Closed)
        } else {
            Ok(())
        }
    }
}

async fn run_mailbox_loop(
    driver: Arc<Mutex<Box<dyn WireDriver>>>,
    description: Arc<NetworkDescription>,
    events_tx: broadcast::Sender<MasterEvent>,
    closed: Arc<AtomicBool>,
) {
    let mut poller = MailboxPoller::new(&description);
    let period = poller.period();

    while !closed.load(Ordering::SeqCst) {
        let errors = {
            let mut guard = driver.lock().await;
            poller.poll_once(&mut **guard, &description.slaves).await.1
        };

        for error in errors {
            let _ = events_tx.send(MasterEvent::MailboxError(error));
        }

        tokio::time::sleep(period).await;
    }
}

async fn run_emergency_loop(
    driver: Arc<Mutex<Box<dyn WireDriver>>>,
    description: Arc<NetworkDescription>,
    events_tx: broadcast::Sender<MasterEvent>,
    last_emergency: Arc<Mutex<Option<EmergencyEvent>>>,
    closed: Arc<AtomicBool>,
) {
    let mut poller = EmergencyPoller::new(None);
    let period = poller.period();

    while !closed.load(Ordering::SeqCst) {
        let event = {
            let mut guard = driver.lock().await;
            poller.poll_once(&mut **guard, &description).await
        };

        if let Some(event) = event {
            *last_emergency.lock().await = Some(event);
            let _ = events_tx.send(MasterEvent::Emergency(event));
        }

        tokio::time::sleep(period).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::mock::MockDriver;
    use crate::driver::FrameOutcome;
    use crate::network::{MailboxConfig, MasterConfig, ProcessDataAddressing, ProcessDataBlock, SlaveDescriptor, SlaveIdentity};

    fn single_slave_description() -> NetworkDescription {
        NetworkDescription {
            master: MasterConfig::default(),
            slaves: vec![SlaveDescriptor {
                identity: SlaveIdentity::default(),
                configured_address: 0x1001,
                auto_increment_address: 0,
                process_data: Some(ProcessDataBlock {
                    output_byte_offset: 0,
                    output_bit_length: 8,
                    input_byte_offset: 0,
                    input_bit_length: 16,
                    addressing: ProcessDataAddressing::ProcessImage,
                    entries: Vec::new(),
                }),
                mailbox: MailboxConfig {
                    status_register_address: 0x080d,
                    write_address: 0x1000,
                    read_address: 0x1400,
                    poll_period_ms: 20,
                    supports_coe: true,
                    supports_eoe: false,
                    supports_foe: false,
                },
                init_commands: Vec::new(),
            }],
        }
    }

    fn sdo_response_frame(index: u16, sub_index: u8, data: &[u8]) -> Vec<u8> {
        let mut buf = [0u8; 4];
        buf[..data.len()].copy_from_slice(data);

        let header = crate::coe::InitSdoHeader {
            flags: crate::coe::InitSdoFlags {
                size_indicator: true,
                expedited_transfer: true,
                size: (4 - data.len()) as u8,
                complete_access: false,
                command: crate::coe::command_specifier::UPLOAD_REQUEST,
            },
            index,
            sub_index,
            data: buf,
        };

        let coe_header = crate::coe::CoeHeader {
            number: 0,
            service: crate::coe::CoeService::SdoResponse,
        };

        let mailbox_header = crate::mailbox::MailboxHeader {
            length: (CoeHeader::PACKED_LEN + InitSdoHeader::PACKED_LEN) as u16,
            address: 0x1001,
            priority: crate::mailbox::Priority::Lowest,
            mailbox_type: crate::mailbox::MailboxType::Coe,
            counter: 1,
        };

        let mut frame = Vec::with_capacity(MAILBOX_FRAME_LEN);
        frame.extend_from_slice(&mailbox_header.pack());
        frame.extend_from_slice(&coe_header.pack());
        frame.extend_from_slice(&header.pack());
        frame
    }

    #[tokio::test]
    async fn sdo_read_recovers_expedited_payload() {
        let description = single_slave_description();
        let mut driver = MockDriver::default();

        // Write the upload request, then the poll read returns a populated response frame.
        driver.exchange_script.push_back(FrameOutcome::Wkc(1));
        driver.exchange_script.push_back(FrameOutcome::Wkc(1));
        driver.read_payloads.push_back(sdo_response_frame(0x1018, 1, &[0x42]));

        let master = Master::new(Box::new(driver), description).unwrap();
        let value = master.sdo_read(0, 0x1018, 1).await.unwrap();

        assert_eq!(value, vec![0x42]);
    }

    #[tokio::test]
    async fn sdo_write_against_a_non_coe_slave_is_rejected() {
        let mut description = single_slave_description();
        description.slaves[0].mailbox.supports_coe = false;

        let master = Master::new(Box::new(MockDriver::default()), description).unwrap();
        let result = master.sdo_write(0, 0x1018, 1, &[1]).await;

        assert!(matches!(result, Err(Error::Mailbox(MailboxError::NoMailbox))));
    }

    #[tokio::test]
    async fn read_pdo_byte_resolves_into_the_input_half() {
        let description = single_slave_description();
        let master = Master::new(Box::new(MockDriver::default()), description).unwrap();

        // Slave 0 has 1 output byte, so local offset 1 (first input byte) resolves to global
        // offset `total_output_size() + 0` == 1.
        master.write_pdo_byte(0, 1, 0xab).await.unwrap();
        assert_eq!(master.read_pdo_byte(0, 1).await.unwrap(), 0xab);
    }

    #[tokio::test]
    async fn operations_after_close_are_rejected() {
        let description = single_slave_description();
        let mut master = Master::new(Box::new(MockDriver::default()), description).unwrap();

        master.initialize();
        master.close().await;
        master.close().await; // idempotent

        assert!(matches!(master.run_cycle().await, Err(Error::Closed)));
    }

    /// A watchdog pre-gate rejection during `Ps` does not fail the transition.
    ///
    /// Starting from the power-on `Init` state, reaching `SafeOp` walks `Ip` (Init -> PreOp, no
    /// watchdog gate) then `Ps` (PreOp -> SafeOp, gated). `pdu_retry_count` is pinned to 0 so the
    /// single scripted watchdog rejection fails outright rather than being retried into success.
    #[tokio::test]
    async fn request_state_survives_a_rejected_watchdog_pregate() {
        let mut description = single_slave_description();
        description.master.watchdog_timeout_ms = Some(100);
        description.master.pdu_retry_count = 0;

        let mut driver = MockDriver::default();
        driver.exchange_script.push_back(FrameOutcome::Wkc(1)); // Ip: AL control write
        driver.exchange_script.push_back(FrameOutcome::Wkc(1)); // Ip: AL status read
        driver.exchange_script.push_back(FrameOutcome::WkcMismatch { expected: 1, received: 0 }); // Ps: watchdog write, rejected
        driver.exchange_script.push_back(FrameOutcome::Wkc(1)); // Ps: AL control write
        driver.exchange_script.push_back(FrameOutcome::Wkc(1)); // Ps: AL status read
        driver.read_payloads.push_back(vec![AlState::PreOp.as_raw(), 0]);
        driver.read_payloads.push_back(vec![AlState::SafeOp.as_raw(), 0]);

        let master = Master::new(Box::new(driver), description).unwrap();
        let reached = master.request_state(AlState::SafeOp).await.unwrap();

        assert_eq!(reached, AlState::SafeOp);
    }
}
