//! Mailbox header framing and the Mailbox Resilience layer (C7).
//!
//! Defined in ETG1000.6 under `TMBXHEADER`/Table 29.

use std::collections::HashMap;
use std::time::Duration;

use crate::driver::{MailboxCheckOutcome, ToggleState, WireDriver};
use crate::network::{NetworkDescription, SlaveDescriptor};

/// Mailbox service priority.
#[derive(Default, Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Priority {
    #[default]
    Lowest = 0x00,
    Low = 0x01,
    High = 0x02,
    Highest = 0x03,
}

/// Which mailbox protocol a message's payload uses.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum MailboxType {
    /// Error (ERR).
    Err = 0x00,
    /// ADS over EtherCAT (AoE).
    Aoe = 0x01,
    /// Ethernet over EtherCAT (EoE). Non-goal to act on, only framed.
    Eoe = 0x02,
    /// CAN application protocol over EtherCAT (CoE).
    Coe = 0x03,
    /// File Access over EtherCAT (FoE). Non-goal to act on, only framed.
    Foe = 0x04,
    /// Servo profile over EtherCAT (SoE).
    Soe = 0x05,
    /// Vendor-specific.
    VendorSpecific = 0x0f,
}

impl MailboxType {
    fn from_raw(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(Self::Err),
            0x01 => Some(Self::Aoe),
            0x02 => Some(Self::Eoe),
            0x03 => Some(Self::Coe),
            0x04 => Some(Self::Foe),
            0x05 => Some(Self::Soe),
            0x0f => Some(Self::VendorSpecific),
            _ => None,
        }
    }
}

/// The 6-byte mailbox header prefixing every mailbox service payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MailboxHeader {
    /// Payload length following this header.
    pub length: u16,
    /// Source/destination station address.
    pub address: u16,
    /// Priority.
    pub priority: Priority,
    /// Which protocol the payload carries.
    pub mailbox_type: MailboxType,
    /// Mailbox counter, 1..=7 inclusive (0 is reserved; wraps 7 -> 1). Used as the toggling
    /// sequence number for resilient reads.
    pub counter: u8,
}

impl MailboxHeader {
    /// Packed length, in bytes.
    pub const PACKED_LEN: usize = 6;

    /// Decode a header from its 6-byte wire form.
    pub fn unpack(raw: &[u8; Self::PACKED_LEN]) -> Option<Self> {
        let priority_and_type = raw[4];

        Some(Self {
            length: u16::from_le_bytes([raw[0], raw[1]]),
            address: u16::from_le_bytes([raw[2], raw[3]]),
            priority: match (priority_and_type >> 6) & 0x03 {
                0x00 => Priority::Lowest,
                0x01 => Priority::Low,
                0x02 => Priority::High,
                _ => Priority::Highest,
            },
            mailbox_type: MailboxType::from_raw(priority_and_type & 0x0f)?,
            counter: (raw[5] >> 1) & 0x07,
        })
    }

    /// Encode into the 6-byte wire form.
    pub fn pack(&self) -> [u8; Self::PACKED_LEN] {
        let mut buf = [0u8; Self::PACKED_LEN];

        buf[0..2].copy_from_slice(&self.length.to_le_bytes());
        buf[2..4].copy_from_slice(&self.address.to_le_bytes());
        buf[4] = ((self.priority as u8) << 6) | (self.mailbox_type as u8);
        buf[5] = (self.counter & 0x07) << 1;

        buf
    }
}

/// Diagnostic payload of a [`crate::master::MasterEvent::MailboxError`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailboxErrorEvent {
    /// The slave this error is about.
    pub slave_index: usize,
    /// A short, stable description of the failure.
    pub error: String,
}

/// Per-slave resilient mailbox poll state (C7).
///
/// Runs at `min(slave.pollPeriodMs for CoE slaves, 20 ms)` for every slave with `supportsCoE`,
/// tracking a toggle bit per slave.
pub struct MailboxPoller {
    toggles: HashMap<usize, ToggleState>,
    period: Duration,
}

impl MailboxPoller {
    /// Build a poller for the CoE-capable slaves named in `description`, at the shortest configured
    /// cadence (clamped to 20 ms).
    pub fn new(description: &NetworkDescription) -> Self {
        let period_ms = description
            .slaves
            .iter()
            .filter(|s| s.mailbox.supports_coe)
            .map(|s| s.mailbox.poll_period_ms)
            .min()
            .unwrap_or(20)
            .min(20);

        Self {
            toggles: HashMap::new(),
            period: Duration::from_millis(u64::from(period_ms)),
        }
    }

    /// The configured poll period.
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Poll every CoE-capable slave once, returning the new-mail slave indices and any soft
    /// failures observed.
    pub async fn poll_once(
        &mut self,
        driver: &mut dyn WireDriver,
        slaves: &[SlaveDescriptor],
    ) -> (Vec<usize>, Vec<MailboxErrorEvent>) {
        let mut new_mail = Vec::new();
        let mut errors = Vec::new();

        for (slave_index, slave) in slaves.iter().enumerate() {
            if !slave.mailbox.supports_coe {
                continue;
            }

            let last_toggle = *self.toggles.entry(slave_index).or_default();

            match driver
                .check_mailbox(slave_index, slave.mailbox.status_register_address, last_toggle)
                .await
            {
                MailboxCheckOutcome::NewMail => {
                    self.toggles.insert(slave_index, last_toggle.flipped());
                    new_mail.push(slave_index);
                    debug!("slave {} has new mailbox data", slave_index);
                }
                MailboxCheckOutcome::Empty => {}
                MailboxCheckOutcome::RetriesExhausted => {
                    warn!("slave {} mailbox resilient read exhausted retries", slave_index);
                    errors.push(MailboxErrorEvent {
                        slave_index,
                        error: "resilient-read-failed".to_string(),
                    });
                }
                MailboxCheckOutcome::Error(code) => {
                    warn!("slave {} mailbox poll error: {}", slave_index, code);
                    errors.push(MailboxErrorEvent {
                        slave_index,
                        error: format!("driver error {code}"),
                    });
                }
            }
        }

        (new_mail, errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::mock::MockDriver;
    use crate::network::MailboxConfig;

    fn coe_slave(poll_period_ms: u32) -> SlaveDescriptor {
        SlaveDescriptor {
            identity: Default::default(),
            configured_address: 0x1001,
            auto_increment_address: 0,
            process_data: None,
            mailbox: MailboxConfig {
                status_register_address: 0x080d,
                write_address: 0x1000,
                read_address: 0x1400,
                poll_period_ms,
                supports_coe: true,
                supports_eoe: false,
                supports_foe: false,
            },
            init_commands: Vec::new(),
        }
    }

    #[test]
    fn header_round_trips() {
        let header = MailboxHeader {
            length: 10,
            address: 0x1001,
            priority: Priority::High,
            mailbox_type: MailboxType::Coe,
            counter: 3,
        };

        let parsed = MailboxHeader::unpack(&header.pack()).unwrap();
        assert_eq!(header, parsed);
    }

    /// Toggle sequence starts at `Unknown` and then alternates on every observed flip.
    #[tokio::test]
    async fn mailbox_toggle_sequence() {
        let slaves = vec![coe_slave(20)];
        let mut poller = MailboxPoller::new(&NetworkDescription {
            master: Default::default(),
            slaves: slaves.clone(),
        });

        let mut driver = MockDriver::default();
        for _ in 0..5 {
            driver.mailbox_script.push_back(MailboxCheckOutcome::NewMail);
        }

        let mut observed = Vec::new();
        for _ in 0..5 {
            let before = *poller.toggles.get(&0).unwrap_or(&ToggleState::Unknown);
            observed.push(before.to_wire());
            poller.poll_once(&mut driver, &slaves).await;
        }

        assert_eq!(observed, vec![2, 0, 1, 0, 1]);
    }

    #[tokio::test]
    async fn resilient_read_failure_emits_event_and_keeps_polling() {
        let slaves = vec![coe_slave(20)];
        let mut poller = MailboxPoller::new(&NetworkDescription {
            master: Default::default(),
            slaves: slaves.clone(),
        });

        let mut driver = MockDriver::default();
        driver.mailbox_script.push_back(MailboxCheckOutcome::RetriesExhausted);

        let (new_mail, errors) = poller.poll_once(&mut driver, &slaves).await;

        assert!(new_mail.is_empty());
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].error, "resilient-read-failed");
    }
}
