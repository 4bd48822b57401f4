//! Emergency Channel (C8): periodic read of the most recent CoE emergency, deduplicated per
//! slave against the last one emitted.

use std::collections::HashMap;
use std::time::Duration;

use crate::driver::WireDriver;
use crate::events::EmergencyEvent;
use crate::network::NetworkDescription;

/// Default poll period.
pub const DEFAULT_POLL_PERIOD_MS: u64 = 10;

/// Per-slave emergency dedup state: the last `(error_code, error_register)` pair emitted for that
/// slave, so a repeated read of the same emergency is dropped silently.
#[derive(Default)]
pub struct EmergencyPoller {
    last_emitted: HashMap<usize, (u16, u8)>,
    period: Duration,
}

impl EmergencyPoller {
    /// Build a poller at `poll_period_ms` (or [`DEFAULT_POLL_PERIOD_MS`] if `None`).
    pub fn new(poll_period_ms: Option<u64>) -> Self {
        Self {
            last_emitted: HashMap::new(),
            period: Duration::from_millis(poll_period_ms.unwrap_or(DEFAULT_POLL_PERIOD_MS)),
        }
    }

    /// The configured poll period.
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Read the most recent global emergency once, filter to CoE-capable slaves, and return an
    /// event only if it differs from the last one emitted for that slave.
    pub async fn poll_once(&mut self, driver: &mut dyn WireDriver, description: &NetworkDescription) -> Option<EmergencyEvent> {
        let (slave_index, error_code, error_register) = driver.last_emergency().await?;

        let supports_coe = description
            .slaves
            .get(slave_index)
            .map(|s| s.mailbox.supports_coe)
            .unwrap_or(false);

        if !supports_coe {
            return None;
        }

        let key = (error_code, error_register);
        if self.last_emitted.get(&slave_index) == Some(&key) {
            return None;
        }

        self.last_emitted.insert(slave_index, key);

        Some(EmergencyEvent {
            slave_index,
            error_code,
            error_register,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::mock::MockDriver;
    use crate::network::{MailboxConfig, MasterConfig, SlaveDescriptor, SlaveIdentity};

    fn coe_description() -> NetworkDescription {
        NetworkDescription {
            master: MasterConfig::default(),
            slaves: vec![SlaveDescriptor {
                identity: SlaveIdentity::default(),
                configured_address: 0x1001,
                auto_increment_address: 0,
                process_data: None,
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

    /// Dedup holds across repeats and releases once the underlying emergency value changes.
    #[tokio::test]
    async fn emergency_dedup() {
        let description = coe_description();
        let mut poller = EmergencyPoller::new(None);
        let mut driver = MockDriver::default();

        driver.emergency_script.push_back(Some((0, 0x1234, 0x56)));
        driver.emergency_script.push_back(Some((0, 0x1234, 0x56)));

        let first = poller.poll_once(&mut driver, &description).await;
        assert_eq!(
            first,
            Some(EmergencyEvent {
                slave_index: 0,
                error_code: 0x1234,
                error_register: 0x56,
            })
        );

        let second = poller.poll_once(&mut driver, &description).await;
        assert_eq!(second, None);

        driver.emergency_script.push_back(Some((0, 0x5678, 0x56)));
        let third = poller.poll_once(&mut driver, &description).await;
        assert_eq!(
            third,
            Some(EmergencyEvent {
                slave_index: 0,
                error_code: 0x5678,
                error_register: 0x56,
            })
        );
    }

    #[tokio::test]
    async fn non_coe_slave_emergencies_are_dropped() {
        let mut description = coe_description();
        description.slaves[0].mailbox.supports_coe = false;

        let mut poller = EmergencyPoller::new(None);
        let mut driver = MockDriver::default();
        driver.emergency_script.push_back(Some((0, 0x1234, 0x56)));

        assert_eq!(poller.poll_once(&mut driver, &description).await, None);
    }

    #[tokio::test]
    async fn no_emergency_reported_yields_none() {
        let description = coe_description();
        let mut poller = EmergencyPoller::new(None);
        let mut driver = MockDriver::default();

        assert_eq!(poller.poll_once(&mut driver, &description).await, None);
    }
}
