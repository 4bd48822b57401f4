//! Register & SII Access (C2): typed read/write over the wire driver boundary.

use std::time::Duration;

use crate::driver::{Command, FrameOutcome, WireDriver};
use crate::error::{DriverFailure, Error, PduError};
use crate::sii::{SiiControl, SiiRequest};

/// How a slave is addressed for one register operation.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Address {
    /// Every slave on the bus.
    Broadcast,
    /// Topological position, signed relative to the master.
    AutoIncrement(i16),
    /// Fixed station address assigned during configuration.
    Configured(u16),
}

/// Typed register/SII access, built on one [`WireDriver`] plus the PDU retry count from
/// [`crate::network::MasterConfig`].
pub struct Transport<'a> {
    driver: &'a mut dyn WireDriver,
    pdu_retry_count: u8,
    eeprom_timeout: Duration,
}

impl<'a> Transport<'a> {
    /// Build a transport over `driver`, applying `pdu_retry_count` retries per operation and
    /// `eeprom_timeout` to SII busy-bit polling.
    pub fn new(driver: &'a mut dyn WireDriver, pdu_retry_count: u8, eeprom_timeout: Duration) -> Self {
        Self {
            driver,
            pdu_retry_count,
            eeprom_timeout,
        }
    }

    fn command_for(address: Address, register: u16) -> (Command, bool) {
        match address {
            Address::Broadcast => (Command::Brd { register }, false),
            Address::AutoIncrement(pos) => (Command::Aprd { address: pos, register }, false),
            Address::Configured(addr) => (Command::Fprd { address: addr, register }, false),
        }
    }

    fn write_command_for(address: Address, register: u16) -> Command {
        match address {
            Address::Broadcast => Command::Bwr { register },
            Address::AutoIncrement(pos) => Command::Apwr { address: pos, register },
            Address::Configured(addr) => Command::Fpwr { address: addr, register },
        }
    }

    /// Send one exchange, retrying up to `pdu_retry_count` additional times on
    /// [`FrameOutcome::PduTimeout`]/[`FrameOutcome::WkcMismatch`], returning the last failure
    /// category after exhaustion.
    async fn exchange_with_retry(&mut self, command: Command, data: &mut [u8]) -> Result<u16, Error> {
        let mut last_err = Error::Pdu(PduError::Unreachable);

        for _ in 0..=self.pdu_retry_count {
            match self.driver.exchange(command, data).await {
                FrameOutcome::Wkc(wkc) => return Ok(wkc),
                FrameOutcome::PduTimeout => last_err = Error::Timeout,
                FrameOutcome::WkcMismatch { expected, received } => {
                    last_err = Error::WorkingCounter { expected, received }
                }
                FrameOutcome::Fatal(failure) => return Err(Error::Driver(failure)),
            }
        }

        Err(last_err)
    }

    /// Send a raw command carrying `data`, retrying per the configured PDU retry count, and
    /// return the working counter. Used by the topology walk, which needs the WKC itself (the
    /// slave count) rather than any particular register's contents.
    pub async fn exchange_raw(&mut self, command: Command, data: &mut [u8]) -> Result<u16, Error> {
        self.exchange_with_retry(command, data).await
    }

    /// Read a register, expecting `LEN` bytes.
    pub async fn read_register<const LEN: usize>(&mut self, address: Address, register: u16) -> Result<[u8; LEN], Error> {
        let (command, _) = Self::command_for(address, register);
        let mut buf = [0u8; LEN];
        self.exchange_with_retry(command, &mut buf).await?;
        Ok(buf)
    }

    /// Write `value` to a register.
    pub async fn write_register(&mut self, address: Address, register: u16, value: &[u8]) -> Result<u16, Error> {
        let command = Self::write_command_for(address, register);
        let mut buf = value.to_vec();
        self.exchange_with_retry(command, &mut buf).await
    }

    /// Read `length_words` 16-bit words from SII starting at `word_address`, via the
    /// `SiiControl`/`SiiAddress`/`SiiData` busy-bit handshake.
    ///
    /// Write the request, poll
    /// `SiiControl` until `busy` clears, then read `SiiData` (4 or 8 octets depending on
    /// `control.read_size_is_8_octets`).
    pub async fn read_sii(&mut self, address: Address, word_address: u16, length_words: u16) -> Result<Vec<u8>, Error> {
        let mut out = Vec::with_capacity(usize::from(length_words) * 2);
        let mut next_word = word_address;

        while out.len() < usize::from(length_words) * 2 {
            let request = SiiRequest::read(next_word);
            self.write_register(address, crate::register::RegisterAddress::SiiControl.into(), &request.to_array())
                .await?;

            let control = self.poll_sii_busy(address).await?;

            let read_len = if control.read_size_is_8_octets { 8 } else { 4 };
            let data = self
                .read_register_dyn(address, crate::register::RegisterAddress::SiiData.into(), read_len)
                .await?;

            out.extend_from_slice(&data);
            next_word += (read_len / 2) as u16;
        }

        out.truncate(usize::from(length_words) * 2);
        Ok(out)
    }

    async fn poll_sii_busy(&mut self, address: Address) -> Result<SiiControl, Error> {
        let deadline = std::time::Instant::now() + self.eeprom_timeout;

        loop {
            let raw: [u8; 2] = self.read_register(address, crate::register::RegisterAddress::SiiControl.into()).await?;
            let control = SiiControl::from_bits(u16::from_le_bytes(raw));

            if !control.busy {
                return Ok(control);
            }

            if std::time::Instant::now() >= deadline {
                return Err(Error::Timeout);
            }

            #[cfg(not(test))]
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    async fn read_register_dyn(&mut self, address: Address, register: u16, len: usize) -> Result<Vec<u8>, Error> {
        let (command, _) = Self::command_for(address, register);
        let mut buf = vec![0u8; len];
        self.exchange_with_retry(command, &mut buf).await?;
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::mock::MockDriver;

    #[tokio::test]
    async fn retries_then_reports_timeout() {
        let mut driver = MockDriver::default();
        driver.exchange_script.push_back(FrameOutcome::PduTimeout);
        driver.exchange_script.push_back(FrameOutcome::PduTimeout);

        let mut transport = Transport::new(&mut driver, 1, Duration::from_millis(10));
        let result = transport.read_register::<2>(Address::Configured(0x1001), 0x0130).await;

        assert!(matches!(result, Err(Error::Timeout)));
    }

    #[tokio::test]
    async fn recovers_after_a_transient_failure_within_budget() {
        let mut driver = MockDriver::default();
        driver.exchange_script.push_back(FrameOutcome::PduTimeout);
        driver.exchange_script.push_back(FrameOutcome::Wkc(1));

        let mut transport = Transport::new(&mut driver, 2, Duration::from_millis(10));
        let result = transport.read_register::<2>(Address::Configured(0x1001), 0x0130).await;

        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn fatal_driver_failure_skips_retry_budget() {
        let mut driver = MockDriver::default();
        driver.exchange_script.push_back(FrameOutcome::Fatal(DriverFailure::LinkDown));

        let mut transport = Transport::new(&mut driver, 3, Duration::from_millis(10));
        let result = transport.read_register::<2>(Address::Configured(0x1001), 0x0130).await;

        assert!(matches!(result, Err(Error::Driver(DriverFailure::LinkDown))));
    }
}
