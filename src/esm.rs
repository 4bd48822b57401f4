//! ESM Orchestrator (C5): drives slaves through the EtherCAT State Machine.

use std::time::{Duration, Instant};

use crate::al_control::AlControl;
use crate::al_status_code::AlStatusCode;
use crate::error::Error;
use crate::network::{InitCommand, InitCommandVariant, NetworkDescription, TransitionCode};
use crate::register::RegisterAddress;
use crate::state::{AlState, Transition};
use crate::transport::{Address, Transport};

const ORDER: [AlState; 4] = [AlState::Init, AlState::PreOp, AlState::SafeOp, AlState::Op];

fn order_index(state: AlState) -> Option<usize> {
    ORDER.iter().position(|s| *s == state)
}

/// Compute the ordered sequence of single-step transitions from `current` to `target`.
///
/// Moving "up" the ladder (Init -> PreOp -> SafeOp -> Op) always proceeds one state at a time.
/// Moving "down" takes the direct shortcut code to `Init` (`SI`/`OI`) when the target is `Init`;
/// otherwise it steps down one state at a time (`SP`, `OS`), matching the set of two-letter codes
/// the standard actually defines.
pub fn transition_path(current: AlState, target: AlState) -> Vec<Transition> {
    if current == target {
        return Vec::new();
    }

    let (Some(from_idx), Some(to_idx)) = (order_index(current), order_index(target)) else {
        return Vec::new();
    };

    if to_idx > from_idx {
        (from_idx..to_idx)
            .filter_map(|i| Transition::between(ORDER[i], ORDER[i + 1]))
            .collect()
    } else if target == AlState::Init {
        Transition::between(current, AlState::Init).into_iter().collect()
    } else {
        (to_idx..from_idx)
            .rev()
            .filter_map(|i| Transition::between(ORDER[i + 1], ORDER[i]))
            .collect()
    }
}

/// Whether `command` applies to `step`: either it is explicitly tagged with the step's code, or
/// it carries the [`TransitionCode::Op`] wildcard (applied to every step of a boot sequence).
fn applies_to_step(command: &InitCommand, step: TransitionCode) -> bool {
    command.transitions.contains(&step) || command.transitions.contains(&TransitionCode::Op)
}

/// Drive every slave from `current` to `target`, applying init commands and the SM-watchdog
/// pre-gate.
pub async fn request_state(
    driver: &mut dyn crate::driver::WireDriver,
    description: &NetworkDescription,
    current: AlState,
    target: AlState,
) -> Result<AlState, Error> {
    let path = transition_path(current, target);
    let mut reached = current;

    for transition in path {
        let step_code = TransitionCode::from(transition);

        run_init_commands(driver, description, step_code).await?;

        if step_code == TransitionCode::Ps {
            if let Some(watchdog_ms) = description.master.watchdog_timeout_ms {
                apply_watchdog_pregate(driver, description, watchdog_ms).await;
            }
        }

        reached = drive_al_control(driver, description, transition.target()).await?;
    }

    Ok(reached)
}

async fn run_init_commands(
    driver: &mut dyn crate::driver::WireDriver,
    description: &NetworkDescription,
    step: TransitionCode,
) -> Result<(), Error> {
    for (slave_index, slave) in description.slaves.iter().enumerate() {
        for command in &slave.init_commands {
            if !applies_to_step(command, step) {
                continue;
            }

            command.validate()?;

            let mut attempt = 0u8;
            loop {
                match execute_init_command(driver, description, slave.configured_address, command).await {
                    Ok(()) => break,
                    Err(err) => {
                        if attempt >= command.retries {
                            warn!("slave {} init command failed after retries: {}", slave_index, err);
                            return Err(err);
                        }
                        attempt += 1;
                    }
                }
            }
        }
    }

    Ok(())
}

async fn execute_init_command(
    driver: &mut dyn crate::driver::WireDriver,
    description: &NetworkDescription,
    configured_address: u16,
    command: &InitCommand,
) -> Result<(), Error> {
    let mut transport = Transport::new(
        driver,
        description.master.pdu_retry_count,
        Duration::from_millis(u64::from(description.master.timeouts.eeprom_ms)),
    );
    let address = Address::Configured(configured_address);

    let wkc = match &command.variant {
        InitCommandVariant::RegisterWrite { ado, data } => transport.write_register(address, *ado, data).await?,
        InitCommandVariant::CoeSdoDownload { index, sub_index, data } => {
            let write_address = slave_mailbox_write_address(description, configured_address);
            let frame = crate::coe::build_download_frame(configured_address, 1, *index, *sub_index, data)?;
            transport.write_register(address, write_address, &frame).await?
        }
        InitCommandVariant::SoeWrite { .. } => {
            // SoE is framed but not acted on further; it stays out of scope.
            1
        }
    };

    if let Some(expected) = command.expected_wkc {
        if wkc != expected {
            return Err(Error::WorkingCounter { expected, received: wkc });
        }
    }

    Ok(())
}

fn slave_mailbox_write_address(description: &NetworkDescription, configured_address: u16) -> u16 {
    description
        .slaves
        .iter()
        .find(|s| s.configured_address == configured_address)
        .map(|s| s.mailbox.write_address)
        .unwrap_or(0x1000)
}

/// Step 3: before PreOp -> SafeOp, write the SM watchdog register for every slave. A slave
/// rejecting the write is warned about, not fatal (scenario S6).
async fn apply_watchdog_pregate(driver: &mut dyn crate::driver::WireDriver, description: &NetworkDescription, watchdog_ms: u32) {
    let value = (u32::from(watchdog_ms) * 10).to_le_bytes();
    let mut transport = Transport::new(
        driver,
        description.master.pdu_retry_count,
        Duration::from_millis(u64::from(description.master.timeouts.pdu_ms)),
    );

    for slave in &description.slaves {
        let address = Address::Configured(slave.configured_address);
        if let Err(err) = transport.write_register(address, RegisterAddress::SyncManagerWatchdog.into(), &value[..2]).await {
            warn!("slave {} rejected SM watchdog pre-gate write: {}", slave.configured_address, err);
        }
    }
}

/// Step 4: write AL-control for `target`, then poll AL-status until it matches or the
/// state-transition timeout elapses.
async fn drive_al_control(
    driver: &mut dyn crate::driver::WireDriver,
    description: &NetworkDescription,
    target: AlState,
) -> Result<AlState, Error> {
    let mut transport = Transport::new(
        driver,
        description.master.pdu_retry_count,
        Duration::from_millis(u64::from(description.master.timeouts.pdu_ms)),
    );

    let control = AlControl::new(target).encode();
    transport.write_register(Address::Broadcast, RegisterAddress::AlControl.into(), &control).await?;

    let deadline = Instant::now() + Duration::from_millis(u64::from(description.master.timeouts.state_transition_ms));

    loop {
        let raw: [u8; 2] = transport.read_register(Address::Broadcast, RegisterAddress::AlStatus.into()).await?;
        let observed = AlState::from_raw(raw[0]);

        if observed == target {
            return Ok(observed);
        }

        if Instant::now() >= deadline {
            let code_raw: [u8; 2] = transport
                .read_register(Address::Broadcast, RegisterAddress::AlStatusCode.into())
                .await
                .unwrap_or_default();
            let al_status_code = (u16::from_le_bytes(code_raw) != 0).then(|| AlStatusCode::from(u16::from_le_bytes(code_raw)));

            return Err(Error::StateTransition {
                expected: target,
                actual: observed,
                al_status_code,
            });
        }

        #[cfg(not(test))]
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}

/// Feature 302: pack the expected identities in slave order and compare against actual reads.
pub async fn verify_topology(driver: &mut dyn crate::driver::WireDriver, description: &NetworkDescription) -> Result<(), Error> {
    let mut transport = Transport::new(
        driver,
        description.master.pdu_retry_count,
        Duration::from_millis(u64::from(description.master.timeouts.eeprom_ms)),
    );

    for (slave_index, slave) in description.slaves.iter().enumerate() {
        let address = Address::Configured(slave.configured_address);
        let words = transport.read_sii(address, 0x0008, 8).await?;
        let bytes: [u8; 16] = words.try_into().map_err(|_| Error::Topology { slave_index })?;
        let actual = crate::sii::parse_identity(&bytes);

        if actual != slave.identity {
            return Err(Error::Topology { slave_index });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_from_init_to_op_visits_every_intermediate_state() {
        let path = transition_path(AlState::Init, AlState::Op);
        assert_eq!(path, vec![Transition::IP, Transition::PS, Transition::SO]);
    }

    #[test]
    fn path_from_op_to_init_takes_the_direct_shortcut() {
        let path = transition_path(AlState::Op, AlState::Init);
        assert_eq!(path, vec![Transition::OI]);
    }

    #[test]
    fn path_from_op_to_preop_steps_down_one_state_at_a_time() {
        let path = transition_path(AlState::Op, AlState::PreOp);
        assert_eq!(path, vec![Transition::OS, Transition::SP]);
    }

    #[test]
    fn same_state_is_a_no_op_path() {
        assert!(transition_path(AlState::SafeOp, AlState::SafeOp).is_empty());
    }
}
