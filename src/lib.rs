//! An ETG.1500 Class B EtherCAT master runtime.
//!
//! This crate implements the application-layer orchestration of an EtherCAT bus — the state
//! machine, process-data mapping and cyclic exchange, mailbox/CoE access, and discovery — on top
//! of an externally supplied [`WireDriver`](driver::WireDriver). Raw frame construction, the L2
//! socket, and datagram-level retransmission live below that boundary and are out of scope here.
//!
//! The [`Master`](master::Master) facade is the crate's single entry point; start there.

#![cfg_attr(docsrs, feature(doc_cfg))]

#[macro_use]
mod log;

pub mod al_control;
pub mod al_status_code;
pub mod coe;
pub mod cyclic;
pub mod discovery;
pub mod driver;
pub mod emergency;
pub mod error;
pub mod esm;
pub mod events;
pub mod fmmu;
pub mod mailbox;
pub mod mapping;
pub mod master;
pub mod network;
pub mod pdi;
pub mod register;
pub mod sii;
pub mod state;
pub mod sync_manager;
pub mod transport;
pub mod wire;

pub use crate::error::Error;
pub use crate::events::{EmergencyEvent, MasterEvent};
pub use crate::mailbox::MailboxErrorEvent;
pub use crate::master::Master;
pub use crate::network::{NetworkDescription, StateChangeEvent};
pub use crate::state::AlState;
