//! Assigns devices to logger processes across a pool of servers,
//! supervises their liveness, and periodically checks that what a
//! logger claims to be writing still matches the devices it logs.
//!
//! Built on top of [`karabo_net::SignalSlotable`]: every decision this
//! crate makes -- instantiate a logger, add a device, tag one
//! discontinued -- is an RPC, and every payload on the wire is a
//! [`karabo_data::Container`].

pub mod config;
pub mod error;
pub mod manager;
pub mod persistence;
pub mod state;
pub mod topology_check;

pub use config::Config;
pub use error::{LoggerManagerError, LoggerManagerResult};
pub use manager::{logger_instance_id, most_recent_timestamp, LoggerManager, LOGGER_INSTANCE_TYPE, SERVER_INSTANCE_TYPE};
pub use persistence::{Blocklist, LoggerMap};
pub use state::{ServerPhase, ServerState};
pub use topology_check::CheckSummary;
