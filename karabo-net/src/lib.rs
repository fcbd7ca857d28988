pub mod broker;
pub mod config;
pub mod error;
pub mod header;
pub mod registry;
pub mod requestor;
pub mod signal;
pub mod signalslotable;
pub mod slot;
pub mod strand;
pub mod tracker;

#[cfg(feature = "introspection")]
pub mod introspection;

pub use broker::{BrokerDriver, InProcessBroker, WireMessage};
pub use config::Config;
pub use error::{NetError, NetResult};
pub use header::Header;
pub use requestor::Requestor;
pub use signal::Signal;
pub use signalslotable::SignalSlotable;
pub use slot::{AsyncReply, CallContext, Slot, SlotHandler};
pub use strand::{Strand, StrandPool};
pub use tracker::{TopologyEvent, Tracker, TrackedInstance};
