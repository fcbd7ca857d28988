//! Self-describing binary container, schema and scatter/gather serializer.
//!
//! This crate has no knowledge of brokers, sockets or RPC; it only defines
//! the wire format and in-memory types the rest of the framework exchanges.

pub mod binary;
pub mod buffer_set;
pub mod clock;
pub mod container;
pub mod error;
pub mod schema;
pub mod types;

pub use buffer_set::{BufferSet, Segment};
pub use clock::{Clock, SystemClock, Timestamp};
pub use container::{Attributes, Container};
pub use error::{DataError, DataResult};
pub use schema::{AccessMode, Assignment, ParamBuilder, ParamDescriptor, Schema, SchemaBuilder};
pub use types::{ByteArray, Complex, Complex32, Complex64, TypeTag, Value};
