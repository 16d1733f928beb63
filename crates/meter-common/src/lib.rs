//! Shared data model for the flowmeter exporter.
//!
//! Everything the processing path passes between stages lives here:
//! the per-packet record produced by inputs, the per-flow aggregate
//! owned by the cache, analyzer extensions attached to flows, the
//! callback contract between cache and plugin pipeline, the output
//! hand-off trait, and the `key=value;key=value` option strings every
//! component is configured with.

pub mod error;
pub mod ext;
pub mod flow;
pub mod options;
pub mod output;
pub mod packet;
pub mod plugin;
pub mod time;

pub use error::{MeterError, MeterResult};
pub use flow::{EndReason, Flow, IpVersion};
pub use packet::Packet;
pub use time::Timestamp;
