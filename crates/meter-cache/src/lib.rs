//! Biflow cache for the flowmeter exporter
//!
//! A bounded, set-associative hash table keeps open flows, folds both
//! directions of a conversation into one record, enforces active and
//! inactive timeouts, and hands finished records to the export ring.
//! Everything on the packet path runs on one thread; the only shared
//! structure is the single-producer/single-consumer ring.

pub mod cache;
pub mod config;
pub mod key;
pub mod ring;
pub mod stats;

pub use cache::FlowCache;
pub use config::CacheConfig;
pub use ring::{export_ring, RingConsumer, RingProducer};
pub use stats::CacheStats;
