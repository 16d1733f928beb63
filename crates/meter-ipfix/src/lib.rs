//! IPFIX export for flowmeter
//!
//! Turns exported flow records and their analyzer extensions into
//! RFC 7011 messages over TCP or UDP: template construction per
//! (IP version, extension-bitmask) fingerprint, per-template record
//! accumulation up to the MTU, sequence numbering, and reconnect
//! handling with template resend.

pub mod config;
pub mod elements;
pub mod exporter;
pub mod template;

pub use config::IpfixConfig;
pub use exporter::IpfixExporter;
