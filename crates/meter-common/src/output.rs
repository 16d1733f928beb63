//! Record hand-off interface for output sinks
//!
//! Sinks receive finished flows from the export ring. Transport
//! trouble never propagates back into the processing path: a sink
//! counts a record as dropped and moves on.

use crate::flow::Flow;

/// Seen/dropped accounting every sink keeps.
#[derive(Debug, Clone, Copy, Default)]
pub struct OutputStats {
    pub seen: u64,
    pub dropped: u64,
}

/// A consumer of exported flow records.
pub trait Output {
    /// Hand one finished flow to the sink.
    fn export(&mut self, flow: &Flow);

    /// Push any buffered data out.
    fn flush(&mut self) {}

    /// Flush and release resources; called once at shutdown.
    fn close(&mut self) {}

    fn stats(&self) -> OutputStats;
}
