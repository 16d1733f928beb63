//! Analyzer plugin contract
//!
//! An analyzer keeps per-flow state in the extension it attaches to
//! the flow under its assigned id. Parsing failure is never an error:
//! the analyzer simply attaches nothing, or leaves partial values in
//! place.

use meter_common::ext::ExtensionId;
use meter_common::options::OptionsParser;
use meter_common::plugin::ActionMask;
use meter_common::{Flow, MeterResult, Packet};

/// One protocol analyzer. All callbacks default to no-ops; an
/// analyzer implements the subset it needs.
pub trait ProcessPlugin {
    fn name(&self) -> &'static str;

    /// Declared options; the default accepts only an empty init
    /// string.
    fn options(&self) -> OptionsParser {
        OptionsParser::new(self.name(), "")
    }

    /// Parse the analyzer's init string.
    fn init(&mut self, params: &str) -> MeterResult<()> {
        self.options().parse(params)?;
        Ok(())
    }

    /// The pipeline hands out the dense extension id at registration.
    fn assign_ext_id(&mut self, id: ExtensionId);

    /// IPFIX field names this analyzer's extension serializes, in
    /// order.
    fn template_fields(&self) -> &'static [&'static str];

    fn pre_create(&mut self, pkt: &mut Packet) -> ActionMask {
        let _ = pkt;
        ActionMask::NONE
    }

    fn post_create(&mut self, flow: &mut Flow, pkt: &Packet) -> ActionMask {
        let _ = (flow, pkt);
        ActionMask::NONE
    }

    fn pre_update(&mut self, flow: &mut Flow, pkt: &Packet) -> ActionMask {
        let _ = (flow, pkt);
        ActionMask::NONE
    }

    fn post_update(&mut self, flow: &mut Flow, pkt: &Packet) -> ActionMask {
        let _ = (flow, pkt);
        ActionMask::NONE
    }

    fn pre_export(&mut self, flow: &mut Flow) {
        let _ = flow;
    }
}
