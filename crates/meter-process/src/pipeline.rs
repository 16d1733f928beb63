//! Ordered analyzer registry
//!
//! Registration order is part of the configuration surface: callbacks
//! fire in exactly that order, and the dense extension ids it hands
//! out define the exporter's template fingerprints.

use meter_common::ext::{ExtensionId, MAX_EXTENSIONS};
use meter_common::plugin::{ActionMask, FlowProcessor};
use meter_common::{Flow, MeterError, MeterResult, Packet};

use crate::plugin::ProcessPlugin;

#[derive(Default)]
pub struct Pipeline {
    plugins: Vec<Box<dyn ProcessPlugin>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an analyzer, assigning the next dense extension id
    /// and parsing its init string.
    pub fn register(
        &mut self,
        mut plugin: Box<dyn ProcessPlugin>,
        params: &str,
    ) -> MeterResult<ExtensionId> {
        if self.plugins.len() >= MAX_EXTENSIONS {
            return Err(MeterError::PluginLimit(MAX_EXTENSIONS));
        }
        let id = self.plugins.len() as ExtensionId;
        plugin.assign_ext_id(id);
        plugin.init(params)?;
        tracing::info!(plugin = plugin.name(), ext_id = id, "registered analyzer");
        self.plugins.push(plugin);
        Ok(id)
    }

    /// Per-id template field lists, indexed by extension id. The
    /// exporter consumes this once at startup.
    pub fn template_fields_by_id(&self) -> Vec<&'static [&'static str]> {
        self.plugins.iter().map(|p| p.template_fields()).collect()
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
}

impl FlowProcessor for Pipeline {
    fn pre_create(&mut self, pkt: &mut Packet) -> ActionMask {
        let mut ret = ActionMask::NONE;
        for p in &mut self.plugins {
            ret = ret | p.pre_create(pkt);
        }
        ret
    }

    fn post_create(&mut self, flow: &mut Flow, pkt: &Packet) -> ActionMask {
        let mut ret = ActionMask::NONE;
        for p in &mut self.plugins {
            ret = ret | p.post_create(flow, pkt);
        }
        ret
    }

    fn pre_update(&mut self, flow: &mut Flow, pkt: &Packet) -> ActionMask {
        let mut ret = ActionMask::NONE;
        for p in &mut self.plugins {
            ret = ret | p.pre_update(flow, pkt);
        }
        ret
    }

    fn post_update(&mut self, flow: &mut Flow, pkt: &Packet) -> ActionMask {
        let mut ret = ActionMask::NONE;
        for p in &mut self.plugins {
            ret = ret | p.post_update(flow, pkt);
        }
        ret
    }

    fn pre_export(&mut self, flow: &mut Flow) {
        for p in &mut self.plugins {
            p.pre_export(flow);
        }
    }
}
