//! Packet histogram analyzer
//!
//! Accumulates per-direction histograms of payload sizes and
//! inter-packet times over power-of-two bins: everything below 16 in
//! the first bin, one bin per octave up to 1024, the rest in the
//! last. Exported as four basicList arrays.

use meter_common::ext::{ExtensionData, ExtensionId, PhistsData, HISTOGRAM_BINS, PHISTS_TEMPLATE};
use meter_common::options::OptionsParser;
use meter_common::packet::TCP_SYN;
use meter_common::plugin::ActionMask;
use meter_common::{Flow, MeterResult, Packet};

use crate::plugin::ProcessPlugin;

/// Flows at or below this packet count with SYN set are withheld at
/// export.
const MIN_FLOW_PACKETS: u32 = 1;

fn bin_index(value: u32) -> usize {
    if value < 16 {
        0
    } else if value > 1023 {
        HISTOGRAM_BINS - 1
    } else {
        // 16..=31 lands in bin 1, each further octave one bin up.
        (31 - value.leading_zeros() as usize) - 3
    }
}

fn update(data: &mut PhistsData, pkt: &Packet, include_zeroes: bool) {
    if pkt.payload_len() == 0 && !include_zeroes {
        return;
    }
    let dir = usize::from(!pkt.source_pkt);

    data.size_hist[dir][bin_index(u32::from(pkt.payload_len()))] =
        data.size_hist[dir][bin_index(u32::from(pkt.payload_len()))].saturating_add(1);

    let now_ms = pkt.ts.as_unix_millis();
    if data.last_ts[dir] != 0 {
        let diff = now_ms.saturating_sub(data.last_ts[dir]);
        let diff = u32::try_from(diff).unwrap_or(u32::MAX);
        data.ipt_hist[dir][bin_index(diff)] =
            data.ipt_hist[dir][bin_index(diff)].saturating_add(1);
    }
    data.last_ts[dir] = now_ms;
}

#[derive(Default)]
pub struct PhistsPlugin {
    ext_id: ExtensionId,
    include_zeroes: bool,
}

impl PhistsPlugin {
    pub fn new() -> Self {
        Self::default()
    }

    fn apply(&self, flow: &mut Flow, pkt: &Packet) {
        if let Some(ExtensionData::Phists(data)) = flow.extensions.get_mut(self.ext_id) {
            update(data, pkt, self.include_zeroes);
            return;
        }
        let mut data = PhistsData::default();
        update(&mut data, pkt, self.include_zeroes);
        flow.extensions
            .insert(self.ext_id, ExtensionData::Phists(data));
    }
}

impl ProcessPlugin for PhistsPlugin {
    fn name(&self) -> &'static str {
        "phists"
    }

    fn options(&self) -> OptionsParser {
        OptionsParser::new("phists", "Processing plugin for packet histograms")
            .flag("i", "includezeroes", "Include zero-payload packets")
    }

    fn init(&mut self, params: &str) -> MeterResult<()> {
        for (key, _) in self.options().parse(params)? {
            match key {
                "includezeroes" => self.include_zeroes = true,
                _ => unreachable!(),
            }
        }
        Ok(())
    }

    fn assign_ext_id(&mut self, id: ExtensionId) {
        self.ext_id = id;
    }

    fn template_fields(&self) -> &'static [&'static str] {
        PHISTS_TEMPLATE
    }

    fn post_create(&mut self, flow: &mut Flow, pkt: &Packet) -> ActionMask {
        self.apply(flow, pkt);
        ActionMask::NONE
    }

    fn post_update(&mut self, flow: &mut Flow, pkt: &Packet) -> ActionMask {
        self.apply(flow, pkt);
        ActionMask::NONE
    }

    fn pre_export(&mut self, flow: &mut Flow) {
        // Do not export histograms for single-packet SYN flows,
        // usually port scans.
        let packets = flow.src_packets + flow.dst_packets;
        if packets <= MIN_FLOW_PACKETS && flow.tcp_flags_combined() & TCP_SYN != 0 {
            flow.extensions.remove(self.ext_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meter_common::packet::IPPROTO_TCP;
    use meter_common::Timestamp;

    fn packet(payload: &'static [u8], fwd: bool, ts_ms: u64) -> Packet<'static> {
        Packet {
            ts: Timestamp::new(ts_ms / 1000, ((ts_ms % 1000) * 1000) as u32),
            src_mac: [0; 6],
            dst_mac: [0; 6],
            src_ip: "10.0.0.1".parse().unwrap(),
            dst_ip: "10.0.0.2".parse().unwrap(),
            ip_proto: IPPROTO_TCP,
            src_port: 4000,
            dst_port: 80,
            tcp_flags: 0x18,
            wire_len: 1000,
            ip_len: 986,
            ip_payload_len: 966,
            payload,
            source_pkt: fwd,
        }
    }

    fn plugin() -> PhistsPlugin {
        let mut p = PhistsPlugin::new();
        p.assign_ext_id(0);
        p
    }

    #[test]
    fn test_bin_boundaries() {
        assert_eq!(bin_index(0), 0);
        assert_eq!(bin_index(15), 0);
        assert_eq!(bin_index(16), 1);
        assert_eq!(bin_index(31), 1);
        assert_eq!(bin_index(32), 2);
        assert_eq!(bin_index(512), 6);
        assert_eq!(bin_index(1023), 6);
        assert_eq!(bin_index(1024), 7);
        assert_eq!(bin_index(u32::MAX), 7);
    }

    #[test]
    fn test_size_histogram_per_direction() {
        let mut p = plugin();
        let first = packet(&[0u8; 100], true, 0);
        let mut flow = Flow::create(&first);
        p.post_create(&mut flow, &first);
        p.post_update(&mut flow, &packet(&[0u8; 20], false, 5));
        p.post_update(&mut flow, &packet(&[0u8; 2000], true, 10));

        match flow.extensions.get(0) {
            Some(ExtensionData::Phists(d)) => {
                assert_eq!(d.size_hist[0][bin_index(100)], 1);
                assert_eq!(d.size_hist[0][7], 1);
                assert_eq!(d.size_hist[1][1], 1);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_ipt_needs_two_packets() {
        let mut p = plugin();
        let first = packet(&[0u8; 64], true, 1_000);
        let mut flow = Flow::create(&first);
        p.post_create(&mut flow, &first);

        match flow.extensions.get(0) {
            Some(ExtensionData::Phists(d)) => {
                assert_eq!(d.ipt_hist[0].iter().sum::<u32>(), 0);
            }
            other => panic!("unexpected {other:?}"),
        }

        // 40 ms later: one sample in the 32..63 bin.
        p.post_update(&mut flow, &packet(&[0u8; 64], true, 1_040));
        match flow.extensions.get(0) {
            Some(ExtensionData::Phists(d)) => {
                assert_eq!(d.ipt_hist[0][2], 1);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_single_syn_flow_suppressed_at_export() {
        let mut p = plugin();
        let mut syn = packet(&[0u8; 64], true, 0);
        syn.tcp_flags = TCP_SYN;
        let mut flow = Flow::create(&syn);
        p.post_create(&mut flow, &syn);
        assert!(flow.extensions.get(0).is_some());

        p.pre_export(&mut flow);
        assert!(flow.extensions.get(0).is_none());
    }

    #[test]
    fn test_longer_or_synless_flows_keep_histograms() {
        // Two packets: past the port-scan threshold even with SYN.
        let mut p = plugin();
        let mut syn = packet(&[0u8; 64], true, 0);
        syn.tcp_flags = TCP_SYN;
        let mut flow = Flow::create(&syn);
        p.post_create(&mut flow, &syn);
        let ack = packet(&[0u8; 64], false, 10);
        flow.update(&ack, false);
        p.post_update(&mut flow, &ack);
        p.pre_export(&mut flow);
        assert!(flow.extensions.get(0).is_some());

        // Single packet without SYN is kept too.
        let mut p = plugin();
        let first = packet(&[0u8; 64], true, 0);
        let mut flow = Flow::create(&first);
        p.post_create(&mut flow, &first);
        p.pre_export(&mut flow);
        assert!(flow.extensions.get(0).is_some());
    }

    #[test]
    fn test_zero_payload_skipped_by_default() {
        let mut p = plugin();
        let first = packet(&[], true, 0);
        let mut flow = Flow::create(&first);
        p.post_create(&mut flow, &first);

        match flow.extensions.get(0) {
            Some(ExtensionData::Phists(d)) => {
                assert_eq!(d.size_hist[0].iter().sum::<u32>(), 0);
            }
            other => panic!("unexpected {other:?}"),
        }

        let mut p = plugin();
        p.init("includezeroes").unwrap();
        let mut flow = Flow::create(&first);
        p.post_create(&mut flow, &first);
        match flow.extensions.get(0) {
            Some(ExtensionData::Phists(d)) => {
                assert_eq!(d.size_hist[0][0], 1);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
