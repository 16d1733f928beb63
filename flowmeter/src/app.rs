//! Component wiring and the run loop
//!
//! Spec strings select and configure components: the part before the
//! first `;` names the component, the rest is its init string. The
//! cache runs on the caller's thread; the output sink consumes the
//! export ring on its own thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use meter_cache::{export_ring, CacheConfig, CacheStats, FlowCache};
use meter_common::output::{Output, OutputStats};
use meter_common::{MeterError, MeterResult};
use meter_ipfix::{IpfixConfig, IpfixExporter};
use meter_output::TextOutput;
use meter_process::dns::DnsPlugin;
use meter_process::http::HttpPlugin;
use meter_process::ntp::NtpPlugin;
use meter_process::phists::PhistsPlugin;
use meter_process::sip::SipPlugin;
use meter_process::smtp::SmtpPlugin;
use meter_process::tls::TlsPlugin;
use meter_process::{Pipeline, ProcessPlugin};

use crate::config::AppConfig;
use crate::input::BenchInput;

/// Split `name;key=value;...` into the component name and its init
/// string.
pub fn split_spec(spec: &str) -> (&str, &str) {
    match spec.split_once(';') {
        Some((name, params)) => (name.trim(), params),
        None => (spec.trim(), ""),
    }
}

/// Build the analyzer pipeline in registration order.
pub fn build_pipeline(specs: &[String]) -> MeterResult<Pipeline> {
    let mut pipeline = Pipeline::new();
    for spec in specs {
        let (name, params) = split_spec(spec);
        let plugin: Box<dyn ProcessPlugin> = match name {
            "http" => Box::new(HttpPlugin::new()),
            "tls" => Box::new(TlsPlugin::new()),
            "dns" => Box::new(DnsPlugin::new()),
            "sip" => Box::new(SipPlugin::new()),
            "smtp" => Box::new(SmtpPlugin::new()),
            "ntp" => Box::new(NtpPlugin::new()),
            "phists" => Box::new(PhistsPlugin::new()),
            other => {
                return Err(MeterError::Config(format!(
                    "unknown processing plugin '{other}'"
                )))
            }
        };
        pipeline.register(plugin, params)?;
    }
    Ok(pipeline)
}

/// Build the output sink named by `spec`.
pub fn build_output(
    spec: &str,
    ext_fields: Vec<&'static [&'static str]>,
) -> MeterResult<Box<dyn Output + Send>> {
    let (name, params) = split_spec(spec);
    match name {
        "text" => Ok(Box::new(TextOutput::from_options(params)?)),
        "ipfix" => Ok(Box::new(IpfixExporter::new(
            IpfixConfig::from_options(params)?,
            ext_fields,
        )?)),
        other => Err(MeterError::Config(format!("unknown output '{other}'"))),
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RunSummary {
    pub packets: u64,
    pub cache: CacheStats,
    pub output: OutputStats,
}

/// Drive packets from the input through cache and pipeline into the
/// output until the input ends or `stop` is raised, then flush
/// everything and shut down cooperatively.
pub fn run(cfg: &AppConfig, stop: Arc<AtomicBool>) -> MeterResult<RunSummary> {
    let pipeline = build_pipeline(&cfg.process)?;
    let ext_fields = pipeline.template_fields_by_id();
    let output = build_output(&cfg.output, ext_fields)?;

    let cache_cfg = CacheConfig::from_options(&cfg.storage)?;
    let (producer, consumer) = export_ring(cfg.queue);
    let closer = producer.clone();
    let mut cache = FlowCache::new(&cache_cfg, pipeline, producer)?;

    let sink_thread = thread::spawn(move || {
        let mut output = output;
        while let Some(flow) = consumer.pop() {
            output.export(&flow);
        }
        output.close();
        output.stats()
    });

    let (input_name, input_params) = split_spec(&cfg.input);
    if input_name != "bench" {
        return Err(MeterError::Config(format!(
            "unknown input '{input_name}'"
        )));
    }
    let mut input = BenchInput::from_options(input_params)?;

    let mut packets = 0u64;
    while !stop.load(Ordering::Relaxed) {
        let Some(mut pkt) = input.next_packet() else {
            break;
        };
        cache.put(&mut pkt);
        packets += 1;
    }

    cache.finish();
    let cache_stats = *cache.stats();
    cache_stats.report();
    input.report(&cache_stats);

    closer.close();
    let output_stats = sink_thread
        .join()
        .map_err(|_| MeterError::Export("output thread panicked".into()))?;

    Ok(RunSummary {
        packets,
        cache: cache_stats,
        output: output_stats,
    })
}

/// Fresh stop flag wired to nothing; the caller decides what raises
/// it.
pub fn stop_flag() -> Arc<AtomicBool> {
    Arc::new(AtomicBool::new(false))
}
