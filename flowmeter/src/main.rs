//! Flowmeter - Main Entry Point

use std::sync::atomic::Ordering;

use clap::Parser;
use flowmeter::{app, AppConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "flowmeter", version, about = "Bidirectional flow exporter")]
struct Opts {
    /// JSON config file; command-line options override it
    #[arg(short = 'c', long = "config")]
    config: Option<String>,

    /// Input spec, e.g. "bench;mode=nf;count=100000;seed=42"
    #[arg(short = 'i', long = "input")]
    input: Option<String>,

    /// Flow cache options, e.g. "size=17;line=4;active=300;inactive=30"
    #[arg(short = 's', long = "storage")]
    storage: Option<String>,

    /// Processing plugin spec, repeatable: http, tls, dns, ntp
    #[arg(short = 'p', long = "process")]
    process: Vec<String>,

    /// Output spec, e.g. "ipfix;host=127.0.0.1;port=4739" or "text"
    #[arg(short = 'o', long = "output")]
    output: Option<String>,

    /// Export ring capacity
    #[arg(short = 'q', long = "queue")]
    queue: Option<usize>,
}

impl Opts {
    fn into_config(self) -> anyhow::Result<AppConfig> {
        let mut cfg = match &self.config {
            Some(path) => AppConfig::load(path)?,
            None => AppConfig::default(),
        };
        if let Some(input) = self.input {
            cfg.input = input;
        }
        if let Some(storage) = self.storage {
            cfg.storage = storage;
        }
        if !self.process.is_empty() {
            cfg.process = self.process;
        }
        if let Some(output) = self.output {
            cfg.output = output;
        }
        if let Some(queue) = self.queue {
            cfg.queue = queue;
        }
        Ok(cfg)
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("flowmeter v{}", env!("CARGO_PKG_VERSION"));

    let cfg = Opts::parse().into_config()?;

    // SIGINT raises the stop flag; the run loop flushes every live
    // flow and drains the ring before returning.
    let stop = app::stop_flag();
    {
        let stop = stop.clone();
        ctrlc::set_handler(move || {
            tracing::info!("interrupt received, flushing");
            stop.store(true, Ordering::Relaxed);
        })?;
    }

    let summary = app::run(&cfg, stop)?;
    tracing::info!(
        packets = summary.packets,
        flows_exported = summary.cache.exported,
        flows_seen = summary.output.seen,
        flows_dropped = summary.output.dropped,
        "done"
    );
    Ok(())
}
