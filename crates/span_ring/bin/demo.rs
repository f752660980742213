//! # Span Ring Demo
//!
//! Simulates a small service fleet recording spans into a capture window,
//! then dumps the window as a Jaeger UI document.
//!
//! ## What it shows
//!
//! - Several producer threads recording traces concurrently into one
//!   `TracingPipeline`
//! - Realistic HTTP, database, cache and messaging attributes, events and
//!   roughly 10% failed spans
//! - Window overwrite: the ring holds fewer spans than are produced, so older
//!   traces lose their roots and are dropped from the export
//! - Peer service inference from `net.peer.*` attributes
//!
//! ## Running
//!
//! ```bash
//! # Quick mode (2 producers, 20 traces each)
//! cargo run -p span_ring --bin demo --release -- --quick
//!
//! # Write somewhere else (default: traces.json), with debug logs
//! RUST_LOG=span_ring=debug cargo run -p span_ring --bin demo -- --output /tmp/t.json
//! ```
//!
//! Load the resulting file through "Upload JSON" in the Jaeger UI search page.
//! `SPAN_RING_BUFFER_LENGTH` and `SPAN_RING_MAX_TAG_LENGTH` are honored.

use anyhow::Context;
use rand::Rng;
use span_ring::span::{now_micros, random_span_id, random_trace_id};
use span_ring::{
    PipelineConfig, Resource, Span, SpanEvent, SpanKind, SpanStatus, TraceFormat, TracingPipeline,
};
use std::sync::Arc;
use std::thread;
use std::time::Instant;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Downstream calls a simulated request fans out to.
const OPERATIONS: [(&str, SpanKind); 4] = [
    ("SELECT users", SpanKind::Client),
    ("cache.get", SpanKind::Client),
    ("publish order.created", SpanKind::Producer),
    ("render.response", SpanKind::Internal),
];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .init();

    let args: Vec<String> = std::env::args().collect();
    let quick = args.iter().any(|a| a == "--quick");
    let output = args
        .iter()
        .position(|a| a == "--output")
        .and_then(|i| args.get(i + 1))
        .cloned()
        .unwrap_or_else(|| "traces.json".to_string());

    let (producers, traces_per_producer) = if quick { (2, 20) } else { (8, 100) };

    let config = PipelineConfig::from_env().context("invalid SPAN_RING_* configuration")?;
    let resource = Resource::default()
        .with_service("storefront", Some(env!("CARGO_PKG_VERSION")))
        .with_attribute("service.namespace", "demo")
        .with_attribute("host.name", "localhost");
    let pipeline = Arc::new(TracingPipeline::new(config, resource)?);
    pipeline.start();

    println!("Demo Configuration:");
    println!("   Mode: {}", if quick { "quick" } else { "full" });
    println!("   Producers: {}", producers);
    println!("   Traces per producer: {}", traces_per_producer);
    println!("   Window: {} spans", pipeline.config().ring_buffer_length);
    println!();

    let started = Instant::now();
    let handles: Vec<_> = (0..producers)
        .map(|producer_id| {
            let pipeline = Arc::clone(&pipeline);
            thread::spawn(move || run_producer(producer_id, traces_per_producer, &pipeline))
        })
        .collect();
    let mut recorded = 0u64;
    for handle in handles {
        recorded += handle
            .join()
            .map_err(|_| anyhow::anyhow!("producer thread panicked"))?;
    }
    let generation_time = started.elapsed();
    pipeline.stop();

    let metrics = pipeline.buffer_metrics();
    println!("Recorded {} spans in {:.2?}", recorded, generation_time);
    println!("   Inserted:    {}", metrics.inserted());
    println!("   Overwritten: {}", metrics.overwritten());
    println!("   Held:        {}", pipeline.buffered());
    println!();

    let mut file = tokio::fs::File::create(&output)
        .await
        .with_context(|| format!("cannot create {}", output))?;
    let traces = pipeline
        .write_trace_data_async(&mut file, TraceFormat::JaegerUi)
        .await
        .context("export failed")?;

    println!(
        "Wrote {} traces for service {:?} to {}",
        traces,
        pipeline.process().service_name,
        output
    );
    Ok(())
}

/// Records `traces` request traces and returns the number of spans recorded.
fn run_producer(producer_id: usize, traces: usize, pipeline: &TracingPipeline) -> u64 {
    let mut rng = rand::thread_rng();
    let mut recorded = 0;

    for i in 0..traces {
        let trace_id = random_trace_id();
        let root_id = random_span_id();
        let start = now_micros();

        let mut root = Span::new(trace_id, root_id, 0, "GET /api/orders", SpanKind::Server)
            .with_attribute("http.method", "GET")
            .with_attribute("http.url", format!("/api/orders/{}", i))
            .with_attribute("demo.producer", producer_id as i64);

        let mut offset = 50;
        let mut failed = false;
        for &(name, kind) in &OPERATIONS {
            let duration = rng.gen_range(100..5_000);
            let mut child = Span::new(trace_id, random_span_id(), root_id, name, kind)
                .with_timing(start + offset, duration);
            offset += duration + 10;

            match name {
                "SELECT users" => {
                    child.set_attribute("db.system", "postgresql");
                    child.set_attribute("db.statement", "SELECT * FROM users WHERE id = $1");
                    child.set_attribute("net.peer.name", "orders-db");
                    child.set_attribute("net.peer.port", 5432);
                }
                "cache.get" => {
                    let hit = rng.gen_bool(0.7);
                    child.set_attribute("cache.hit", hit);
                    child.set_attribute("peer.address", "10.0.0.12");
                    if !hit {
                        child.add_event(
                            SpanEvent::new(start + offset, "cache.miss")
                                .with_attribute("key", format!("order:{}", i)),
                        );
                    }
                }
                "publish order.created" => {
                    child.set_attribute("messaging.system", "kafka");
                    child.set_attribute("peer.service", "order-events");
                }
                _ => {}
            }

            if rng.gen_bool(0.1) {
                child.status = SpanStatus::Error;
                child.status_description = Some(format!("{} failed", name));
                failed = true;
            } else {
                child.status = SpanStatus::Ok;
            }
            pipeline.record(child);
            recorded += 1;
        }

        root.start_time = start;
        root.duration = offset;
        root.set_attribute("http.status_code", if failed { 500 } else { 200 });
        root.status = if failed { SpanStatus::Error } else { SpanStatus::Ok };
        pipeline.record(root);
        recorded += 1;
    }

    tracing::debug!(producer_id, recorded, "producer finished");
    recorded
}
