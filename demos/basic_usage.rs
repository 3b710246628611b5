// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Basic record-mediator usage example.
//!
//! Demonstrates:
//! 1. Two sources holding different variants of the same patient
//! 2. A lookup that fans out and merges (authoritative phone wins)
//! 3. A second lookup served from the cache
//! 4. Creating a record through every source
//! 5. Displaying metrics
//!
//! # Run
//!
//! ```bash
//! cargo run --example basic_usage
//! ```

use std::sync::Arc;

use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};
use record_mediator::{
    BusinessIdentifier, DefaultRecordPolicy, IdentifierUse, InMemoryConduit, MediatorConfig, Record, RecordEngine,
    SourceGrade,
};
use serde_json::json;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder.install().expect("failed to install metrics recorder");

    tracing_subscriber::fmt()
        .with_target(false)
        .compact()
        .init();

    println!("\n╔═══════════════════════════════════════════════════════════════╗");
    println!("║          record-mediator: Basic Usage Example                 ║");
    println!("╚═══════════════════════════════════════════════════════════════╝\n");

    // ─────────────────────────────────────────────────────────────────────────
    // 1. Configure the engine and its sources
    // ─────────────────────────────────────────────────────────────────────────
    let mut config = MediatorConfig {
        retirement_secs: 60,
        ..Default::default()
    };
    config.source_priorities.insert("pas".into(), 1);

    let engine = RecordEngine::from_config(Arc::new(DefaultRecordPolicy::new("Patient")), &config).await?;

    let mrn = BusinessIdentifier::new("MRN", "1234").with_use(IdentifierUse::Official);
    let pas = Arc::new(InMemoryConduit::new("pas", SourceGrade::Authoritative));
    pas.insert(
        Record::new("Patient")
            .with_id("Patient:pas-1234")
            .with_identifier(mrn.clone())
            .with_field("name", json!("Ada Lovelace"))
            .with_field("phone", json!("0161 496 0000")),
    );
    let switchboard = Arc::new(InMemoryConduit::new("switchboard", SourceGrade::PartiallyAuthoritative));
    switchboard.insert(
        Record::new("Patient")
            .with_identifier(mrn.clone())
            .with_field("name", json!("Ada Lovelace"))
            .with_field("phone", json!("0161 496 9999"))
            .with_field("email", json!("ada@example.org")),
    );

    engine.register_conduit(pas.clone());
    engine.register_conduit(switchboard.clone());
    println!("📦 Registered {} sources", engine.controller().conduit_count());

    // ─────────────────────────────────────────────────────────────────────────
    // 2. First lookup fans out to every source
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n🔍 Looking up {}...", mrn);
    let start = std::time::Instant::now();
    let outcome = engine.find_by_identifier(&mrn).await;
    println!("   └─ {} in {:?}", outcome.status, start.elapsed());
    if let Some(ref record) = outcome.record {
        println!("   └─ id:    {:?}", record.id);
        println!("   └─ phone: {}", record.field("phone").unwrap_or(&json!(null)));
        println!("   └─ email: {}", record.field("email").unwrap_or(&json!(null)));
    }

    // ─────────────────────────────────────────────────────────────────────────
    // 3. Second lookup is a cache hit
    // ─────────────────────────────────────────────────────────────────────────
    let calls = pas.call_count() + switchboard.call_count();
    let start = std::time::Instant::now();
    let again = engine.find_by_identifier(&mrn).await;
    println!(
        "\n⚡ Second lookup: {} in {:?} ({} new source calls)",
        again.status,
        start.elapsed(),
        pas.call_count() + switchboard.call_count() - calls
    );

    // ─────────────────────────────────────────────────────────────────────────
    // 4. Create a new patient through every source
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📝 Creating a new patient...");
    let created = engine
        .create(
            Record::new("Patient")
                .with_identifier(BusinessIdentifier::new("MRN", "5678").with_use(IdentifierUse::Official))
                .with_field("name", json!("Grace Hopper")),
        )
        .await;
    println!("   └─ {} (created = {}, id = {:?})", created.status, created.created, created.id);
    if let Some(ref id) = created.id {
        let read = engine.read(id).await;
        println!("   └─ read back: {}", read.status);
    }
    println!("   └─ pas holds {}, switchboard holds {}", pas.len(), switchboard.len());

    // ─────────────────────────────────────────────────────────────────────────
    // 5. Metrics
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📊 Metrics:");
    dump_metrics(&snapshotter);

    Ok(())
}

/// Print captured counters, gauges and histogram summaries
fn dump_metrics(snapshotter: &Snapshotter) {
    let mut lines = Vec::new();
    for (composite_key, _, _, value) in snapshotter.snapshot().into_vec() {
        let (_kind, key) = composite_key.into_parts();
        let labels: Vec<_> = key.labels().map(|l| format!("{}={}", l.key(), l.value())).collect();
        let labels = if labels.is_empty() { String::new() } else { format!("{{{}}}", labels.join(",")) };

        let rendered = match value {
            DebugValue::Counter(v) => format!("{}", v),
            DebugValue::Gauge(v) => format!("{:.0}", v.into_inner()),
            DebugValue::Histogram(samples) => {
                let sum: f64 = samples.iter().map(|v| v.into_inner()).sum();
                format!("count={} sum={:.6}", samples.len(), sum)
            }
        };
        lines.push(format!("{}{} = {}", key.name(), labels, rendered));
    }

    lines.sort();
    for line in lines {
        println!("   └─ {}", line);
    }
}
