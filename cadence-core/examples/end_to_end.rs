//! End-to-end pipeline example
//!
//! Runs a batch of support tickets through a triage pipeline: extract a
//! severity, score it in parallel, route on the merged score, then draft a
//! reply. One ticket is malformed to show how a failure stays in its own
//! kickoff.

use cadence_core::kickoff_input;
use cadence_core::prelude::*;
use serde_json::json;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing("info");

    println!("🚀 Cadence Pipeline Example");
    println!("===========================\n");

    let extract = FnUnit::new("extract", |input| {
        let text = input
            .get_str("text")
            .ok_or_else(|| anyhow::anyhow!("ticket has no text"))?;
        let severity = if text.contains("down") { 3 } else { 1 };
        Ok(StageOutput::structured(json!({ "severity": severity }))
            .with_usage("extractor", UsageMetrics::from_usage(40, 5).with_requests(1)))
    });

    let sentiment = FnUnit::new_async("sentiment", |input| async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        let angry = input.get_str("text").is_some_and(|t| t.contains('!'));
        Ok(StageOutput::structured(json!({ "score": if angry { 0.9 } else { 0.2 } }))
            .with_usage("classifier", UsageMetrics::tokens(12)))
    });

    let impact = FnUnit::new_async("impact", |input| async move {
        tokio::time::sleep(Duration::from_millis(5)).await;
        let severity = input.get_i64("severity").unwrap_or_default();
        Ok(StageOutput::structured(json!({ "score": severity as f64 / 3.0 }))
            .with_usage("classifier", UsageMetrics::tokens(9)))
    });

    let router = FieldRouter::new("triage", "queue").add_threshold_rule("escalate", "score", 0.8);

    let reply = FnUnit::new("reply", |input| {
        let route = input.get_str("route").unwrap_or("queue");
        let draft = match route {
            "escalate" => "Paging the on-call engineer now.",
            _ => "Thanks, we'll get back to you shortly.",
        };
        Ok(StageOutput::raw(draft).with_usage("writer", UsageMetrics::from_usage(60, 20)))
    });

    let config = CadenceConfig::load()?;
    let pipeline = Pipeline::builder()
        .name("ticket-triage")
        .unit(extract)
        .parallel(vec![sentiment.shared(), impact.shared()])
        .router(router)
        .unit(reply)
        .config(config.runner)
        .build()?;

    println!("Stages: {:?}\n", pipeline.kinds());

    let output = pipeline
        .run(vec![
            kickoff_input!({ "id": 1, "text": "Checkout is down!" }),
            kickoff_input!({ "id": 2, "text": "How do I change my avatar" }),
            kickoff_input!({ "id": 3 }),
        ])
        .await?;

    for result in &output {
        match result.error() {
            None => println!(
                "✓ ticket {} -> {} ({})",
                result.index,
                result.final_input.get_str("route").unwrap_or("?"),
                result.raw()
            ),
            Some(error) => println!("✗ ticket {}: {}", result.index, error),
        }
    }

    println!("\n{}", OutputExporter::export(&output, OutputFormat::Summary)?);

    Ok(())
}
