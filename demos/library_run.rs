//! Drives a run through the library API against a login form.
//!
//! cargo run --example library_run -- http://127.0.0.1:8080/login

use std::time::Duration;

use brutex::bruteforcer::EngineEvent;
use brutex::detector::CriteriaConfig;
use brutex::generator::{PayloadSlot, PayloadSource};
use brutex::runner::{Options, Runner};
use brutex::transform::Pipeline;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("brutex=info")))
        .with_writer(std::io::stderr)
        .init();

    let url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "http://127.0.0.1:8080/login".to_string());

    let pins = PayloadSlot::new(
        "PASS",
        PayloadSource::Range {
            start: 0,
            end: 9999,
            step: 1,
            format: brutex::generator::RangeFormat::parse("{:04}")?,
        },
    );
    let users = PayloadSlot::new(
        "USER",
        PayloadSource::Enumerated {
            values: vec!["admin".to_string(), "root".to_string()],
        },
    )
    .with_pipeline(Pipeline::parse_list(&["lower"])?);

    let options = Options {
        url,
        payloads: vec![users, pins],
        concurrency: 64,
        timeout: Duration::from_secs(3),
        criteria: CriteriaConfig {
            success_keywords: vec!["welcome".to_string()],
            ..CriteriaConfig::default()
        },
        ..Options::default()
    };

    let prepared = Runner::new(options)?.prepare().await?;
    println!("{} combinations queued", prepared.space().total());

    let report = prepared
        .execute(
            async {
                let _ = tokio::signal::ctrl_c().await;
            },
            |event| match event {
                EngineEvent::Hit(record) => {
                    let pair = record
                        .combination
                        .iter()
                        .map(|(name, c)| format!("{name}={}", c.processed))
                        .collect::<Vec<_>>()
                        .join(" ");
                    println!("[+] {pair} ({})", record.reason);
                }
                EngineEvent::Batch(stats) => {
                    println!("{}/{} done, {:.0} req/s", stats.completed, stats.total, stats.speed);
                }
            },
        )
        .await;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
