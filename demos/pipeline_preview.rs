//! Shows what a payload pipeline turns a handful of values into.
//!
//! cargo run --example pipeline_preview -- prefix=admin: base64

use brutex::generator::{PayloadSlot, PayloadSource, PayloadSpace};
use brutex::transform::Pipeline;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let specs: Vec<String> = std::env::args().skip(1).collect();
    let pipeline = Pipeline::parse_list(&specs)?;

    let slot = PayloadSlot::new(
        "PASS",
        PayloadSource::Enumerated {
            values: ["123456", "password", "Tr0ub4dor&3"]
                .iter()
                .map(|v| v.to_string())
                .collect(),
        },
    )
    .with_pipeline(pipeline);

    let space = PayloadSpace::build(&[slot]).await?;
    for materialized in space.slots() {
        println!(
            "{}: {} [{}] {} values, {} dropped",
            materialized.name,
            materialized.source,
            materialized.pipeline,
            materialized.len(),
            materialized.dropped
        );
    }
    for combination in space.iter() {
        for (_, candidate) in combination.iter() {
            println!("  {:<14} -> {}", candidate.original, candidate.processed);
        }
    }
    Ok(())
}
