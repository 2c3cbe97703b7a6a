//! `ragstream retrieve`: fuse the configured collections for one query.

use crate::pipeline::{Pipeline, load_config};
use ragstream_retrieval::FusionOutcome;
use std::path::Path;

pub async fn run(
    config_path: &Path,
    query: &str,
    top_k: Option<usize>,
    max: Option<usize>,
    json: bool,
) -> anyhow::Result<()> {
    let pipeline = Pipeline::build(load_config(config_path)?).await?;

    let mut fusion = pipeline.query(query);
    if let Some(k) = top_k {
        fusion = fusion.with_top_k(k);
    }
    if let Some(n) = max {
        fusion = fusion.with_max_selected(n);
    }

    let outcome = pipeline.retriever.fuse_detailed(&fusion).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&to_json(&outcome))?);
    } else {
        print_outcome(&outcome);
    }
    Ok(())
}

fn to_json(outcome: &FusionOutcome) -> serde_json::Value {
    let passages: Vec<serde_json::Value> = outcome
        .passages
        .iter()
        .map(|p| {
            let score = outcome
                .selected
                .iter()
                .find(|hit| hit.id == p.id)
                .map(|hit| hit.score);
            serde_json::json!({
                "passage_id": p.id,
                "score": score,
                "text": p.text,
                "metadata": p.metadata,
            })
        })
        .collect();

    serde_json::json!({
        "passages": passages,
        "failed_collections": outcome.failed_collections,
        "hydration_misses": outcome.hydration_misses,
    })
}

fn print_outcome(outcome: &FusionOutcome) {
    if outcome.passages.is_empty() {
        println!("No passages found.");
    }

    for (rank, passage) in outcome.passages.iter().enumerate() {
        let score = outcome
            .selected
            .iter()
            .find(|hit| hit.id == passage.id)
            .map(|hit| hit.score)
            .unwrap_or_default();
        println!("{}. [{}] score={score:.5}", rank + 1, passage.id);
        for line in passage.text.lines() {
            println!("   {line}");
        }
        println!();
    }

    if !outcome.failed_collections.is_empty() {
        eprintln!("  Failed collections: {}", outcome.failed_collections.join(", "));
    }
    if !outcome.hydration_misses.is_empty() {
        let misses: Vec<&str> = outcome.hydration_misses.iter().map(|id| id.as_str()).collect();
        eprintln!("  Missing from store: {}", misses.join(", "));
    }
}
