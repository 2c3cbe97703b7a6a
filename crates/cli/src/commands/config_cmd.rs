//! `ragstream config`: configuration management commands.

use crate::pipeline::load_config;
use anyhow::Context;
use ragstream_config::AppConfig;
use std::path::Path;

pub fn validate(config_path: &Path) -> anyhow::Result<()> {
    println!("Validating {}...", config_path.display());

    let config = match load_config(config_path) {
        Ok(config) => config,
        Err(e) => {
            println!("   Config error: {e:#}");
            return Err(e);
        }
    };
    println!("   Config parsed and validated");

    let warnings = warnings(&config);
    if warnings.is_empty() {
        println!("   All checks passed");
    } else {
        println!();
        for w in &warnings {
            println!("   warning: {w}");
        }
    }

    println!();
    println!("   Model:        {}", config.llm.model);
    println!("   Endpoint:     {}", config.llm.base_url);
    println!("   Context:      {} tokens ({} reserved)", config.llm.max_context_tokens, config.prompt.reservation_tokens);
    println!("   Collections:  {}", config.retriever.collections.join(", "));
    println!("   Passage DB:   {}", config.retriever.passage_db.display());
    println!("   Max rounds:   {}", config.engine.max_iterations);
    Ok(())
}

/// Settings that load fine but probably aren't what the user wants.
fn warnings(config: &AppConfig) -> Vec<&'static str> {
    let mut warnings = Vec::new();

    if !config.has_api_key() {
        warnings.push("No API key set (set RAGSTREAM_API_KEY or OPENAI_API_KEY)");
    }
    if config.retriever.collections.is_empty() {
        warnings.push("No retriever.collections configured, retrieval will return nothing");
    }
    if config.retriever.max_passages_to_select > config.retriever.top_k * config.retriever.collections.len().max(1) {
        warnings.push("retriever.max_passages_to_select exceeds the number of candidates");
    }
    if config.prompt.history_fraction >= 1.0 {
        warnings.push("prompt.history_fraction = 1.0 leaves no room for retrieved context");
    }
    for tool in &config.engine.context_tools {
        if !matches!(tool.as_str(), "retrieve_knowledge" | "get_current_time") {
            warnings.push("engine.context_tools names a tool that is not built in");
            break;
        }
    }

    warnings
}

pub fn show(config_path: &Path) -> anyhow::Result<()> {
    let mut config = load_config(config_path)?;
    if config.llm.api_key.is_some() {
        config.llm.api_key = Some("***".into());
    }
    if config.embedding.api_key.is_some() {
        config.embedding.api_key = Some("***".into());
    }
    println!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

pub fn path(config_path: &Path) {
    println!("{}", config_path.display());
}

pub fn init(config_path: &Path) -> anyhow::Result<()> {
    if config_path.exists() {
        println!("Config already exists at {}", config_path.display());
        return Ok(());
    }
    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    std::fs::write(config_path, AppConfig::default_toml())
        .with_context(|| format!("Failed to write {}", config_path.display()))?;
    println!("Wrote default config to {}", config_path.display());
    Ok(())
}
