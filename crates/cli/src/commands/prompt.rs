//! `ragstream prompt`: show the budgeted system prompt for a query.

use crate::pipeline::{Pipeline, build_budgeter, load_config, load_template};
use ragstream_agent::{BuiltPrompt, PromptInput};
use ragstream_agent::session::USER_QUERY_FIELD;
use std::path::Path;

pub async fn run(
    config_path: &Path,
    query: &str,
    mut context: Vec<String>,
    retrieve: bool,
) -> anyhow::Result<()> {
    let config = load_config(config_path)?;

    let template = load_template(&config)?;
    let budgeter = build_budgeter(&config)?;

    if retrieve {
        let pipeline = Pipeline::build(config).await?;
        context.extend(pipeline.context_for(query).await);
    }

    let input = PromptInput::new(&template)
        .field(USER_QUERY_FIELD, query)
        .history(&[])
        .context(&context);
    let prompt = budgeter.build(&input);

    println!("{}", prompt.text);
    eprintln!();
    eprintln!("{}", summary(&prompt));
    Ok(())
}

fn summary(prompt: &BuiltPrompt) -> String {
    let mut lines = vec![
        format!("  Tokens:     {} (fixed {}, available {})", prompt.tokens, prompt.fixed_tokens, prompt.available),
        format!(
            "  History:    {}/{} turns, {} of {} tokens",
            prompt.history.units_included, prompt.history.units_total, prompt.history.tokens, prompt.history.budget
        ),
        format!(
            "  Context:    {}/{} units, {} of {} tokens{}",
            prompt.context.units_included,
            prompt.context.units_total,
            prompt.context.tokens,
            prompt.context.budget,
            if prompt.context.truncated { " (cut)" } else { "" }
        ),
    ];
    if prompt.hard_truncated {
        lines.push("  WARNING:    prompt was hard-truncated to fit".into());
    }
    lines.join("\n")
}
