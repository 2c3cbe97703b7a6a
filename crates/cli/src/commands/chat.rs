//! `ragstream chat`: interactive or single-message chat mode.

use crate::pipeline::{Pipeline, load_config};
use anyhow::bail;
use ragstream_agent::{ChatSession, StreamEvent, TurnOutcome};
use std::io::Write;
use std::path::Path;
use tokio::io::{AsyncBufReadExt, BufReader};

pub async fn run(config_path: &Path, message: Option<String>, no_context: bool) -> anyhow::Result<()> {
    let config = load_config(config_path)?;

    // Check for API key early, give a clear error
    if !config.has_api_key() && config.llm.base_url.contains("api.openai.com") {
        eprintln!();
        eprintln!("  ERROR: No API key configured!");
        eprintln!();
        eprintln!("  Set one of these environment variables:");
        eprintln!("    RAGSTREAM_API_KEY = 'sk-...'");
        eprintln!("    OPENAI_API_KEY    = 'sk-...'");
        eprintln!();
        eprintln!("  Or add it to your config file:");
        eprintln!("    {}", config_path.display());
        eprintln!();
        bail!("No API key found. See above for setup instructions.");
    }

    let pipeline = Pipeline::build(config).await?;
    let history_window = pipeline.config.conversation.history_window;
    let mut session = ChatSession::new(
        pipeline.engine(),
        pipeline.budgeter()?,
        pipeline.template()?,
        history_window,
    );

    if let Some(msg) = message {
        // Single message mode
        let outcome = ask(&pipeline, &mut session, &msg, no_context).await?;
        if let TurnOutcome::Failed(kind) = outcome {
            bail!("Turn failed: {kind}");
        }
        return Ok(());
    }

    // Interactive mode
    println!();
    println!("  ragstream chat");
    println!();
    println!("  Model:        {}", pipeline.config.llm.model);
    println!("  Collections:  {}", pipeline.retriever.collection_names().join(", "));
    println!("  Tools:        {}", session.engine().tools().names().join(", "));
    println!();
    println!("  Type your message and press Enter.");
    println!("  '/history' shows the conversation so far, '/clear' forgets it.");
    println!("  Type 'exit' or Ctrl+D to quit.");
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("  You > ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if matches!(line, "exit" | "quit") {
            break;
        }
        if run_command(&mut session, line, &mut std::io::stdout())? {
            continue;
        }

        ask(&pipeline, &mut session, line, no_context).await?;
        println!();
    }

    println!();
    println!("  Goodbye!");
    println!();
    Ok(())
}

/// Run one turn, printing answer text as it streams in.
async fn ask(
    pipeline: &Pipeline,
    session: &mut ChatSession,
    text: &str,
    no_context: bool,
) -> anyhow::Result<TurnOutcome> {
    let context = if no_context {
        Vec::new()
    } else {
        pipeline.context_for(text).await
    };

    let mut stdout = std::io::stdout();
    let mut write_error = None;
    let summary = session
        .ask(text, &context, |event| {
            let result = print_event(&mut stdout, event);
            if let Err(e) = result {
                write_error.get_or_insert(e);
            }
        })
        .await;
    if let Some(e) = write_error {
        return Err(e.into());
    }

    Ok(summary.outcome)
}

/// Handle an interactive slash command. Returns `false` when `line` is not one.
fn run_command(session: &mut ChatSession, line: &str, out: &mut impl Write) -> std::io::Result<bool> {
    match line {
        "/history" => writeln!(out, "{}", session.history().format())?,
        "/clear" => {
            session.reset();
            writeln!(out, "  History cleared.")?;
        }
        _ => return Ok(false),
    }
    Ok(true)
}

fn print_event(out: &mut impl Write, event: &StreamEvent) -> std::io::Result<()> {
    match event {
        StreamEvent::TextDelta { content } => {
            write!(out, "{content}")?;
            out.flush()
        }
        StreamEvent::ToolInvoked { name, .. } => {
            eprintln!("  [tool] {name}...");
            Ok(())
        }
        StreamEvent::ToolResult { name, success, .. } => {
            if !success {
                eprintln!("  [tool] {name} failed");
            }
            Ok(())
        }
        StreamEvent::Error { kind, message } => {
            writeln!(out)?;
            eprintln!("  [Error: {kind}] {message}");
            Ok(())
        }
        StreamEvent::Done { .. } => writeln!(out),
    }
}
