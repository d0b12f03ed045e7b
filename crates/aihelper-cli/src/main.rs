use std::fs;
use std::path::{Path, PathBuf};

use aihelper_core::{
    Assistant, ConfigLoader, DocumentFormat, LoadOutcome, PipelineKind, TelemetryOptions,
    WorkflowOutcome, init_telemetry,
};
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio::runtime::Runtime;
use tracing::{info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

#[derive(Parser, Debug)]
#[command(
    name = "aihelper",
    version,
    about = "Document QA, web extraction, research and essay drafting"
)]
struct Cli {
    /// Path to a TOML configuration file (defaults to `AIHELPER_CONFIG` or ./config.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Session id used for presenter state and the run log.
    #[arg(long, global = true)]
    session: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the five-stage web research workflow.
    Research(WorkflowArgs),
    /// Draft, review and improve an essay with presentation keywords.
    Essay(WorkflowArgs),
    /// Scrape a page and optionally extract information from it.
    Scrape(ScrapeArgs),
    /// Answer a question from a document, or from each document in a directory.
    Ask(AskArgs),
}

#[derive(Args, Debug)]
struct WorkflowArgs {
    /// Topic to work on.
    #[arg(long)]
    topic: String,

    /// Print the whole outcome (stage outputs and trace) as JSON.
    #[arg(long, default_value_t = false)]
    json: bool,

    /// Print the stage trace after the result.
    #[arg(long, default_value_t = false)]
    trace: bool,

    #[command(flatten)]
    email: EmailArgs,
}

#[derive(Args, Debug)]
struct ScrapeArgs {
    /// Page to fetch.
    #[arg(long)]
    url: String,

    /// What to extract from the page; prints the cleaned page text when omitted.
    #[arg(long)]
    extract: Option<String>,

    #[command(flatten)]
    email: EmailArgs,
}

#[derive(Args, Debug)]
struct AskArgs {
    /// PDF, DOCX or TXT file, or a directory of them.
    #[arg(long)]
    path: PathBuf,

    /// Question to answer.
    #[arg(long)]
    question: String,

    /// Recurse into subdirectories when `path` is a directory.
    #[arg(long, default_value_t = false)]
    recursive: bool,

    #[command(flatten)]
    email: EmailArgs,
}

#[derive(Args, Debug)]
struct EmailArgs {
    /// Also send the result to this address.
    #[arg(long)]
    email_to: Option<String>,
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = ConfigLoader::load(cli.config.clone())?;

    init_telemetry(TelemetryOptions {
        env_filter: Some(config.logging.level.clone()),
        ..TelemetryOptions::default()
    })?;

    // A generated session is not reachable again, so its vector index is dropped.
    let ephemeral = cli.session.is_none();
    let session = cli
        .session
        .clone()
        .unwrap_or_else(|| format!("cli-{}", Uuid::new_v4()));

    let rt = Runtime::new()?;
    rt.block_on(async move {
        let assistant = Assistant::from_config(&config).await?;
        match cli.command {
            Command::Research(args) => {
                let outcome = assistant.research(&session, &args.topic).await?;
                print_outcome(&outcome, &args)?;
                send_if_requested(&assistant, &session, PipelineKind::Research, &args.email)
                    .await?;
            }
            Command::Essay(args) => {
                let outcome = assistant.write_essay(&session, &args.topic).await?;
                print_outcome(&outcome, &args)?;
                send_if_requested(&assistant, &session, PipelineKind::Essay, &args.email).await?;
            }
            Command::Scrape(args) => scrape_command(&assistant, &session, args).await?,
            Command::Ask(args) => {
                let outcome = ask_command(&assistant, &session, args).await;
                if ephemeral {
                    assistant.clear(&session, PipelineKind::DocumentQa).await?;
                }
                outcome?;
            }
        }
        Ok::<(), anyhow::Error>(())
    })?;

    Ok(())
}

fn print_outcome(outcome: &WorkflowOutcome, args: &WorkflowArgs) -> Result<()> {
    if args.json {
        println!("{}", serde_json::to_string_pretty(outcome)?);
        return Ok(());
    }

    println!("{}", outcome.output);
    if args.trace {
        println!("\n{}", outcome.trace_summary().render_markdown());
    }
    Ok(())
}

async fn send_if_requested(
    assistant: &Assistant,
    session: &str,
    pipeline: PipelineKind,
    email: &EmailArgs,
) -> Result<()> {
    if let Some(recipient) = &email.email_to {
        assistant
            .email_result(session, pipeline, recipient)
            .await
            .with_context(|| format!("failed to email the {pipeline} result"))?;
        info!(%recipient, "result sent");
    }
    Ok(())
}

async fn scrape_command(assistant: &Assistant, session: &str, args: ScrapeArgs) -> Result<()> {
    let text = assistant.scrape(session, &args.url).await?;

    match args.extract {
        Some(description) => {
            let extracted = assistant.extract(session, &description).await?;
            println!("{extracted}");
            send_if_requested(assistant, session, PipelineKind::WebScraper, &args.email).await?;
        }
        None => {
            println!("{text}");
            if args.email.email_to.is_some() {
                warn!("nothing extracted; add --extract to email a result");
            }
        }
    }
    Ok(())
}

async fn ask_command(assistant: &Assistant, session: &str, args: AskArgs) -> Result<()> {
    let files = collect_documents(&args.path, args.recursive);
    if files.is_empty() {
        info!(path = %args.path.display(), "no supported documents found");
        return Ok(());
    }

    let many = files.len() > 1;
    let mut answered = 0usize;
    for (file, format) in files {
        let bytes =
            fs::read(&file).with_context(|| format!("failed to read {}", file.display()))?;
        let name = file.display().to_string();

        match assistant.load_document(session, &name, format, bytes).await? {
            LoadOutcome::NoContent { .. } => {
                warn!(file = %name, "document has no text; skipped");
                continue;
            }
            LoadOutcome::Indexed { chunks, .. } => info!(file = %name, chunks, "indexed"),
        }

        let answer = assistant.ask(session, &args.question).await?;
        if many {
            println!("## {name}\n{answer}\n");
        } else {
            println!("{answer}");
        }
        answered += 1;
    }

    // Only the last answer is held by the session, so that is what gets sent.
    if answered > 0 {
        send_if_requested(assistant, session, PipelineKind::DocumentQa, &args.email).await?;
    }
    Ok(())
}

fn collect_documents(path: &Path, recursive: bool) -> Vec<(PathBuf, DocumentFormat)> {
    if path.is_file() {
        return match DocumentFormat::from_path(path) {
            Ok(format) => vec![(path.to_path_buf(), format)],
            Err(err) => {
                warn!(file = %path.display(), error = %err, "skipping file");
                Vec::new()
            }
        };
    }

    let mut files: Vec<(PathBuf, DocumentFormat)> = WalkDir::new(path)
        .min_depth(1)
        .max_depth(if recursive { usize::MAX } else { 1 })
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| {
            let format = DocumentFormat::from_path(entry.path()).ok()?;
            Some((entry.into_path(), format))
        })
        .collect();
    files.sort_by(|a, b| a.0.cmp(&b.0));
    files
}
