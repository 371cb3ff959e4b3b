use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use moderation::export;
use moderation::{
    AnalyzerRegistry, ControlMessage, ModerationConfig, Participant, SessionBuilder, SessionEvent,
    SessionRecord,
};
use moderator::config::LlmConfig;
use moderator::dialogue::ScriptedDialogue;
use moderator::llm::{ChatClient, LlmSafetyClassifier, LlmTopicAnalyzer};
use moderator::replay::{load_injections, load_script, run_injections, ReplaySource};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "moderator", version, about = "Live conversation moderator")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Debug logging (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Replay a transcription script through a live session
    Run(RunArgs),
    /// Load, validate and print the effective configuration
    CheckConfig {
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[derive(clap::Args)]
struct RunArgs {
    /// JSON Lines transcription script
    #[arg(long)]
    script: Option<PathBuf>,

    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long, default_value = "")]
    title: String,

    #[arg(long, default_value = "")]
    agenda: String,

    /// Comma-separated participant names
    #[arg(long, value_delimiter = ',')]
    participants: Vec<String>,

    /// JSON Lines of typed lines to inject
    #[arg(long)]
    inject: Option<PathBuf>,

    /// JSON Lines cast for the autonomous dialogue
    #[arg(long)]
    dialogue: Option<PathBuf>,

    /// Write a Markdown summary on close
    #[arg(long)]
    export: Option<PathBuf>,

    /// Write the transcript and interventions as JSON on close
    #[arg(long)]
    export_json: Option<PathBuf>,

    /// Time to let the last cycle finish after the script ends
    #[arg(long, default_value_t = 1500)]
    grace_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_level.into()),
        )
        .init();

    match cli.command {
        Command::Run(args) => run(args).await,
        Command::CheckConfig { config } => check_config(config.as_deref()),
    }
}

fn check_config(path: Option<&Path>) -> Result<()> {
    let config = ModerationConfig::load(path).context("invalid configuration")?;
    let llm = LlmConfig::from_env().context("invalid model endpoint settings")?;
    println!("{}", toml::to_string_pretty(&config)?);
    match llm {
        Some(llm) => info!(url = %llm.url, model = %llm.model, "Model-backed analyzers enabled"),
        None => info!("Model endpoint not set, heuristic analyzers only"),
    }
    Ok(())
}

async fn run(args: RunArgs) -> Result<()> {
    let config = ModerationConfig::load(args.config.as_deref()).context("invalid configuration")?;
    let participants = args
        .participants
        .iter()
        .map(|name| name.trim())
        .filter(|name| !name.is_empty())
        .map(Participant::new)
        .collect();

    let mut builder = SessionBuilder::new(config.clone())
        .title(args.title.clone())
        .agenda(args.agenda.clone())
        .participants(participants);

    if let Some(llm) = LlmConfig::from_env().context("invalid model endpoint settings")? {
        info!(url = %llm.url, model = %llm.model, "Using model-backed topic and safety checks");
        let client = ChatClient::new(llm).context("failed to build HTTP client")?;
        let mut registry = AnalyzerRegistry::with_heuristics(&config.planner);
        registry.register(Arc::new(LlmTopicAnalyzer::new(client.clone())));
        builder = builder
            .analyzers(registry)
            .classifier(Arc::new(LlmSafetyClassifier::new(client)));
    }

    let finished = match &args.script {
        Some(path) => {
            let lines = load_script(path)
                .with_context(|| format!("failed to load script {}", path.display()))?;
            info!(lines = lines.len(), script = %path.display(), "Replaying script");
            let source = ReplaySource::new(lines);
            let finished = source.finished();
            builder = builder.source(Box::new(source));
            Some(finished)
        }
        None => None,
    };

    let has_dialogue = match &args.dialogue {
        Some(path) => {
            let dialogue = ScriptedDialogue::load(path, false)
                .with_context(|| format!("failed to load dialogue {}", path.display()))?;
            builder = builder.dialogue(Arc::new(dialogue));
            true
        }
        None => false,
    };

    let injections = match &args.inject {
        Some(path) => Some(
            load_injections(path)
                .with_context(|| format!("failed to load injections {}", path.display()))?,
        ),
        None => None,
    };

    let (handle, events, join) = builder.spawn();
    info!(session = handle.id(), "Session started");
    let printer = tokio::spawn(print_events(events));

    let stop = CancellationToken::new();
    let injected = CancellationToken::new();
    let injector = injections.map(|lines| {
        let (handle, cancel, done) = (handle.clone(), stop.child_token(), injected.clone());
        tokio::spawn(async move {
            run_injections(handle, lines, cancel).await;
            done.cancel();
        })
    });
    if has_dialogue {
        handle
            .send(ControlMessage::StartDialogue)
            .await
            .context("session closed before dialogue started")?;
    }

    // The script decides when the session ends; without one, the injections do.
    let done = match (&finished, &injector) {
        (Some(finished), _) => Some(finished.clone()),
        (None, Some(_)) => Some(injected.clone()),
        (None, None) => None,
    };
    tokio::select! {
        _ = async {
            match &done {
                Some(done) => done.cancelled().await,
                None => std::future::pending::<()>().await,
            }
        } => info!("Script finished"),
        _ = tokio::signal::ctrl_c() => info!("Interrupted"),
    }
    tokio::time::sleep(Duration::from_millis(args.grace_ms)).await;

    stop.cancel();
    if let Some(injector) = injector {
        let _ = injector.await;
    }
    handle.close();
    let record = join.await.context("session task failed")?;
    let _ = printer.await;

    write_exports(&record, args.export.as_deref(), args.export_json.as_deref())?;
    info!(
        entries = record.transcript.len(),
        interventions = record.interventions.len(),
        "Session closed"
    );
    Ok(())
}

async fn print_events(mut events: mpsc::Receiver<SessionEvent>) {
    while let Some(event) = events.recv().await {
        match serde_json::to_string(&event) {
            Ok(line) => println!("{line}"),
            Err(e) => warn!(error = %e, "Failed to serialize event"),
        }
    }
}

fn write_exports(
    record: &SessionRecord,
    markdown: Option<&Path>,
    json: Option<&Path>,
) -> Result<()> {
    if let Some(path) = markdown {
        export::write_markdown(record, path)
            .with_context(|| format!("failed to write {}", path.display()))?;
        info!(path = %path.display(), "Markdown summary written");
    }
    if let Some(path) = json {
        export::write_json(record, path)
            .with_context(|| format!("failed to write {}", path.display()))?;
        info!(path = %path.display(), "JSON export written");
    }
    Ok(())
}
