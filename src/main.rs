//! Analyst Agent CLI
//!
//! Runs data-analysis sessions from the terminal, one-shot or from a REPL.

use analyst_agent::channel::Received;
use analyst_agent::{
    dataset, telemetry, AgentSettings, AnalysisAgent, Config, EventReceiver, ExecutionOutcome,
    ModelClient, ProviderClient, PythonSandboxLauncher, StreamEvent,
};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Default data directory for logs and REPL history
fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("analyst_agent"))
        .unwrap_or_else(|| PathBuf::from(".analyst_agent"))
}

#[derive(Parser)]
#[command(name = "analyst-agent")]
#[command(about = "Analyst Agent - LLM-driven data analysis with a persistent Python sandbox", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Root directory for session outputs
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Maximum number of rounds per analysis
    #[arg(long)]
    max_rounds: Option<u32>,

    /// LLM model to use
    #[arg(short, long)]
    model: Option<String>,

    /// Base URL for a custom OpenAI-compatible endpoint
    #[arg(long)]
    base_url: Option<String>,

    /// API key - overrides env vars
    #[arg(long)]
    api_key: Option<String>,

    /// Data directory for logs and history
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a single analysis and print its events
    Run {
        /// What to find out, in natural language
        #[arg(short, long)]
        goal: String,

        /// Data files the analysis may use
        #[arg(short, long = "file")]
        files: Vec<PathBuf>,

        /// CSV file to copy under <output-dir>/uploads/ as input_data.csv
        #[arg(long)]
        csv: Option<PathBuf>,

        /// Print events as Server-Sent Events frames
        #[arg(long)]
        sse: bool,
    },

    /// Start an interactive REPL; each goal runs a fresh session
    Repl,
}

fn build_config(cli: &Cli, data_dir: &Path) -> Result<Config> {
    let mut config = Config::from_env()?
        .with_verbose(cli.verbose)
        .with_log_dir(data_dir.join("logs"));

    if let Some(ref base_url) = cli.base_url {
        config = config.with_base_url(base_url);
    }
    if let Some(ref model) = cli.model {
        config = config.with_model(model);
    }
    if let Some(ref api_key) = cli.api_key {
        config = config.with_api_key(api_key.clone());
    }
    if let Some(ref output_dir) = cli.output_dir {
        config = config.with_output_dir(output_dir.clone());
    }
    if let Some(max_rounds) = cli.max_rounds {
        config = config.with_max_rounds(max_rounds);
    }

    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let data_dir = cli.data_dir.clone().unwrap_or_else(default_data_dir);
    std::fs::create_dir_all(&data_dir)?;

    let config = build_config(&cli, &data_dir)?;
    let _telemetry = telemetry::init(&config.telemetry)?;

    let model: Arc<dyn ModelClient> = Arc::new(ProviderClient::new(&config.llm)?);
    let launcher = Arc::new(PythonSandboxLauncher::new(config.sandbox.clone()));
    let agent = AnalysisAgent::new(model, launcher, AgentSettings::from(&config));

    let provider = config.provider();
    tracing::info!(
        provider = config.llm.provider.as_str(),
        base_url = %provider.base_url,
        model = %provider.default_model,
        output_dir = %config.output_dir.display(),
        max_rounds = config.max_rounds,
        "Analyst agent ready"
    );

    match cli.command {
        Some(Commands::Run {
            goal,
            mut files,
            csv,
            sse,
        }) => {
            if let Some(csv) = csv {
                let text = std::fs::read_to_string(&csv)
                    .with_context(|| format!("Failed to read {}", csv.display()))?;
                files.push(dataset::materialize_upload(&text, &config.output_dir, &goal)?);
            }
            let events = agent.run(goal, files);
            let succeeded = if sse {
                print_sse(events).await?
            } else {
                print_events(events).await?
            };
            if !succeeded {
                anyhow::bail!("Analysis failed");
            }
        }
        Some(Commands::Repl) | None => {
            run_repl(&agent, &data_dir).await?;
        }
    }

    Ok(())
}

/// Write raw SSE frames to stdout. Returns false if the run reported an error.
async fn print_sse(events: EventReceiver) -> Result<bool> {
    let mut stream = events.into_stream();
    let mut stdout = std::io::stdout();
    let mut succeeded = true;

    while let Some(item) = stream.next().await {
        if let analyst_agent::StreamItem::Event(StreamEvent::Error { .. }) = item {
            succeeded = false;
        }
        stdout.write_all(item.to_sse().as_bytes())?;
        stdout.flush()?;
    }
    Ok(succeeded)
}

/// Human-readable rendering. The model's text is echoed as it streams in;
/// code and results are printed once a round is finalized.
async fn print_events(mut events: EventReceiver) -> Result<bool> {
    let mut stdout = std::io::stdout();
    let mut live = String::new();
    let mut succeeded = true;

    loop {
        match events.recv().await {
            Received::Event(event) => match event {
                StreamEvent::Log { content } => {
                    live.clear();
                    println!("\n== {}", content);
                }
                StreamEvent::Step {
                    thought,
                    code,
                    execution_result: None,
                    ..
                } if code.is_empty() => {
                    // Growing response text; the finalized completion step is shorter
                    if let Some(suffix) = thought.strip_prefix(live.as_str()) {
                        print!("{}", suffix);
                        stdout.flush()?;
                        live = thought;
                    }
                }
                StreamEvent::Step {
                    code,
                    execution_result,
                    ..
                } => {
                    println!();
                    if !code.is_empty() {
                        println!("--- code ---\n{}", code);
                    }
                    if let Some(outcome) = execution_result {
                        print_outcome(&outcome);
                    }
                }
                StreamEvent::Report { content } => {
                    println!("\n=== Report ===\n{}", content.text);
                    if !content.images.is_empty() {
                        println!("\nImages:");
                        for image in &content.images {
                            println!("  {}", image);
                        }
                    }
                }
                StreamEvent::Error { content } => {
                    succeeded = false;
                    eprintln!("\nError: {}", content);
                }
            },
            Received::End => break,
            Received::Abandoned => {
                eprintln!("\nError: analysis task ended unexpectedly");
                succeeded = false;
                break;
            }
        }
    }
    Ok(succeeded)
}

fn print_outcome(outcome: &ExecutionOutcome) {
    let status = if outcome.succeeded { "ok" } else { "failed" };
    println!("--- result ({}) ---", status);
    if !outcome.stdout.trim().is_empty() {
        println!("{}", outcome.stdout.trim_end());
    }
    if let Some(ref error) = outcome.error {
        println!("{}", error);
    }
    if let Some(ref image) = outcome.artifact_path {
        println!("image: {}", image);
    }
}

fn print_help() {
    println!("Commands:");
    println!("  /file <path>  - Attach a data file to the next analyses");
    println!("  /files        - Show attached files");
    println!("  /clear        - Detach all files");
    println!("  /quit, /exit  - Exit the REPL");
    println!("  /help         - Show this help");
}

async fn run_repl(agent: &AnalysisAgent, data_dir: &Path) -> Result<()> {
    println!("Analyst Agent REPL");
    println!("Output directory: {}", agent.settings().output_dir.display());
    println!("Max rounds: {}", agent.settings().max_rounds);
    println!();
    print_help();
    println!();

    let mut rl = DefaultEditor::new()?;
    let history_path = data_dir.join("history.txt");
    let _ = rl.load_history(&history_path);

    let mut files: Vec<PathBuf> = Vec::new();

    loop {
        match rl.readline("analyst> ") {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                rl.add_history_entry(line)?;

                if line.starts_with('/') {
                    let (cmd, arg) = match line.split_once(' ') {
                        Some((cmd, arg)) => (cmd, Some(arg.trim())),
                        None => (line, None),
                    };
                    match cmd {
                        "/quit" | "/exit" => {
                            println!("Goodbye!");
                            break;
                        }
                        "/file" => match arg.filter(|a| !a.is_empty()) {
                            Some(path) => {
                                let path = PathBuf::from(path);
                                if path.is_file() {
                                    println!("Attached {}", path.display());
                                    files.push(path);
                                } else {
                                    eprintln!("Not a file: {}", path.display());
                                }
                            }
                            None => println!("Usage: /file <path>"),
                        },
                        "/files" => {
                            if files.is_empty() {
                                println!("No files attached.");
                            }
                            for file in &files {
                                println!("  {}", file.display());
                            }
                        }
                        "/clear" => {
                            files.clear();
                            println!("Files detached.");
                        }
                        "/help" => print_help(),
                        _ => println!("Unknown command: {}", cmd),
                    }
                    continue;
                }

                let events = agent.run(line, files.clone());
                if let Err(e) = print_events(events).await {
                    eprintln!("Error: {}", e);
                }
                println!();
            }
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => {
                println!("Goodbye!");
                break;
            }
            Err(e) => {
                eprintln!("Error: {}", e);
                break;
            }
        }
    }

    let _ = rl.save_history(&history_path);
    Ok(())
}
