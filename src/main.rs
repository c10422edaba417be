use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::PathBuf;

use cutline::agent::Agent;
use cutline::llm::ProviderClient;
use cutline::models::timeline::SequenceProperties;
use cutline::session::{SessionLogger, SessionState};

/// Autonomous, tool-driven video editing agent.
///
/// Takes a natural-language instruction and a directory of media assets,
/// then drives an LLM tool loop until the job is finished. Renders and
/// exports land in an `output/` directory next to the assets directory.
#[derive(Debug, Parser)]
#[command(name = "cutline", version, about)]
struct Cli {
    /// Directory containing the media assets for this job.
    #[arg(long)]
    assets_dir: PathBuf,

    /// Sequence frame rate override (requires --width and --height too).
    #[arg(long)]
    fps: Option<f64>,

    /// Sequence width override.
    #[arg(long)]
    width: Option<u32>,

    /// Sequence height override.
    #[arg(long)]
    height: Option<u32>,

    /// Model identifier (defaults to $OUTPUT_MODEL_NAME, then "gpt-5").
    #[arg(long)]
    model: Option<String>,

    /// The editing instruction.
    prompt: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    cutline::init_logging();
    let cli = Cli::parse();

    let assets_dir = cli
        .assets_dir
        .canonicalize()
        .with_context(|| format!("Assets directory '{}' not found", cli.assets_dir.display()))?;
    if !assets_dir.is_dir() {
        bail!("'{}' is not a directory", assets_dir.display());
    }

    let sequence = match (cli.fps, cli.width, cli.height) {
        (Some(fps), Some(width), Some(height)) => Some(SequenceProperties { fps, width, height }),
        (None, None, None) => None,
        _ => bail!("--fps, --width, and --height must be provided together"),
    };

    let model = cli
        .model
        .or_else(|| std::env::var("OUTPUT_MODEL_NAME").ok())
        .unwrap_or_else(|| "gpt-5".to_string());

    let job_id = uuid::Uuid::new_v4().to_string();
    let state = SessionState::new(assets_dir, sequence);
    std::fs::create_dir_all(state.output_directory())
        .context("Could not create the output directory")?;
    let logs_dir = state.job_directory().join("logs");

    let provider = ProviderClient::from_env()?;
    let logger = SessionLogger::new(&job_id, &logs_dir)?;

    tracing::info!(event = "session_start", job_id = %job_id, model = %model, "Starting editing session");

    let mut agent = Agent::new(state, provider, logger, model);
    let run_result = agent.run_to_completion(&cli.prompt).await;

    // Uploaded provider files are released even when the run failed.
    agent.cleanup().await;

    match run_result? {
        Some(result) => {
            println!("Status:  {}", result.status);
            println!("Message: {}", result.message);
            if let Some(output_path) = result.output_path {
                println!("Output:  {output_path}");
            }
        }
        None => {
            println!("The agent stopped without calling finish_job; no final result was produced.");
        }
    }
    Ok(())
}
