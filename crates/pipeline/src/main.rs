//! clinsynth: synthetic clinical dialogue pipeline binary entrypoint.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use clinsynth::config::Config;
use clinsynth::llm::{BatchApi, OpenAiClient};
use clinsynth::stages::{augment, complaints, rebuild, soap, transcripts};
use clinsynth_core::{MissingPolicy, PipelineError};

#[derive(Parser)]
#[command(
    name = "clinsynth",
    version,
    about = "Synthetic clinical dialogue and SOAP note pipeline"
)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Command,
}

/// Overrides for the environment configuration
#[derive(Args)]
struct GlobalArgs {
    /// Directory holding every stage's artifacts
    #[arg(long, global = true)]
    work_dir: Option<PathBuf>,

    #[arg(long, global = true)]
    model: Option<String>,

    /// Sampling temperature for every request, replacing stage defaults
    #[arg(long, global = true)]
    temperature: Option<f32>,

    /// Seconds between job status polls
    #[arg(long, global = true)]
    poll_secs: Option<u64>,

    /// `strict`, a tolerated count (`25`) or fraction (`2%`) of missing ids
    #[arg(long, global = true)]
    missing_policy: Option<MissingPolicy>,

    /// Realtime calls in flight while building requests
    #[arg(long, global = true)]
    concurrency: Option<usize>,

    /// Reuse a submitted job and downloaded output from the work dir
    #[arg(long, global = true)]
    resume: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch the list of common chief complaints
    Complaints {
        #[arg(long, default_value_t = 200)]
        count: usize,
    },
    /// Generate patient rows and batch-generate their encounter transcripts
    Transcripts {
        #[arg(long, default_value_t = 1032)]
        rows: usize,
        /// Seed for reproducible demographics
        #[arg(long)]
        seed: Option<u64>,
        /// Refine each chief complaint with a realtime call first
        #[arg(long)]
        refine: bool,
    },
    /// Batch-generate SOAP notes from the transcripts
    Soap {
        /// One request per section instead of per note
        #[arg(long)]
        sections: bool,
    },
    /// Paraphrase every SOAP section in five formats
    Augment {
        /// Paraphrases per section and format
        #[arg(long, default_value_t = augment::DEFAULT_PARAPHRASES)]
        k: usize,
    },
    /// Re-merge stored transcript requests with a SOAP output, offline
    Rebuild {
        /// Transcript requests file (default: <work-dir>/transcripts/requests.jsonl)
        #[arg(long)]
        requests: Option<PathBuf>,
        /// SOAP output file (default: <work-dir>/soap/output.jsonl)
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Print the current status of a batch job
    Status { job_id: String },
}

impl GlobalArgs {
    fn apply(self, config: &mut Config) -> Result<(), PipelineError> {
        if let Some(dir) = self.work_dir {
            config.work_dir = dir;
        }
        if let Some(model) = self.model {
            config.model = model;
        }
        if let Some(temperature) = self.temperature {
            config.temperature = Some(temperature);
        }
        if let Some(secs) = self.poll_secs {
            config.poll_interval = std::time::Duration::from_secs(secs);
        }
        if let Some(policy) = self.missing_policy {
            config.missing_policy = policy;
        }
        if let Some(concurrency) = self.concurrency {
            if concurrency == 0 {
                return Err(PipelineError::Config(
                    "--concurrency must be at least 1".to_string(),
                ));
            }
            config.concurrency = concurrency;
        }
        config.resume = self.resume;
        Ok(())
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Logs go to stderr; stdout carries the stage summary
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(summary) => {
            println!("{summary}");
            ExitCode::SUCCESS
        }
        Err(err) => {
            tracing::error!(error = %err, "Stage failed");
            eprintln!("error: {err}");
            ExitCode::from(err.exit_code())
        }
    }
}

async fn run(cli: Cli) -> Result<String, PipelineError> {
    let mut config = Config::from_env()?;
    cli.global.apply(&mut config)?;
    tracing::info!(
        work_dir = %config.work_dir.display(),
        model = %config.model,
        missing_policy = %config.missing_policy,
        resume = config.resume,
        "Configuration loaded"
    );

    let summary = match cli.command {
        Command::Complaints { count } => {
            let client = OpenAiClient::from_config(&config)?;
            let (path, list) = complaints::run(&client, &config, count).await?;
            format!("complaints: {} written to {}", list.len(), path.display())
        }
        Command::Transcripts { rows, seed, refine } => {
            let client = OpenAiClient::from_config(&config)?;
            let options = transcripts::TranscriptOptions { rows, seed, refine };
            transcripts::run(&client, &client, &config, options)
                .await?
                .to_string()
        }
        Command::Soap { sections } => {
            let client = OpenAiClient::from_config(&config)?;
            soap::run(&client, &config, sections).await?.to_string()
        }
        Command::Augment { k } => {
            let client = OpenAiClient::from_config(&config)?;
            augment::run(&client, &config, k).await?.to_string()
        }
        Command::Rebuild { requests, output } => {
            let defaults = rebuild::RebuildOptions::from_work_dir(&config);
            let options = rebuild::RebuildOptions {
                requests: requests.unwrap_or(defaults.requests),
                output: output.unwrap_or(defaults.output),
            };
            rebuild::run(&config, &options)?.to_string()
        }
        Command::Status { job_id } => {
            let client = OpenAiClient::from_config(&config)?;
            let job = client.retrieve_batch(&job_id).await?;
            match job.output_handle() {
                Some(output) => format!("{}: {} (output {output})", job.job_id(), job.status()),
                None => format!("{}: {}", job.job_id(), job.status()),
            }
        }
    };
    Ok(summary)
}
