mod cli;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;

use nv_core::domain::capability::{Diarizer, Summarizer};
use nv_core::domain::settings::{JobOptions, ServerSettings};
use nv_core::domain::transcript::SummaryLength;
use nv_core::infra::align::PassthroughAligner;
use nv_core::infra::diarize::SidecarDiarizer;
use nv_core::infra::normalize::FfmpegNormalizer;
use nv_core::infra::storage::{SqliteResultSink, Storage};
use nv_core::infra::stt::WhisperSidecar;
use nv_core::infra::summarize::{ClaudeSummarizer, NoopSummarizer};
use nv_core::usecase::{Capabilities, JobQueue};

use cli::{Cli, Commands, RunArgs};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "nurgavoice=info,nv_core=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let settings = load_settings(cli.config.as_deref())?;

    match cli.command {
        Commands::Run(args) => run(settings, args).await,
        Commands::Show { job_id } => show(&settings, &job_id),
        Commands::Prune { before } => prune(&settings, &before),
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&settings)?);
            Ok(())
        }
    }
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("nurgavoice").join("config.toml"))
}

fn load_settings(path: Option<&Path>) -> Result<ServerSettings> {
    let settings = match path {
        Some(p) => ServerSettings::load(p)?,
        None => match default_config_path() {
            Some(p) => ServerSettings::load_or_default(&p)?,
            None => ServerSettings::default(),
        },
    };
    Ok(settings.with_env_overrides())
}

fn open_storage(settings: &ServerSettings) -> Result<Storage> {
    if let Some(parent) = settings.db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
    }
    Ok(Storage::open(&settings.db_path.to_string_lossy())?)
}

fn build_capabilities(settings: &ServerSettings) -> Capabilities {
    let transcriber = WhisperSidecar::new(settings.whisper.clone());
    if let Err(e) = transcriber.validate() {
        log::warn!("{e}");
    }

    let diarizer: Option<Arc<dyn Diarizer>> = settings.diarizer.binary_path.as_ref().map(|_| {
        Arc::new(SidecarDiarizer::new(
            settings.diarizer.clone(),
            settings.huggingface_token.clone(),
        )) as Arc<dyn Diarizer>
    });

    let summarizer: Arc<dyn Summarizer> = match ClaudeSummarizer::new(&settings.summarizer) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            log::warn!("Summaries disabled: {e}");
            Arc::new(NoopSummarizer)
        }
    };

    Capabilities {
        normalizer: Arc::new(FfmpegNormalizer::new(settings.ffmpeg.clone())),
        transcriber: Arc::new(transcriber),
        aligner: Arc::new(PassthroughAligner),
        diarizer,
        summarizer,
    }
}

async fn run(mut settings: ServerSettings, args: RunArgs) -> Result<()> {
    if args.keep_input {
        settings.delete_uploads_after_processing = false;
    }
    let sink = Arc::new(SqliteResultSink::new(open_storage(&settings)?));
    let caps = build_capabilities(&settings);
    let queue = JobQueue::new(settings, caps, sink);

    let options = JobOptions {
        language: args.language,
        summary_length: SummaryLength::parse(&args.summary_length),
        summary_enabled: !args.no_summary,
        diarization_enabled: args.diarize,
        min_speakers: args.min_speakers,
        max_speakers: args.max_speakers,
    };
    let job_id = queue.submit(&args.file, options).await?;
    eprintln!("job {job_id}");

    let mut sub = queue.subscribe(&job_id)?;
    while let Some(state) = sub.next().await {
        if !args.quiet {
            eprintln!("[{:>3}%] {}", state.progress, state.step_label);
        }
    }

    let state = queue.wait(&job_id).await?;
    if let Some(error) = state.error {
        bail!("job {job_id} failed: [{}] {}: {}", error.code.as_str(), error.message, error.detail);
    }
    let result = queue.fetch(&job_id)?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

fn show(settings: &ServerSettings, job_id: &str) -> Result<()> {
    let storage = open_storage(settings)?;
    match storage.get_result(job_id)? {
        Some(state) => {
            println!("{}", serde_json::to_string_pretty(&state)?);
            Ok(())
        }
        None => bail!("no stored result for job {job_id}"),
    }
}

fn prune(settings: &ServerSettings, before: &str) -> Result<()> {
    let storage = open_storage(settings)?;
    let deleted = storage.delete_results_before(before)?;
    let remaining = storage.count_results()?;
    eprintln!("deleted {deleted} result(s), {remaining} remaining");
    Ok(())
}
