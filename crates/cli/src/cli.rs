//! コマンドライン引数

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Transcribe, diarize and summarize media files
#[derive(Parser, Debug)]
#[command(name = "nurgavoice", version, about = "Media transcription job runner")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file (default: <config dir>/nurgavoice/config.toml)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run one media file through the pipeline and print the result as JSON
    Run(RunArgs),

    /// Print a stored job result
    Show {
        /// Job id printed by `run`
        job_id: String,
    },

    /// Delete stored results older than the given RFC3339 timestamp
    Prune {
        #[arg(long, value_name = "RFC3339")]
        before: String,
    },

    /// Print the effective configuration
    Config,
}

#[derive(clap::Args, Debug)]
pub struct RunArgs {
    /// Media file (mp3, wav, mp4, avi, m4a, flac, ogg)
    pub file: PathBuf,

    /// Language code, or "auto" to detect
    #[arg(long, short, default_value = "auto")]
    pub language: String,

    /// Summary length: short, medium, long
    #[arg(long, default_value = "medium")]
    pub summary_length: String,

    /// Skip summary generation
    #[arg(long)]
    pub no_summary: bool,

    /// Label segments with speakers
    #[arg(long)]
    pub diarize: bool,

    #[arg(long, default_value_t = 1)]
    pub min_speakers: u32,

    #[arg(long, default_value_t = 10)]
    pub max_speakers: u32,

    /// Keep the input file after processing
    #[arg(long)]
    pub keep_input: bool,

    /// Do not print progress to stderr
    #[arg(long, short)]
    pub quiet: bool,
}
