pub mod claude;
mod noop;
pub mod prompts;

pub use claude::ClaudeSummarizer;
pub use noop::NoopSummarizer;
pub use crate::domain::provider_config::SummarizerConfig;
