use async_trait::async_trait;

use crate::domain::capability::{SummarizeError, Summarizer};
use crate::domain::transcript::SummaryLength;

/// NoopSummarizer: 要約モデル未設定時の実装。常に利用不可を返す。
pub struct NoopSummarizer;

#[async_trait]
impl Summarizer for NoopSummarizer {
    async fn summarize(&self, _text: &str, _length: SummaryLength) -> Result<String, SummarizeError> {
        Err(SummarizeError::Unavailable("LLM model not loaded".to_string()))
    }

    fn name(&self) -> &str {
        "noop"
    }
}
