use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::prompts;
use super::SummarizerConfig;
use crate::domain::capability::{SummarizeError, Summarizer};
use crate::domain::transcript::SummaryLength;

/// Claude API を使用した要約プロバイダ
pub struct ClaudeSummarizer {
    client: reqwest::Client,
    api_key: String,
    model: String,
    endpoint: String,
}

#[derive(Serialize)]
struct MessageRequest {
    model: String,
    max_tokens: u32,
    system: String,
    messages: Vec<Message>,
}

#[derive(Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct MessageResponse {
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    text: Option<String>,
}

impl ClaudeSummarizer {
    pub fn new(config: &SummarizerConfig) -> Result<Self, SummarizeError> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| SummarizeError::Unavailable("API key not configured".to_string()))?;

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| SummarizeError::Unavailable(format!("HTTP client init failed: {e}")))?;

        Ok(Self {
            client,
            api_key,
            model: config.model.clone(),
            endpoint: config.endpoint.clone(),
        })
    }

    fn build_request(&self, text: &str, length: SummaryLength) -> MessageRequest {
        MessageRequest {
            model: self.model.clone(),
            max_tokens: prompts::max_tokens_for(length),
            system: prompts::SYSTEM_SUMMARY.to_string(),
            messages: vec![Message {
                role: "user".to_string(),
                content: prompts::build_prompt(text, length),
            }],
        }
    }
}

#[async_trait]
impl Summarizer for ClaudeSummarizer {
    async fn summarize(&self, text: &str, length: SummaryLength) -> Result<String, SummarizeError> {
        let request = self.build_request(text, length);

        let response = self
            .client
            .post(&self.endpoint)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SummarizeError::Timeout
                } else if e.is_connect() {
                    SummarizeError::Unavailable(format!("cannot reach summarizer: {e}"))
                } else {
                    SummarizeError::Failed(format!("HTTP request failed: {e}"))
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(SummarizeError::Failed(format!(
                "Claude API error: {status} - {body}"
            )));
        }

        let msg_response: MessageResponse = response
            .json()
            .await
            .map_err(|e| SummarizeError::Failed(format!("Response parse error: {e}")))?;

        let text = msg_response
            .content
            .into_iter()
            .filter_map(|block| block.text)
            .collect::<Vec<_>>()
            .join("")
            .trim()
            .to_string();

        if text.is_empty() {
            return Err(SummarizeError::Failed("Empty response from Claude API".to_string()));
        }

        Ok(text)
    }

    fn name(&self) -> &str {
        "claude"
    }
}
