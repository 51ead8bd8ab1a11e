use std::path::Path;

use async_trait::async_trait;

use crate::domain::capability::{LoadedAudio, TranscribeError, Transcriber, Transcription};
use crate::domain::language::AUTO_LANGUAGE;
pub use crate::domain::provider_config::WhisperConfig;
use crate::domain::transcript::TranscriptSegment;
use crate::infra::sidecar::{run_sidecar, which_binary, SidecarError};

/// Whisper.cpp sidecar プロセスマネージャ。
pub struct WhisperSidecar {
    config: WhisperConfig,
}

impl WhisperSidecar {
    pub fn new(config: WhisperConfig) -> Self {
        Self { config }
    }

    /// whisper バイナリとモデルの存在を検証する。
    pub fn validate(&self) -> Result<(), TranscribeError> {
        let config = &self.config;
        if which_binary(&config.binary_path).is_none() {
            return Err(TranscribeError::EngineNotAvailable(format!(
                "Whisper binary not found: {:?}",
                config.binary_path
            )));
        }
        if !config.model_path.exists() {
            return Err(TranscribeError::EngineNotAvailable(format!(
                "Whisper model not found: {:?}",
                config.model_path
            )));
        }
        Ok(())
    }

    /// whisper-cli 用のコマンドライン引数を構築する。
    fn build_args(config: &WhisperConfig, wav_path: &Path, language: &str) -> Vec<String> {
        vec![
            "--model".into(),
            config.model_path.to_string_lossy().into(),
            "--language".into(),
            language.into(),
            "--output-json".into(),
            "--no-prints".into(),
            "--threads".into(),
            config.threads.to_string(),
            "--temperature".into(),
            config.temperature.to_string(),
            "--beam-size".into(),
            config.beam_size.to_string(),
            "--entropy-thold".into(),
            config.entropy_thold.to_string(),
            "--logprob-thold".into(),
            config.logprob_thold.to_string(),
            "--file".into(),
            wav_path.to_string_lossy().into(),
        ]
    }
}

// ─── Whisper JSON デシリアライゼーション ──────────────────────────

/// whisper-cli --output-json の出力フォーマット。
#[derive(Debug, serde::Deserialize)]
struct WhisperJsonOutput {
    #[serde(default)]
    result: Option<WhisperJsonResult>,
    transcription: Vec<WhisperJsonSegment>,
}

#[derive(Debug, serde::Deserialize)]
struct WhisperJsonResult {
    language: Option<String>,
}

#[derive(Debug, serde::Deserialize)]
struct WhisperJsonSegment {
    offsets: WhisperOffsets,
    text: String,
}

#[derive(Debug, serde::Deserialize)]
struct WhisperOffsets {
    from: u64,
    to: u64,
}

/// whisper JSON 出力をパースする。
fn parse_whisper_output(output: &str) -> Result<Transcription, TranscribeError> {
    let json_str = output.trim();

    if json_str.is_empty() {
        return Ok(Transcription {
            segments: Vec::new(),
            detected_language: None,
        });
    }

    let parsed: WhisperJsonOutput = serde_json::from_str(json_str).map_err(|e| {
        TranscribeError::Failed(format!(
            "Failed to parse whisper JSON: {}. Raw: {}",
            e,
            crate::infra::sidecar::truncate(json_str, 500)
        ))
    })?;

    let segments = parsed
        .transcription
        .into_iter()
        .map(|seg| {
            TranscriptSegment::new(
                seg.offsets.from as f64 / 1000.0,
                seg.offsets.to as f64 / 1000.0,
                seg.text.trim(),
            )
        })
        .filter(|seg| !seg.text.is_empty())
        .collect();

    Ok(Transcription {
        segments,
        detected_language: parsed.result.and_then(|r| r.language),
    })
}

// ─── Transcriber 実装 ───────────────────────────────────────────

#[async_trait]
impl Transcriber for WhisperSidecar {
    async fn transcribe(
        &self,
        audio: &LoadedAudio,
        language_hint: Option<&str>,
    ) -> Result<Transcription, TranscribeError> {
        let wav_path = audio.path();
        if !wav_path.exists() {
            return Err(TranscribeError::AudioFormat(format!(
                "Audio file does not exist: {:?}",
                wav_path
            )));
        }

        let config = &self.config;
        let language = language_hint.unwrap_or(AUTO_LANGUAGE);
        let args = Self::build_args(config, wav_path, language);

        let output = run_sidecar(&config.binary_path, &args, &[], config.timeout_secs)
            .await
            .map_err(|e| match e {
                SidecarError::NotFound(path) => TranscribeError::EngineNotAvailable(format!(
                    "Whisper binary not found: {path:?}"
                )),
                SidecarError::Timeout(secs) => {
                    TranscribeError::Timeout(format!("Whisper timed out after {secs}s"))
                }
                other => TranscribeError::Failed(format!("Whisper {other}")),
            })?;

        let transcription = parse_whisper_output(&output.stdout)?;
        log::debug!(
            "whisper produced {} segments (language: {:?})",
            transcription.segments.len(),
            transcription.detected_language
        );
        Ok(transcription)
    }

    fn name(&self) -> &str {
        "whisper.cpp"
    }
}

// ─── テスト ─────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    #[test]
    fn parse_valid_json() {
        let json = r#"{
            "result": { "language": "en" },
            "transcription": [
                {
                    "timestamps": { "from": "00:00:00,000", "to": "00:00:02,500" },
                    "offsets": { "from": 0, "to": 2500 },
                    "text": " Hello"
                },
                {
                    "timestamps": { "from": "00:00:02,500", "to": "00:00:05,000" },
                    "offsets": { "from": 2500, "to": 5000 },
                    "text": " world"
                }
            ]
        }"#;

        let output = parse_whisper_output(json).unwrap();
        assert_eq!(output.detected_language.as_deref(), Some("en"));
        assert_eq!(output.segments.len(), 2);
        assert_eq!(output.segments[0].text, "Hello");
        assert_eq!(output.segments[0].start, 0.0);
        assert_eq!(output.segments[0].end, 2.5);
        assert_eq!(output.segments[1].text, "world");
    }

    #[test]
    fn parse_without_language() {
        let json = r#"{
            "transcription": [
                { "offsets": { "from": 0, "to": 3000 }, "text": " テスト音声です" }
            ]
        }"#;

        let output = parse_whisper_output(json).unwrap();
        assert!(output.detected_language.is_none());
        assert_eq!(output.segments.len(), 1);
    }

    #[test]
    fn parse_drops_blank_segments() {
        let json = r#"{
            "transcription": [
                { "offsets": { "from": 0, "to": 1000 }, "text": "   " },
                { "offsets": { "from": 1000, "to": 2000 }, "text": "ok" }
            ]
        }"#;
        let output = parse_whisper_output(json).unwrap();
        assert_eq!(output.segments.len(), 1);
    }

    #[test]
    fn parse_empty_string() {
        let output = parse_whisper_output("   \n  ").unwrap();
        assert!(output.segments.is_empty());
    }

    #[test]
    fn parse_invalid_json() {
        let err = parse_whisper_output("{invalid json}").unwrap_err();
        assert!(matches!(err, TranscribeError::Failed(_)));
    }

    #[test]
    fn validate_missing_binary() {
        let config = WhisperConfig {
            binary_path: PathBuf::from("/nonexistent/whisper-cli-xyz"),
            model_path: PathBuf::from("/nonexistent/model.bin"),
            ..Default::default()
        };
        let engine = WhisperSidecar::new(config);
        let err = engine.validate().unwrap_err();
        assert!(matches!(err, TranscribeError::EngineNotAvailable(_)));
    }

    #[test]
    fn build_args_format() {
        let config = WhisperConfig {
            beam_size: 5,
            ..Default::default()
        };
        let args = WhisperSidecar::build_args(&config, Path::new("/tmp/test.wav"), "auto");

        assert!(args.contains(&"--model".to_string()));
        assert!(args.contains(&"models/ggml-base.bin".to_string()));
        assert!(args.contains(&"--language".to_string()));
        assert!(args.contains(&"auto".to_string()));
        assert!(args.contains(&"--output-json".to_string()));
        assert!(args.contains(&"5".to_string()));
        assert!(args.contains(&"--file".to_string()));
        assert!(args.contains(&"/tmp/test.wav".to_string()));
    }

    #[tokio::test]
    async fn transcribe_missing_audio() {
        let engine = WhisperSidecar::new(WhisperConfig::default());
        let audio = LoadedAudio {
            audio: crate::domain::capability::AudioRef::source("/nonexistent/audio.wav"),
            duration_secs: 1.0,
        };
        let err = engine.transcribe(&audio, None).await.unwrap_err();
        assert!(matches!(err, TranscribeError::AudioFormat(_)));
    }
}
