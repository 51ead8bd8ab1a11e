use async_trait::async_trait;
use serde::Deserialize;

use crate::domain::capability::{DiarizeError, Diarizer, LoadedAudio};
pub use crate::domain::provider_config::DiarizerConfig;
use crate::domain::settings::SpeakerBounds;
use crate::domain::transcript::SpeakerTurn;
use crate::infra::sidecar::{run_sidecar, SidecarError};

/// 外部 CLI で話者区間を求める。
///
/// CLI は JSON 配列 `[{"start": 0.0, "end": 1.5, "speaker": "SPEAKER_00"}, ...]` を
/// 標準出力に書く。トークンは環境変数 `HUGGINGFACE_TOKEN` で渡す。
pub struct SidecarDiarizer {
    config: DiarizerConfig,
    token: Option<String>,
}

impl SidecarDiarizer {
    pub fn new(config: DiarizerConfig, token: Option<String>) -> Self {
        Self { config, token }
    }

    fn build_args(
        config: &DiarizerConfig,
        audio: &LoadedAudio,
        bounds: Option<SpeakerBounds>,
    ) -> Vec<String> {
        let mut args = vec![
            "--audio".into(),
            audio.path().to_string_lossy().into(),
            "--device".into(),
            config.device.clone(),
            "--output-json".into(),
        ];
        if let Some(b) = bounds {
            args.push("--min-speakers".into());
            args.push(b.min.to_string());
            args.push("--max-speakers".into());
            args.push(b.max.to_string());
        }
        args
    }
}

/// sidecar の失敗を話者分離エラーに分類する
fn classify_failure(err: SidecarError) -> DiarizeError {
    match err {
        SidecarError::NotFound(path) => {
            DiarizeError::Unavailable(format!("diarization binary not found: {path:?}"))
        }
        SidecarError::Exit { status, stderr } => {
            let lower = stderr.to_lowercase();
            if lower.contains("unrecognized arguments")
                || lower.contains("unexpected keyword argument")
            {
                DiarizeError::UnsupportedParameters(stderr)
            } else if lower.contains("gated")
                || lower.contains("private")
                || lower.contains("authentication")
                || lower.contains("token")
            {
                DiarizeError::Unavailable(format!("model access denied: {stderr}"))
            } else {
                DiarizeError::Failed(format!("exited with status {status}: {stderr}"))
            }
        }
        other => DiarizeError::Failed(other.to_string()),
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DiarizeJson {
    Turns(Vec<SpeakerTurn>),
    Wrapped { segments: Vec<SpeakerTurn> },
}

fn parse_turns(stdout: &str) -> Result<Vec<SpeakerTurn>, DiarizeError> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    let parsed: DiarizeJson = serde_json::from_str(trimmed)
        .map_err(|e| DiarizeError::Failed(format!("invalid diarization output: {e}")))?;
    Ok(match parsed {
        DiarizeJson::Turns(turns) => turns,
        DiarizeJson::Wrapped { segments } => segments,
    })
}

#[async_trait]
impl Diarizer for SidecarDiarizer {
    async fn diarize(
        &self,
        audio: &LoadedAudio,
        bounds: Option<SpeakerBounds>,
    ) -> Result<Vec<SpeakerTurn>, DiarizeError> {
        let binary = self.config.binary_path.as_ref().ok_or_else(|| {
            DiarizeError::Unavailable("no diarization binary configured".to_string())
        })?;
        let token = self.token.as_deref().filter(|t| !t.is_empty()).ok_or_else(|| {
            DiarizeError::Unavailable("HuggingFace token not configured".to_string())
        })?;

        let args = Self::build_args(&self.config, audio, bounds);
        let output = run_sidecar(
            binary,
            &args,
            &[("HUGGINGFACE_TOKEN", token)],
            self.config.timeout_secs,
        )
        .await
        .map_err(classify_failure)?;

        parse_turns(&output.stdout)
    }

    fn name(&self) -> &str {
        "sidecar-diarizer"
    }
}
