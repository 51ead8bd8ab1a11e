use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::domain::capability::{AudioRef, LoadedAudio, NormalizeError, Normalizer};
pub use crate::domain::provider_config::FfmpegConfig;
use crate::infra::sidecar::{run_sidecar, SidecarError};

/// ffmpeg で動画から 16kHz mono PCM の WAV を取り出す。
pub struct FfmpegNormalizer {
    config: FfmpegConfig,
}

impl FfmpegNormalizer {
    pub fn new(config: FfmpegConfig) -> Self {
        Self { config }
    }

    /// 変換先パス: 入力と同じディレクトリの `<stem>_audio.wav`
    fn output_path(media: &Path) -> PathBuf {
        let stem = media
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "media".to_string());
        media.with_file_name(format!("{stem}_audio.wav"))
    }

    fn build_convert_args(config: &FfmpegConfig, media: &Path, output: &Path) -> Vec<String> {
        vec![
            "-i".into(),
            media.to_string_lossy().into(),
            "-ar".into(),
            config.sample_rate.to_string(),
            "-ac".into(),
            "1".into(),
            "-c:a".into(),
            "pcm_s16le".into(),
            output.to_string_lossy().into(),
            "-y".into(),
        ]
    }

    fn build_probe_args(audio: &Path) -> Vec<String> {
        vec![
            "-v".into(),
            "error".into(),
            "-show_entries".into(),
            "format=duration".into(),
            "-of".into(),
            "default=noprint_wrappers=1:nokey=1".into(),
            audio.to_string_lossy().into(),
        ]
    }

    async fn probe_duration(&self, audio: &Path) -> Result<f64, NormalizeError> {
        let args = Self::build_probe_args(audio);
        let output = run_sidecar(&self.config.ffprobe_path, &args, &[], self.config.timeout_secs)
            .await
            .map_err(|e| map_sidecar_error(e, NormalizeError::LoadFailed))?;
        parse_probe_duration(&output.stdout)
    }
}

fn map_sidecar_error(
    err: SidecarError,
    wrap: fn(String) -> NormalizeError,
) -> NormalizeError {
    match err {
        SidecarError::NotFound(path) => {
            NormalizeError::NotAvailable(format!("binary not found: {path:?}"))
        }
        other => wrap(other.to_string()),
    }
}

/// ffprobe の duration 出力をパースする
fn parse_probe_duration(stdout: &str) -> Result<f64, NormalizeError> {
    let line = stdout.lines().map(str::trim).find(|l| !l.is_empty()).unwrap_or("");
    line.parse::<f64>()
        .ok()
        .filter(|d| d.is_finite() && *d >= 0.0)
        .ok_or_else(|| NormalizeError::LoadFailed(format!("unexpected ffprobe output: {line:?}")))
}

/// WAV ヘッダから音声長 (秒) を求める
pub fn wav_duration_secs(path: &Path) -> Result<f64, NormalizeError> {
    let reader = hound::WavReader::open(path)
        .map_err(|e| NormalizeError::LoadFailed(format!("{}: {e}", path.display())))?;
    let spec = reader.spec();
    if spec.sample_rate == 0 {
        return Ok(0.0);
    }
    // duration() はチャンネルあたりのサンプル数
    Ok(reader.duration() as f64 / spec.sample_rate as f64)
}

fn is_wav(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("wav"))
        .unwrap_or(false)
}

#[async_trait]
impl Normalizer for FfmpegNormalizer {
    async fn normalize(&self, media: &Path) -> Result<AudioRef, NormalizeError> {
        let output = Self::output_path(media);
        let args = Self::build_convert_args(&self.config, media, &output);

        run_sidecar(&self.config.ffmpeg_path, &args, &[], self.config.timeout_secs)
            .await
            .map_err(|e| map_sidecar_error(e, NormalizeError::ConversionFailed))?;

        log::info!("Converted {} -> {}", media.display(), output.display());
        Ok(AudioRef::temporary(output))
    }

    async fn load(&self, audio: &AudioRef) -> Result<LoadedAudio, NormalizeError> {
        if !audio.path.exists() {
            return Err(NormalizeError::LoadFailed(format!(
                "audio file does not exist: {}",
                audio.path.display()
            )));
        }

        let duration_secs = if is_wav(&audio.path) {
            let path = audio.path.clone();
            tokio::task::spawn_blocking(move || wav_duration_secs(&path))
                .await
                .map_err(|e| NormalizeError::LoadFailed(format!("load task failed: {e}")))??
        } else {
            self.probe_duration(&audio.path).await?
        };

        Ok(LoadedAudio {
            audio: audio.clone(),
            duration_secs,
        })
    }

    fn temp_output(&self, media: &Path) -> Option<PathBuf> {
        Some(Self::output_path(media))
    }

    fn name(&self) -> &str {
        "ffmpeg"
    }
}
