use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::error::AppError;
use super::provider_config::{DiarizerConfig, FfmpegConfig, SummarizerConfig, WhisperConfig};
use super::transcript::SummaryLength;

/// サーバー設定
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// 話者数の下限（グローバル）
    pub speaker_min: u32,
    /// 話者数の上限（グローバル）
    pub speaker_max: u32,
    /// サーバー側で話者分離を有効にするか
    pub diarization_enabled: bool,
    /// 話者分離モデル用の HuggingFace トークン
    pub huggingface_token: Option<String>,
    /// 処理後にアップロード元ファイルを削除するか
    pub delete_uploads_after_processing: bool,
    /// これより短い音声は要約を自動スキップ (秒)
    pub short_audio_threshold_secs: f64,
    /// 受け付ける拡張子（ドットなし・小文字）
    pub allowed_extensions: Vec<String>,
    /// 音声抽出が必要なコンテナ拡張子
    pub video_extensions: Vec<String>,
    pub max_upload_bytes: u64,
    /// 同時実行ジョブ数
    pub max_concurrent_jobs: usize,
    /// 購読者ごとのバッファ長
    pub subscriber_buffer: usize,
    /// 結果保存先 SQLite
    pub db_path: PathBuf,
    pub whisper: WhisperConfig,
    pub ffmpeg: FfmpegConfig,
    pub diarizer: DiarizerConfig,
    pub summarizer: SummarizerConfig,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            speaker_min: 1,
            speaker_max: 10,
            diarization_enabled: true,
            huggingface_token: None,
            delete_uploads_after_processing: true,
            short_audio_threshold_secs: 30.0,
            allowed_extensions: ["mp3", "wav", "mp4", "avi", "m4a", "flac", "ogg"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            video_extensions: vec!["mp4".to_string(), "avi".to_string()],
            max_upload_bytes: 512 * 1024 * 1024,
            max_concurrent_jobs: 2,
            subscriber_buffer: 64,
            db_path: PathBuf::from("results/nurgavoice.db"),
            whisper: WhisperConfig::default(),
            ffmpeg: FfmpegConfig::default(),
            diarizer: DiarizerConfig::default(),
            summarizer: SummarizerConfig::default(),
        }
    }
}

impl ServerSettings {
    /// TOML ファイルから読み込む。欠けているフィールドはデフォルト値。
    pub fn load(path: &Path) -> Result<Self, AppError> {
        let contents = fs::read_to_string(path).map_err(|e| {
            AppError::config(format!("設定ファイルを読めません {}: {e}", path.display()))
        })?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self, AppError> {
        toml::from_str(contents).map_err(|e| AppError::config(format!("設定の解析に失敗: {e}")))
    }

    /// ファイルがなければデフォルト値。不正な TOML はエラー。
    pub fn load_or_default(path: &Path) -> Result<Self, AppError> {
        if !path.exists() {
            log::info!("Config file {} not found, using defaults", path.display());
            return Ok(Self::default());
        }
        Self::load(path)
    }

    /// 環境変数による上書き
    ///
    /// - NURGAVOICE_WHISPER_BIN → whisper.binary_path
    /// - NURGAVOICE_WHISPER_MODEL → whisper.model_path
    /// - NURGAVOICE_FFMPEG_BIN → ffmpeg.ffmpeg_path
    /// - NURGAVOICE_DB_PATH → db_path
    /// - HUGGINGFACE_TOKEN → huggingface_token
    /// - ANTHROPIC_API_KEY → summarizer.api_key
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(v) = non_empty_env("NURGAVOICE_WHISPER_BIN") {
            self.whisper.binary_path = PathBuf::from(v);
        }
        if let Some(v) = non_empty_env("NURGAVOICE_WHISPER_MODEL") {
            self.whisper.model_path = PathBuf::from(v);
        }
        if let Some(v) = non_empty_env("NURGAVOICE_FFMPEG_BIN") {
            self.ffmpeg.ffmpeg_path = PathBuf::from(v);
        }
        if let Some(v) = non_empty_env("NURGAVOICE_DB_PATH") {
            self.db_path = PathBuf::from(v);
        }
        if let Some(v) = non_empty_env("HUGGINGFACE_TOKEN") {
            self.huggingface_token = Some(v);
        }
        if let Some(v) = non_empty_env("ANTHROPIC_API_KEY") {
            self.summarizer.api_key = Some(v);
        }
        self
    }

    /// 話者数の指定をグローバル範囲に収める。min ≤ max は max を引き上げて保証する。
    pub fn clamp_speakers(&self, min: u32, max: u32) -> SpeakerBounds {
        let global_min = self.speaker_min.min(self.speaker_max);
        let global_max = self.speaker_max.max(global_min);
        let min = min.clamp(global_min, global_max);
        let max = max.min(global_max).max(min);
        SpeakerBounds { min, max }
    }

    /// 拡張子（ドットなし・小文字）を取り出す
    pub fn extension_of(path: &Path) -> Option<String> {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
    }

    pub fn is_allowed(&self, path: &Path) -> bool {
        Self::extension_of(path)
            .map(|ext| self.allowed_extensions.iter().any(|a| a.eq_ignore_ascii_case(&ext)))
            .unwrap_or(false)
    }

    /// 拡張子で判定し、音声抽出（demux）が必要なコンテナかどうか
    pub fn requires_normalization(&self, path: &Path) -> bool {
        Self::extension_of(path)
            .map(|ext| self.video_extensions.iter().any(|v| v.eq_ignore_ascii_case(&ext)))
            .unwrap_or(false)
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

/// クランプ済みの話者数範囲
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpeakerBounds {
    pub min: u32,
    pub max: u32,
}

/// 投入時のオプション
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JobOptions {
    /// 言語コード、または "auto"
    pub language: String,
    pub summary_length: SummaryLength,
    pub summary_enabled: bool,
    pub diarization_enabled: bool,
    pub min_speakers: u32,
    pub max_speakers: u32,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            language: "auto".to_string(),
            summary_length: SummaryLength::Medium,
            summary_enabled: true,
            diarization_enabled: false,
            min_speakers: 1,
            max_speakers: 10,
        }
    }
}
