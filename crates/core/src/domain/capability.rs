//! 各ステージの処理を担う外部プロバイダのインターフェース。
//!
//! オーケストレータはこれらを交換可能な能力として扱い、利用不可や失敗を前提にする。
//! プロバイダ自身がスレッド安全性（内部での直列化を含む）に責任を持つ。

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::settings::SpeakerBounds;
use super::transcript::{SpeakerTurn, SummaryLength, TranscriptSegment};

// ─── Audio ───────────────────────────────────────────────────────

/// 変換済み音声ファイルへの参照
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioRef {
    pub path: PathBuf,
    /// ジョブが作成した一時ファイルか（finalize で削除する）
    pub temporary: bool,
}

impl AudioRef {
    pub fn source(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            temporary: false,
        }
    }

    pub fn temporary(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            temporary: true,
        }
    }
}

/// 読み込み済み音声
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedAudio {
    pub audio: AudioRef,
    /// 音声長 (秒)
    pub duration_secs: f64,
}

impl LoadedAudio {
    pub fn path(&self) -> &Path {
        &self.audio.path
    }
}

// ─── Normalize ───────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum NormalizeError {
    #[error("Converter not available: {0}")]
    NotAvailable(String),
    #[error("Conversion failed: {0}")]
    ConversionFailed(String),
    #[error("Audio load failed: {0}")]
    LoadFailed(String),
}

/// フォーマット正規化（動画からの音声抽出・音声の読み込み）
#[async_trait]
pub trait Normalizer: Send + Sync {
    /// コンテナから生音声を取り出す
    async fn normalize(&self, media: &Path) -> Result<AudioRef, NormalizeError>;

    /// `normalize` が書き出す一時ファイルのパス。
    ///
    /// 変換が途中で失敗した場合やワーカーが異常終了した場合にも削除できるよう、
    /// 呼び出し前に分かる必要がある。ファイルを作らない実装は None。
    fn temp_output(&self, _media: &Path) -> Option<PathBuf> {
        None
    }

    /// 音声を読み込み、長さを求める
    async fn load(&self, audio: &AudioRef) -> Result<LoadedAudio, NormalizeError>;

    fn name(&self) -> &str;
}

// ─── Transcribe ──────────────────────────────────────────────────

/// 書き起こし結果
#[derive(Debug, Clone, PartialEq)]
pub struct Transcription {
    pub segments: Vec<TranscriptSegment>,
    /// 検出言語。検出できなかった場合は None や空文字がありうる。
    pub detected_language: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum TranscribeError {
    #[error("Engine not available: {0}")]
    EngineNotAvailable(String),
    #[error("Audio format error: {0}")]
    AudioFormat(String),
    #[error("Transcription failed: {0}")]
    Failed(String),
    #[error("Transcription timed out: {0}")]
    Timeout(String),
}

#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(
        &self,
        audio: &LoadedAudio,
        language_hint: Option<&str>,
    ) -> Result<Transcription, TranscribeError>;

    fn name(&self) -> &str;
}

// ─── Align ───────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum AlignError {
    /// アライメントモデルが設定されていない。失敗ではなくスキップ扱い。
    #[error("Alignment not configured: {0}")]
    NotConfigured(String),
    #[error("No alignment model for language {0}")]
    UnsupportedLanguage(String),
    #[error("Alignment failed: {0}")]
    Failed(String),
}

/// タイムスタンプの精緻化。失敗してもジョブは継続する。
#[async_trait]
pub trait Aligner: Send + Sync {
    async fn align(
        &self,
        segments: &[TranscriptSegment],
        language: &str,
        audio: &LoadedAudio,
    ) -> Result<Vec<TranscriptSegment>, AlignError>;

    fn name(&self) -> &str;
}

// ─── Diarize ─────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum DiarizeError {
    /// 資格情報がない等で利用不可。エラーではなくスキップ扱い。
    #[error("Diarization unavailable: {0}")]
    Unavailable(String),
    /// 話者数パラメータの組み合わせを受け付けない
    #[error("Unsupported diarization parameters: {0}")]
    UnsupportedParameters(String),
    #[error("Diarization failed: {0}")]
    Failed(String),
}

#[async_trait]
pub trait Diarizer: Send + Sync {
    /// `bounds` が None のときは話者数の指定なしで実行する
    async fn diarize(
        &self,
        audio: &LoadedAudio,
        bounds: Option<SpeakerBounds>,
    ) -> Result<Vec<SpeakerTurn>, DiarizeError>;

    fn name(&self) -> &str;
}

// ─── Summarize ───────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum SummarizeError {
    #[error("Summarizer not available: {0}")]
    Unavailable(String),
    #[error("Summarization failed: {0}")]
    Failed(String),
    #[error("Summarization timeout")]
    Timeout,
}

#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, text: &str, length: SummaryLength) -> Result<String, SummarizeError>;

    fn name(&self) -> &str;
}
