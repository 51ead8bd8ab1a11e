//! 外部プロバイダ（ffmpeg / whisper.cpp / 話者分離 CLI / Claude API）の設定値。
//!
//! `ServerSettings` の一部として TOML から読み込み、infra 側の各実装に渡す。

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// ffmpeg sidecar の設定。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FfmpegConfig {
    /// ffmpeg バイナリのパス
    pub ffmpeg_path: PathBuf,
    /// ffprobe バイナリのパス
    pub ffprobe_path: PathBuf,
    /// 出力サンプルレート (Hz)
    pub sample_rate: u32,
    /// タイムアウト秒数
    pub timeout_secs: u64,
}

impl Default for FfmpegConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: PathBuf::from("ffmpeg"),
            ffprobe_path: PathBuf::from("ffprobe"),
            sample_rate: 16_000,
            timeout_secs: 600,
        }
    }
}

/// Whisper.cpp sidecar の設定。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WhisperConfig {
    /// whisper-cli バイナリのパス
    pub binary_path: PathBuf,
    /// GGML モデルファイルのパス
    pub model_path: PathBuf,
    /// サンプリング温度 (0.0 = greedy)
    pub temperature: f32,
    /// ビームサーチサイズ (1 = greedy)
    pub beam_size: u32,
    /// タイムアウト秒数
    pub timeout_secs: u64,
    /// 使用スレッド数
    pub threads: u32,
    /// エントロピー閾値 (高エントロピーセグメントをフィルタ)
    pub entropy_thold: f32,
    /// 対数確率閾値 (低確率セグメントをフィルタ)
    pub logprob_thold: f32,
}

impl Default for WhisperConfig {
    fn default() -> Self {
        Self {
            binary_path: PathBuf::from("whisper-cli"),
            model_path: PathBuf::from("models/ggml-base.bin"),
            temperature: 0.0,
            beam_size: 1,
            timeout_secs: 1800,
            threads: 4,
            entropy_thold: 2.4,
            logprob_thold: -1.0,
        }
    }
}

/// 話者分離 sidecar の設定。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiarizerConfig {
    /// 話者分離 CLI のパス。None なら話者分離は利用不可。
    pub binary_path: Option<PathBuf>,
    /// 実行デバイス ("cpu" / "cuda")
    pub device: String,
    /// タイムアウト秒数
    pub timeout_secs: u64,
}

impl Default for DiarizerConfig {
    fn default() -> Self {
        Self {
            binary_path: None,
            device: "cpu".to_string(),
            timeout_secs: 1800,
        }
    }
}

/// 要約プロバイダの設定
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SummarizerConfig {
    /// Claude API キー。None なら要約は利用不可。
    pub api_key: Option<String>,
    pub model: String,
    pub endpoint: String,
    /// タイムアウト秒数
    pub timeout_secs: u64,
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: "claude-sonnet-4-20250514".to_string(),
            endpoint: "https://api.anthropic.com/v1/messages".to_string(),
            timeout_secs: 120,
        }
    }
}
