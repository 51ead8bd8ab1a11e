use serde::{Deserialize, Serialize};

/// アプリケーション共通エラーコード
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    #[serde(rename = "E_INPUT_CONVERSION")]
    InputConversion,
    #[serde(rename = "E_TRANSCRIPTION")]
    Transcription,
    #[serde(rename = "E_ALIGNMENT")]
    Alignment,
    #[serde(rename = "E_DIARIZATION")]
    Diarization,
    #[serde(rename = "E_DIARIZATION_UNAVAILABLE")]
    DiarizationUnavailable,
    #[serde(rename = "E_SUMMARIZATION_UNAVAILABLE")]
    SummarizationUnavailable,
    #[serde(rename = "E_CLEANUP")]
    Cleanup,
    #[serde(rename = "E_INVALID_INPUT")]
    InvalidInput,
    #[serde(rename = "E_INVALID_STATE")]
    InvalidState,
    #[serde(rename = "E_NOT_FOUND")]
    NotFound,
    #[serde(rename = "E_CANCELED")]
    Canceled,
    #[serde(rename = "E_STORAGE")]
    Storage,
    #[serde(rename = "E_CONFIG")]
    Config,
    #[serde(rename = "E_INTERNAL")]
    Internal,
}

impl ErrorCode {
    /// ジョブを failed に遷移させるエラーかどうか。
    /// それ以外はステージ境界で吸収され、メタデータに記録される。
    pub fn is_fatal(self) -> bool {
        matches!(
            self,
            Self::InputConversion | Self::Transcription | Self::Canceled | Self::Internal
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::InputConversion => "E_INPUT_CONVERSION",
            Self::Transcription => "E_TRANSCRIPTION",
            Self::Alignment => "E_ALIGNMENT",
            Self::Diarization => "E_DIARIZATION",
            Self::DiarizationUnavailable => "E_DIARIZATION_UNAVAILABLE",
            Self::SummarizationUnavailable => "E_SUMMARIZATION_UNAVAILABLE",
            Self::Cleanup => "E_CLEANUP",
            Self::InvalidInput => "E_INVALID_INPUT",
            Self::InvalidState => "E_INVALID_STATE",
            Self::NotFound => "E_NOT_FOUND",
            Self::Canceled => "E_CANCELED",
            Self::Storage => "E_STORAGE",
            Self::Config => "E_CONFIG",
            Self::Internal => "E_INTERNAL",
        }
    }
}

/// アプリケーションエラー（イベントペイロード兼用）
#[derive(Debug, Clone, Serialize)]
pub struct AppError {
    pub code: ErrorCode,
    pub message: String,
    pub recoverable: bool,
}

impl AppError {
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::InvalidState,
            message: msg.into(),
            recoverable: true,
        }
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::InvalidInput,
            message: msg.into(),
            recoverable: true,
        }
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::NotFound,
            message: msg.into(),
            recoverable: true,
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::Internal,
            message: msg.into(),
            recoverable: false,
        }
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::Storage,
            message: msg.into(),
            recoverable: false,
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::Config,
            message: msg.into(),
            recoverable: false,
        }
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code.as_str(), self.message)
    }
}

impl std::error::Error for AppError {}

/// failed ジョブが公開する分類済みエラー。部分結果は持たない。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobError {
    pub code: ErrorCode,
    pub message: String,
    /// 診断用の詳細（プロバイダのエラー全文など）
    pub detail: String,
}

impl JobError {
    pub fn new(code: ErrorCode, message: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            detail: detail.into(),
        }
    }
}

impl std::fmt::Display for JobError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}: {}", self.code.as_str(), self.message, self.detail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_pipeline_terminating_codes_are_fatal() {
        assert!(ErrorCode::InputConversion.is_fatal());
        assert!(ErrorCode::Transcription.is_fatal());
        assert!(ErrorCode::Canceled.is_fatal());
        assert!(!ErrorCode::Alignment.is_fatal());
        assert!(!ErrorCode::Diarization.is_fatal());
        assert!(!ErrorCode::DiarizationUnavailable.is_fatal());
        assert!(!ErrorCode::SummarizationUnavailable.is_fatal());
        assert!(!ErrorCode::Cleanup.is_fatal());
    }

    #[test]
    fn as_str_matches_serde_name() {
        for code in [
            ErrorCode::InputConversion,
            ErrorCode::Transcription,
            ErrorCode::DiarizationUnavailable,
            ErrorCode::Canceled,
        ] {
            let json = serde_json::to_string(&code).unwrap();
            assert_eq!(json, format!("\"{}\"", code.as_str()));
        }
    }

    #[test]
    fn app_error_display_has_code() {
        let err = AppError::invalid_input("unsupported extension .exe");
        assert_eq!(err.to_string(), "[E_INVALID_INPUT] unsupported extension .exe");
    }
}
