//! ステージ単位の縮退ポリシー。
//!
//! 話者分離の二段階試行と、要約を実行するかどうかの判定をここに集める。
//! どちらもジョブ全体を失敗させない。

use crate::domain::capability::{DiarizeError, Diarizer, LoadedAudio, SummarizeError};
use crate::domain::settings::SpeakerBounds;
use crate::domain::transcript::{SpeakerTurn, SummaryStatus};

pub const SUMMARY_DISABLED_TEXT: &str = "Summary generation was disabled by user.";
pub const SUMMARY_SHORT_AUDIO_TEXT: &str =
    "Summary generation was automatically disabled because the audio is shorter than 30 seconds.";
pub const SUMMARY_UNAVAILABLE_TEXT: &str = "Summary generation unavailable (LLM model not loaded)";
pub const SHORT_AUDIO_REASON: &str = "short audio";

// ─── Diarization ─────────────────────────────────────────────────

/// 話者分離の1回分の試行
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiarizationAttempt {
    WithBounds(SpeakerBounds),
    WithoutBounds,
}

impl DiarizationAttempt {
    pub fn bounds(self) -> Option<SpeakerBounds> {
        match self {
            Self::WithBounds(b) => Some(b),
            Self::WithoutBounds => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DiarizationOutcome {
    Ran(Vec<SpeakerTurn>),
    /// 資格情報なし等。スキップ扱い
    Unavailable(String),
    /// 全試行が失敗
    Failed(String),
}

/// 実行した試行の記録と結果
#[derive(Debug, Clone, PartialEq)]
pub struct DiarizationReport {
    pub outcome: DiarizationOutcome,
    pub attempts: Vec<DiarizationAttempt>,
}

/// attempt(withBounds) → attempt(withoutBounds) → skip
#[derive(Debug, Clone, Copy)]
pub struct DiarizationPolicy {
    bounds: SpeakerBounds,
}

impl DiarizationPolicy {
    pub fn new(bounds: SpeakerBounds) -> Self {
        Self { bounds }
    }

    pub fn first_attempt(&self) -> DiarizationAttempt {
        DiarizationAttempt::WithBounds(self.bounds)
    }

    /// 直前の試行とそのエラーから次の試行を決める。None なら諦める。
    pub fn next_attempt(
        &self,
        previous: DiarizationAttempt,
        error: &DiarizeError,
    ) -> Option<DiarizationAttempt> {
        match (previous, error) {
            (DiarizationAttempt::WithBounds(_), DiarizeError::UnsupportedParameters(_)) => {
                Some(DiarizationAttempt::WithoutBounds)
            }
            _ => None,
        }
    }

    pub async fn execute(&self, diarizer: &dyn Diarizer, audio: &LoadedAudio) -> DiarizationReport {
        let mut attempts = Vec::new();
        let mut attempt = self.first_attempt();

        loop {
            attempts.push(attempt);
            match diarizer.diarize(audio, attempt.bounds()).await {
                Ok(turns) => {
                    return DiarizationReport {
                        outcome: DiarizationOutcome::Ran(turns),
                        attempts,
                    };
                }
                Err(e) => match self.next_attempt(attempt, &e) {
                    Some(next) => {
                        log::warn!(
                            "Diarizer {} rejected speaker bounds, retrying without them: {}",
                            diarizer.name(),
                            e
                        );
                        attempt = next;
                    }
                    None => {
                        let outcome = match e {
                            DiarizeError::Unavailable(msg) => DiarizationOutcome::Unavailable(msg),
                            other => DiarizationOutcome::Failed(other.to_string()),
                        };
                        return DiarizationReport { outcome, attempts };
                    }
                },
            }
        }
    }
}

// ─── Summary ─────────────────────────────────────────────────────

/// 要約ステージで何をするか
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SummaryPlan {
    Run,
    SkipDisabled,
    SkipTooShort,
}

impl SummaryPlan {
    /// 呼び出し側の指定と音声長から決める。短すぎる音声は指定に関わらずスキップ。
    pub fn decide(requested: bool, duration_secs: f64, threshold_secs: f64) -> Self {
        if !requested {
            Self::SkipDisabled
        } else if duration_secs < threshold_secs {
            Self::SkipTooShort
        } else {
            Self::Run
        }
    }

    pub fn step_label(self) -> &'static str {
        match self {
            Self::Run => "Generating summary",
            Self::SkipDisabled => "Skipping summary (disabled)",
            Self::SkipTooShort => "Skipping summary (audio too short)",
        }
    }

    /// スキップ時の結果。Run は None
    pub fn skipped_outcome(self) -> Option<SummaryOutcome> {
        match self {
            Self::Run => None,
            Self::SkipDisabled => Some(SummaryOutcome {
                text: SUMMARY_DISABLED_TEXT.to_string(),
                status: SummaryStatus::DisabledByUser,
                auto_disabled_reason: None,
            }),
            Self::SkipTooShort => Some(SummaryOutcome {
                text: SUMMARY_SHORT_AUDIO_TEXT.to_string(),
                status: SummaryStatus::AutoDisabled,
                auto_disabled_reason: Some(SHORT_AUDIO_REASON.to_string()),
            }),
        }
    }
}

/// 要約フィールドとメタデータに入る値
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryOutcome {
    pub text: String,
    pub status: SummaryStatus,
    pub auto_disabled_reason: Option<String>,
}

impl SummaryOutcome {
    pub fn generated(text: String) -> Self {
        Self {
            text,
            status: SummaryStatus::Generated,
            auto_disabled_reason: None,
        }
    }

    /// 要約プロバイダのエラーを説明文に置き換える
    pub fn from_error(error: &SummarizeError) -> Self {
        match error {
            SummarizeError::Unavailable(_) => Self {
                text: SUMMARY_UNAVAILABLE_TEXT.to_string(),
                status: SummaryStatus::Unavailable,
                auto_disabled_reason: None,
            },
            other => Self {
                text: format!("Error generating summary: {other}"),
                status: SummaryStatus::Failed,
                auto_disabled_reason: None,
            },
        }
    }

    /// 実際に要約を生成したか
    pub fn enabled(&self) -> bool {
        self.status == SummaryStatus::Generated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::capability::AudioRef;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    struct ScriptedDiarizer {
        responses: Mutex<VecDeque<Result<Vec<SpeakerTurn>, DiarizeError>>>,
        calls: Mutex<Vec<Option<SpeakerBounds>>>,
    }

    impl ScriptedDiarizer {
        fn new(responses: Vec<Result<Vec<SpeakerTurn>, DiarizeError>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Diarizer for ScriptedDiarizer {
        async fn diarize(
            &self,
            _audio: &LoadedAudio,
            bounds: Option<SpeakerBounds>,
        ) -> Result<Vec<SpeakerTurn>, DiarizeError> {
            self.calls.lock().push(bounds);
            self.responses
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(DiarizeError::Failed("no more responses".into())))
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    fn audio() -> LoadedAudio {
        LoadedAudio {
            audio: AudioRef::source("/tmp/a.wav"),
            duration_secs: 60.0,
        }
    }

    fn bounds() -> SpeakerBounds {
        SpeakerBounds { min: 2, max: 4 }
    }

    fn turn(speaker: &str) -> SpeakerTurn {
        SpeakerTurn {
            start: 0.0,
            end: 1.0,
            speaker: speaker.into(),
        }
    }

    #[test]
    fn test_next_attempt_only_retries_unsupported_parameters() {
        let policy = DiarizationPolicy::new(bounds());
        let first = policy.first_attempt();
        assert_eq!(first, DiarizationAttempt::WithBounds(bounds()));

        let unsupported = DiarizeError::UnsupportedParameters("min_speakers".into());
        assert_eq!(
            policy.next_attempt(first, &unsupported),
            Some(DiarizationAttempt::WithoutBounds)
        );
        assert_eq!(
            policy.next_attempt(DiarizationAttempt::WithoutBounds, &unsupported),
            None
        );
        assert_eq!(
            policy.next_attempt(first, &DiarizeError::Unavailable("no token".into())),
            None
        );
        assert_eq!(
            policy.next_attempt(first, &DiarizeError::Failed("crash".into())),
            None
        );
    }

    #[tokio::test]
    async fn test_execute_first_attempt_succeeds() {
        let diarizer = ScriptedDiarizer::new(vec![Ok(vec![turn("SPEAKER_00")])]);
        let report = DiarizationPolicy::new(bounds())
            .execute(&diarizer, &audio())
            .await;

        assert_eq!(report.outcome, DiarizationOutcome::Ran(vec![turn("SPEAKER_00")]));
        assert_eq!(report.attempts.len(), 1);
        assert_eq!(*diarizer.calls.lock(), vec![Some(bounds())]);
    }

    #[tokio::test]
    async fn test_execute_retries_without_bounds() {
        let diarizer = ScriptedDiarizer::new(vec![
            Err(DiarizeError::UnsupportedParameters("unexpected keyword".into())),
            Ok(vec![turn("SPEAKER_01")]),
        ]);
        let report = DiarizationPolicy::new(bounds())
            .execute(&diarizer, &audio())
            .await;

        assert!(matches!(report.outcome, DiarizationOutcome::Ran(_)));
        assert_eq!(
            report.attempts,
            vec![
                DiarizationAttempt::WithBounds(bounds()),
                DiarizationAttempt::WithoutBounds
            ]
        );
        assert_eq!(*diarizer.calls.lock(), vec![Some(bounds()), None]);
    }

    #[tokio::test]
    async fn test_execute_gives_up_after_second_failure() {
        let diarizer = ScriptedDiarizer::new(vec![
            Err(DiarizeError::UnsupportedParameters("x".into())),
            Err(DiarizeError::Failed("segfault".into())),
        ]);
        let report = DiarizationPolicy::new(bounds())
            .execute(&diarizer, &audio())
            .await;

        assert!(matches!(report.outcome, DiarizationOutcome::Failed(_)));
        assert_eq!(report.attempts.len(), 2);
    }

    #[tokio::test]
    async fn test_execute_unavailable_skips_without_retry() {
        let diarizer =
            ScriptedDiarizer::new(vec![Err(DiarizeError::Unavailable("no token".into()))]);
        let report = DiarizationPolicy::new(bounds())
            .execute(&diarizer, &audio())
            .await;

        assert_eq!(
            report.outcome,
            DiarizationOutcome::Unavailable("no token".into())
        );
        assert_eq!(diarizer.calls.lock().len(), 1);
    }

    #[test]
    fn test_summary_plan() {
        assert_eq!(SummaryPlan::decide(false, 120.0, 30.0), SummaryPlan::SkipDisabled);
        assert_eq!(SummaryPlan::decide(false, 10.0, 30.0), SummaryPlan::SkipDisabled);
        assert_eq!(SummaryPlan::decide(true, 10.0, 30.0), SummaryPlan::SkipTooShort);
        assert_eq!(SummaryPlan::decide(true, 29.99, 30.0), SummaryPlan::SkipTooShort);
        assert_eq!(SummaryPlan::decide(true, 30.0, 30.0), SummaryPlan::Run);
    }

    #[test]
    fn test_skipped_outcomes_distinguish_reason() {
        let disabled = SummaryPlan::SkipDisabled.skipped_outcome().unwrap();
        assert_eq!(disabled.text, SUMMARY_DISABLED_TEXT);
        assert_eq!(disabled.status, SummaryStatus::DisabledByUser);
        assert!(disabled.auto_disabled_reason.is_none());

        let short = SummaryPlan::SkipTooShort.skipped_outcome().unwrap();
        assert_eq!(short.status, SummaryStatus::AutoDisabled);
        assert_eq!(short.auto_disabled_reason.as_deref(), Some("short audio"));
        assert!(!short.text.is_empty());
        assert!(!short.enabled());

        assert!(SummaryPlan::Run.skipped_outcome().is_none());
    }

    #[test]
    fn test_outcome_from_error() {
        let unavailable = SummaryOutcome::from_error(&SummarizeError::Unavailable("x".into()));
        assert_eq!(unavailable.text, SUMMARY_UNAVAILABLE_TEXT);
        assert_eq!(unavailable.status, SummaryStatus::Unavailable);

        let failed = SummaryOutcome::from_error(&SummarizeError::Failed("HTTP 500".into()));
        assert!(failed.text.starts_with("Error generating summary: "));
        assert!(failed.text.contains("HTTP 500"));
        assert_eq!(failed.status, SummaryStatus::Failed);
    }
}
