use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::error::{AppError, JobError};
use super::settings::JobOptions;
use super::transcript::JobResult;

/// ジョブのステージ。並び順がそのまま遷移順序になる。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStage {
    Queued,
    Normalizing,
    LoadingAudio,
    Transcribing,
    Aligning,
    Diarizing,
    Summarizing,
    Finalizing,
    Succeeded,
    Failed,
}

impl JobStage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Normalizing => "normalizing",
            Self::LoadingAudio => "loading_audio",
            Self::Transcribing => "transcribing",
            Self::Aligning => "aligning",
            Self::Diarizing => "diarizing",
            Self::Summarizing => "summarizing",
            Self::Finalizing => "finalizing",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }

    /// ステージに対応する固定の進捗チェックポイント。
    /// 実測値ではないため、クライアントは粗い目安として扱う。
    pub fn checkpoint(self) -> u8 {
        match self {
            Self::Queued => 0,
            Self::Normalizing => 20,
            Self::LoadingAudio => 30,
            Self::Transcribing => 40,
            Self::Aligning => 60,
            Self::Diarizing => 70,
            Self::Summarizing => 80,
            Self::Finalizing => 90,
            Self::Succeeded => 100,
            // failed は直前の進捗を保持する
            Self::Failed => 0,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

/// ジョブの入力（メディア参照 + クランプ済みオプション）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobInput {
    pub media_path: PathBuf,
    pub options: JobOptions,
}

impl JobInput {
    pub fn file_name(&self) -> String {
        self.media_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// 1ジョブの状態スナップショット。購読者・ポーリングの両方に配信される。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobState {
    pub job_id: String,
    pub stage: JobStage,
    pub progress: u8,
    pub step_label: String,
    /// stage == succeeded のときのみ
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<JobResult>,
    /// stage == failed のときのみ
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,
    pub updated_at: String,
}

/// 状態遷移の記録
#[derive(Debug, Clone, Serialize)]
pub struct StateTransition {
    pub job_id: String,
    pub prev_stage: JobStage,
    pub new_stage: JobStage,
    pub progress: u8,
}

impl JobState {
    pub fn queued(job_id: String, now: String) -> Self {
        Self {
            job_id,
            stage: JobStage::Queued,
            progress: 0,
            step_label: "Queued".to_string(),
            result: None,
            error: None,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.stage.is_terminal()
    }

    /// 非終端ステージへ進める。
    ///
    /// 終端状態からの遷移、ステージの後退、進捗の減少はすべて `E_INVALID_STATE`。
    /// 同じステージ内でのラベル更新は許可する。
    pub fn advance(
        &mut self,
        stage: JobStage,
        progress: u8,
        label: impl Into<String>,
        now: String,
    ) -> Result<StateTransition, AppError> {
        self.ensure_active("advance")?;
        if stage.is_terminal() {
            return Err(AppError::invalid_state(format!(
                "advance では終端ステージ {} に遷移できません",
                stage.as_str()
            )));
        }
        if stage < self.stage {
            return Err(AppError::invalid_state(format!(
                "ステージを {} から {} に戻すことはできません",
                self.stage.as_str(),
                stage.as_str()
            )));
        }
        if progress < self.progress || progress > 100 {
            return Err(AppError::invalid_state(format!(
                "進捗 {} → {} は不正です",
                self.progress, progress
            )));
        }
        Ok(self.apply(stage, progress, label.into(), now))
    }

    /// finalizing → succeeded
    pub fn succeed(&mut self, result: JobResult, now: String) -> Result<StateTransition, AppError> {
        self.ensure_active("succeed")?;
        if self.stage != JobStage::Finalizing {
            return Err(AppError::invalid_state(format!(
                "succeed は {} 状態では実行できません",
                self.stage.as_str()
            )));
        }
        self.result = Some(result);
        Ok(self.apply(JobStage::Succeeded, 100, "Completed".to_string(), now))
    }

    /// 任意の非終端ステージ → failed。進捗は直前の値を保持する。
    pub fn fail(&mut self, error: JobError, now: String) -> Result<StateTransition, AppError> {
        self.ensure_active("fail")?;
        self.error = Some(error);
        let progress = self.progress;
        Ok(self.apply(JobStage::Failed, progress, "Failed".to_string(), now))
    }

    fn ensure_active(&self, op: &str) -> Result<(), AppError> {
        if self.is_terminal() {
            return Err(AppError::invalid_state(format!(
                "ジョブ {} は終端状態 ({}) のため {op} できません",
                self.job_id,
                self.stage.as_str()
            )));
        }
        Ok(())
    }

    fn apply(&mut self, stage: JobStage, progress: u8, label: String, now: String) -> StateTransition {
        let prev_stage = self.stage;
        self.stage = stage;
        self.progress = progress;
        self.step_label = label;
        self.updated_at = now;
        StateTransition {
            job_id: self.job_id.clone(),
            prev_stage,
            new_stage: stage,
            progress,
        }
    }
}

/// オーケストレータが所有する1件のジョブ
#[derive(Debug, Clone)]
pub struct Job {
    pub input: JobInput,
    pub state: JobState,
}

impl Job {
    pub fn new(job_id: String, input: JobInput, now: String) -> Self {
        Self {
            input,
            state: JobState::queued(job_id, now),
        }
    }

    pub fn id(&self) -> &str {
        &self.state.job_id
    }
}
