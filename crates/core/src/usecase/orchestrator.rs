use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::oneshot;

use crate::domain::capability::{
    AlignError, Aligner, AudioRef, Diarizer, LoadedAudio, Normalizer, Summarizer, Transcriber,
};
use crate::domain::error::{AppError, ErrorCode, JobError};
use crate::domain::job::{Job, JobInput, JobStage, JobState};
use crate::domain::language::{language_hint, resolve_language};
use crate::domain::settings::{JobOptions, ServerSettings, SpeakerBounds};
use crate::domain::transcript::{
    assign_speakers, count_speakers, full_text, AlignmentStatus, DiarizationStatus, JobMetadata,
    JobResult, Transcript, TranscriptSegment,
};
use crate::infra::cleanup::cleanup_file;
use crate::infra::metrics::Metrics;
use crate::infra::storage::ResultSink;

use super::fallback::{DiarizationOutcome, DiarizationPolicy, SummaryOutcome, SummaryPlan};
use super::publisher::ProgressPublisher;

/// オーケストレータに注入するプロバイダ一式
#[derive(Clone)]
pub struct Capabilities {
    pub normalizer: Arc<dyn Normalizer>,
    pub transcriber: Arc<dyn Transcriber>,
    pub aligner: Arc<dyn Aligner>,
    /// None はサーバに話者分離の能力がないことを表す
    pub diarizer: Option<Arc<dyn Diarizer>>,
    pub summarizer: Arc<dyn Summarizer>,
}

/// ステージ間でのみ確認されるキャンセル信号
pub struct CancelSignal {
    rx: Option<oneshot::Receiver<()>>,
    canceled: bool,
}

impl CancelSignal {
    pub fn new(rx: oneshot::Receiver<()>) -> Self {
        Self {
            rx: Some(rx),
            canceled: false,
        }
    }

    /// キャンセル不可
    pub fn never() -> Self {
        Self {
            rx: None,
            canceled: false,
        }
    }

    pub fn is_canceled(&mut self) -> bool {
        if !self.canceled {
            if let Some(rx) = self.rx.as_mut() {
                // Sender が drop されただけ（Closed）はキャンセル扱いにしない
                self.canceled = rx.try_recv().is_ok();
            }
        }
        self.canceled
    }
}

/// 1ジョブ分の一時成果物。どの終了経路でも finalize で片付ける。
#[derive(Default)]
struct Scratch {
    temp_files: Vec<PathBuf>,
}

impl Scratch {
    fn register(&mut self, path: Option<PathBuf>) {
        if let Some(path) = path {
            if !self.temp_files.contains(&path) {
                self.temp_files.push(path);
            }
        }
    }
}

/// 1ジョブをステージ順に実行し、縮退ポリシーを適用する。
///
/// 状態はジョブごとにローカルで、オーケストレータ自体は共有可変状態を持たない。
pub struct PipelineOrchestrator {
    caps: Capabilities,
    settings: Arc<ServerSettings>,
    publisher: Arc<ProgressPublisher>,
    sink: Arc<dyn ResultSink>,
    metrics: Arc<Metrics>,
}

impl PipelineOrchestrator {
    pub fn new(
        caps: Capabilities,
        settings: Arc<ServerSettings>,
        publisher: Arc<ProgressPublisher>,
        sink: Arc<dyn ResultSink>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            caps,
            settings,
            publisher,
            sink,
            metrics,
        }
    }

    /// queued のジョブを終端状態まで実行する。
    ///
    /// 戻り値の Err は前提条件違反（queued 以外）のみ。ステージの失敗は
    /// failed 状態として Ok で返る。
    pub async fn run(&self, job: Job, mut cancel: CancelSignal) -> Result<JobState, AppError> {
        let Job { input, mut state } = job;
        if state.stage != JobStage::Queued {
            return Err(AppError::invalid_state(format!(
                "ジョブ {} は {} のため実行できません",
                state.job_id,
                state.stage.as_str()
            )));
        }

        log::info!(
            "Job {} started: {} (language={}, summary={}, diarization={})",
            state.job_id,
            input.media_path.display(),
            input.options.language,
            input.options.summary_enabled,
            input.options.diarization_enabled
        );

        let mut scratch = Scratch::default();
        let outcome = self
            .execute(&input, &mut state, &mut scratch, &mut cancel)
            .await;

        // 成功・縮退・失敗のどの経路でも片付ける
        self.cleanup(&state.job_id, &input, &scratch);

        let now = chrono::Utc::now().to_rfc3339();
        match outcome {
            Ok(result) => {
                state.succeed(result, now)?;
                self.metrics.inc_succeeded();
                log::info!("Job {} succeeded", state.job_id);
            }
            Err(error) => {
                log::error!(
                    "Job {} failed at {}: [{}] {} ({})",
                    state.job_id,
                    state.stage.as_str(),
                    error.code.as_str(),
                    error.message,
                    error.detail
                );
                state.fail(error, now)?;
                self.metrics.inc_failed();
            }
        }

        if let Err(e) = self.sink.store(&state) {
            log::error!("Failed to persist result of job {}: {}", state.job_id, e);
        }
        self.publisher.publish(&state);
        Ok(state)
    }

    async fn execute(
        &self,
        input: &JobInput,
        state: &mut JobState,
        scratch: &mut Scratch,
        cancel: &mut CancelSignal,
    ) -> Result<JobResult, JobError> {
        let options = &input.options;

        // ==================== Normalize ====================

        self.enter(state, cancel, JobStage::Normalizing, "Processing file")?;
        let audio = if self.settings.requires_normalization(&input.media_path) {
            // 変換が失敗しても書きかけのファイルを消せるよう先に登録する
            scratch.register(self.caps.normalizer.temp_output(&input.media_path));
            let start = Instant::now();
            let audio = self
                .caps
                .normalizer
                .normalize(&input.media_path)
                .await
                .map_err(|e| {
                    JobError::new(
                        ErrorCode::InputConversion,
                        "Failed to convert media to audio",
                        format!("Error during transcription: {e}"),
                    )
                })?;
            self.record(JobStage::Normalizing, start);
            if audio.temporary {
                scratch.register(Some(audio.path.clone()));
            }
            audio
        } else {
            AudioRef::source(&input.media_path)
        };

        self.enter(state, cancel, JobStage::LoadingAudio, "Loading audio")?;
        let loaded = self.caps.normalizer.load(&audio).await.map_err(|e| {
            JobError::new(
                ErrorCode::InputConversion,
                "Failed to load audio",
                format!("Error during transcription: {e}"),
            )
        })?;
        log::info!(
            "Job {}: audio loaded ({:.1}s)",
            state.job_id,
            loaded.duration_secs
        );

        // ==================== Transcribe ====================

        self.enter(state, cancel, JobStage::Transcribing, "Transcribing")?;
        let hint = language_hint(&options.language);
        let start = Instant::now();
        let transcription = self
            .caps
            .transcriber
            .transcribe(&loaded, hint.as_deref())
            .await
            .map_err(|e| {
                JobError::new(
                    ErrorCode::Transcription,
                    "Transcription failed",
                    format!("Error during transcription: {e}"),
                )
            })?;
        self.record(JobStage::Transcribing, start);

        let language = resolve_language(
            transcription.detected_language.as_deref(),
            hint.as_deref(),
        );
        log::info!(
            "Job {}: {} segments, language={}",
            state.job_id,
            transcription.segments.len(),
            language
        );

        // ==================== Align ====================

        self.enter(state, cancel, JobStage::Aligning, "Aligning transcript")?;
        let (mut segments, alignment) = self
            .align(&state.job_id, transcription.segments, &language, &loaded)
            .await;

        // ==================== Diarize ====================

        let bounds = self
            .settings
            .clamp_speakers(options.min_speakers, options.max_speakers);
        let diarization_status = if !options.diarization_enabled {
            DiarizationStatus::NotRequested
        } else if !self.settings.diarization_enabled {
            log::info!(
                "Job {}: diarization requested but disabled on this server",
                state.job_id
            );
            DiarizationStatus::DisabledByServer
        } else {
            self.enter(
                state,
                cancel,
                JobStage::Diarizing,
                "Performing speaker diarization",
            )?;
            self.diarize(&state.job_id, &mut segments, bounds, &loaded)
                .await
        };
        let speakers_detected = count_speakers(&segments);

        // ==================== Summarize ====================

        let text = full_text(&segments);
        let plan = SummaryPlan::decide(
            options.summary_enabled,
            loaded.duration_secs,
            self.settings.short_audio_threshold_secs,
        );
        self.enter(state, cancel, JobStage::Summarizing, plan.step_label())?;
        let summary = match plan.skipped_outcome() {
            Some(skipped) => {
                log::info!("Job {}: {}", state.job_id, plan.step_label());
                skipped
            }
            None => self.summarize(&state.job_id, &text, options).await,
        };

        // ==================== Finalize ====================

        self.enter(state, cancel, JobStage::Finalizing, "Finalizing")?;
        let summary_enabled = summary.enabled();
        Ok(JobResult {
            transcription: Transcript {
                text,
                segments,
                language: language.clone(),
            },
            summary: summary.text,
            metadata: JobMetadata {
                file_name: input.file_name(),
                language,
                summary_length: options.summary_length,
                summary_requested: options.summary_enabled,
                summary_enabled,
                summary_status: summary.status,
                auto_disabled_reason: summary.auto_disabled_reason,
                duration: loaded.duration_secs,
                alignment,
                diarization_enabled: options.diarization_enabled,
                diarization_status,
                speakers_detected,
                min_speakers: bounds.min,
                max_speakers: bounds.max,
            },
        })
    }

    /// 位置合わせ。失敗しても元のセグメントで続行し、言語は変えない。
    async fn align(
        &self,
        job_id: &str,
        segments: Vec<TranscriptSegment>,
        language: &str,
        audio: &LoadedAudio,
    ) -> (Vec<TranscriptSegment>, AlignmentStatus) {
        let start = Instant::now();
        match self.caps.aligner.align(&segments, language, audio).await {
            Ok(aligned) => {
                self.record(JobStage::Aligning, start);
                (aligned, AlignmentStatus::Aligned)
            }
            Err(AlignError::NotConfigured(reason)) => {
                log::info!("Job {job_id}: alignment skipped: {reason}");
                (segments, AlignmentStatus::Skipped)
            }
            Err(e) => {
                log::warn!("[E_ALIGNMENT] Job {job_id}: alignment skipped: {e}");
                self.metrics.inc_degraded(ErrorCode::Alignment);
                (segments, AlignmentStatus::Failed)
            }
        }
    }

    async fn diarize(
        &self,
        job_id: &str,
        segments: &mut [TranscriptSegment],
        bounds: SpeakerBounds,
        audio: &LoadedAudio,
    ) -> DiarizationStatus {
        let Some(diarizer) = self.caps.diarizer.as_ref() else {
            log::warn!("[E_DIARIZATION_UNAVAILABLE] Job {job_id}: no diarizer configured");
            self.metrics.inc_degraded(ErrorCode::DiarizationUnavailable);
            return DiarizationStatus::Unavailable;
        };

        let start = Instant::now();
        let report = DiarizationPolicy::new(bounds)
            .execute(diarizer.as_ref(), audio)
            .await;
        match report.outcome {
            DiarizationOutcome::Ran(turns) => {
                self.record(JobStage::Diarizing, start);
                assign_speakers(segments, &turns);
                log::info!(
                    "Job {job_id}: diarization ran ({} turns, {} attempt(s))",
                    turns.len(),
                    report.attempts.len()
                );
                DiarizationStatus::Ran
            }
            DiarizationOutcome::Unavailable(reason) => {
                log::warn!("[E_DIARIZATION_UNAVAILABLE] Job {job_id}: {reason}");
                self.metrics.inc_degraded(ErrorCode::DiarizationUnavailable);
                DiarizationStatus::Unavailable
            }
            DiarizationOutcome::Failed(reason) => {
                log::warn!(
                    "[E_DIARIZATION] Job {job_id}: diarization skipped after {} attempt(s): {reason}",
                    report.attempts.len()
                );
                self.metrics.inc_degraded(ErrorCode::Diarization);
                DiarizationStatus::Failed
            }
        }
    }

    async fn summarize(
        &self,
        job_id: &str,
        text: &str,
        options: &JobOptions,
    ) -> SummaryOutcome {
        let start = Instant::now();
        match self
            .caps
            .summarizer
            .summarize(text, options.summary_length)
            .await
        {
            Ok(summary) => {
                self.record(JobStage::Summarizing, start);
                SummaryOutcome::generated(summary)
            }
            Err(e) => {
                log::warn!("[E_SUMMARIZATION_UNAVAILABLE] Job {job_id}: {e}");
                self.metrics.inc_degraded(ErrorCode::SummarizationUnavailable);
                SummaryOutcome::from_error(&e)
            }
        }
    }

    /// キャンセルを確認してからステージに入り、遷移を配信する
    fn enter(
        &self,
        state: &mut JobState,
        cancel: &mut CancelSignal,
        stage: JobStage,
        label: &str,
    ) -> Result<(), JobError> {
        if cancel.is_canceled() {
            log::info!("Job {} canceled before {}", state.job_id, stage.as_str());
            return Err(JobError::new(
                ErrorCode::Canceled,
                "Job canceled",
                format!("canceled before {}", stage.as_str()),
            ));
        }
        let now = chrono::Utc::now().to_rfc3339();
        let transition = state
            .advance(stage, stage.checkpoint(), label, now)
            .map_err(|e| JobError::new(ErrorCode::Internal, "Invalid stage transition", e.message))?;
        log::debug!(
            "Job {}: {} → {} ({}%): {}",
            transition.job_id,
            transition.prev_stage.as_str(),
            transition.new_stage.as_str(),
            transition.progress,
            label
        );
        self.publisher.publish(state);
        Ok(())
    }

    fn record(&self, stage: JobStage, start: Instant) {
        self.metrics
            .record_latency(stage, start.elapsed().as_millis() as u64);
    }

    /// 終端に到達できなかったジョブ（ワーカーの異常終了など）の一時ファイルと入力を片付ける
    pub fn discard_artifacts(&self, job_id: &str, input: &JobInput) {
        let mut scratch = Scratch::default();
        if self.settings.requires_normalization(&input.media_path) {
            scratch.register(self.caps.normalizer.temp_output(&input.media_path));
        }
        self.cleanup(job_id, input, &scratch);
    }

    fn cleanup(&self, job_id: &str, input: &JobInput, scratch: &Scratch) {
        for path in &scratch.temp_files {
            if *path != input.media_path && !cleanup_file(path, "converted audio") {
                self.metrics.inc_degraded(ErrorCode::Cleanup);
            }
        }
        if self.settings.delete_uploads_after_processing
            && !cleanup_file(&input.media_path, "uploaded file")
        {
            log::warn!("Job {job_id}: input cleanup failed");
            self.metrics.inc_degraded(ErrorCode::Cleanup);
        }
    }
}
