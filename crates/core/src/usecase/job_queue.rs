use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::{oneshot, Mutex, Semaphore};
use tokio::task::JoinHandle;

use crate::domain::error::{AppError, ErrorCode, JobError};
use crate::domain::job::{Job, JobInput, JobStage, JobState};
use crate::domain::settings::{JobOptions, ServerSettings};
use crate::domain::transcript::JobResult;
use crate::infra::metrics::{Metrics, MetricsSummary};
use crate::infra::storage::ResultSink;

use super::orchestrator::{CancelSignal, Capabilities, PipelineOrchestrator};
use super::publisher::{ProgressPublisher, Subscription};

/// fetch の失敗理由
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("Job not found: {0}")]
    NotFound(String),
    #[error("Job {job_id} is not finished ({}, {progress}%)", .stage.as_str())]
    NotReady {
        job_id: String,
        stage: JobStage,
        progress: u8,
    },
    #[error("Job failed: {0}")]
    Failed(JobError),
    #[error(transparent)]
    Other(#[from] AppError),
}

/// ジョブキュー: 投入の検証、Tokioタスクの発行・追跡・キャンセル
pub struct JobQueue {
    shared: Arc<Shared>,
}

struct Shared {
    orchestrator: Arc<PipelineOrchestrator>,
    publisher: Arc<ProgressPublisher>,
    sink: Arc<dyn ResultSink>,
    settings: Arc<ServerSettings>,
    metrics: Arc<Metrics>,
    /// 同時実行数の上限
    slots: Arc<Semaphore>,
    jobs: Mutex<HashMap<String, JobEntry>>,
}

struct JobEntry {
    cancel_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl JobQueue {
    pub fn new(settings: ServerSettings, caps: Capabilities, sink: Arc<dyn ResultSink>) -> Self {
        let settings = Arc::new(settings);
        let publisher = Arc::new(ProgressPublisher::new(settings.subscriber_buffer));
        let metrics = Arc::new(Metrics::new());
        let orchestrator = Arc::new(PipelineOrchestrator::new(
            caps,
            settings.clone(),
            publisher.clone(),
            sink.clone(),
            metrics.clone(),
        ));
        let slots = Arc::new(Semaphore::new(settings.max_concurrent_jobs.max(1)));

        Self {
            shared: Arc::new(Shared {
                orchestrator,
                publisher,
                sink,
                settings,
                metrics,
                slots,
                jobs: Mutex::new(HashMap::new()),
            }),
        }
    }

    // ==================== Submission ====================

    /// ジョブを検証・登録し、ワーカーに渡す。実行完了は待たない。
    pub async fn submit(
        &self,
        media_path: impl Into<PathBuf>,
        mut options: JobOptions,
    ) -> Result<String, AppError> {
        let media_path = media_path.into();
        self.validate(&media_path)?;

        let bounds = self
            .shared
            .settings
            .clamp_speakers(options.min_speakers, options.max_speakers);
        options.min_speakers = bounds.min;
        options.max_speakers = bounds.max;
        options.language = options.language.trim().to_string();

        let job_id = uuid::Uuid::new_v4().to_string();
        let now = chrono::Utc::now().to_rfc3339();
        let job = Job::new(job_id.clone(), JobInput { media_path, options }, now);

        self.shared.publisher.register(job.state.clone())?;
        self.shared.metrics.inc_submitted();

        let (cancel_tx, cancel_rx) = oneshot::channel();
        let mut jobs = self.shared.jobs.lock().await;
        let handle = tokio::spawn(work(self.shared.clone(), job, cancel_rx));
        jobs.insert(
            job_id.clone(),
            JobEntry {
                cancel_tx: Some(cancel_tx),
                handle: Some(handle),
            },
        );

        log::info!("Job {} queued", job_id);
        Ok(job_id)
    }

    fn validate(&self, media_path: &Path) -> Result<(), AppError> {
        let settings = &self.shared.settings;
        if !settings.is_allowed(media_path) {
            return Err(AppError::invalid_input(format!(
                "File type not allowed: {} (allowed: {})",
                media_path.display(),
                settings.allowed_extensions.join(", ")
            )));
        }
        let meta = std::fs::metadata(media_path).map_err(|e| {
            AppError::invalid_input(format!("Cannot read {}: {e}", media_path.display()))
        })?;
        if !meta.is_file() {
            return Err(AppError::invalid_input(format!(
                "{} is not a file",
                media_path.display()
            )));
        }
        if meta.len() > settings.max_upload_bytes {
            return Err(AppError::invalid_input(format!(
                "File too large: {} bytes (max {})",
                meta.len(),
                settings.max_upload_bytes
            )));
        }
        Ok(())
    }

    // ==================== Status ====================

    /// 最新の状態。メモリから追い出されたジョブは ResultSink から引く。
    pub fn query(&self, job_id: &str) -> Result<JobState, AppError> {
        if let Some(state) = self.shared.publisher.query(job_id) {
            return Ok(state);
        }
        self.shared
            .sink
            .load(job_id)?
            .ok_or_else(|| AppError::not_found(format!("Job not found: {job_id}")))
    }

    /// 状態ストリームを購読する
    pub fn subscribe(&self, job_id: &str) -> Result<Subscription, AppError> {
        if let Some(sub) = self.shared.publisher.subscribe(job_id) {
            return Ok(sub);
        }
        match self.shared.sink.load(job_id)? {
            Some(state) => Ok(Subscription::completed(state)),
            None => Err(AppError::not_found(format!("Job not found: {job_id}"))),
        }
    }

    /// 終端状態まで待つ
    ///
    /// 読むのが遅れて購読を切られた場合は購読し直す。
    pub async fn wait(&self, job_id: &str) -> Result<JobState, AppError> {
        loop {
            let mut sub = self.subscribe(job_id)?;
            while let Some(state) = sub.next().await {
                if state.is_terminal() {
                    return Ok(state);
                }
            }
            log::debug!("Subscription to job {} closed early, resubscribing", job_id);
        }
    }

    /// 最終成果物を取り出す
    pub fn fetch(&self, job_id: &str) -> Result<JobResult, FetchError> {
        let state = self.query(job_id).map_err(|e| match e.code {
            ErrorCode::NotFound => FetchError::NotFound(job_id.to_string()),
            _ => FetchError::Other(e),
        })?;

        match state.stage {
            JobStage::Succeeded => state.result.ok_or_else(|| {
                FetchError::Other(AppError::internal(format!(
                    "Job {job_id} succeeded without a result"
                )))
            }),
            JobStage::Failed => Err(FetchError::Failed(state.error.unwrap_or_else(|| {
                JobError::new(ErrorCode::Internal, "Job failed", "")
            }))),
            stage => Err(FetchError::NotReady {
                job_id: job_id.to_string(),
                stage,
                progress: state.progress,
            }),
        }
    }

    // ==================== Control ====================

    /// キャンセルを要求する。次のステージ境界で failed になる。
    ///
    /// 要求を送れたら true、既に終端・要求済みなら false。
    pub async fn cancel(&self, job_id: &str) -> Result<bool, AppError> {
        let state = self.query(job_id)?;
        if state.is_terminal() {
            return Ok(false);
        }
        let mut jobs = self.shared.jobs.lock().await;
        match jobs.get_mut(job_id).and_then(|e| e.cancel_tx.take()) {
            Some(tx) => {
                // 受信側が既に終わっていても問題ない
                let _ = tx.send(());
                log::info!("Cancellation requested for job {}", job_id);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// 終端ジョブをメモリから外す。結果は ResultSink に残る。
    pub async fn evict_terminal(&self) -> usize {
        let evicted = self.shared.publisher.evict_terminal();
        let mut jobs = self.shared.jobs.lock().await;
        for id in &evicted {
            jobs.remove(id);
        }
        if !evicted.is_empty() {
            log::info!("Evicted {} finished job(s) from memory", evicted.len());
        }
        evicted.len()
    }

    pub fn metrics(&self) -> MetricsSummary {
        self.shared.metrics.summary()
    }
}

/// ワーカー本体: 実行枠を待ってからオーケストレータを走らせる
async fn work(shared: Arc<Shared>, job: Job, cancel_rx: oneshot::Receiver<()>) {
    let job_id = job.id().to_string();
    let input = job.input.clone();

    let _permit = match shared.slots.clone().acquire_owned().await {
        Ok(permit) => permit,
        Err(e) => {
            fail_unfinished(
                &shared,
                &job_id,
                &input,
                JobError::new(ErrorCode::Internal, "Worker pool closed", e.to_string()),
            );
            release(&shared, &job_id).await;
            return;
        }
    };

    // パニックしても終端状態にできるよう別タスクで実行する
    let orchestrator = shared.orchestrator.clone();
    let run = tokio::spawn(async move {
        orchestrator
            .run(job, CancelSignal::new(cancel_rx))
            .await
    });

    match run.await {
        Ok(Ok(state)) => log::debug!("Job {} finished as {}", job_id, state.stage.as_str()),
        Ok(Err(e)) => {
            log::error!("Job {} could not run: {}", job_id, e);
            fail_unfinished(
                &shared,
                &job_id,
                &input,
                JobError::new(ErrorCode::Internal, "Job could not run", e.to_string()),
            );
        }
        Err(e) => {
            log::error!("Job {} worker panicked: {}", job_id, e);
            fail_unfinished(
                &shared,
                &job_id,
                &input,
                JobError::new(ErrorCode::Internal, "Worker panicked", e.to_string()),
            );
        }
    }

    release(&shared, &job_id).await;
}

async fn release(shared: &Shared, job_id: &str) {
    let mut jobs = shared.jobs.lock().await;
    if let Some(entry) = jobs.get_mut(job_id) {
        entry.cancel_tx = None;
        entry.handle = None;
    }
}

/// オーケストレータが終端に到達できなかったジョブを failed にする
fn fail_unfinished(shared: &Shared, job_id: &str, input: &JobInput, error: JobError) {
    let Some(mut state) = shared.publisher.query(job_id) else {
        return;
    };
    if state.is_terminal() {
        return;
    }
    shared.orchestrator.discard_artifacts(job_id, input);
    if state.fail(error, chrono::Utc::now().to_rfc3339()).is_ok() {
        shared.metrics.inc_failed();
        if let Err(e) = shared.sink.store(&state) {
            log::error!("Failed to persist result of job {}: {}", job_id, e);
        }
        shared.publisher.publish(&state);
    }
}
