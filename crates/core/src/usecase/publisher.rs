use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::domain::error::AppError;
use crate::domain::job::JobState;

/// 状態スナップショットのファンアウト。
///
/// オーケストレータ（書き込み側）とポーリング / プッシュ購読（読み取り側）を分離する。
/// 購読者ごとに有界キューを持ち、publish は決してブロックしない。
/// 詰まった購読者や切断済みの購読者は黙って外す。
pub struct ProgressPublisher {
    jobs: Mutex<HashMap<String, JobChannel>>,
    buffer: usize,
}

struct JobChannel {
    latest: JobState,
    subscribers: Vec<mpsc::Sender<JobState>>,
}

/// 1ジョブ分のライブな状態列。終端状態を配信した後に閉じる。
pub struct Subscription {
    rx: mpsc::Receiver<JobState>,
}

impl Subscription {
    /// 次のスナップショット。ストリーム終了時は None。
    pub async fn next(&mut self) -> Option<JobState> {
        self.rx.recv().await
    }

    /// 既に終端に達したジョブ用: スナップショット1件だけを流して閉じる
    pub fn completed(state: JobState) -> Self {
        let (tx, rx) = mpsc::channel(1);
        // 容量1の新しいチャネルなので失敗しない
        let _ = tx.try_send(state);
        Self { rx }
    }
}

impl ProgressPublisher {
    pub fn new(buffer: usize) -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
            buffer: buffer.max(1),
        }
    }

    /// 新しいジョブを登録する（投入時）
    pub fn register(&self, state: JobState) -> Result<(), AppError> {
        let mut jobs = self.jobs.lock();
        if jobs.contains_key(&state.job_id) {
            return Err(AppError::invalid_state(format!(
                "ジョブ {} は既に登録されています",
                state.job_id
            )));
        }
        jobs.insert(
            state.job_id.clone(),
            JobChannel {
                latest: state,
                subscribers: Vec::new(),
            },
        );
        Ok(())
    }

    /// 状態遷移を配信する。終端状態の配信後は購読を閉じる。
    ///
    /// 終端済みのジョブへの publish は無視する。
    pub fn publish(&self, state: &JobState) {
        let mut jobs = self.jobs.lock();
        let channel = jobs.entry(state.job_id.clone()).or_insert_with(|| JobChannel {
            latest: state.clone(),
            subscribers: Vec::new(),
        });

        if channel.latest.is_terminal() && channel.latest != *state {
            log::warn!(
                "Ignoring update for job {} after terminal state {}",
                state.job_id,
                channel.latest.stage.as_str()
            );
            return;
        }
        channel.latest = state.clone();

        channel.subscribers.retain(|tx| match tx.try_send(state.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                log::debug!("Dropping slow subscriber of job {}", state.job_id);
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });

        if state.is_terminal() {
            // Sender を落としてストリームを閉じる
            channel.subscribers.clear();
        }
    }

    /// 購読を開始する。最初の要素は購読時点の状態。未知のジョブは None。
    pub fn subscribe(&self, job_id: &str) -> Option<Subscription> {
        let mut jobs = self.jobs.lock();
        let channel = jobs.get_mut(job_id)?;

        let (tx, rx) = mpsc::channel(self.buffer);
        // 登録前に現在の状態を積むので、初期状態の取りこぼしも重複もない
        let _ = tx.try_send(channel.latest.clone());
        if !channel.latest.is_terminal() {
            channel.subscribers.push(tx);
        }
        Some(Subscription { rx })
    }

    /// 最新の状態を同期的に返す。未知のジョブは None。
    pub fn query(&self, job_id: &str) -> Option<JobState> {
        self.jobs.lock().get(job_id).map(|c| c.latest.clone())
    }

    pub fn subscriber_count(&self, job_id: &str) -> usize {
        self.jobs
            .lock()
            .get(job_id)
            .map(|c| c.subscribers.len())
            .unwrap_or(0)
    }

    /// 終端ジョブをメモリから外す（保持ポリシー用）。外したジョブ ID を返す。
    pub fn evict_terminal(&self) -> Vec<String> {
        let mut jobs = self.jobs.lock();
        let evicted: Vec<String> = jobs
            .iter()
            .filter(|(_, c)| c.latest.is_terminal())
            .map(|(id, _)| id.clone())
            .collect();
        for id in &evicted {
            jobs.remove(id);
        }
        evicted
    }
}

impl Default for ProgressPublisher {
    fn default() -> Self {
        Self::new(64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::error::{ErrorCode, JobError};
    use crate::domain::job::JobStage;

    fn now() -> String {
        chrono::Utc::now().to_rfc3339()
    }

    fn queued(id: &str) -> JobState {
        JobState::queued(id.to_string(), now())
    }

    fn advance(state: &mut JobState, stage: JobStage) {
        state
            .advance(stage, stage.checkpoint(), stage.as_str(), now())
            .unwrap();
    }

    #[test]
    fn test_register_and_query() {
        let p = ProgressPublisher::default();
        p.register(queued("j1")).unwrap();
        let s = p.query("j1").unwrap();
        assert_eq!(s.stage, JobStage::Queued);
        assert!(p.query("nope").is_none());
    }

    #[test]
    fn test_register_twice_fails() {
        let p = ProgressPublisher::default();
        p.register(queued("j1")).unwrap();
        assert!(p.register(queued("j1")).is_err());
    }

    #[tokio::test]
    async fn test_subscribe_gets_current_state_first() {
        let p = ProgressPublisher::default();
        let mut state = queued("j1");
        p.register(state.clone()).unwrap();
        advance(&mut state, JobStage::Transcribing);
        p.publish(&state);

        let mut sub = p.subscribe("j1").unwrap();
        let first = sub.next().await.unwrap();
        assert_eq!(first.stage, JobStage::Transcribing);
        assert_eq!(first.progress, 40);
    }

    #[tokio::test]
    async fn test_stream_in_order_and_closes_after_terminal() {
        let p = ProgressPublisher::default();
        let mut state = queued("j1");
        p.register(state.clone()).unwrap();
        let mut sub = p.subscribe("j1").unwrap();

        for stage in [JobStage::Normalizing, JobStage::LoadingAudio, JobStage::Transcribing] {
            advance(&mut state, stage);
            p.publish(&state);
        }
        state
            .fail(JobError::new(ErrorCode::Transcription, "failed", "oom"), now())
            .unwrap();
        p.publish(&state);

        let mut stages = Vec::new();
        while let Some(s) = sub.next().await {
            stages.push(s.stage);
        }
        assert_eq!(
            stages,
            vec![
                JobStage::Queued,
                JobStage::Normalizing,
                JobStage::LoadingAudio,
                JobStage::Transcribing,
                JobStage::Failed,
            ]
        );
        assert_eq!(p.subscriber_count("j1"), 0);
    }

    #[tokio::test]
    async fn test_subscribe_after_terminal_yields_single_snapshot() {
        let p = ProgressPublisher::default();
        let mut state = queued("j1");
        p.register(state.clone()).unwrap();
        state
            .fail(JobError::new(ErrorCode::InputConversion, "x", "y"), now())
            .unwrap();
        p.publish(&state);

        let mut sub = p.subscribe("j1").unwrap();
        assert_eq!(sub.next().await.unwrap().stage, JobStage::Failed);
        assert!(sub.next().await.is_none());
    }

    #[test]
    fn test_publish_after_terminal_is_ignored() {
        let p = ProgressPublisher::default();
        let mut state = queued("j1");
        p.register(state.clone()).unwrap();
        state
            .fail(JobError::new(ErrorCode::Transcription, "x", "y"), now())
            .unwrap();
        p.publish(&state);

        let stale = queued("j1");
        p.publish(&stale);
        assert_eq!(p.query("j1").unwrap().stage, JobStage::Failed);
    }

    #[test]
    fn test_slow_subscriber_is_dropped_without_blocking() {
        let p = ProgressPublisher::new(1);
        let mut state = queued("j1");
        p.register(state.clone()).unwrap();
        // 初期スナップショットでバッファが埋まる
        let _slow = p.subscribe("j1").unwrap();
        assert_eq!(p.subscriber_count("j1"), 1);

        advance(&mut state, JobStage::Normalizing);
        p.publish(&state);
        assert_eq!(p.subscriber_count("j1"), 0);
        assert_eq!(p.query("j1").unwrap().stage, JobStage::Normalizing);
    }

    #[tokio::test]
    async fn test_dropped_subscriber_does_not_affect_others() {
        let p = ProgressPublisher::default();
        let mut state = queued("j1");
        p.register(state.clone()).unwrap();
        let gone = p.subscribe("j1").unwrap();
        let mut kept = p.subscribe("j1").unwrap();
        drop(gone);

        advance(&mut state, JobStage::Normalizing);
        p.publish(&state);
        assert_eq!(p.subscriber_count("j1"), 1);

        assert_eq!(kept.next().await.unwrap().stage, JobStage::Queued);
        assert_eq!(kept.next().await.unwrap().stage, JobStage::Normalizing);
    }

    #[test]
    fn test_evict_terminal_only() {
        let p = ProgressPublisher::default();
        p.register(queued("active")).unwrap();
        let mut done = queued("done");
        p.register(done.clone()).unwrap();
        done.fail(JobError::new(ErrorCode::Canceled, "x", ""), now())
            .unwrap();
        p.publish(&done);

        let evicted = p.evict_terminal();
        assert_eq!(evicted, vec!["done".to_string()]);
        assert!(p.query("done").is_none());
        assert!(p.query("active").is_some());
    }
}
