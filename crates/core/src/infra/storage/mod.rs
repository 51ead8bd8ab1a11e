mod repository;

pub use repository::Storage;

use parking_lot::Mutex;

use crate::domain::error::AppError;
use crate::domain::job::JobState;

/// 最終成果物の保存先 trait（job_id をキーに終端スナップショットを保持）
pub trait ResultSink: Send + Sync {
    fn store(&self, state: &JobState) -> Result<(), AppError>;
    fn load(&self, job_id: &str) -> Result<Option<JobState>, AppError>;
}

/// SQLite を使う ResultSink
pub struct SqliteResultSink {
    storage: Mutex<Storage>,
}

impl SqliteResultSink {
    pub fn new(storage: Storage) -> Self {
        Self {
            storage: Mutex::new(storage),
        }
    }
}

impl ResultSink for SqliteResultSink {
    fn store(&self, state: &JobState) -> Result<(), AppError> {
        if !state.is_terminal() {
            return Err(AppError::invalid_state(format!(
                "ジョブ {} は終端状態ではないため保存できません",
                state.job_id
            )));
        }
        let now = chrono::Utc::now().to_rfc3339();
        self.storage.lock().upsert_result(state, &now)
    }

    fn load(&self, job_id: &str) -> Result<Option<JobState>, AppError> {
        self.storage.lock().get_result(job_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sink_rejects_active_jobs() {
        let sink = SqliteResultSink::new(Storage::open_in_memory().unwrap());
        let state = JobState::queued("j1".into(), chrono::Utc::now().to_rfc3339());
        let err = sink.store(&state).unwrap_err();
        assert_eq!(err.code, crate::domain::error::ErrorCode::InvalidState);
        assert!(sink.load("j1").unwrap().is_none());
    }
}
