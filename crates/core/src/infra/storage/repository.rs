use rusqlite::{params, Connection, OptionalExtension};

use crate::domain::error::AppError;
use crate::domain::job::JobState;

/// SQLiteストレージ（終端ジョブのスナップショット）
pub struct Storage {
    conn: Connection,
}

impl Storage {
    /// 新規接続（ファイルパス指定）
    pub fn open(path: &str) -> Result<Self, AppError> {
        let conn = Connection::open(path)
            .map_err(|e| AppError::storage(format!("DB接続に失敗: {e}")))?;
        let storage = Self { conn };
        storage.migrate()?;
        Ok(storage)
    }

    /// in-memory DB（テスト用）
    pub fn open_in_memory() -> Result<Self, AppError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| AppError::storage(format!("in-memory DB作成に失敗: {e}")))?;
        let storage = Self { conn };
        storage.migrate()?;
        Ok(storage)
    }

    /// スキーママイグレーション
    fn migrate(&self) -> Result<(), AppError> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS job_results (
                    job_id     TEXT PRIMARY KEY,
                    stage      TEXT NOT NULL,
                    snapshot   TEXT NOT NULL,
                    created_at TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_job_results_created
                    ON job_results(created_at DESC);
                ",
            )
            .map_err(|e| AppError::storage(format!("マイグレーション失敗: {e}")))?;
        Ok(())
    }

    /// 終端スナップショットを保存（同じ job_id は上書き）
    pub fn upsert_result(&self, state: &JobState, now: &str) -> Result<(), AppError> {
        let snapshot = serde_json::to_string(state)
            .map_err(|e| AppError::internal(format!("snapshot serialize: {e}")))?;
        self.conn
            .execute(
                "INSERT INTO job_results (job_id, stage, snapshot, created_at) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(job_id) DO UPDATE SET
                    stage = excluded.stage,
                    snapshot = excluded.snapshot",
                params![state.job_id, state.stage.as_str(), snapshot, now],
            )
            .map_err(|e| AppError::storage(format!("結果保存失敗: {e}")))?;
        Ok(())
    }

    pub fn get_result(&self, job_id: &str) -> Result<Option<JobState>, AppError> {
        let snapshot: Option<String> = self
            .conn
            .query_row(
                "SELECT snapshot FROM job_results WHERE job_id = ?1",
                params![job_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| AppError::storage(format!("結果取得失敗: {e}")))?;

        snapshot
            .map(|s| {
                serde_json::from_str(&s)
                    .map_err(|e| AppError::storage(format!("snapshot deserialize: {e}")))
            })
            .transpose()
    }

    /// 指定日時より前に保存された結果を削除（保持ポリシー用）
    pub fn delete_results_before(&self, before_date: &str) -> Result<u32, AppError> {
        let count = self
            .conn
            .execute(
                "DELETE FROM job_results WHERE created_at < ?1",
                params![before_date],
            )
            .map_err(|e| AppError::storage(format!("古い結果の削除失敗: {e}")))?;
        Ok(count as u32)
    }

    /// 保存済み結果の件数
    pub fn count_results(&self) -> Result<u32, AppError> {
        self.conn
            .query_row("SELECT COUNT(*) FROM job_results", [], |row| row.get(0))
            .map_err(|e| AppError::storage(format!("件数取得失敗: {e}")))
    }
}
