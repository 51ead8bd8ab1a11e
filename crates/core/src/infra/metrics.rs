use parking_lot::Mutex;
use serde::Serialize;

use crate::domain::error::ErrorCode;
use crate::domain::job::JobStage;

/// 保持するレイテンシ記録の上限
const MAX_LATENCY_RECORDS: usize = 1000;

/// ローカルメトリクス収集器
pub struct Metrics {
    counters: Mutex<MetricsCounters>,
    latencies: Mutex<Vec<LatencyRecord>>,
}

#[derive(Debug, Default)]
struct MetricsCounters {
    jobs_submitted: u64,
    jobs_succeeded: u64,
    jobs_failed: u64,
    degraded_alignment: u64,
    degraded_diarization: u64,
    degraded_summarization: u64,
    cleanup_warnings: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LatencyRecord {
    pub stage: JobStage,
    pub duration_ms: u64,
    pub timestamp: String,
}

/// メトリクスサマリー
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSummary {
    pub jobs_submitted: u64,
    pub jobs_succeeded: u64,
    pub jobs_failed: u64,
    pub degradations: DegradationCounts,
    pub avg_latency_ms: AvgLatency,
    pub recent_latencies: Vec<LatencyRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DegradationCounts {
    pub alignment: u64,
    pub diarization: u64,
    pub summarization: u64,
    pub cleanup: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AvgLatency {
    pub normalize: Option<f64>,
    pub transcribe: Option<f64>,
    pub align: Option<f64>,
    pub diarize: Option<f64>,
    pub summarize: Option<f64>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            counters: Mutex::new(MetricsCounters::default()),
            latencies: Mutex::new(Vec::new()),
        }
    }

    pub fn inc_submitted(&self) {
        self.counters.lock().jobs_submitted += 1;
    }

    pub fn inc_succeeded(&self) {
        self.counters.lock().jobs_succeeded += 1;
    }

    pub fn inc_failed(&self) {
        self.counters.lock().jobs_failed += 1;
    }

    /// 吸収された回復可能エラーを数える
    pub fn inc_degraded(&self, code: ErrorCode) {
        let mut c = self.counters.lock();
        match code {
            ErrorCode::Alignment => c.degraded_alignment += 1,
            ErrorCode::Diarization | ErrorCode::DiarizationUnavailable => {
                c.degraded_diarization += 1
            }
            ErrorCode::SummarizationUnavailable => c.degraded_summarization += 1,
            ErrorCode::Cleanup => c.cleanup_warnings += 1,
            other => log::debug!("inc_degraded: ignoring fatal code {}", other.as_str()),
        }
    }

    pub fn record_latency(&self, stage: JobStage, duration_ms: u64) {
        let record = LatencyRecord {
            stage,
            duration_ms,
            timestamp: chrono::Utc::now().to_rfc3339(),
        };
        let mut latencies = self.latencies.lock();
        latencies.push(record);
        if latencies.len() > MAX_LATENCY_RECORDS {
            let excess = latencies.len() - MAX_LATENCY_RECORDS;
            latencies.drain(0..excess);
        }
    }

    pub fn summary(&self) -> MetricsSummary {
        let c = self.counters.lock();
        let latencies = self.latencies.lock();

        let avg = |stage: JobStage| -> Option<f64> {
            let vals: Vec<f64> = latencies
                .iter()
                .filter(|r| r.stage == stage)
                .map(|r| r.duration_ms as f64)
                .collect();
            if vals.is_empty() {
                None
            } else {
                Some(vals.iter().sum::<f64>() / vals.len() as f64)
            }
        };

        let recent: Vec<LatencyRecord> = latencies.iter().rev().take(20).cloned().collect();

        MetricsSummary {
            jobs_submitted: c.jobs_submitted,
            jobs_succeeded: c.jobs_succeeded,
            jobs_failed: c.jobs_failed,
            degradations: DegradationCounts {
                alignment: c.degraded_alignment,
                diarization: c.degraded_diarization,
                summarization: c.degraded_summarization,
                cleanup: c.cleanup_warnings,
            },
            avg_latency_ms: AvgLatency {
                normalize: avg(JobStage::Normalizing),
                transcribe: avg(JobStage::Transcribing),
                align: avg(JobStage::Aligning),
                diarize: avg(JobStage::Diarizing),
                summarize: avg(JobStage::Summarizing),
            },
            recent_latencies: recent,
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let m = Metrics::new();
        m.inc_submitted();
        m.inc_submitted();
        m.inc_succeeded();
        m.inc_degraded(ErrorCode::Alignment);
        m.inc_degraded(ErrorCode::DiarizationUnavailable);
        m.inc_degraded(ErrorCode::Diarization);
        m.inc_degraded(ErrorCode::Transcription);

        let s = m.summary();
        assert_eq!(s.jobs_submitted, 2);
        assert_eq!(s.jobs_succeeded, 1);
        assert_eq!(s.jobs_failed, 0);
        assert_eq!(s.degradations.alignment, 1);
        assert_eq!(s.degradations.diarization, 2);
        assert_eq!(s.degradations.summarization, 0);
    }

    #[test]
    fn test_latency_recording() {
        let m = Metrics::new();
        m.record_latency(JobStage::Transcribing, 120);
        m.record_latency(JobStage::Transcribing, 80);
        m.record_latency(JobStage::Summarizing, 200);

        let s = m.summary();
        assert!((s.avg_latency_ms.transcribe.unwrap() - 100.0).abs() < f64::EPSILON);
        assert!((s.avg_latency_ms.summarize.unwrap() - 200.0).abs() < f64::EPSILON);
        assert!(s.avg_latency_ms.diarize.is_none());
        assert_eq!(s.recent_latencies.len(), 3);
    }

    #[test]
    fn test_latency_cap() {
        let m = Metrics::new();
        for i in 0..1100 {
            m.record_latency(JobStage::Transcribing, i);
        }
        assert_eq!(m.latencies.lock().len(), MAX_LATENCY_RECORDS);
    }
}
