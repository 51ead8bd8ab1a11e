use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

// ─── Segment ─────────────────────────────────────────────────────

/// タイムスタンプ付きの書き起こしセグメント
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptSegment {
    /// 開始時刻 (秒)
    pub start: f64,
    /// 終了時刻 (秒)
    pub end: f64,
    pub text: String,
    /// 話者タグ (話者分離が実行された場合のみ)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speaker: Option<String>,
}

impl TranscriptSegment {
    pub fn new(start: f64, end: f64, text: impl Into<String>) -> Self {
        Self {
            start,
            end,
            text: text.into(),
            speaker: None,
        }
    }

    fn overlap(&self, turn: &SpeakerTurn) -> f64 {
        (self.end.min(turn.end) - self.start.max(turn.start)).max(0.0)
    }
}

/// 話者分離プロバイダが返す話者区間
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeakerTurn {
    pub start: f64,
    pub end: f64,
    pub speaker: String,
}

/// セグメントのテキストを空白1つで連結する
pub fn full_text(segments: &[TranscriptSegment]) -> String {
    segments
        .iter()
        .map(|s| s.text.trim())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// 各セグメントに最も重なりの大きい話者区間の話者を割り当てる。
/// 重なりがなければタグなしのまま。
pub fn assign_speakers(segments: &mut [TranscriptSegment], turns: &[SpeakerTurn]) {
    for segment in segments.iter_mut() {
        let best = turns
            .iter()
            .map(|turn| (segment.overlap(turn), turn))
            .filter(|(overlap, _)| *overlap > 0.0)
            .max_by(|a, b| a.0.total_cmp(&b.0));
        segment.speaker = best.map(|(_, turn)| turn.speaker.clone());
    }
}

/// 出力セグメントに実際に現れる話者タグの種類数
pub fn count_speakers(segments: &[TranscriptSegment]) -> u32 {
    segments
        .iter()
        .filter_map(|s| s.speaker.as_deref())
        .filter(|s| !s.is_empty())
        .collect::<BTreeSet<_>>()
        .len() as u32
}

// ─── Options ─────────────────────────────────────────────────────

/// 要約の長さクラス
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SummaryLength {
    Short,
    #[default]
    Medium,
    Long,
}

impl SummaryLength {
    /// 未知の値は medium にフォールバックする
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "short" => Self::Short,
            "long" => Self::Long,
            _ => Self::Medium,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Short => "short",
            Self::Medium => "medium",
            Self::Long => "long",
        }
    }
}

// ─── Stage outcomes ──────────────────────────────────────────────

/// 要約ステージの結果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SummaryStatus {
    Generated,
    DisabledByUser,
    /// 音声が短すぎるため自動スキップ
    AutoDisabled,
    Unavailable,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlignmentStatus {
    Aligned,
    /// アライメントモデルがなく、書き起こしのタイムスタンプをそのまま使った
    Skipped,
    Failed,
}

/// 話者分離ステージの結果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiarizationStatus {
    Ran,
    NotRequested,
    DisabledByServer,
    Unavailable,
    Failed,
}

// ─── Result ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    pub text: String,
    pub segments: Vec<TranscriptSegment>,
    pub language: String,
}

/// 結果メタデータ。「実行した」「要求でスキップ」「自動スキップ」を区別できる。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobMetadata {
    pub file_name: String,
    pub language: String,
    pub summary_length: SummaryLength,
    pub summary_requested: bool,
    /// バックエンド判定後に実際に要約を実行したか
    pub summary_enabled: bool,
    pub summary_status: SummaryStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_disabled_reason: Option<String>,
    /// 音声長 (秒)
    pub duration: f64,
    pub alignment: AlignmentStatus,
    /// 話者分離が要求されたか
    pub diarization_enabled: bool,
    pub diarization_status: DiarizationStatus,
    pub speakers_detected: u32,
    pub min_speakers: u32,
    pub max_speakers: u32,
}

/// succeeded ジョブの最終成果物
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub transcription: Transcript,
    pub summary: String,
    pub metadata: JobMetadata,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seg(start: f64, end: f64, text: &str) -> TranscriptSegment {
        TranscriptSegment::new(start, end, text)
    }

    fn turn(start: f64, end: f64, speaker: &str) -> SpeakerTurn {
        SpeakerTurn {
            start,
            end,
            speaker: speaker.to_string(),
        }
    }

    #[test]
    fn full_text_trims_and_joins() {
        let segments = vec![seg(0.0, 1.0, " hello "), seg(1.0, 2.0, ""), seg(2.0, 3.0, "world")];
        assert_eq!(full_text(&segments), "hello world");
    }

    #[test]
    fn assign_speakers_by_largest_overlap() {
        let mut segments = vec![seg(0.0, 4.0, "a"), seg(4.0, 6.0, "b"), seg(20.0, 21.0, "c")];
        let turns = vec![
            turn(0.0, 1.0, "SPEAKER_00"),
            turn(1.0, 5.5, "SPEAKER_01"),
        ];
        assign_speakers(&mut segments, &turns);
        assert_eq!(segments[0].speaker.as_deref(), Some("SPEAKER_01"));
        assert_eq!(segments[1].speaker.as_deref(), Some("SPEAKER_01"));
        assert_eq!(segments[2].speaker, None);
    }

    #[test]
    fn count_speakers_counts_distinct_tags() {
        let mut segments = vec![seg(0.0, 1.0, "a"), seg(1.0, 2.0, "b"), seg(2.0, 3.0, "c")];
        segments[0].speaker = Some("A".into());
        segments[1].speaker = Some("B".into());
        segments[2].speaker = Some("A".into());
        assert_eq!(count_speakers(&segments), 2);
        assert_eq!(count_speakers(&[seg(0.0, 1.0, "x")]), 0);
    }

    #[test]
    fn summary_length_parse_falls_back_to_medium() {
        assert_eq!(SummaryLength::parse("short"), SummaryLength::Short);
        assert_eq!(SummaryLength::parse("LONG"), SummaryLength::Long);
        assert_eq!(SummaryLength::parse("huge"), SummaryLength::Medium);
    }

    #[test]
    fn segment_without_speaker_omits_field() {
        let json = serde_json::to_string(&seg(0.0, 1.5, "hi")).unwrap();
        assert!(!json.contains("speaker"));
    }
}
