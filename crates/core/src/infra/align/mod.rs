use async_trait::async_trait;

use crate::domain::capability::{AlignError, Aligner, LoadedAudio};
use crate::domain::transcript::TranscriptSegment;

/// アライメントモデル未設定時に使う実装。
/// 常に [`AlignError::NotConfigured`] を返し、書き起こしのタイムスタンプがそのまま使われる。
pub struct PassthroughAligner;

#[async_trait]
impl Aligner for PassthroughAligner {
    async fn align(
        &self,
        _segments: &[TranscriptSegment],
        _language: &str,
        _audio: &LoadedAudio,
    ) -> Result<Vec<TranscriptSegment>, AlignError> {
        Err(AlignError::NotConfigured(
            "no alignment model configured".to_string(),
        ))
    }

    fn name(&self) -> &str {
        "passthrough"
    }
}
