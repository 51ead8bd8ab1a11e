//! 長さクラス別の要約プロンプトテンプレート

use crate::domain::transcript::SummaryLength;

pub const SYSTEM_SUMMARY: &str = "\
You summarize speech transcripts produced by automatic speech recognition.
- Write the summary in the same language as the transcript.
- Ignore filler words and recognition artifacts.
- Do not invent facts that are not in the transcript.
- Output only the summary text.";

const INSTRUCTION_SHORT: &str =
    "Please provide a concise summary of the following text in 1-2 sentences:";
const INSTRUCTION_MEDIUM: &str = "Please summarize the following text in one clear paragraph:";
const INSTRUCTION_LONG: &str = "Please provide a detailed summary of the following text, \
covering the main points and key details:";

/// 長さクラスに対応する指示文
pub fn instruction_for(length: SummaryLength) -> &'static str {
    match length {
        SummaryLength::Short => INSTRUCTION_SHORT,
        SummaryLength::Medium => INSTRUCTION_MEDIUM,
        SummaryLength::Long => INSTRUCTION_LONG,
    }
}

/// 生成トークン数の上限（long のみ大きめ）
pub fn max_tokens_for(length: SummaryLength) -> u32 {
    match length {
        SummaryLength::Long => 512,
        SummaryLength::Short | SummaryLength::Medium => 256,
    }
}

/// ユーザープロンプトを構築する
pub fn build_prompt(text: &str, length: SummaryLength) -> String {
    format!("{}\n\n{}", instruction_for(length), text)
}
