mod ffmpeg;

pub use ffmpeg::{wav_duration_secs, FfmpegConfig, FfmpegNormalizer};
