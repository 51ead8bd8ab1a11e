pub mod whisper;

pub use whisper::{WhisperConfig, WhisperSidecar};
