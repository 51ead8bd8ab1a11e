pub mod align;
pub mod cleanup;
pub mod diarize;
pub mod metrics;
pub mod normalize;
pub mod sidecar;
pub mod storage;
pub mod stt;
pub mod summarize;
