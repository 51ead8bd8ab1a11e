mod sidecar;

pub use sidecar::{DiarizerConfig, SidecarDiarizer};
