pub mod fallback;
pub mod job_queue;
pub mod orchestrator;
pub mod publisher;

pub use job_queue::{FetchError, JobQueue};
pub use orchestrator::{CancelSignal, Capabilities, PipelineOrchestrator};
pub use publisher::{ProgressPublisher, Subscription};
