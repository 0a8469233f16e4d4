pub mod document;
pub mod generate;
pub mod notify;
pub mod orchestrator;
pub mod publish;
pub mod retry;
pub mod scheduler;
pub mod source;
pub mod store;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;
pub mod traits;

pub use orchestrator::{PipelineDeps, PipelineOrchestrator, PipelineSettings};
pub use retry::RetryPolicy;
pub use scheduler::SchedulerHandle;
