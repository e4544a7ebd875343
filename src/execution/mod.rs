//! Run execution: batch scheduling, step execution and orchestration

pub mod cancel;
pub mod events;
pub mod executor;
pub mod orchestrator;
pub mod scheduler;

pub use cancel::CancelHandle;
pub use events::{EventBus, EventHandler, ExecutionEvent};
pub use executor::StepExecutor;
pub use orchestrator::{OrchestratorBuilder, PipelineOrchestrator};
pub use scheduler::{merge_batch, BatchProgress, BatchScheduler, MergeOutcome, StepRun};
