pub mod dependency;
pub mod failed_task;
pub mod message;
pub mod resource;
pub mod state;
pub mod sub_task;
pub mod task;

pub use dependency::{BlockingDependency, DependencyEdge, DependencyType};
pub use failed_task::{FailedTask, FailedTaskStatus, NewFailedTask};
pub use message::{Message, MessageType};
pub use resource::{ResourceAllocation, ResourceConstraint};
pub use state::{
    CompletionPrediction, ExecutionPhase, PhaseRecord, RecurringFailure, StateTransitionRecord,
    TransitionPatterns,
};
pub use sub_task::{SubTaskMessage, SubTaskResultMessage};
pub use task::{CrawlPhase, Task, TaskFilter, TaskStatus, TaskUpdate};
