//! Narrow ports onto the tracker, the coding agent, the VCS, and the event
//! sinks. The scheduler and worker depend only on these traits; concrete
//! backends are wired in at construction time via [`registry::RunnerRegistry`].
//!
//! ```text
//!  Scheduler ──> TaskManager / StorageBackend ──> (tracker adapter)
//!            └─> AgentRunner                  ──> (coding-agent subprocess)
//!  Worker    ──> Vcs                          ──> (git / hg / ...)
//!            └─> EventSink                    ──> (stream | file | fanout)
//! ```

mod context;
mod registry;
mod traits;
mod types;

pub use context::RunContext;
pub use registry::{RegistryError, RunnerRegistry};
pub use traits::{AgentRunner, EventSink, ProgressFn, RunnerCapabilities, StorageBackend, TaskManager, Vcs};
pub use types::{
    Event, EventType, MergeOutcome, RelationKind, RunnerMode, RunnerRequest, RunnerResult, RunnerStatus,
    SchedulerState, Task, TaskId, TaskRelation, TaskStatus, TaskTree, WorkerId,
};
