//! Domain model (IDs, tasks, decisions, states, errors, events).
//!
//! I/O を一切持たない層。状態遷移のルールはすべてここで完結させる。

pub mod decision;
pub mod errors;
pub mod events;
pub mod ids;
pub mod priority;
pub mod result;
pub mod state;
pub mod task;

pub use decision::{Decision, DecisionChoice, DecisionRequest, DecisionStatus};
pub use errors::{ErrorKind, RelayError};
pub use events::DomainEvent;
pub use ids::{DecisionId, TaskId};
pub use priority::Priority;
pub use result::{Artifact, ResultKind, TaskResult};
pub use state::{TaskStatus, parse_status_filter};
pub use task::{Role, StatusUpdate, Task, TaskSpec};
