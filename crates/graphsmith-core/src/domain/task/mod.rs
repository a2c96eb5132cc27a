//! Ingestion tasks, their stages and the deltas they produce

mod delta;
mod stage;
mod state;

pub use delta::{ClassDelta, DeltaOperation, EntityDelta, GraphDelta, PropertyDelta, RelationshipDelta};
pub use stage::{ProgressUpdate, Stage, StageResult};
pub use state::{Task, TaskError, TaskProgress, TaskState, TaskStatus};
