//! Background song generation.
//!
//! - `SongLifecycle`: advances one song through its status machine.
//! - `BackgroundExecutor`: runs lifecycles on detached Tokio tasks with a
//!   panic guard and counters.

pub mod executor;
pub mod lifecycle;

pub use executor::{BackgroundExecutor, ExecutorStats};
pub use lifecycle::{AdvanceOutcome, DetachedArtifact, ExecutionFailure, SongLifecycle};
