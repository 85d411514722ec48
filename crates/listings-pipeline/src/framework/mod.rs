//! Step execution framework
//!
//! A pipeline is a linear sequence of [`Step`]s. Each step is wrapped in a
//! [`Task`] that applies a [`RetryPolicy`], and optionally in a
//! [`CachedTask`] that memoizes successful outputs under a [`CachePolicy`].
//! Every task execution produces a [`TaskRun`] that is appended to the
//! current [`PipelineRun`].

pub mod cache;
pub mod retry;
pub mod run;
pub mod step;

pub use cache::{
    CacheEntry, CachePolicy, Cacheable, Clock, FileResultStore, ManualClock, MemoryResultStore,
    ResultStore, SystemClock, TaskCache,
};
pub use retry::{Attempted, Backoff, RetryPolicy};
pub use run::{BatchReport, ErrorRecord, PipelineKind, PipelineRun, TaskOutcome, TaskRun};
pub use step::{CachedTask, Step, Task, TaskResult};
