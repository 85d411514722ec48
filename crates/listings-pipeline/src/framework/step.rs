//! Typed steps and the tasks that wrap them

use super::cache::{Cacheable, TaskCache};
use super::retry::RetryPolicy;
use super::run::{PipelineRun, TaskOutcome, TaskRun};
use crate::error::Result;
use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info, warn};

/// One unit of pipeline work: a typed, async function of its input
#[async_trait]
pub trait Step: Send + Sync {
    type Input: Send + Sync;
    type Output: Send;

    fn name(&self) -> &'static str;

    async fn execute(&self, input: &Self::Input) -> Result<Self::Output>;
}

/// Output of a task together with the record of how it was produced
#[derive(Debug)]
pub struct TaskResult<O> {
    pub output: Result<O>,
    pub record: TaskRun,
}

impl<O> TaskResult<O> {
    /// Append the record to `run` and hand back the output
    pub fn record_into(self, run: &mut PipelineRun) -> Result<O> {
        run.record(self.record);
        self.output
    }
}

/// A step with its retry policy applied
#[derive(Debug)]
pub struct Task<S> {
    step: S,
    retry: RetryPolicy,
}

impl<S: Step> Task<S> {
    pub fn new(step: S, retry: RetryPolicy) -> Self {
        Self { step, retry }
    }

    /// A task that runs its step exactly once
    pub fn once(step: S) -> Self {
        Self::new(step, RetryPolicy::none())
    }

    pub fn step(&self) -> &S {
        &self.step
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub async fn run(&self, input: &S::Input) -> TaskResult<S::Output> {
        let started_at = Utc::now();
        let attempted = self
            .retry
            .run(self.step.name(), |_| self.step.execute(input))
            .await;

        let outcome = match &attempted.result {
            Ok(_) => {
                debug!(step = self.step.name(), attempts = attempted.attempts, "Step succeeded");
                TaskOutcome::Succeeded
            }
            Err(e) => TaskOutcome::Failed(e.into()),
        };

        TaskResult {
            output: attempted.result,
            record: TaskRun {
                step: self.step.name().to_string(),
                fingerprint: None,
                attempts: attempted.attempts,
                outcome,
                cache_ttl: None,
                started_at,
                finished_at: Utc::now(),
            },
        }
    }
}

/// A task whose successful outputs are memoized by input fingerprint
pub struct CachedTask<S: Step> {
    task: Task<S>,
    cache: TaskCache<S::Input>,
}

impl<S> CachedTask<S>
where
    S: Step,
    S::Output: Cacheable,
{
    pub fn new(task: Task<S>, cache: TaskCache<S::Input>) -> Self {
        Self { task, cache }
    }

    pub fn task(&self) -> &Task<S> {
        &self.task
    }

    pub async fn run(&self, input: &S::Input) -> TaskResult<S::Output> {
        let name = self.task.step().name();
        let key = self.cache.key(input);
        let ttl = Some(self.cache.policy().ttl);

        if let Some(output) = self.cache.lookup::<S::Output>(&key).await {
            info!(step = name, fingerprint = key.short(), "Cache hit");
            let now = Utc::now();
            return TaskResult {
                output: Ok(output),
                record: TaskRun {
                    step: name.to_string(),
                    fingerprint: Some(key),
                    attempts: 0,
                    outcome: TaskOutcome::CacheHit,
                    cache_ttl: ttl,
                    started_at: now,
                    finished_at: now,
                },
            };
        }

        let mut result = self.task.run(input).await;

        if let Ok(output) = &result.output {
            // A failed write only costs a future re-fetch
            if let Err(e) = self.cache.persist(name, &key, output).await {
                warn!(step = name, fingerprint = key.short(), error = %e, "Failed to persist cache entry");
            }
        }

        result.record.fingerprint = Some(key);
        result.record.cache_ttl = ttl;
        result
    }
}
