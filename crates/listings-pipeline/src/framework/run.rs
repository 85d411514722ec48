//! Execution records: task runs, pipeline runs and batch reports

use crate::error::{ErrorKind, PipelineError};
use chrono::{DateTime, Utc};
use listings_common::{DatasetReference, Fingerprint, SourceLocation};
use serde::Serialize;
use std::time::Duration;
use uuid::Uuid;

/// Error as it appears in a report
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorRecord {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&PipelineError> for ErrorRecord {
    fn from(err: &PipelineError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TaskOutcome {
    Succeeded,
    CacheHit,
    Failed(ErrorRecord),
}

/// One execution of one step
#[derive(Debug, Clone, Serialize)]
pub struct TaskRun {
    pub step: String,
    /// Input fingerprint, for cacheable steps only
    pub fingerprint: Option<Fingerprint>,
    pub attempts: u32,
    pub outcome: TaskOutcome,
    #[serde(with = "duration_secs_opt")]
    pub cache_ttl: Option<Duration>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl TaskRun {
    pub fn is_success(&self) -> bool {
        !matches!(self.outcome, TaskOutcome::Failed(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineKind {
    Ingest,
    Load,
}

impl std::fmt::Display for PipelineKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineKind::Ingest => f.write_str("ingest"),
            PipelineKind::Load => f.write_str("load"),
        }
    }
}

/// One execution of a full pipeline for one dataset.
///
/// Tasks are recorded in execution order; the run stops at the first failed
/// task, so a failed run always ends with exactly one failed task (unless it
/// failed before any step ran, e.g. on an invalid location).
#[derive(Debug, Clone, Serialize)]
pub struct PipelineRun {
    pub run_id: Uuid,
    pub kind: PipelineKind,
    pub location: SourceLocation,
    pub dataset: Option<DatasetReference>,
    pub tasks: Vec<TaskRun>,
    pub error: Option<ErrorRecord>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl PipelineRun {
    pub fn start(kind: PipelineKind, location: SourceLocation) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            kind,
            location,
            dataset: None,
            tasks: Vec::new(),
            error: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn record(&mut self, task: TaskRun) {
        self.tasks.push(task);
    }

    pub fn fail(mut self, err: &PipelineError) -> Self {
        self.error = Some(err.into());
        self.finish()
    }

    pub fn finish(mut self) -> Self {
        self.finished_at = Some(Utc::now());
        self
    }

    pub fn succeeded(&self) -> bool {
        self.error.is_none() && self.tasks.iter().all(TaskRun::is_success)
    }

    /// Label used in log lines: the dataset key when known, else the URL
    pub fn label(&self) -> String {
        match &self.dataset {
            Some(dataset) => dataset.to_string(),
            None => self.location.to_string(),
        }
    }
}

/// Everything one batch call did
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub runs: Vec<PipelineRun>,
    /// Locations discovered but never started because the batch was cancelled
    pub skipped: Vec<SourceLocation>,
    pub discovery_warnings: Vec<ErrorRecord>,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.runs.iter().filter(|run| run.succeeded()).count()
    }

    pub fn failed(&self) -> usize {
        self.runs.len() - self.succeeded()
    }

    pub fn failures(&self) -> impl Iterator<Item = &PipelineRun> {
        self.runs.iter().filter(|run| !run.succeeded())
    }
}

mod duration_secs_opt {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(duration) => serializer.serialize_some(&duration.as_secs()),
            None => serializer.serialize_none(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn task(outcome: TaskOutcome) -> TaskRun {
        let now = Utc::now();
        TaskRun {
            step: "fetch".into(),
            fingerprint: None,
            attempts: 1,
            outcome,
            cache_ttl: Some(Duration::from_secs(86_400)),
            started_at: now,
            finished_at: now,
        }
    }

    #[test]
    fn test_run_succeeds_only_when_every_task_does() {
        let mut run = PipelineRun::start(PipelineKind::Ingest, "http://x/a.csv".into());
        run.record(task(TaskOutcome::CacheHit));
        run.record(task(TaskOutcome::Succeeded));
        assert!(run.succeeded());

        let err = PipelineError::Format("bad".into());
        run.record(task(TaskOutcome::Failed((&err).into())));
        let run = run.fail(&err);
        assert!(!run.succeeded());
        assert!(run.finished_at.is_some());
    }

    #[test]
    fn test_batch_counts() {
        let ok = PipelineRun::start(PipelineKind::Load, "http://x/a.csv".into()).finish();
        let bad = PipelineRun::start(PipelineKind::Load, "http://x/b.csv".into())
            .fail(&PipelineError::Load("quota".into()));
        let report = BatchReport {
            runs: vec![ok.clone(), bad, ok],
            ..Default::default()
        };
        assert_eq!(report.succeeded(), 2);
        assert_eq!(report.failed(), 1);
        assert_eq!(report.failures().count(), 1);
    }

    #[test]
    fn test_task_run_serialization() {
        let json = serde_json::to_value(task(TaskOutcome::CacheHit)).unwrap();
        assert_eq!(json["outcome"]["status"], "cache_hit");
        assert_eq!(json["cache_ttl"], 86_400);
    }
}
