use std::{
  path::{Path, PathBuf},
  sync::{Mutex, PoisonError},
  time::{Duration, Instant},
};

use serde::Serialize;

use super::EnhancementJob;
use crate::error::{EnhanceError, ErrorKind};

/// Per-file result of a successful enhancement (or preprocessing) step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnhanceReport {
  pub input: PathBuf,
  pub output: PathBuf,
  pub channels: usize,
  pub samples: usize,
  pub sample_rate: u32,
  pub elapsed: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
  Pending,
  Running,
  Succeeded,
  Failed,
}

impl JobState {
  pub fn is_terminal(&self) -> bool {
    matches!(self, JobState::Succeeded | JobState::Failed)
  }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobFailure {
  pub kind: ErrorKind,
  pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobRecord {
  pub input: PathBuf,
  pub output: PathBuf,
  pub state: JobState,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub report: Option<EnhanceReport>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub failure: Option<JobFailure>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
  Running,
  Completed,
}

/// Shared bookkeeping of an in-flight batch. Workers only touch their own record.
pub struct BatchRun {
  records: Mutex<Vec<JobRecord>>,
  skipped: Vec<PathBuf>,
  started: Instant,
}

impl BatchRun {
  pub fn new(jobs: &[EnhancementJob], skipped: Vec<PathBuf>) -> Self {
    let records = jobs
      .iter()
      .map(|job| JobRecord {
        input: job.input.clone(),
        output: job.output.clone(),
        state: JobState::Pending,
        report: None,
        failure: None,
      })
      .collect();

    Self {
      records: Mutex::new(records),
      skipped,
      started: Instant::now(),
    }
  }

  fn update(&self, index: usize, f: impl FnOnce(&mut JobRecord)) {
    let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(record) = records.get_mut(index) {
      f(record);
    }
  }

  pub fn start(&self, index: usize) {
    self.update(index, |record| {
      debug_assert_eq!(record.state, JobState::Pending);
      record.state = JobState::Running;
    });
  }

  pub fn succeed(&self, index: usize, report: EnhanceReport) {
    self.update(index, |record| {
      tracing::info!(
        input = ?record.input,
        elapsed_ms = report.elapsed.as_millis() as u64,
        "Done"
      );
      record.state = JobState::Succeeded;
      record.report = Some(report);
    });
  }

  pub fn fail(&self, index: usize, err: &EnhanceError) {
    self.fail_with(index, err.kind(), err.to_string());
  }

  pub fn fail_with(&self, index: usize, kind: ErrorKind, message: String) {
    self.update(index, |record| {
      tracing::error!(input = ?record.input, %kind, err = message.as_str(), "Failed to process");
      record.state = JobState::Failed;
      record.failure = Some(JobFailure { kind, message });
    });
  }

  pub fn state(&self, index: usize) -> Option<JobState> {
    self
      .records
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .get(index)
      .map(|r| r.state)
  }

  pub fn into_summary(self) -> BatchSummary {
    let jobs = self
      .records
      .into_inner()
      .unwrap_or_else(PoisonError::into_inner);

    let state = if jobs.iter().all(|j| j.state.is_terminal()) {
      RunState::Completed
    } else {
      RunState::Running
    };

    BatchSummary {
      state,
      total: jobs.len() + self.skipped.len(),
      succeeded: jobs.iter().filter(|j| j.state == JobState::Succeeded).count(),
      failed: jobs.iter().filter(|j| j.state == JobState::Failed).count(),
      skipped: self.skipped,
      elapsed: self.started.elapsed(),
      jobs,
    }
  }
}

/// Outcome of [`super::EnhancementRunner::enhance_directory`], ordered by input name.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchSummary {
  pub state: RunState,
  pub total: usize,
  pub succeeded: usize,
  pub failed: usize,
  pub skipped: Vec<PathBuf>,
  pub elapsed: Duration,
  pub jobs: Vec<JobRecord>,
}

impl BatchSummary {
  pub fn is_success(&self) -> bool {
    self.state == RunState::Completed && self.failed == 0
  }

  pub fn get(&self, input: &Path) -> Option<&JobRecord> {
    self.jobs.iter().find(|j| j.input == input)
  }

  pub fn failures(&self) -> impl Iterator<Item = &JobRecord> {
    self.jobs.iter().filter(|j| j.state == JobState::Failed)
  }

  pub fn log(&self) {
    tracing::info!(
      total = self.total,
      succeeded = self.succeeded,
      failed = self.failed,
      skipped = self.skipped.len(),
      elapsed = ?self.elapsed,
      "Batch finished"
    );

    for job in self.failures() {
      if let Some(failure) = &job.failure {
        tracing::warn!(input = ?job.input, kind = %failure.kind, "{}", failure.message);
      }
    }
  }
}
