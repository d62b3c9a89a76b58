mod dnsmos;
mod mel;
mod sisdr;

use std::{
  fmt,
  path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::audio::read_audio;
use crate::error::{EnhanceError, ErrorKind, Result};
use crate::runner::{discover, JobFailure, TaskOutcome, WorkerPool};
pub use dnsmos::{DnsMos, MosScores};
pub use sisdr::{scale_invariant_ratio, SiSdr, SiSnr};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
  Pesq { wideband: bool },
  Stoi { extended: bool },
  SiSdr,
  SiSnr,
  Mos { personalized: bool },
  P808,
}

impl Metric {
  /// Whether the metric compares against a clean reference.
  pub fn is_intrusive(&self) -> bool {
    !matches!(self, Metric::Mos { .. } | Metric::P808)
  }
}

impl fmt::Display for Metric {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Metric::Pesq { wideband: true } => write!(f, "PESQ-WB"),
      Metric::Pesq { wideband: false } => write!(f, "PESQ-NB"),
      Metric::Stoi { extended: true } => write!(f, "ESTOI"),
      Metric::Stoi { extended: false } => write!(f, "STOI"),
      Metric::SiSdr => write!(f, "SI-SDR"),
      Metric::SiSnr => write!(f, "SI-SNR"),
      Metric::Mos { personalized: true } => write!(f, "DNSMOS (personalized)"),
      Metric::Mos { personalized: false } => write!(f, "DNSMOS"),
      Metric::P808 => write!(f, "P808-MOS"),
    }
  }
}

/// A `(reference, test) -> score` quality measure on mono signals of equal length.
pub trait Scorer: Send + Sync {
  fn metric(&self) -> Metric;

  fn score(&self, reference: &[f32], test: &[f32], sample_rate: u32) -> Result<f64>;
}

/// Adapts a plain function, e.g. a binding to an external PESQ or STOI
/// implementation, to [`Scorer`].
pub struct FnScorer<F> {
  metric: Metric,
  f: F,
}

impl<F> FnScorer<F>
where
  F: Fn(&[f32], &[f32], u32) -> Result<f64> + Send + Sync,
{
  pub fn new(metric: Metric, f: F) -> Self {
    Self { metric, f }
  }
}

impl<F> Scorer for FnScorer<F>
where
  F: Fn(&[f32], &[f32], u32) -> Result<f64> + Send + Sync,
{
  fn metric(&self) -> Metric {
    self.metric
  }

  fn score(&self, reference: &[f32], test: &[f32], sample_rate: u32) -> Result<f64> {
    (self.f)(reference, test, sample_rate)
  }
}

/// Scores `test` against `reference`. Both are downmixed to mono and cut to
/// the shorter length. Non-intrusive metrics ignore `reference`.
pub fn score_files(scorer: &dyn Scorer, reference: Option<&Path>, test: &Path) -> Result<f64> {
  let test = read_audio(test)?;

  if !scorer.metric().is_intrusive() {
    return scorer.score(&[], &test.downmix(), test.sample_rate());
  }

  let reference = reference.ok_or_else(|| {
    EnhanceError::InvalidConfig(format!("{} needs a reference signal", scorer.metric()))
  })?;
  let reference = read_audio(reference)?;

  if reference.sample_rate() != test.sample_rate() {
    return Err(EnhanceError::SampleRateMismatch {
      expected: reference.sample_rate(),
      found: test.sample_rate(),
    });
  }

  let mut clean = reference.downmix();
  let mut enhanced = test.downmix();
  let min_len = clean.len().min(enhanced.len());
  clean.truncate(min_len);
  enhanced.truncate(min_len);

  scorer.score(&clean, &enhanced, test.sample_rate())
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileScore {
  pub file: PathBuf,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub score: Option<f64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub failure: Option<JobFailure>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreSummary {
  pub metric: Metric,
  pub scores: Vec<FileScore>,
  /// Reference files without a counterpart in the test directory.
  pub missing: Vec<PathBuf>,
  pub mean: Option<f64>,
}

impl ScoreSummary {
  pub fn scored(&self) -> usize {
    self.scores.iter().filter(|s| s.score.is_some()).count()
  }

  pub fn failed(&self) -> usize {
    self.scores.len() - self.scored()
  }

  pub fn log(&self) {
    match self.mean {
      Some(mean) => tracing::info!(
        metric = %self.metric,
        scored = self.scored(),
        failed = self.failed(),
        missing = self.missing.len(),
        "Average {}: {mean:.4}",
        self.metric
      ),
      None => tracing::warn!(
        metric = %self.metric,
        "No score calculated, check that the directories contain matching files"
      ),
    }
  }
}

/// Scores every file of `test_dir`, pairing each reference in `reference_dir`
/// with the test file of the same name.
///
/// Missing counterparts are listed in [`ScoreSummary::missing`]; files that
/// fail to score are recorded with their error and left out of the mean.
#[tracing::instrument(skip_all)]
pub fn score_directory(
  scorer: &dyn Scorer,
  reference_dir: Option<&Path>,
  test_dir: &Path,
  extensions: &[String],
  pool: &WorkerPool,
) -> Result<ScoreSummary> {
  let metric = scorer.metric();
  let mut missing = Vec::new();

  // (reference, test)
  let pairs: Vec<(Option<PathBuf>, PathBuf)> = match reference_dir {
    Some(reference_dir) if metric.is_intrusive() => {
      let mut pairs = Vec::new();
      for reference in discover(reference_dir, extensions)? {
        let Some(name) = reference.file_name() else {
          continue;
        };
        let test = test_dir.join(name);

        if test.is_file() {
          pairs.push((Some(reference), test));
        } else {
          tracing::warn!(reference = ?reference, "Test file not found, skip...");
          missing.push(reference);
        }
      }
      pairs
    }
    None if metric.is_intrusive() => {
      return Err(EnhanceError::InvalidConfig(format!(
        "{metric} needs a reference directory"
      )));
    }
    _ => discover(test_dir, extensions)?
      .into_iter()
      .map(|test| (None, test))
      .collect(),
  };

  tracing::info!(%metric, files = pairs.len(), "Start scoring...");

  let outcomes = pool.run(pairs.clone(), |(reference, test)| {
    score_files(scorer, reference.as_deref(), &test)
  });

  let scores: Vec<FileScore> = pairs
    .into_iter()
    .zip(outcomes)
    .map(|((_, file), outcome)| {
      let (score, failure) = match outcome {
        TaskOutcome::Done(Ok(score)) => (Some(score), None),
        TaskOutcome::Done(Err(err)) => {
          tracing::error!(file = ?file, kind = %err.kind(), %err, "Failed to score");
          let failure = JobFailure {
            kind: err.kind(),
            message: err.to_string(),
          };
          (None, Some(failure))
        }
        TaskOutcome::Panicked(message) => {
          tracing::error!(file = ?file, message = message.as_str(), "Scoring panicked");
          let failure = JobFailure {
            kind: ErrorKind::Panic,
            message,
          };
          (None, Some(failure))
        }
      };

      FileScore {
        file,
        score,
        failure,
      }
    })
    .collect();

  let values: Vec<f64> = scores.iter().filter_map(|s| s.score).collect();
  let mean = if values.is_empty() {
    None
  } else {
    Some(values.iter().sum::<f64>() / values.len() as f64)
  };

  let summary = ScoreSummary {
    metric,
    scores,
    missing,
    mean,
  };
  summary.log();

  Ok(summary)
}
