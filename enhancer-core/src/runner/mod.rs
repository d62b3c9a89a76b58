mod pool;
mod summary;

use std::{
  fs,
  path::{Path, PathBuf},
  sync::Arc,
  time::Instant,
};

use serde::{Deserialize, Serialize};

use crate::audio::{read_audio, write_audio, SampleFormat};
use crate::config::{self, DeviceConfig};
use crate::error::{EnhanceError, ErrorKind, Result};
use crate::model::{run_model, CheckpointLoader, EnhancementModel, ModelPreset, OnnxLoader};
use crate::stft::{MultiChannelTransform, TransformConfig, Waveform};
pub use pool::{TaskOutcome, WorkerPool};
pub use summary::{
  BatchRun, BatchSummary, EnhanceReport, JobFailure, JobRecord, JobState, RunState,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
  /// Inputs at any other rate are rejected, not resampled.
  pub sample_rate: u32,
  /// Extensions picked up by directory discovery, matched case-insensitively.
  pub extensions: Vec<String>,
  pub format: SampleFormat,
  /// Skip inputs whose output already exists.
  pub resume: bool,
  /// Worker threads, 0 for one per CPU.
  pub concurrency: usize,
  pub device: DeviceConfig,
}

impl Default for RunnerConfig {
  fn default() -> Self {
    Self {
      sample_rate: 16000,
      extensions: vec!["wav".to_owned()],
      format: SampleFormat::Int16,
      resume: false,
      concurrency: 0,
      device: DeviceConfig::cpu(),
    }
  }
}

/// One input file and where its enhanced version goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnhancementJob {
  pub input: PathBuf,
  pub output: PathBuf,
}

pub struct EnhancementRunner {
  model: Arc<dyn EnhancementModel>,
  transform: MultiChannelTransform,
  config: RunnerConfig,
  pool: WorkerPool,
}

impl EnhancementRunner {
  pub fn new(
    model: Arc<dyn EnhancementModel>,
    transform: TransformConfig,
    config: RunnerConfig,
  ) -> Result<Self> {
    if config.sample_rate == 0 {
      return Err(EnhanceError::InvalidConfig(
        "sample rate must be positive".to_owned(),
      ));
    }

    if config.extensions.is_empty() {
      return Err(EnhanceError::InvalidConfig(
        "no input extension configured".to_owned(),
      ));
    }

    let pool = WorkerPool::new(config.concurrency)?;

    tracing::info!(
      model = model.name(),
      %transform,
      sample_rate = config.sample_rate,
      workers = pool.size(),
      "Runner ready"
    );

    Ok(Self {
      model,
      transform: MultiChannelTransform::new(transform)?,
      config,
      pool,
    })
  }

  /// Loads an ONNX checkpoint on `config.device`. Relative names are looked
  /// up in the models directory.
  pub fn from_checkpoint(
    path: impl AsRef<Path>,
    transform: TransformConfig,
    config: RunnerConfig,
  ) -> Result<Self> {
    let path = config::resolve_checkpoint(path);
    let model = OnnxLoader::new(config.device).load(&path)?;

    Self::new(Arc::new(model), transform, config)
  }

  /// Builds the preset's model and uses its analysis settings and sample rate.
  pub fn from_preset(preset: &ModelPreset, mut config: RunnerConfig) -> Result<Self> {
    config.sample_rate = preset.sample_rate;
    let model = preset.build(&config.device)?;

    Self::new(Arc::new(model), preset.transform()?, config)
  }

  pub fn config(&self) -> &RunnerConfig {
    &self.config
  }

  pub fn transform(&self) -> &TransformConfig {
    self.transform.config()
  }

  /// Runs the model on an in-memory waveform. The result has the same shape
  /// and sample rate as the input.
  pub fn enhance_waveform(&self, wave: &Waveform) -> Result<Waveform> {
    if wave.sample_rate() != self.config.sample_rate {
      return Err(EnhanceError::SampleRateMismatch {
        expected: self.config.sample_rate,
        found: wave.sample_rate(),
      });
    }

    let spec = self.transform.forward(wave.view())?;
    let enhanced = run_model(self.model.as_ref(), &spec)?;
    let samples = self.transform.inverse(&enhanced)?;

    Ok(Waveform::new(samples, wave.sample_rate()))
  }

  /// Enhances one file. Nothing is written unless every step succeeds.
  #[tracing::instrument(skip_all, fields(input = ?input.as_ref()))]
  pub fn enhance(
    &self,
    input: impl AsRef<Path>,
    output: impl AsRef<Path>,
  ) -> Result<EnhanceReport> {
    process_file(input, output, self.config.format, |wave| {
      self.enhance_waveform(&wave)
    })
  }

  /// Files in `dir` with one of the configured extensions, sorted by name.
  pub fn discover(&self, dir: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
    discover(dir.as_ref(), &self.config.extensions)
  }

  /// Enhances every matching file of `input_dir` into `output_dir`.
  ///
  /// A file that fails (or panics) is recorded and the batch goes on; only
  /// problems with the directories themselves are returned as errors.
  #[tracing::instrument(skip_all)]
  pub fn enhance_directory(
    &self,
    input_dir: impl AsRef<Path>,
    output_dir: impl AsRef<Path>,
  ) -> Result<BatchSummary> {
    process_directory(
      &self.pool,
      input_dir.as_ref(),
      output_dir.as_ref(),
      &self.config.extensions,
      self.config.resume,
      |job| self.enhance(&job.input, &job.output),
    )
  }
}

/// Reads `input`, hands it to `f` and writes the result atomically to `output`.
pub fn process_file<F>(
  input: impl AsRef<Path>,
  output: impl AsRef<Path>,
  format: SampleFormat,
  f: F,
) -> Result<EnhanceReport>
where
  F: FnOnce(Waveform) -> Result<Waveform>,
{
  let (input, output) = (input.as_ref(), output.as_ref());
  let start = Instant::now();

  if same_file(input, output) {
    return Err(EnhanceError::InvalidInput(format!(
      "refusing to overwrite the input `{}`",
      input.display()
    )));
  }

  let wave = f(read_audio(input)?)?;
  write_audio(output, &wave, format)?;

  Ok(EnhanceReport {
    input: input.to_path_buf(),
    output: output.to_path_buf(),
    channels: wave.channels(),
    samples: wave.len(),
    sample_rate: wave.sample_rate(),
    elapsed: start.elapsed(),
  })
}

/// Pairs every discovered input with its output path. With `resume`, inputs
/// whose output exists are returned separately and get no job.
pub fn plan(
  input_dir: &Path,
  output_dir: &Path,
  extensions: &[String],
  resume: bool,
) -> Result<(Vec<EnhancementJob>, Vec<PathBuf>)> {
  let mut jobs = Vec::new();
  let mut skipped = Vec::new();

  for input in discover(input_dir, extensions)? {
    let Some(name) = input.file_name() else {
      continue;
    };
    // outputs are always WAV
    let mut output = output_dir.join(name);
    output.set_extension("wav");

    if resume && output.is_file() {
      tracing::debug!(input = ?input, "Output exists, skip...");
      skipped.push(input);
    } else {
      jobs.push(EnhancementJob { input, output });
    }
  }

  Ok((jobs, skipped))
}

/// Runs `f` on the pool for every job planned from `input_dir`.
pub fn process_directory<F>(
  pool: &WorkerPool,
  input_dir: &Path,
  output_dir: &Path,
  extensions: &[String],
  resume: bool,
  f: F,
) -> Result<BatchSummary>
where
  F: Fn(&EnhancementJob) -> Result<EnhanceReport> + Sync + Send,
{
  if !input_dir.is_dir() {
    return Err(EnhanceError::InvalidInput(format!(
      "`{}` is not a directory",
      input_dir.display()
    )));
  }

  fs::create_dir_all(output_dir).map_err(|err| EnhanceError::io(output_dir, err))?;

  if same_file(input_dir, output_dir) {
    return Err(EnhanceError::InvalidInput(
      "output directory must differ from the input directory".to_owned(),
    ));
  }

  let (jobs, skipped) = plan(input_dir, output_dir, extensions, resume)?;

  tracing::info!(
    input = ?input_dir,
    output = ?output_dir,
    jobs = jobs.len(),
    skipped = skipped.len(),
    "Start processing..."
  );

  let run = BatchRun::new(&jobs, skipped);

  let outcomes = pool.run(jobs.iter().enumerate().collect(), |(index, job)| {
    run.start(index);
    match f(job) {
      Ok(report) => run.succeed(index, report),
      Err(err) => run.fail(index, &err),
    }
  });

  for (index, outcome) in outcomes.into_iter().enumerate() {
    if let TaskOutcome::Panicked(message) = outcome {
      run.fail_with(index, ErrorKind::Panic, message);
    }
  }

  let summary = run.into_summary();
  summary.log();

  Ok(summary)
}

/// Files in `dir` whose extension is one of `extensions`, sorted by name.
pub fn discover(dir: &Path, extensions: &[String]) -> Result<Vec<PathBuf>> {
  let entries = fs::read_dir(dir).map_err(|err| EnhanceError::io(dir, err))?;

  let mut files = Vec::new();
  for entry in entries {
    let path = entry.map_err(|err| EnhanceError::io(dir, err))?.path();

    let matched = path
      .extension()
      .and_then(|e| e.to_str())
      .is_some_and(|ext| extensions.iter().any(|x| x.eq_ignore_ascii_case(ext)));

    if matched && path.is_file() {
      files.push(path);
    }
  }

  files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
  Ok(files)
}

fn same_file(a: &Path, b: &Path) -> bool {
  if a == b {
    return true;
  }

  match (a.canonicalize(), b.canonicalize()) {
    (Ok(a), Ok(b)) => a == b,
    _ => false,
  }
}

#[cfg(test)]
mod tests {
  use ndarray::{Array2, Array4, ArrayView4};

  use super::*;
  use crate::model::IdentityModel;

  struct Gain(f32);

  impl EnhancementModel for Gain {
    fn infer(&self, input: ArrayView4<f32>) -> Result<Array4<f32>> {
      Ok(input.mapv(|v| v * self.0))
    }
  }

  fn runner(model: impl EnhancementModel + 'static) -> EnhancementRunner {
    let config = RunnerConfig {
      concurrency: 2,
      ..Default::default()
    };
    EnhancementRunner::new(Arc::new(model), TransformConfig::gtcrn(), config).unwrap()
  }

  fn noise(channels: usize, len: usize) -> Waveform {
    let samples = Array2::from_shape_fn((channels, len), |(c, i)| {
      (((i * 7919 + c * 104729) % 1000) as f32 / 1000.0 - 0.5) * 0.6
    });
    Waveform::new(samples, 16000)
  }

  #[test]
  fn rejects_bad_config() {
    let config = RunnerConfig {
      sample_rate: 0,
      ..Default::default()
    };
    let res = EnhancementRunner::new(Arc::new(IdentityModel), TransformConfig::gtcrn(), config);
    assert!(matches!(res, Err(EnhanceError::InvalidConfig(_))));
  }

  #[test]
  fn gain_model_scales_the_waveform() {
    let runner = runner(Gain(0.5));
    let wave = noise(2, 9000);
    let out = runner.enhance_waveform(&wave).unwrap();

    assert_eq!(out.samples().dim(), (2, 9000));
    for (a, b) in wave.samples().iter().zip(out.samples().iter()) {
      approx::assert_abs_diff_eq!(a * 0.5, *b, epsilon = 1e-4);
    }
  }

  #[test]
  fn sample_rate_gate() {
    let runner = runner(IdentityModel);
    let wave = Waveform::new(Array2::zeros((1, 4000)), 8000);

    assert!(matches!(
      runner.enhance_waveform(&wave),
      Err(EnhanceError::SampleRateMismatch {
        expected: 16000,
        found: 8000
      })
    ));
  }

  #[test]
  fn discovery_is_sorted_and_case_insensitive() {
    let dir = tempfile::tempdir().unwrap();
    for name in ["b.WAV", "a.wav", "c.txt", ".c.wav.partial"] {
      fs::write(dir.path().join(name), b"").unwrap();
    }
    fs::create_dir(dir.path().join("d.wav")).unwrap();

    let found = runner(IdentityModel).discover(dir.path()).unwrap();
    let names: Vec<_> = found
      .iter()
      .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
      .collect();

    assert_eq!(names, ["a.wav", "b.WAV"]);
  }

  #[test]
  fn planned_outputs_are_wav() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    for name in ["talk.m4a", "song.M4A", "note.txt"] {
      fs::write(input.path().join(name), b"").unwrap();
    }
    fs::write(output.path().join("song.wav"), b"").unwrap();

    let (jobs, skipped) = plan(input.path(), output.path(), &["m4a".to_owned()], true).unwrap();

    assert_eq!(skipped, vec![input.path().join("song.M4A")]);
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].input, input.path().join("talk.m4a"));
    assert_eq!(jobs[0].output, output.path().join("talk.wav"));
  }

  #[test]
  fn refuses_to_overwrite_input() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("x.wav");
    fs::write(&path, b"").unwrap();

    let err = runner(IdentityModel).enhance(&path, &path).unwrap_err();
    assert!(matches!(err, EnhanceError::InvalidInput(_)));
  }

  #[test]
  fn config_deserializes_with_defaults() {
    let config: RunnerConfig =
      serde_json::from_str(r#"{ "sample_rate": 48000, "format": "float32" }"#).unwrap();

    assert_eq!(config.sample_rate, 48000);
    assert_eq!(config.format, SampleFormat::Float32);
    assert_eq!(config.extensions, ["wav"]);
    assert!(!config.resume);
  }
}
