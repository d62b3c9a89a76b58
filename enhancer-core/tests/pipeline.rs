use std::{fs, path::Path, sync::Arc};

use approx::assert_abs_diff_eq;
use enhancer_core::{
  audio::{partial_path, read_audio, write_audio, SampleFormat},
  model::{EnhancementModel, IdentityModel},
  runner::{EnhancementRunner, JobState, RunState, RunnerConfig},
  stft::{TransformConfig, Waveform, WindowSpec},
  EnhanceError, ErrorKind, Result,
};
use ndarray::{Array2, Array4, ArrayView4, Axis};

/// Scales every coefficient, i.e. the waveform.
struct Gain(f32);

impl EnhancementModel for Gain {
  fn infer(&self, input: ArrayView4<f32>) -> Result<Array4<f32>> {
    Ok(input.mapv(|v| v * self.0))
  }

  fn name(&self) -> &str {
    "gain"
  }
}

/// Panics on spectrograms with more than one channel.
struct MonoOnly;

impl EnhancementModel for MonoOnly {
  fn infer(&self, input: ArrayView4<f32>) -> Result<Array4<f32>> {
    assert_eq!(input.len_of(Axis(0)), 1, "mono only");
    Ok(input.to_owned())
  }
}

fn runner(model: impl EnhancementModel + 'static, config: RunnerConfig) -> EnhancementRunner {
  EnhancementRunner::new(Arc::new(model), TransformConfig::gtcrn(), config).unwrap()
}

fn float_config() -> RunnerConfig {
  RunnerConfig {
    format: SampleFormat::Float32,
    concurrency: 2,
    ..Default::default()
  }
}

fn speechish(channels: usize, len: usize, seed: usize) -> Waveform {
  let samples = Array2::from_shape_fn((channels, len), |(c, i)| {
    let t = i as f32 / 16000.0;
    let f = 180.0 + 70.0 * (c + seed) as f32;
    0.3 * (2.0 * std::f32::consts::PI * f * t).sin()
      + 0.1 * (2.0 * std::f32::consts::PI * 3.1 * f * t).sin()
  });
  Waveform::new(samples, 16000)
}

fn write_fixture(dir: &Path, name: &str, wave: &Waveform) {
  write_audio(dir.join(name), wave, SampleFormat::Float32).unwrap();
}

fn assert_close(a: &Waveform, b: &Waveform, epsilon: f32) {
  assert_eq!(a.samples().dim(), b.samples().dim());
  for (x, y) in a.samples().iter().zip(b.samples().iter()) {
    assert_abs_diff_eq!(x, y, epsilon = epsilon);
  }
}

#[test]
fn silence_in_silence_out() {
  let dir = tempfile::tempdir().unwrap();
  let input = dir.path().join("silence.wav");
  let output = dir.path().join("out.wav");
  write_fixture(dir.path(), "silence.wav", &Waveform::new(Array2::zeros((2, 16000)), 16000));

  let report = runner(Gain(3.0), float_config()).enhance(&input, &output).unwrap();
  assert_eq!((report.channels, report.samples), (2, 16000));

  let out = read_audio(&output).unwrap();
  assert!(out.samples().iter().all(|&v| v == 0.0));
}

#[test]
fn plain_hann_silence_keeps_its_length() {
  let transform = TransformConfig::new(512, 256, WindowSpec::hann()).unwrap();
  let runner = EnhancementRunner::new(Arc::new(IdentityModel), transform, float_config()).unwrap();

  let out = runner
    .enhance_waveform(&Waveform::mono(vec![0.0; 16000], 16000))
    .unwrap();

  assert_eq!(out.samples().dim(), (1, 16000));
  assert!(out.samples().iter().all(|&v| v == 0.0));
}

#[test]
fn plain_hann_channels_follow_their_input() {
  let transform = TransformConfig::new(512, 256, WindowSpec::hann()).unwrap();
  let runner = EnhancementRunner::new(Arc::new(IdentityModel), transform, float_config()).unwrap();
  let wave = speechish(2, 8000, 3);

  let mut swapped = wave.samples().clone();
  swapped.invert_axis(Axis(0));
  let swapped = Waveform::new(swapped, 16000);

  let out = runner.enhance_waveform(&wave).unwrap();
  let out_swapped = runner.enhance_waveform(&swapped).unwrap();

  assert_close(&out, &wave, 1e-4);
  for (a, b) in out.samples().row(0).iter().zip(out_swapped.samples().row(1)) {
    assert_abs_diff_eq!(a, b, epsilon = 1e-6);
  }
  for (a, b) in out.samples().row(1).iter().zip(out_swapped.samples().row(0)) {
    assert_abs_diff_eq!(a, b, epsilon = 1e-6);
  }
}

#[test]
fn output_shape_matches_input() {
  let dir = tempfile::tempdir().unwrap();
  let runner = runner(IdentityModel, float_config());

  for (channels, len) in [(1, 257), (2, 16000), (3, 12345), (1, 48001)] {
    let input = dir.path().join(format!("in_{channels}_{len}.wav"));
    let output = dir.path().join(format!("out_{channels}_{len}.wav"));
    let wave = speechish(channels, len, 0);
    write_audio(&input, &wave, SampleFormat::Float32).unwrap();

    runner.enhance(&input, &output).unwrap();

    let out = read_audio(&output).unwrap();
    assert_eq!(out.channels(), channels);
    assert_eq!(out.len(), len);
    assert_eq!(out.sample_rate(), 16000);
  }
}

#[test]
fn identity_reconstructs_the_input() {
  let wave = speechish(2, 20000, 1);
  let out = runner(IdentityModel, float_config())
    .enhance_waveform(&wave)
    .unwrap();

  assert_close(&out, &wave, 1e-4);
}

#[test]
fn swapping_channels_swaps_outputs() {
  let runner = runner(Gain(0.8), float_config());
  let wave = speechish(2, 16000, 2);

  let mut swapped = wave.samples().clone();
  swapped.invert_axis(Axis(0));
  let swapped = Waveform::new(swapped, 16000);

  let out = runner.enhance_waveform(&wave).unwrap();
  let out_swapped = runner.enhance_waveform(&swapped).unwrap();

  let mut expected = out.samples().clone();
  expected.invert_axis(Axis(0));
  assert_close(&out_swapped, &Waveform::new(expected, 16000), 1e-6);
}

#[test]
fn enhancement_is_deterministic() {
  let dir = tempfile::tempdir().unwrap();
  let input = dir.path().join("in.wav");
  write_fixture(dir.path(), "in.wav", &speechish(1, 24000, 3));

  let runner = runner(Gain(0.5), RunnerConfig::default());
  runner.enhance(&input, dir.path().join("a.wav")).unwrap();
  runner.enhance(&input, dir.path().join("b.wav")).unwrap();

  let a = fs::read(dir.path().join("a.wav")).unwrap();
  let b = fs::read(dir.path().join("b.wav")).unwrap();
  assert_eq!(a, b);
}

#[test]
fn sample_rate_gate_writes_nothing() {
  let dir = tempfile::tempdir().unwrap();
  let input = dir.path().join("48k.wav");
  let output = dir.path().join("out.wav");
  write_fixture(
    dir.path(),
    "48k.wav",
    &Waveform::new(Array2::zeros((1, 48000)), 48000),
  );

  let err = runner(IdentityModel, float_config())
    .enhance(&input, &output)
    .unwrap_err();

  assert!(matches!(
    err,
    EnhanceError::SampleRateMismatch {
      expected: 16000,
      found: 48000
    }
  ));
  assert!(!output.exists());
  assert!(!partial_path(&output).exists());
}

#[test]
fn batch_isolates_failures() {
  let input_dir = tempfile::tempdir().unwrap();
  let output_dir = tempfile::tempdir().unwrap();

  write_fixture(input_dir.path(), "a.wav", &speechish(1, 16000, 0));
  fs::write(input_dir.path().join("b.wav"), b"RIFF but not really").unwrap();
  write_fixture(input_dir.path(), "c.wav", &speechish(2, 16000, 1));
  write_fixture(
    input_dir.path(),
    "d.wav",
    &Waveform::new(Array2::zeros((1, 8000)), 8000),
  );
  fs::write(input_dir.path().join("notes.txt"), b"ignored").unwrap();

  let summary = runner(MonoOnly, float_config())
    .enhance_directory(input_dir.path(), output_dir.path())
    .unwrap();

  assert_eq!(summary.state, RunState::Completed);
  assert_eq!((summary.total, summary.succeeded, summary.failed), (4, 1, 3));
  assert!(!summary.is_success());

  let states: Vec<_> = summary.jobs.iter().map(|j| j.state).collect();
  assert_eq!(
    states,
    [
      JobState::Succeeded,
      JobState::Failed,
      JobState::Failed,
      JobState::Failed
    ]
  );

  let kinds: Vec<_> = summary
    .failures()
    .map(|j| j.failure.as_ref().unwrap().kind)
    .collect();
  assert_eq!(
    kinds,
    [ErrorKind::Decode, ErrorKind::Panic, ErrorKind::SampleRateMismatch]
  );

  assert!(output_dir.path().join("a.wav").is_file());
  for name in ["b.wav", "c.wav", "d.wav"] {
    assert!(!output_dir.path().join(name).exists(), "{name}");
  }
}

#[test]
fn resume_skips_finished_files() {
  let input_dir = tempfile::tempdir().unwrap();
  let output_dir = tempfile::tempdir().unwrap();

  for (i, name) in ["a.wav", "b.wav", "c.wav"].iter().enumerate() {
    write_fixture(input_dir.path(), name, &speechish(1, 8000, i));
  }
  fs::write(output_dir.path().join("b.wav"), b"already done").unwrap();

  let config = RunnerConfig {
    resume: true,
    ..float_config()
  };
  let summary = runner(IdentityModel, config)
    .enhance_directory(input_dir.path(), output_dir.path())
    .unwrap();

  assert!(summary.is_success());
  assert_eq!(summary.total, 3);
  assert_eq!(summary.succeeded, 2);
  assert_eq!(summary.skipped, vec![input_dir.path().join("b.wav")]);
  assert_eq!(
    fs::read(output_dir.path().join("b.wav")).unwrap(),
    b"already done"
  );
}

#[test]
fn batch_rejects_missing_input_dir() {
  let output_dir = tempfile::tempdir().unwrap();
  let res = runner(IdentityModel, float_config())
    .enhance_directory("/no/such/dir", output_dir.path());

  assert!(matches!(res, Err(EnhanceError::InvalidInput(_))));
}
