mod cli;
mod setup;

use std::{
  fs::File,
  io::BufWriter,
  path::{Path, PathBuf},
  process::ExitCode,
};

use anyhow::{bail, Context, Result};
use clap::Parser;
use enhancer_core::{
  audio::SampleFormat,
  config::{self, MODELS_ENV},
  metrics::{score_directory, score_files, DnsMos, Scorer, SiSdr, SiSnr},
  model::MODEL_PRESETS,
  preprocess,
  runner::{process_directory, process_file, EnhancementRunner, RunnerConfig, WorkerPool},
  stft::TransformConfig,
};
use serde::Serialize;

use cli::{Cli, Command, ConvertArgs, EnhanceArgs, MetricArg, ResampleArgs, ScoreArgs, TrimArgs};
use setup::{setup_device, setup_tracing};

fn main() -> ExitCode {
  let args = Cli::parse();

  if let Command::Enhance(enhance) = &args.command {
    if enhance.preset.is_none() && enhance.checkpoint.is_none() {
      list_presets();
      return ExitCode::SUCCESS;
    }
  }

  setup_tracing(args.verbose);

  let res = match args.command {
    Command::Enhance(args) => enhance(args),
    Command::Score(args) => score(args),
    Command::Resample(args) => resample(args),
    Command::Trim(args) => trim(args),
    Command::Convert(args) => convert(args),
  };

  match res {
    Ok(true) => ExitCode::SUCCESS,
    Ok(false) => ExitCode::from(1),
    Err(err) => {
      tracing::error!("{err:#}");
      ExitCode::from(2)
    }
  }
}

fn list_presets() {
  println!("Please specify the model you wish to use");
  println!("All available models:");

  let mut found = false;
  for (id, p) in MODEL_PRESETS.iter().enumerate() {
    if p.exists() {
      println!("{id}. {p}");
      found = true;
    }
  }

  if !found {
    println!("(none, put the checkpoints in `models/` next to the executable or set {MODELS_ENV})");
  }
}

fn write_report(path: &Path, value: &impl Serialize) -> Result<()> {
  let file = File::create(path).with_context(|| format!("Failed to create `{}`", path.display()))?;
  serde_json::to_writer_pretty(BufWriter::new(file), value).context("Failed to write the report")?;

  tracing::info!(path = ?path, "Report saved");
  Ok(())
}

/// Per-file errors become a failed run, the others abort it.
fn file_outcome<T>(res: enhancer_core::Result<T>) -> Result<Option<T>> {
  match res {
    Ok(v) => Ok(Some(v)),
    Err(err) if err.is_fatal() => Err(err.into()),
    Err(err) => {
      tracing::error!(kind = %err.kind(), %err, "Failed");
      Ok(None)
    }
  }
}

fn output_for(input: &Path, output: Option<PathBuf>, default: PathBuf) -> Result<PathBuf> {
  let output = output.unwrap_or(default);

  if input.is_file() && output.is_dir() {
    let name = input.file_name().context("Input has no file name")?;
    return Ok(output.join(name));
  }

  Ok(output)
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
  let stem = path
    .file_stem()
    .map(|s| s.to_string_lossy().into_owned())
    .unwrap_or_default();

  match path.extension() {
    Some(ext) if path.is_file() => {
      path.with_file_name(format!("{stem}{suffix}.{}", ext.to_string_lossy()))
    }
    _ => path.with_file_name(format!("{stem}{suffix}")),
  }
}

fn enhance(args: EnhanceArgs) -> Result<bool> {
  let device = setup_device(&args.device);

  let config = RunnerConfig {
    sample_rate: args.sample_rate,
    format: args.format.into(),
    resume: args.resume,
    concurrency: args.jobs,
    device,
    ..Default::default()
  };

  let runner = match (args.preset, &args.checkpoint) {
    (Some(id), _) => {
      let preset = MODEL_PRESETS
        .get(id)
        .with_context(|| format!("Unknown preset {id}"))?;
      EnhancementRunner::from_preset(preset, config).context("Failed to build the model")?
    }
    (None, Some(checkpoint)) => {
      let transform = TransformConfig::new(args.fft_size, args.hop_size, args.window_spec())?;
      EnhancementRunner::from_checkpoint(checkpoint, transform, config)
        .context("Failed to build the model")?
    }
    (None, None) => bail!("Either --preset or --checkpoint is required"),
  };

  let Some(input) = args.input else {
    bail!("--input is required");
  };

  if input.is_dir() {
    let output = args.output.unwrap_or_else(|| with_suffix(&input, "_enhanced"));
    let summary = runner.enhance_directory(&input, &output)?;

    if let Some(report) = &args.report {
      write_report(report, &summary)?;
    }

    return Ok(summary.is_success());
  }

  if !input.is_file() {
    bail!("`{}` is neither a file nor a directory", input.display());
  }

  let output = output_for(&input, args.output, with_suffix(&input, "_enhanced"))?;
  let Some(report) = file_outcome(runner.enhance(&input, &output))? else {
    return Ok(false);
  };

  tracing::info!(output = ?report.output, elapsed = ?report.elapsed, "Enhanced");

  if let Some(path) = &args.report {
    write_report(path, &report)?;
  }

  Ok(true)
}

fn score(args: ScoreArgs) -> Result<bool> {
  let scorer: Box<dyn Scorer> = match args.metric {
    MetricArg::SiSdr => Box::new(SiSdr),
    MetricArg::SiSnr => Box::new(SiSnr),
    MetricArg::Dnsmos | MetricArg::P808 => {
      let device = setup_device(&args.device);
      let model = config::resolve_checkpoint(&args.dnsmos_model);
      let mut mos =
        DnsMos::from_file(model, &device, args.personalized).context("Failed to load DNSMOS")?;

      let p808_model = match (&args.p808_model, args.metric) {
        (Some(path), _) => Some(path.clone()),
        (None, MetricArg::P808) => Some(PathBuf::from("model_v8.onnx")),
        (None, _) => None,
      };
      if let Some(path) = p808_model {
        mos = mos
          .with_p808(config::resolve_checkpoint(&path), &device)
          .context("Failed to load the P.808 model")?;
      }

      if args.metric == MetricArg::P808 {
        mos = mos.reporting_p808()?;
      }
      Box::new(mos)
    }
  };

  if args.enhanced.is_dir() {
    let pool = WorkerPool::new(args.jobs)?;
    let summary = score_directory(
      scorer.as_ref(),
      args.clean.as_deref(),
      &args.enhanced,
      &["wav".to_owned()],
      &pool,
    )?;

    if let Some(path) = &args.report {
      write_report(path, &summary)?;
    }

    return Ok(summary.mean.is_some() && summary.failed() == 0);
  }

  // a single file, the reference may be given as its directory
  let clean = match args.clean {
    Some(clean) if clean.is_dir() => {
      let name = args.enhanced.file_name().context("Input has no file name")?;
      Some(clean.join(name))
    }
    clean => clean,
  };

  let metric = scorer.metric();
  let Some(score) = file_outcome(score_files(scorer.as_ref(), clean.as_deref(), &args.enhanced))?
  else {
    return Ok(false);
  };

  println!("{metric}: {score}");
  Ok(true)
}

fn resample(args: ResampleArgs) -> Result<bool> {
  let rate = args.rate;
  let format: SampleFormat = args.format.into();
  let suffix = if rate % 1000 == 0 {
    format!("_{}k", rate / 1000)
  } else {
    format!("_{rate}")
  };

  if args.input.is_dir() {
    let output = args.output.unwrap_or_else(|| with_suffix(&args.input, &suffix));
    let pool = WorkerPool::new(args.jobs)?;

    let summary = process_directory(
      &pool,
      &args.input,
      &output,
      &["wav".to_owned()],
      false,
      |job| process_file(&job.input, &job.output, format, |wave| preprocess::resample(&wave, rate)),
    )?;

    return Ok(summary.is_success());
  }

  let output = output_for(&args.input, args.output, with_suffix(&args.input, &suffix))?;
  let res = process_file(&args.input, &output, format, |wave| {
    preprocess::resample(&wave, rate)
  });

  Ok(file_outcome(res)?.is_some())
}

fn trim(args: TrimArgs) -> Result<bool> {
  if !args.input.is_dir() {
    bail!("`{}` is not a directory", args.input.display());
  }

  let top_db = args.threshold_db;
  if !top_db.is_finite() || top_db <= 0.0 {
    bail!("--threshold-db must be a positive number, got {top_db}");
  }

  let format: SampleFormat = args.format.into();
  let output = args
    .output
    .unwrap_or_else(|| with_suffix(&args.input, &format!("_trim_{top_db}db")));
  let pool = WorkerPool::new(args.jobs)?;

  let summary = process_directory(
    &pool,
    &args.input,
    &output,
    &["wav".to_owned()],
    false,
    |job| process_file(&job.input, &job.output, format, |wave| preprocess::trim_silence(&wave, top_db)),
  )?;

  Ok(summary.is_success())
}

fn convert(args: ConvertArgs) -> Result<bool> {
  let format: SampleFormat = args.format.into();

  if args.input.is_dir() {
    let output = args.output.unwrap_or_else(|| args.input.clone());
    let pool = WorkerPool::new(args.jobs)?;

    let summary = process_directory(
      &pool,
      &args.input,
      &output,
      &args.extensions,
      false,
      |job| process_file(&job.input, &job.output, format, Ok),
    )?;

    return Ok(summary.is_success());
  }

  // written next to the input by default
  let output = match args.output {
    Some(dir) if dir.is_dir() => {
      let name = args.input.file_name().context("Input has no file name")?;
      dir.join(name).with_extension("wav")
    }
    Some(path) => path,
    None => args.input.with_extension("wav"),
  };

  let res = process_file(&args.input, &output, format, Ok);
  Ok(file_outcome(res)?.is_some())
}
