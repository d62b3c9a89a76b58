use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use enhancer_core::{
  audio::SampleFormat,
  config::Device,
  stft::{WindowShape, WindowSpec},
};

#[derive(Parser)]
#[command(version, author)]
#[command(about = "Multi-channel speech enhancement with GTCRN-style models", long_about = None)]
pub struct Cli {
  #[arg(short, long, global = true, help = "Print debug logs")]
  pub verbose: bool,

  #[command(subcommand)]
  pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
  /// Enhance a file or every file of a directory
  Enhance(EnhanceArgs),
  /// Score enhanced files against clean references
  Score(ScoreArgs),
  /// Resample audio to a fixed rate
  Resample(ResampleArgs),
  /// Cut leading and trailing silence
  Trim(TrimArgs),
  /// Decode compressed audio (m4a by default) to WAV
  Convert(ConvertArgs),
}

#[derive(Args)]
pub struct EnhanceArgs {
  #[arg(
    short,
    long,
    help = "The preset model used, leave blank (without --checkpoint) to see all available models"
  )]
  #[arg(value_name = "PRESET", conflicts_with = "checkpoint")]
  pub preset: Option<usize>,

  #[arg(short, long, help = "ONNX checkpoint, a path or a file name in the models directory")]
  #[arg(value_name = "CHECKPOINT")]
  pub checkpoint: Option<PathBuf>,

  #[arg(short, long, help = "Input audio file or directory")]
  #[arg(value_name = "INPUT")]
  pub input: Option<PathBuf>,

  #[arg(short, long, help = "Output audio file or directory")]
  #[arg(value_name = "OUTPUT")]
  pub output: Option<PathBuf>,

  #[command(flatten)]
  pub device: DeviceArgs,

  #[arg(short, long, help = "Files processed in parallel, 0 for one per CPU")]
  #[arg(value_name = "JOBS", default_value_t = 0)]
  pub jobs: usize,

  #[arg(long, help = "Expected input sample rate (presets use their own)")]
  #[arg(value_name = "HZ", default_value_t = 16000)]
  pub sample_rate: u32,

  #[arg(long, help = "FFT size of the analysis transform")]
  #[arg(value_name = "N", default_value_t = 512)]
  pub fft_size: usize,

  #[arg(long, help = "Hop size of the analysis transform")]
  #[arg(value_name = "N", default_value_t = 256)]
  pub hop_size: usize,

  #[arg(long, help = "Analysis window shape")]
  #[arg(value_enum, default_value_t = WindowArg::Hann)]
  pub window: WindowArg,

  #[arg(long, help = "Exponent applied to the window, 0.5 for square-root windows")]
  #[arg(value_name = "P", default_value_t = 0.5)]
  pub window_power: f32,

  #[arg(short, long, help = "Sample format of the written WAV files")]
  #[arg(value_enum, default_value_t = FormatArg::Int16)]
  pub format: FormatArg,

  #[arg(long, help = "Skip inputs whose output already exists")]
  pub resume: bool,

  #[arg(long, help = "Write the batch summary as JSON")]
  #[arg(value_name = "FILE")]
  pub report: Option<PathBuf>,
}

impl EnhanceArgs {
  pub fn window_spec(&self) -> WindowSpec {
    WindowSpec::new(self.window.into(), self.window_power)
  }
}

#[derive(Args)]
pub struct DeviceArgs {
  #[arg(short, long, help = "Device used for inference")]
  #[arg(value_enum, default_value_t = DeviceArg::Cpu)]
  pub device: DeviceArg,

  #[arg(long, help = "Index of the accelerator to use")]
  #[arg(value_name = "ID", default_value_t = 0)]
  pub device_id: i32,

  #[arg(long, help = "Threads used inside one inference call, 0 lets ONNX Runtime decide")]
  #[arg(value_name = "N", default_value_t = 0)]
  pub intra_threads: usize,
}

#[derive(Args)]
pub struct ScoreArgs {
  #[arg(short, long, help = "Clean reference file or directory")]
  #[arg(value_name = "CLEAN")]
  pub clean: Option<PathBuf>,

  #[arg(short, long, help = "Enhanced file or directory")]
  #[arg(value_name = "ENHANCED")]
  pub enhanced: PathBuf,

  #[arg(short, long, help = "Quality metric")]
  #[arg(value_enum, default_value_t = MetricArg::SiSdr)]
  pub metric: MetricArg,

  #[arg(long, help = "DNSMOS `sig_bak_ovr.onnx` model")]
  #[arg(value_name = "MODEL", default_value = "sig_bak_ovr.onnx")]
  pub dnsmos_model: PathBuf,

  #[arg(long, help = "P.808 `model_v8.onnx` model, required by the p808 metric")]
  #[arg(value_name = "MODEL")]
  pub p808_model: Option<PathBuf>,

  #[arg(short, long, help = "Use the personalized DNSMOS calibration")]
  pub personalized: bool,

  #[command(flatten)]
  pub device: DeviceArgs,

  #[arg(short, long, help = "Files scored in parallel, 0 for one per CPU")]
  #[arg(value_name = "JOBS", default_value_t = 0)]
  pub jobs: usize,

  #[arg(long, help = "Write the per-file scores as JSON")]
  #[arg(value_name = "FILE")]
  pub report: Option<PathBuf>,
}

#[derive(Args)]
pub struct ResampleArgs {
  #[arg(short, long, help = "Input audio file or directory")]
  #[arg(value_name = "INPUT")]
  pub input: PathBuf,

  #[arg(short, long, help = "Output file or directory, defaults to `<INPUT>_16k`")]
  #[arg(value_name = "OUTPUT")]
  pub output: Option<PathBuf>,

  #[arg(short, long, help = "Target sample rate")]
  #[arg(value_name = "HZ", default_value_t = 16000)]
  pub rate: u32,

  #[arg(short, long, help = "Sample format of the written WAV files")]
  #[arg(value_enum, default_value_t = FormatArg::Int16)]
  pub format: FormatArg,

  #[arg(short, long, help = "Files processed in parallel, 0 for one per CPU")]
  #[arg(value_name = "JOBS", default_value_t = 0)]
  pub jobs: usize,
}

#[derive(Args)]
pub struct TrimArgs {
  #[arg(short, long, help = "Input directory")]
  #[arg(value_name = "INPUT")]
  pub input: PathBuf,

  #[arg(short, long, help = "Output directory, defaults to `<INPUT>_trim_<DB>db`")]
  #[arg(value_name = "OUTPUT")]
  pub output: Option<PathBuf>,

  #[arg(short, long, help = "Frames this many dB below the loudest one count as silence")]
  #[arg(value_name = "DB", default_value_t = 30.0)]
  pub threshold_db: f32,

  #[arg(short, long, help = "Sample format of the written WAV files")]
  #[arg(value_enum, default_value_t = FormatArg::Int16)]
  pub format: FormatArg,

  #[arg(short, long, help = "Files processed in parallel, 0 for one per CPU")]
  #[arg(value_name = "JOBS", default_value_t = 0)]
  pub jobs: usize,
}

#[derive(Args)]
pub struct ConvertArgs {
  #[arg(short, long, help = "Input audio file or directory")]
  #[arg(value_name = "INPUT")]
  pub input: PathBuf,

  #[arg(short, long, help = "Output file or directory, defaults to the input with a `.wav` extension")]
  #[arg(value_name = "OUTPUT")]
  pub output: Option<PathBuf>,

  #[arg(short, long, help = "Extensions converted when the input is a directory")]
  #[arg(value_name = "EXT", value_delimiter = ',', default_value = "m4a")]
  pub extensions: Vec<String>,

  #[arg(short, long, help = "Sample format of the written WAV files")]
  #[arg(value_enum, default_value_t = FormatArg::Int16)]
  pub format: FormatArg,

  #[arg(short, long, help = "Files processed in parallel, 0 for one per CPU")]
  #[arg(value_name = "JOBS", default_value_t = 0)]
  pub jobs: usize,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum DeviceArg {
  Cpu,
  Cuda,
  #[value(name = "tensorrt")]
  TensorRT,
  #[value(name = "directml")]
  DirectML,
}

impl From<DeviceArg> for Device {
  fn from(value: DeviceArg) -> Self {
    match value {
      DeviceArg::Cpu => Device::Cpu,
      DeviceArg::Cuda => Device::Cuda,
      DeviceArg::TensorRT => Device::TensorRT,
      DeviceArg::DirectML => Device::DirectML,
    }
  }
}

#[derive(Clone, Copy, ValueEnum)]
pub enum WindowArg {
  Hann,
  Hamming,
  Rect,
}

impl From<WindowArg> for WindowShape {
  fn from(value: WindowArg) -> Self {
    match value {
      WindowArg::Hann => WindowShape::Hann,
      WindowArg::Hamming => WindowShape::Hamming,
      WindowArg::Rect => WindowShape::Rectangular,
    }
  }
}

#[derive(Clone, Copy, ValueEnum)]
pub enum FormatArg {
  Int16,
  Float32,
}

impl From<FormatArg> for SampleFormat {
  fn from(value: FormatArg) -> Self {
    match value {
      FormatArg::Int16 => SampleFormat::Int16,
      FormatArg::Float32 => SampleFormat::Float32,
    }
  }
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum MetricArg {
  SiSdr,
  SiSnr,
  Dnsmos,
  P808,
}
