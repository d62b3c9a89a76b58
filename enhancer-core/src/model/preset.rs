use std::{fmt, path::PathBuf};

use super::OnnxModel;
use crate::config::{self, DeviceConfig};
use crate::error::{EnhanceError, Result};
use crate::stft::{TransformConfig, WindowSpec};

/// A known checkpoint together with the analysis settings it was trained on.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelPreset {
  pub name: &'static str,
  filename: &'static str,
  fft_size: usize,
  hop_size: usize,
  window: WindowSpec,
  pub sample_rate: u32,
}

pub const MODEL_PRESETS: [ModelPreset; 2] = [
  ModelPreset::new(
    "GTCRN (DNS3)",
    "gtcrn_dns3.onnx",
    512,
    256,
    WindowSpec::sqrt_hann(),
    16000,
  ),
  ModelPreset::new(
    "GTCRN (VCTK-DEMAND)",
    "gtcrn_vctk.onnx",
    512,
    256,
    WindowSpec::sqrt_hann(),
    16000,
  ),
];

impl ModelPreset {
  pub const fn new(
    name: &'static str,
    filename: &'static str,
    fft_size: usize,
    hop_size: usize,
    window: WindowSpec,
    sample_rate: u32,
  ) -> Self {
    Self {
      name,
      filename,
      fft_size,
      hop_size,
      window,
      sample_rate,
    }
  }

  pub fn filename(&self) -> &'static str {
    self.filename
  }

  pub fn model_path(&self) -> Option<PathBuf> {
    config::models_dir().map(|dir| dir.join(self.filename))
  }

  pub fn exists(&self) -> bool {
    self.model_path().is_some_and(|p| p.exists())
  }

  pub fn transform(&self) -> Result<TransformConfig> {
    TransformConfig::new(self.fft_size, self.hop_size, self.window)
  }

  pub fn build(&self, device: &DeviceConfig) -> Result<OnnxModel> {
    tracing::info!(name = self.name, device = %device.device, "Building model...");

    let path = self.model_path().ok_or_else(|| {
      EnhanceError::ModelLoad(format!("can not locate the models directory for `{}`", self.name))
    })?;

    OnnxModel::from_file(path, device)
  }
}

impl fmt::Display for ModelPreset {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "{} ({} Hz, fft {}, hop {}, {}^{})",
      self.name, self.sample_rate, self.fft_size, self.hop_size, self.window.shape, self.window.power
    )
  }
}
