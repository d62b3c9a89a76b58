use std::{
  env, fmt,
  path::{Path, PathBuf},
};

use ort::execution_providers::{
  CPUExecutionProvider, CUDAExecutionProvider, DirectMLExecutionProvider,
  ExecutionProviderDispatch, TensorRTExecutionProvider,
};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// Environment variable naming the directory checkpoints are looked up in.
pub const MODELS_ENV: &str = "ENHANCER_MODELS";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
  #[default]
  Cpu,
  Cuda,
  TensorRT,
  DirectML,
}

impl fmt::Display for Device {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Device::Cpu => write!(f, "CPU"),
      Device::Cuda => write!(f, "CUDA"),
      Device::TensorRT => write!(f, "TensorRT"),
      Device::DirectML => write!(f, "DirectML"),
    }
  }
}

/// Where inference runs. Chosen once per run and handed to the model loader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
  pub device: Device,
  pub device_id: i32,
  /// Threads ort may use inside one inference call, 0 lets ort decide.
  pub intra_threads: usize,
}

impl Default for DeviceConfig {
  fn default() -> Self {
    Self {
      device: Device::Cpu,
      device_id: 0,
      intra_threads: 0,
    }
  }
}

impl DeviceConfig {
  pub fn cpu() -> Self {
    Self::default()
  }

  pub fn with_device(mut self, device: Device, device_id: i32) -> Self {
    self.device = device;
    self.device_id = device_id;
    self
  }

  pub fn with_intra_threads(mut self, intra_threads: usize) -> Self {
    self.intra_threads = intra_threads;
    self
  }

  /// The requested provider followed by CPU, which ort falls back to when
  /// the accelerator can not be registered.
  pub fn execution_providers(&self) -> SmallVec<[ExecutionProviderDispatch; 2]> {
    let mut providers = SmallVec::new();

    match self.device {
      Device::Cpu => {}
      Device::Cuda => providers.push(
        CUDAExecutionProvider::default()
          .with_device_id(self.device_id)
          .build(),
      ),
      Device::TensorRT => providers.push(
        TensorRTExecutionProvider::default()
          .with_device_id(self.device_id)
          .build(),
      ),
      Device::DirectML => providers.push(
        DirectMLExecutionProvider::default()
          .with_device_id(self.device_id)
          .build(),
      ),
    }

    providers.push(CPUExecutionProvider::default().build());
    providers
  }
}

/// `$ENHANCER_MODELS`, or `models/` next to the executable.
pub fn models_dir() -> Option<PathBuf> {
  if let Ok(dir) = env::var(MODELS_ENV) {
    return Some(PathBuf::from(dir));
  }

  env::current_exe()
    .ok()
    .and_then(|exe| exe.parent().map(|p| p.join("models")))
}

/// Resolves a checkpoint given either as a path or as a file name inside
/// [`models_dir`]. Existing paths win.
pub fn resolve_checkpoint(path: impl AsRef<Path>) -> PathBuf {
  let path = path.as_ref();

  if path.exists() || path.is_absolute() {
    return path.to_path_buf();
  }

  match models_dir() {
    Some(dir) if dir.join(path).exists() => dir.join(path),
    _ => path.to_path_buf(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn cpu_is_always_last() {
    assert_eq!(DeviceConfig::cpu().execution_providers().len(), 1);

    let cuda = DeviceConfig::cpu().with_device(Device::Cuda, 1);
    assert_eq!(cuda.execution_providers().len(), 2);
    assert_eq!(cuda.device.to_string(), "CUDA");
  }

  #[test]
  fn existing_paths_resolve_to_themselves() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("model.onnx");
    std::fs::write(&file, b"").unwrap();

    assert_eq!(resolve_checkpoint(&file), file);
  }
}
