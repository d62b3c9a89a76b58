use std::{
  path::Path,
  sync::{Mutex, PoisonError},
};

use ndarray::{Array4, ArrayD, ArrayView4, Ix4, IxDyn};
use ort::{
  session::{builder::GraphOptimizationLevel, Session},
  value::Tensor,
};

use super::{CheckpointLoader, EnhancementModel};
use crate::config::DeviceConfig;
use crate::error::{EnhanceError, Result};

/// An enhancement network exported to ONNX.
///
/// `Session::run` needs exclusive access, so concurrent callers queue on the
/// session; everything around inference still runs in parallel.
pub struct OnnxModel {
  name: String,
  session: Mutex<Session>,
}

impl OnnxModel {
  pub fn from_file(path: impl AsRef<Path>, device: &DeviceConfig) -> Result<Self> {
    let path = path.as_ref();
    let session = build_session(path, device)?;

    let name = path
      .file_stem()
      .map(|s| s.to_string_lossy().into_owned())
      .unwrap_or_else(|| "onnx".to_owned());

    Ok(Self {
      name,
      session: Mutex::new(session),
    })
  }
}

pub(crate) fn build_session(path: &Path, device: &DeviceConfig) -> Result<Session> {
  if !path.is_file() {
    return Err(EnhanceError::ModelLoad(format!(
      "checkpoint `{}` not found",
      path.display()
    )));
  }

  tracing::debug!(path = ?path, device = %device.device, "Loading checkpoint");

  let load_err = |err: &dyn std::fmt::Display| {
    EnhanceError::ModelLoad(format!("{}: {err}", path.display()))
  };

  Session::builder()
    .map_err(|e| load_err(&e))?
    .with_execution_providers(device.execution_providers())
    .map_err(|e| load_err(&e))?
    .with_optimization_level(GraphOptimizationLevel::Level3)
    .map_err(|e| load_err(&e))?
    .with_intra_threads(device.intra_threads)
    .map_err(|e| load_err(&e))?
    .commit_from_file(path)
    .map_err(|e| load_err(&e))
}

/// Runs `session` on one `f32` tensor and returns its first output.
pub(crate) fn run_session(session: &Mutex<Session>, input: ArrayD<f32>) -> Result<ArrayD<f32>> {
  let tensor = Tensor::from_array(input).map_err(|err| EnhanceError::Inference(err.to_string()))?;

  let mut session = session.lock().unwrap_or_else(PoisonError::into_inner);
  let outputs = session
    .run(ort::inputs![tensor])
    .map_err(|err| EnhanceError::Inference(err.to_string()))?;

  let (_, value) = outputs
    .iter()
    .next()
    .ok_or_else(|| EnhanceError::Inference("model produced no output".to_owned()))?;

  let (shape, data) = value
    .try_extract_tensor::<f32>()
    .map_err(|err| EnhanceError::Inference(err.to_string()))?;

  let shape: Vec<usize> = shape.iter().map(|&d| d as usize).collect();

  ArrayD::from_shape_vec(IxDyn(&shape), data.to_vec())
    .map_err(|err| EnhanceError::Inference(err.to_string()))
}

impl EnhancementModel for OnnxModel {
  fn infer(&self, input: ArrayView4<f32>) -> Result<Array4<f32>> {
    let output = run_session(&self.session, input.to_owned().into_dyn())?;
    let found = output.shape().to_vec();

    output
      .into_dimensionality::<Ix4>()
      .map_err(|_| EnhanceError::shape(input.shape(), &found))
  }

  fn name(&self) -> &str {
    &self.name
  }
}

/// Loads `.onnx` checkpoints onto the device chosen for the run.
#[derive(Debug, Clone)]
pub struct OnnxLoader {
  device: DeviceConfig,
}

impl OnnxLoader {
  pub fn new(device: DeviceConfig) -> Self {
    Self { device }
  }
}

impl CheckpointLoader for OnnxLoader {
  type Weights = OnnxModel;

  fn load(&self, path: &Path) -> Result<OnnxModel> {
    OnnxModel::from_file(path, &self.device)
  }
}
