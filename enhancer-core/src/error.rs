use std::{fmt, io, path::PathBuf};

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EnhanceError {
  #[error("invalid config: {0}")]
  InvalidConfig(String),

  #[error("invalid input: {0}")]
  InvalidInput(String),

  #[error("sample rate mismatch: expected {expected} Hz, found {found} Hz")]
  SampleRateMismatch { expected: u32, found: u32 },

  #[error("shape mismatch: expected {expected:?}, found {found:?}")]
  ShapeMismatch {
    expected: Vec<usize>,
    found: Vec<usize>,
  },

  #[error("io error on `{}`: {source}", path.display())]
  Io {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to decode `{}`: {reason}", path.display())]
  Decode { path: PathBuf, reason: String },

  #[error("failed to encode `{}`: {reason}", path.display())]
  Encode { path: PathBuf, reason: String },

  #[error("failed to load model: {0}")]
  ModelLoad(String),

  #[error("inference failed: {0}")]
  Inference(String),

  #[error("scoring failed: {0}")]
  Scoring(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
  InvalidConfig,
  InvalidInput,
  SampleRateMismatch,
  ShapeMismatch,
  Io,
  Decode,
  Encode,
  ModelLoad,
  Inference,
  Scoring,
  Panic,
}

impl fmt::Display for ErrorKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      ErrorKind::InvalidConfig => "invalid_config",
      ErrorKind::InvalidInput => "invalid_input",
      ErrorKind::SampleRateMismatch => "sample_rate_mismatch",
      ErrorKind::ShapeMismatch => "shape_mismatch",
      ErrorKind::Io => "io",
      ErrorKind::Decode => "decode",
      ErrorKind::Encode => "encode",
      ErrorKind::ModelLoad => "model_load",
      ErrorKind::Inference => "inference",
      ErrorKind::Scoring => "scoring",
      ErrorKind::Panic => "panic",
    };
    f.write_str(s)
  }
}

impl EnhanceError {
  pub fn kind(&self) -> ErrorKind {
    match self {
      EnhanceError::InvalidConfig(_) => ErrorKind::InvalidConfig,
      EnhanceError::InvalidInput(_) => ErrorKind::InvalidInput,
      EnhanceError::SampleRateMismatch { .. } => ErrorKind::SampleRateMismatch,
      EnhanceError::ShapeMismatch { .. } => ErrorKind::ShapeMismatch,
      EnhanceError::Io { .. } => ErrorKind::Io,
      EnhanceError::Decode { .. } => ErrorKind::Decode,
      EnhanceError::Encode { .. } => ErrorKind::Encode,
      EnhanceError::ModelLoad(_) => ErrorKind::ModelLoad,
      EnhanceError::Inference(_) => ErrorKind::Inference,
      EnhanceError::Scoring(_) => ErrorKind::Scoring,
    }
  }

  /// Errors that make the whole run pointless, as opposed to a single bad file.
  pub fn is_fatal(&self) -> bool {
    matches!(
      self,
      EnhanceError::InvalidConfig(_) | EnhanceError::ModelLoad(_)
    )
  }

  pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
    EnhanceError::Io {
      path: path.into(),
      source,
    }
  }

  pub(crate) fn shape(expected: &[usize], found: &[usize]) -> Self {
    EnhanceError::ShapeMismatch {
      expected: expected.to_vec(),
      found: found.to_vec(),
    }
  }
}

pub type Result<T> = ::std::result::Result<T, EnhanceError>;
