pub(crate) mod onnx;
mod preset;

use std::path::Path;

use ndarray::{Array3, Array4, ArrayView4, Axis};
use realfft::num_complex::Complex32;

use crate::error::{EnhanceError, Result};
use crate::stft::MultiSpectrogram;
pub use onnx::{OnnxLoader, OnnxModel};
pub use preset::{ModelPreset, MODEL_PRESETS};

/// A spectral-domain enhancement network.
///
/// Input and output tensors use the layout produced by [`to_model_input`]:
/// `f32`, `[channels, freq_bins, frames, 2]` where the trailing axis holds
/// `(re, im)`. This is `torch.stft(..., return_complex=False)` with the
/// channels stacked on the batch axis. The output must have the same shape.
///
/// Implementations are shared between worker threads and must not change
/// their observable state in `infer`.
pub trait EnhancementModel: Send + Sync {
  fn infer(&self, input: ArrayView4<f32>) -> Result<Array4<f32>>;

  fn name(&self) -> &str {
    "model"
  }
}

/// Maps a serialized checkpoint to something that can run inference.
pub trait CheckpointLoader {
  type Weights;

  fn load(&self, path: &Path) -> Result<Self::Weights>;
}

/// Returns the spectrogram unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityModel;

impl EnhancementModel for IdentityModel {
  fn infer(&self, input: ArrayView4<f32>) -> Result<Array4<f32>> {
    Ok(input.to_owned())
  }

  fn name(&self) -> &str {
    "identity"
  }
}

pub fn to_model_input(spec: &MultiSpectrogram) -> Array4<f32> {
  let (c, f, t) = spec.data().dim();

  Array4::from_shape_fn((c, f, t, 2), |(c, f, t, part)| {
    let v = spec.data()[[c, f, t]];
    if part == 0 {
      v.re
    } else {
      v.im
    }
  })
}

/// Inverse of [`to_model_input`], checking the model kept the input shape.
pub fn from_model_output(
  spec: &MultiSpectrogram,
  output: &Array4<f32>,
) -> Result<MultiSpectrogram> {
  let (c, f, t) = spec.data().dim();
  let expected = [c, f, t, 2];

  if output.shape() != expected {
    return Err(EnhanceError::shape(&expected, output.shape()));
  }

  let re = output.index_axis(Axis(3), 0);
  let im = output.index_axis(Axis(3), 1);

  let data = Array3::from_shape_fn((c, f, t), |(c, f, t)| {
    Complex32::new(re[[c, f, t]], im[[c, f, t]])
  });

  spec.with_data(data)
}

/// Marshals `spec` through `model` and back.
pub fn run_model(model: &dyn EnhancementModel, spec: &MultiSpectrogram) -> Result<MultiSpectrogram> {
  let input = to_model_input(spec);
  let output = model.infer(input.view())?;
  from_model_output(spec, &output)
}

#[cfg(test)]
mod tests {
  use super::*;

  struct Truncating;

  impl EnhancementModel for Truncating {
    fn infer(&self, input: ArrayView4<f32>) -> Result<Array4<f32>> {
      let (c, f, t, r) = input.dim();
      Ok(Array4::zeros((c, f, t - 1, r)))
    }
  }

  fn sample_spec() -> MultiSpectrogram {
    let data = Array3::from_shape_fn((2, 3, 4), |(c, f, t)| {
      Complex32::new((c * 100 + f * 10 + t) as f32, -((c + f + t) as f32))
    });
    MultiSpectrogram::new(data, 700)
  }

  #[test]
  fn layout_puts_re_im_last() {
    let spec = sample_spec();
    let input = to_model_input(&spec);

    assert_eq!(input.shape(), &[2, 3, 4, 2]);
    assert_eq!(input[[1, 2, 3, 0]], 123.0);
    assert_eq!(input[[1, 2, 3, 1]], -6.0);
    assert_eq!(input[[0, 1, 0, 0]], 10.0);
  }

  #[test]
  fn identity_preserves_spectrogram() {
    let spec = sample_spec();
    let out = run_model(&IdentityModel, &spec).unwrap();
    assert_eq!(out, spec);
  }

  #[test]
  fn shape_change_is_rejected() {
    let err = run_model(&Truncating, &sample_spec()).unwrap_err();
    match err {
      EnhanceError::ShapeMismatch { expected, found } => {
        assert_eq!(expected, vec![2, 3, 4, 2]);
        assert_eq!(found, vec![2, 3, 3, 2]);
      }
      other => panic!("unexpected error: {other}"),
    }
  }
}
