use super::{Metric, Scorer};
use crate::error::{EnhanceError, Result};

/// Scale-invariant signal-to-distortion ratio in dB, computed in `f64` the way
/// `torchmetrics` does (`eps` added to both numerator and denominator).
///
/// With `zero_mean` both signals are centred first, which makes it SI-SNR.
pub fn scale_invariant_ratio(reference: &[f32], estimate: &[f32], zero_mean: bool) -> Result<f64> {
  if reference.len() != estimate.len() {
    return Err(EnhanceError::shape(&[reference.len()], &[estimate.len()]));
  }

  if reference.is_empty() {
    return Err(EnhanceError::InvalidInput("can not score empty signals".to_owned()));
  }

  let mean = |x: &[f32]| {
    if zero_mean {
      x.iter().map(|&v| v as f64).sum::<f64>() / x.len() as f64
    } else {
      0.0
    }
  };
  let (ref_mean, est_mean) = (mean(reference), mean(estimate));

  let target = || reference.iter().map(|&v| v as f64 - ref_mean);
  let preds = || estimate.iter().map(|&v| v as f64 - est_mean);

  let eps = f64::EPSILON;
  let dot: f64 = target().zip(preds()).map(|(t, p)| t * p).sum();
  let energy: f64 = target().map(|t| t * t).sum();
  let alpha = (dot + eps) / (energy + eps);

  let (signal, noise) = target()
    .zip(preds())
    .fold((0.0f64, 0.0f64), |(signal, noise), (t, p)| {
      let scaled = alpha * t;
      (signal + scaled * scaled, noise + (scaled - p) * (scaled - p))
    });

  Ok(10.0 * ((signal + eps) / (noise + eps)).log10())
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SiSdr;

impl Scorer for SiSdr {
  fn metric(&self) -> Metric {
    Metric::SiSdr
  }

  fn score(&self, reference: &[f32], test: &[f32], _sample_rate: u32) -> Result<f64> {
    scale_invariant_ratio(reference, test, false)
  }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SiSnr;

impl Scorer for SiSnr {
  fn metric(&self) -> Metric {
    Metric::SiSnr
  }

  fn score(&self, reference: &[f32], test: &[f32], _sample_rate: u32) -> Result<f64> {
    scale_invariant_ratio(reference, test, true)
  }
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;

  use super::*;

  fn signal(len: usize) -> Vec<f32> {
    (0..len)
      .map(|i| (i as f32 * 0.05).sin() + 0.3 * (i as f32 * 0.31).cos())
      .collect()
  }

  fn noise(len: usize) -> Vec<f32> {
    (0..len)
      .map(|i| ((i * 7919 % 101) as f32 / 101.0 - 0.5) * 0.2)
      .collect()
  }

  #[test]
  fn orthogonal_error_of_equal_energy_is_zero_db() {
    let score = SiSdr.score(&[1.0, 0.0], &[1.0, 1.0], 16000).unwrap();
    assert_abs_diff_eq!(score, 0.0, epsilon = 1e-9);
  }

  #[test]
  fn invariant_to_scaling() {
    let clean = signal(4000);
    let noisy: Vec<f32> = clean.iter().zip(noise(4000)).map(|(c, n)| c + n).collect();
    let louder: Vec<f32> = noisy.iter().map(|v| v * 3.0).collect();

    let a = SiSdr.score(&clean, &noisy, 16000).unwrap();
    let b = SiSdr.score(&clean, &louder, 16000).unwrap();
    assert_abs_diff_eq!(a, b, epsilon = 1e-6);
    assert!(a > 5.0 && a < 40.0);
  }

  #[test]
  fn si_snr_ignores_dc_offset() {
    let clean = signal(2000);
    let shifted: Vec<f32> = clean.iter().map(|v| v + 0.5).collect();

    assert!(SiSnr.score(&clean, &shifted, 16000).unwrap() > 80.0);
    assert!(SiSdr.score(&clean, &shifted, 16000).unwrap() < 20.0);
  }

  #[test]
  fn more_noise_scores_lower() {
    let clean = signal(4000);
    let n = noise(4000);
    let light: Vec<f32> = clean.iter().zip(&n).map(|(c, n)| c + n).collect();
    let heavy: Vec<f32> = clean.iter().zip(&n).map(|(c, n)| c + 4.0 * n).collect();

    assert!(SiSdr.score(&clean, &light, 16000).unwrap() > SiSdr.score(&clean, &heavy, 16000).unwrap());
  }

  #[test]
  fn length_mismatch() {
    assert!(matches!(
      SiSdr.score(&[0.0; 4], &[0.0; 3], 16000),
      Err(EnhanceError::ShapeMismatch { .. })
    ));
    assert!(matches!(
      SiSnr.score(&[], &[], 16000),
      Err(EnhanceError::InvalidInput(_))
    ));
  }
}
