//! Log-mel features of the P.808 MOS network, computed like
//! `librosa.feature.melspectrogram` followed by `power_to_db(ref=max)`.

use std::sync::Arc;

use ndarray::Array2;
use realfft::{RealFftPlanner, RealToComplex};

use crate::error::{EnhanceError, Result};
use crate::stft::{WindowCache, WindowSpec};

pub const N_FFT: usize = 321;
pub const HOP: usize = 160;
pub const N_MELS: usize = 120;

const AMIN: f64 = 1e-10;
const TOP_DB: f64 = 80.0;

// Slaney scale, linear below 1 kHz and logarithmic above
const F_SP: f64 = 200.0 / 3.0;
const MIN_LOG_HZ: f64 = 1000.0;
const MIN_LOG_MEL: f64 = MIN_LOG_HZ / F_SP;

fn log_step() -> f64 {
  6.4f64.ln() / 27.0
}

pub(crate) fn hz_to_mel(hz: f64) -> f64 {
  if hz >= MIN_LOG_HZ {
    MIN_LOG_MEL + (hz / MIN_LOG_HZ).ln() / log_step()
  } else {
    hz / F_SP
  }
}

pub(crate) fn mel_to_hz(mel: f64) -> f64 {
  if mel >= MIN_LOG_MEL {
    MIN_LOG_HZ * (log_step() * (mel - MIN_LOG_MEL)).exp()
  } else {
    mel * F_SP
  }
}

/// Band edges in Hz, `n_mels + 2` points evenly spaced on the mel scale.
fn mel_points(sample_rate: u32, n_mels: usize) -> Vec<f64> {
  let top = hz_to_mel(sample_rate as f64 / 2.0);
  (0..n_mels + 2)
    .map(|i| mel_to_hz(top * i as f64 / (n_mels + 1) as f64))
    .collect()
}

// triangular filters with area normalisation, `[n_mels, n_fft / 2 + 1]`
fn filter_bank(sample_rate: u32, n_fft: usize, n_mels: usize) -> Array2<f64> {
  let edges = mel_points(sample_rate, n_mels);
  let freq_num = n_fft / 2 + 1;
  let bin_hz = sample_rate as f64 / n_fft as f64;

  Array2::from_shape_fn((n_mels, freq_num), |(m, k)| {
    let f = k as f64 * bin_hz;
    let lower = (f - edges[m]) / (edges[m + 1] - edges[m]);
    let upper = (edges[m + 2] - f) / (edges[m + 2] - edges[m + 1]);
    let norm = 2.0 / (edges[m + 2] - edges[m]);

    lower.min(upper).max(0.0) * norm
  })
}

pub(crate) struct MelSpectrogram {
  window: Arc<[f32]>,
  fft: Arc<dyn RealToComplex<f32>>,
  filters: Array2<f64>,
}

impl MelSpectrogram {
  pub fn new(sample_rate: u32) -> Self {
    let mut planner = RealFftPlanner::<f32>::new();

    Self {
      window: WindowCache::global().get(N_FFT, WindowSpec::hann()),
      fft: planner.plan_fft_forward(N_FFT),
      filters: filter_bank(sample_rate, N_FFT, N_MELS),
    }
  }

  /// `[frames, N_MELS]` features in `[-1, 1]`: power in dB below the loudest
  /// bin, floored 80 dB down, mapped by `(db + 40) / 40`.
  ///
  /// Frames are centred and zero padded.
  pub fn normalized_db(&self, audio: &[f32]) -> Result<Array2<f32>> {
    let half = N_FFT / 2;
    let padded_len = audio.len() + 2 * half;

    if padded_len < N_FFT {
      return Err(EnhanceError::InvalidInput(
        "can not compute mel features of an empty clip".to_owned(),
      ));
    }

    let frame_num = 1 + (padded_len - N_FFT) / HOP;
    let mut power = Array2::<f64>::zeros((N_FFT / 2 + 1, frame_num));

    let mut frame = self.fft.make_input_vec();
    let mut spectrum = self.fft.make_output_vec();
    let mut scratch = self.fft.make_scratch_vec();

    for frame_id in 0..frame_num {
      let start = (frame_id * HOP) as isize - half as isize;

      for (i, (slot, w)) in frame.iter_mut().zip(self.window.iter()).enumerate() {
        let pos = start + i as isize;
        *slot = match usize::try_from(pos) {
          Ok(pos) if pos < audio.len() => audio[pos] * w,
          _ => 0.0,
        };
      }

      self
        .fft
        .process_with_scratch(&mut frame, &mut spectrum, &mut scratch)
        .map_err(|err| EnhanceError::Scoring(format!("mel fft failed: {err}")))?;

      for (dst, c) in power.column_mut(frame_id).iter_mut().zip(&spectrum) {
        *dst = c.norm_sqr() as f64;
      }
    }

    let mel = self.filters.dot(&power);

    let reference = 10.0 * mel.iter().copied().fold(AMIN, f64::max).log10();
    let db = mel.mapv(|v| 10.0 * v.max(AMIN).log10() - reference);
    let floor = db.iter().copied().fold(f64::NEG_INFINITY, f64::max) - TOP_DB;

    Ok(Array2::from_shape_fn((frame_num, N_MELS), |(t, m)| {
      ((db[[m, t]].max(floor) + 40.0) / 40.0) as f32
    }))
  }
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;

  use super::*;

  #[test]
  fn slaney_scale() {
    assert_abs_diff_eq!(hz_to_mel(1000.0), 15.0, epsilon = 1e-12);
    assert_abs_diff_eq!(hz_to_mel(500.0), 7.5, epsilon = 1e-12);

    for hz in [0.0, 440.0, 1000.0, 3000.0, 8000.0] {
      assert_abs_diff_eq!(mel_to_hz(hz_to_mel(hz)), hz, epsilon = 1e-6);
    }
  }

  #[test]
  fn filters_cover_the_band() {
    let filters = filter_bank(16000, N_FFT, N_MELS);
    assert_eq!(filters.dim(), (N_MELS, N_FFT / 2 + 1));
    assert!(filters.iter().all(|&w| w >= 0.0));

    let edges = mel_points(16000, N_MELS);
    assert_eq!(edges.len(), N_MELS + 2);
    assert_abs_diff_eq!(edges[0], 0.0);
    assert_abs_diff_eq!(edges[N_MELS + 1], 8000.0, epsilon = 1e-6);
  }

  #[test]
  fn nine_seconds_give_nine_hundred_frames() {
    let mel = MelSpectrogram::new(16000);
    let audio: Vec<f32> = (0..144000).map(|i| ((i % 97) as f32 / 97.0) - 0.5).collect();

    let features = mel.normalized_db(&audio).unwrap();
    assert_eq!(features.dim(), (900, N_MELS));
    assert!(features.iter().all(|&v| (-1.0..=1.0).contains(&v)));
    assert_abs_diff_eq!(features.iter().copied().fold(f32::MIN, f32::max), 1.0, epsilon = 1e-6);
  }

  #[test]
  fn tone_lands_in_its_band() {
    let mel = MelSpectrogram::new(16000);
    let audio: Vec<f32> = (0..16000)
      .map(|i| (2.0 * std::f32::consts::PI * 1000.0 * i as f32 / 16000.0).sin())
      .collect();

    let features = mel.normalized_db(&audio).unwrap();
    let row = features.row(50);
    let band = row
      .iter()
      .enumerate()
      .max_by(|a, b| a.1.total_cmp(b.1))
      .map(|(i, _)| i)
      .unwrap();

    let centre = mel_points(16000, N_MELS)[band + 1];
    assert!((centre - 1000.0).abs() < 60.0, "band {band} centred at {centre} Hz");
  }

  #[test]
  fn empty_clip_is_rejected() {
    let mel = MelSpectrogram::new(16000);
    assert!(matches!(mel.normalized_db(&[]), Err(EnhanceError::InvalidInput(_))));
  }
}
