mod multichannel;
mod window;

use std::{fmt, sync::Arc};

use ndarray::{aview1, Array2};
use realfft::{num_complex::Complex32, ComplexToReal, RealFftPlanner, RealToComplex};
use serde::{Deserialize, Serialize};

use crate::error::{EnhanceError, Result};
pub use multichannel::{LengthPolicy, MultiChannelTransform, MultiSpectrogram, Waveform};
pub use window::{WindowCache, WindowShape, WindowSpec};

// below this the overlap-add envelope is treated as a hole in the window coverage
const NOLA_EPSILON: f32 = 1e-10;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TransformConfig {
  fft_size: usize,
  hop_size: usize,
  window: WindowSpec,
}

impl TransformConfig {
  pub fn new(fft_size: usize, hop_size: usize, window: WindowSpec) -> Result<Self> {
    if fft_size < 2 || fft_size % 2 != 0 {
      return Err(EnhanceError::InvalidConfig(format!(
        "fft size must be an even number >= 2, got {fft_size}"
      )));
    }

    if hop_size == 0 || hop_size >= fft_size {
      return Err(EnhanceError::InvalidConfig(format!(
        "hop size must be in 1..{fft_size}, got {hop_size}"
      )));
    }

    // centred frames only reach `fft_size / 2` past the last frame centre
    if hop_size > fft_size / 2 {
      return Err(EnhanceError::InvalidConfig(format!(
        "hop size {hop_size} exceeds half the fft size {fft_size}, the signal tail would be lost"
      )));
    }

    if !window.power.is_finite() || window.power <= 0.0 {
      return Err(EnhanceError::InvalidConfig(format!(
        "window power must be a positive number, got {}",
        window.power
      )));
    }

    Ok(Self {
      fft_size,
      hop_size,
      window,
    })
  }

  /// 512-point FFT, 256 hop, square-root Hann: the GTCRN front end.
  pub fn gtcrn() -> Self {
    Self {
      fft_size: 512,
      hop_size: 256,
      window: WindowSpec::sqrt_hann(),
    }
  }

  pub fn fft_size(&self) -> usize {
    self.fft_size
  }

  pub fn hop_size(&self) -> usize {
    self.hop_size
  }

  pub fn window(&self) -> WindowSpec {
    self.window
  }

  pub fn freq_bins(&self) -> usize {
    self.fft_size / 2 + 1
  }

  /// Number of frames the centred framing produces for `signal_len` samples.
  pub fn frame_count(&self, signal_len: usize) -> usize {
    signal_len / self.hop_size + 1
  }
}

impl fmt::Display for TransformConfig {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "n_fft={} hop={} window={}^{}",
      self.fft_size, self.hop_size, self.window.shape, self.window.power
    )
  }
}

/// Complex spectrogram of one channel, `[freq_bins, frames]`.
///
/// Carries the length of the signal it was computed from so the inverse can
/// reproduce exactly that many samples.
#[derive(Debug, Clone, PartialEq)]
pub struct Spectrogram {
  data: Array2<Complex32>,
  signal_len: usize,
}

impl Spectrogram {
  pub fn new(data: Array2<Complex32>, signal_len: usize) -> Self {
    Self { data, signal_len }
  }

  pub fn data(&self) -> &Array2<Complex32> {
    &self.data
  }

  pub fn signal_len(&self) -> usize {
    self.signal_len
  }

  pub fn freq_bins(&self) -> usize {
    self.data.nrows()
  }

  pub fn frames(&self) -> usize {
    self.data.ncols()
  }
}

/// Single-channel STFT/ISTFT.
///
/// Framing is centred: frame `k` covers `[k * hop - n_fft / 2, k * hop + n_fft / 2)`
/// and the signal is reflect-padded at both ends (`torch.stft(center=True,
/// pad_mode="reflect")`). The inverse normalizes by the squared window
/// envelope and truncates to the original signal length.
pub struct SpectralTransform {
  config: TransformConfig,
  window: Arc<[f32]>,
  fft: Arc<dyn RealToComplex<f32>>,
  ifft: Arc<dyn ComplexToReal<f32>>,
}

impl SpectralTransform {
  pub fn new(config: TransformConfig) -> Result<Self> {
    let window = WindowCache::global().get(config.fft_size, config.window);
    Self::with_window(config, window)
  }

  /// Uses `window` instead of a cached one. Its length must equal the FFT size.
  pub fn with_window(config: TransformConfig, window: Arc<[f32]>) -> Result<Self> {
    if window.len() != config.fft_size {
      return Err(EnhanceError::InvalidConfig(format!(
        "window length {} does not match fft size {}",
        window.len(),
        config.fft_size
      )));
    }

    check_nola(&window, config.hop_size)?;

    let mut planner = RealFftPlanner::<f32>::new();
    let fft = planner.plan_fft_forward(config.fft_size);
    let ifft = planner.plan_fft_inverse(config.fft_size);

    Ok(Self {
      config,
      window,
      fft,
      ifft,
    })
  }

  pub fn config(&self) -> &TransformConfig {
    &self.config
  }

  pub fn window(&self) -> &[f32] {
    &self.window
  }

  pub fn forward(&self, input: &[f32]) -> Result<Spectrogram> {
    let length = input.len();
    let n_fft = self.config.fft_size;
    let left_num = n_fft / 2;

    if length <= left_num {
      return Err(EnhanceError::InvalidInput(format!(
        "signal of {length} samples is too short, need more than {left_num}"
      )));
    }

    let freq_num = self.config.freq_bins();
    let frame_num = self.config.frame_count(length);

    // reflect without repeating the edge sample
    let at = |pos: isize| -> f32 {
      let pos = pos.unsigned_abs();
      if pos >= length {
        input[length * 2 - pos - 2]
      } else {
        input[pos]
      }
    };

    let mut res = Array2::<Complex32>::zeros((freq_num, frame_num));
    let mut frame = self.fft.make_input_vec();
    let mut spectrum = self.fft.make_output_vec();
    let mut scratch = self.fft.make_scratch_vec();

    for frame_id in 0..frame_num {
      let start = (frame_id * self.config.hop_size) as isize - left_num as isize;

      for (i, (slot, w)) in frame.iter_mut().zip(self.window.iter()).enumerate() {
        *slot = at(start + i as isize) * w;
      }

      self
        .fft
        .process_with_scratch(&mut frame, &mut spectrum, &mut scratch)
        .map_err(|err| EnhanceError::Inference(format!("forward fft failed: {err}")))?;

      res.column_mut(frame_id).assign(&aview1(&spectrum));
    }

    Ok(Spectrogram::new(res, length))
  }

  pub fn inverse(&self, spec: &Spectrogram) -> Result<Vec<f32>> {
    let n_fft = self.config.fft_size;
    let hop = self.config.hop_size;
    let freq_num = self.config.freq_bins();
    let frame_num = self.config.frame_count(spec.signal_len);

    if spec.freq_bins() != freq_num || spec.frames() != frame_num {
      return Err(EnhanceError::shape(
        &[freq_num, frame_num],
        &[spec.freq_bins(), spec.frames()],
      ));
    }

    let padded_len = (frame_num - 1) * hop + n_fft;
    let mut res = vec![0.0f32; padded_len];
    let mut divider = vec![0.0f32; padded_len];

    let mut cur = self.ifft.make_input_vec();
    let mut frame = self.ifft.make_output_vec();
    let mut scratch = self.ifft.make_scratch_vec();
    let scale = 1.0 / n_fft as f32;

    for (frame_id, column) in spec.data.columns().into_iter().enumerate() {
      cur.iter_mut().zip(column.iter()).for_each(|(c, v)| *c = *v);

      // a real signal has no imaginary part at DC and Nyquist
      cur[0].im = 0.0;
      cur[freq_num - 1].im = 0.0;

      self
        .ifft
        .process_with_scratch(&mut cur, &mut frame, &mut scratch)
        .map_err(|err| EnhanceError::Inference(format!("inverse fft failed: {err}")))?;

      let offset = frame_id * hop;
      for (i, (sample, w)) in frame.iter().zip(self.window.iter()).enumerate() {
        res[offset + i] += sample * scale * w;
        divider[offset + i] += w * w;
      }
    }

    let left_num = n_fft / 2;
    let out = res[left_num..left_num + spec.signal_len]
      .iter()
      .zip(&divider[left_num..left_num + spec.signal_len])
      .map(|(&v, &d)| if d > NOLA_EPSILON { v / d } else { 0.0 })
      .collect();

    Ok(out)
  }
}

// every sample must be covered by some frame with a nonzero window value
fn check_nola(window: &[f32], hop: usize) -> Result<()> {
  for phase in 0..hop {
    let envelope: f32 = window.iter().skip(phase).step_by(hop).map(|w| w * w).sum();
    if envelope <= NOLA_EPSILON {
      return Err(EnhanceError::InvalidConfig(format!(
        "window and hop {hop} leave samples uncovered, overlap-add cannot reconstruct them"
      )));
    }
  }

  Ok(())
}
