use ndarray::{aview1, Array1, Array2, Array3, ArrayView2, Axis, Zip};
use realfft::num_complex::Complex32;

use super::{SpectralTransform, Spectrogram, TransformConfig};
use crate::error::{EnhanceError, Result};

/// What to do when the channels of a waveform do not have the same length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LengthPolicy {
  #[default]
  Strict,
  /// Cut every channel to the shortest one. Lossy.
  TrimToShortest,
}

/// Multi-channel audio, `[channels, samples]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Waveform {
  samples: Array2<f32>,
  sample_rate: u32,
}

impl Waveform {
  pub fn new(samples: Array2<f32>, sample_rate: u32) -> Self {
    Self {
      samples,
      sample_rate,
    }
  }

  pub fn mono(samples: Vec<f32>, sample_rate: u32) -> Self {
    Self::new(Array1::from(samples).insert_axis(Axis(0)), sample_rate)
  }

  pub fn from_channels(
    channels: Vec<Vec<f32>>,
    sample_rate: u32,
    policy: LengthPolicy,
  ) -> Result<Self> {
    if channels.is_empty() {
      return Err(EnhanceError::InvalidInput("no channel found".to_owned()));
    }

    let shortest = channels.iter().map(Vec::len).min().unwrap_or(0);
    let longest = channels.iter().map(Vec::len).max().unwrap_or(0);

    if shortest != longest {
      match policy {
        LengthPolicy::Strict => {
          return Err(EnhanceError::InvalidInput(format!(
            "channels have unequal lengths ({shortest}..={longest} samples)"
          )));
        }
        LengthPolicy::TrimToShortest => {
          tracing::warn!(
            dropped = longest - shortest,
            "Channels have unequal lengths, trimming to the shortest"
          );
        }
      }
    }

    let channel_num = channels.len();
    let samples = Array2::from_shape_vec(
      (channel_num, shortest),
      channels
        .into_iter()
        .flat_map(|mut c| {
          c.truncate(shortest);
          c
        })
        .collect(),
    )
    .map_err(|err| EnhanceError::InvalidInput(err.to_string()))?;

    Ok(Self::new(samples, sample_rate))
  }

  pub fn samples(&self) -> &Array2<f32> {
    &self.samples
  }

  pub fn view(&self) -> ArrayView2<'_, f32> {
    self.samples.view()
  }

  pub fn into_samples(self) -> Array2<f32> {
    self.samples
  }

  pub fn sample_rate(&self) -> u32 {
    self.sample_rate
  }

  pub fn channels(&self) -> usize {
    self.samples.nrows()
  }

  pub fn len(&self) -> usize {
    self.samples.ncols()
  }

  pub fn is_empty(&self) -> bool {
    self.samples.is_empty()
  }

  /// Average of all channels.
  pub fn downmix(&self) -> Vec<f32> {
    match self.samples.mean_axis(Axis(0)) {
      Some(mono) => mono.to_vec(),
      None => Vec::new(),
    }
  }
}

/// Spectrograms of every channel stacked as `[channels, freq_bins, frames]`.
#[derive(Debug, Clone, PartialEq)]
pub struct MultiSpectrogram {
  data: Array3<Complex32>,
  signal_len: usize,
}

impl MultiSpectrogram {
  pub fn new(data: Array3<Complex32>, signal_len: usize) -> Self {
    Self { data, signal_len }
  }

  pub fn data(&self) -> &Array3<Complex32> {
    &self.data
  }

  pub fn signal_len(&self) -> usize {
    self.signal_len
  }

  pub fn channels(&self) -> usize {
    self.data.len_of(Axis(0))
  }

  pub fn channel(&self, index: usize) -> Spectrogram {
    Spectrogram::new(
      self.data.index_axis(Axis(0), index).to_owned(),
      self.signal_len,
    )
  }

  /// Same signal length, new coefficients (e.g. a model's prediction).
  pub fn with_data(&self, data: Array3<Complex32>) -> Result<Self> {
    if data.dim() != self.data.dim() {
      return Err(EnhanceError::shape(self.data.shape(), data.shape()));
    }

    Ok(Self::new(data, self.signal_len))
  }

  /// `|X| ^ power` of every bin.
  pub fn magnitude(&self, power: f32) -> Array3<f32> {
    self.data.mapv(|c| c.norm().powf(power))
  }

  /// Phase angle of every bin in radians.
  pub fn phase(&self) -> Array3<f32> {
    self.data.mapv(|c| c.arg())
  }

  /// Inverse of [`magnitude`](Self::magnitude) and [`phase`](Self::phase):
  /// `mag ^ (1 / power) * e^(i * phase)`.
  pub fn from_mag_phase(
    mag: &Array3<f32>,
    phase: &Array3<f32>,
    power: f32,
    signal_len: usize,
  ) -> Result<Self> {
    if mag.dim() != phase.dim() {
      return Err(EnhanceError::shape(mag.shape(), phase.shape()));
    }
    check_power(power)?;

    let mut data = Array3::zeros(mag.dim());
    Zip::from(&mut data)
      .and(mag)
      .and(phase)
      .for_each(|c, &m, &p| *c = Complex32::from_polar(m.powf(1.0 / power), p));

    Ok(Self::new(data, signal_len))
  }
}

fn check_power(power: f32) -> Result<()> {
  if !power.is_finite() || power <= 0.0 {
    return Err(EnhanceError::InvalidConfig(format!(
      "magnitude power must be a positive number, got {power}"
    )));
  }
  Ok(())
}

/// Runs a [`SpectralTransform`] on every channel independently.
pub struct MultiChannelTransform {
  stft: SpectralTransform,
}

impl MultiChannelTransform {
  pub fn new(config: TransformConfig) -> Result<Self> {
    Ok(Self {
      stft: SpectralTransform::new(config)?,
    })
  }

  pub fn config(&self) -> &TransformConfig {
    self.stft.config()
  }

  pub fn single(&self) -> &SpectralTransform {
    &self.stft
  }

  pub fn forward(&self, input: ArrayView2<f32>) -> Result<MultiSpectrogram> {
    let (channel_num, length) = input.dim();

    if channel_num == 0 {
      return Err(EnhanceError::InvalidInput("no channel found".to_owned()));
    }

    let config = self.stft.config();
    let mut res = Array3::zeros((
      channel_num,
      config.freq_bins(),
      config.frame_count(length),
    ));

    for (ch, channel) in input.axis_iter(Axis(0)).enumerate() {
      let spec = self.stft.forward(&channel.to_vec())?;
      res.index_axis_mut(Axis(0), ch).assign(spec.data());
    }

    Ok(MultiSpectrogram::new(res, length))
  }

  pub fn inverse(&self, spec: &MultiSpectrogram) -> Result<Array2<f32>> {
    let mut res = Array2::zeros((spec.channels(), spec.signal_len()));

    for (ch, mut row) in res.axis_iter_mut(Axis(0)).enumerate() {
      let samples = self.stft.inverse(&spec.channel(ch))?;
      row.assign(&aview1(&samples));
    }

    Ok(res)
  }

  pub fn to_mag(&self, input: ArrayView2<f32>, power: f32) -> Result<Array3<f32>> {
    check_power(power)?;
    Ok(self.forward(input)?.magnitude(power))
  }

  pub fn to_phase(&self, input: ArrayView2<f32>) -> Result<Array3<f32>> {
    Ok(self.forward(input)?.phase())
  }

  /// Magnitude and phase from a single forward pass.
  pub fn to_mag_phase(
    &self,
    input: ArrayView2<f32>,
    power: f32,
  ) -> Result<(Array3<f32>, Array3<f32>)> {
    check_power(power)?;
    let spec = self.forward(input)?;
    Ok((spec.magnitude(power), spec.phase()))
  }

  pub fn restore_mag_phase(
    &self,
    mag: &Array3<f32>,
    phase: &Array3<f32>,
    power: f32,
    signal_len: usize,
  ) -> Result<Array2<f32>> {
    let spec = MultiSpectrogram::from_mag_phase(mag, phase, power, signal_len)?;
    self.inverse(&spec)
  }
}
