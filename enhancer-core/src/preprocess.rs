use std::{iter, ops::Range};

use ndarray::{s, Array2};
use rubato::{
  Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

use crate::error::{EnhanceError, Result};
use crate::stft::Waveform;

const RESAMPLE_CHUNK: usize = 1024;

pub const TRIM_FRAME: usize = 2048;
pub const TRIM_HOP: usize = 512;

// -100 dB, the amplitude floor of `librosa.amplitude_to_db`
const POWER_FLOOR: f64 = 1e-10;

fn gcd(mut a: u32, mut b: u32) -> u32 {
  while b != 0 {
    (a, b) = (b, a % b);
  }
  a
}

fn resample_err(err: impl std::fmt::Display) -> EnhanceError {
  EnhanceError::InvalidInput(format!("resampling failed: {err}"))
}

/// Band-limited resampling of every channel to `to` Hz.
///
/// The output has exactly `ceil(len * to / from)` samples and output sample
/// `k` sits at input time `k * from / to`.
#[tracing::instrument(skip_all, fields(from = wave.sample_rate(), to = to))]
pub fn resample(wave: &Waveform, to: u32) -> Result<Waveform> {
  let from = wave.sample_rate();

  if from == 0 || to == 0 {
    return Err(EnhanceError::InvalidConfig(format!(
      "can not resample from {from} Hz to {to} Hz"
    )));
  }

  if from == to {
    return Ok(wave.clone());
  }

  let (channel_num, length) = wave.samples().dim();
  let expected = (length as u64 * to as u64).div_ceil(from as u64) as usize;

  if length == 0 {
    return Ok(Waveform::new(Array2::zeros((channel_num, 0)), to));
  }

  let params = SincInterpolationParameters {
    sinc_len: 256,
    f_cutoff: 0.95,
    interpolation: SincInterpolationType::Linear,
    oversampling_factor: 256,
    window: WindowFunction::BlackmanHarris2,
  };

  let mut resampler = SincFixedIn::<f64>::new(
    to as f64 / from as f64,
    1.0,
    params,
    RESAMPLE_CHUNK,
    channel_num,
  )
  .map_err(|err| EnhanceError::InvalidConfig(err.to_string()))?;

  // `SincFixedIn` emits its first sample at input time `from / to - 1` and
  // steps by `from / to`. With `lead` zeros in front and the first `skip`
  // outputs dropped, output `k` lands on input time `k * from / to` exactly.
  let g = gcd(from, to);
  let lead = (from / g) as usize - 1;
  let skip = (to / g) as usize - 1;

  let input: Vec<Vec<f64>> = wave
    .samples()
    .rows()
    .into_iter()
    .map(|row| {
      iter::repeat(0.0)
        .take(lead)
        .chain(row.iter().map(|&v| v as f64))
        .collect()
    })
    .collect();
  let length = length + lead;

  let mut output: Vec<Vec<f64>> = vec![Vec::new(); channel_num];
  let append = |output: &mut Vec<Vec<f64>>, chunk: Vec<Vec<f64>>| {
    for (dst, src) in output.iter_mut().zip(chunk) {
      dst.extend(src);
    }
  };

  let mut pos = 0;
  while length - pos >= resampler.input_frames_next() {
    let next = resampler.input_frames_next();
    let chunk: Vec<&[f64]> = input.iter().map(|c| &c[pos..pos + next]).collect();
    append(&mut output, resampler.process(&chunk, None).map_err(resample_err)?);
    pos += next;
  }

  if pos < length {
    let rest: Vec<&[f64]> = input.iter().map(|c| &c[pos..]).collect();
    append(
      &mut output,
      resampler.process_partial(Some(rest.as_slice()), None).map_err(resample_err)?,
    );
  }

  // drain the filter
  while output[0].len() < expected + skip {
    let tail = resampler
      .process_partial::<&[f64]>(None, None)
      .map_err(resample_err)?;
    if tail.first().map_or(true, Vec::is_empty) {
      break;
    }
    append(&mut output, tail);
  }

  let mut res = Array2::zeros((channel_num, expected));
  for (mut row, channel) in res.rows_mut().into_iter().zip(&output) {
    for (dst, &src) in row.iter_mut().zip(channel.iter().skip(skip)) {
      *dst = src as f32;
    }
  }

  tracing::debug!(length = wave.len(), resampled = expected, "Resampled");

  Ok(Waveform::new(res, to))
}

/// The sample span of `mono` whose frame power is within `top_db` of the
/// loudest frame.
///
/// Frames are `TRIM_FRAME` long, `TRIM_HOP` apart and centred (zero padded),
/// like `librosa.effects.trim`. An empty signal yields an empty span.
pub fn non_silent_span(mono: &[f32], top_db: f32) -> Result<Range<usize>> {
  if !top_db.is_finite() || top_db <= 0.0 {
    return Err(EnhanceError::InvalidConfig(format!(
      "silence threshold must be a positive number of dB, got {top_db}"
    )));
  }

  let length = mono.len();
  if length == 0 {
    return Ok(0..0);
  }

  let mut prefix = Vec::with_capacity(length + 1);
  prefix.push(0.0f64);
  for &v in mono {
    let last = prefix[prefix.len() - 1];
    prefix.push(last + v as f64 * v as f64);
  }

  let half = TRIM_FRAME / 2;
  let frame_num = length / TRIM_HOP + 1;
  let power: Vec<f64> = (0..frame_num)
    .map(|k| {
      let center = k * TRIM_HOP;
      let start = center.saturating_sub(half).min(length);
      let end = (center + half).min(length);
      (prefix[end] - prefix[start]) / TRIM_FRAME as f64
    })
    .collect();

  let peak = power.iter().copied().fold(0.0f64, f64::max).max(POWER_FLOOR);
  let threshold = -(top_db as f64);

  let loud = |p: f64| 10.0 * (p.max(POWER_FLOOR) / peak).log10() > threshold;

  let Some(first) = power.iter().position(|&p| loud(p)) else {
    return Ok(0..0);
  };
  let last = power.iter().rposition(|&p| loud(p)).unwrap_or(first);

  let start = first * TRIM_HOP;
  let end = ((last + 1) * TRIM_HOP).min(length);

  Ok(start.min(end)..end)
}

/// Cuts leading and trailing silence. The decision is made on the downmix and
/// applied to every channel.
pub fn trim_silence(wave: &Waveform, top_db: f32) -> Result<Waveform> {
  let span = non_silent_span(&wave.downmix(), top_db)?;

  tracing::debug!(
    start = span.start,
    end = span.end,
    length = wave.len(),
    "Trimmed"
  );

  Ok(Waveform::new(
    wave.samples().slice(s![.., span]).to_owned(),
    wave.sample_rate(),
  ))
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;

  use super::*;

  fn tone(freq: f32, rate: u32, len: usize) -> Vec<f32> {
    (0..len)
      .map(|i| 0.5 * (2.0 * std::f32::consts::PI * freq * i as f32 / rate as f32).sin())
      .collect()
  }

  #[test]
  fn resample_length_is_exact() {
    for (from, to, len) in [(48000, 16000, 48000), (44100, 16000, 12345), (8000, 16000, 777)] {
      let wave = Waveform::mono(tone(440.0, from, len), from);
      let out = resample(&wave, to).unwrap();

      let expected = (len as u64 * to as u64).div_ceil(from as u64) as usize;
      assert_eq!(out.len(), expected, "{from} -> {to}");
      assert_eq!(out.sample_rate(), to);
    }
  }

  #[test]
  fn resample_keeps_the_tone_aligned() {
    let wave = Waveform::new(
      Array2::from_shape_vec(
        (2, 48000),
        [tone(440.0, 48000, 48000), tone(1000.0, 48000, 48000)].concat(),
      )
      .unwrap(),
      48000,
    );
    let out = resample(&wave, 16000).unwrap();

    assert_eq!(out.channels(), 2);
    let left = tone(440.0, 16000, 16000);
    let right = tone(1000.0, 16000, 16000);

    // skip the edges where the filter sees zeros
    for i in 500..15500 {
      assert_abs_diff_eq!(out.samples()[[0, i]], left[i], epsilon = 2e-2);
      assert_abs_diff_eq!(out.samples()[[1, i]], right[i], epsilon = 2e-2);
    }
  }

  #[test]
  fn impulse_keeps_its_position() {
    // (from, to, impulse index at `from`, expected index at `to`)
    for (from, to, at, expected) in [
      (48000, 16000, 2400, 800),
      (44100, 16000, 4410, 1600),
      (8000, 16000, 800, 1600),
    ] {
      let mut samples = vec![0.0; from as usize / 2];
      samples[at] = 1.0;

      let out = resample(&Waveform::mono(samples, from), to).unwrap();
      let row = out.samples().row(0);
      let peak = row
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map(|(i, _)| i)
        .unwrap();

      assert_eq!(peak, expected, "{from} -> {to}");
      // symmetric around the peak when the impulse lands on an output sample
      assert_abs_diff_eq!(row[peak - 1], row[peak + 1], epsilon = 1e-2);
    }
  }

  #[test]
  fn same_rate_is_a_copy() {
    let wave = Waveform::mono(tone(100.0, 16000, 100), 16000);
    assert_eq!(resample(&wave, 16000).unwrap(), wave);
  }

  #[test]
  fn trims_leading_and_trailing_silence() {
    let mut samples = vec![0.0; 8192];
    samples.extend(tone(440.0, 16000, 8192));
    samples.extend(vec![0.0; 8192]);

    let span = non_silent_span(&samples, 30.0).unwrap();

    // centred frames reach half a frame past the sound, the span starts on a hop
    assert_eq!(span.start, 8192 - TRIM_HOP);
    assert_eq!(span.end, 16384 + TRIM_FRAME / 2);
  }

  #[test]
  fn silence_keeps_everything() {
    let span = non_silent_span(&[0.0; 5000], 60.0).unwrap();
    assert_eq!(span, 0..5000);
  }

  #[test]
  fn trim_applies_to_every_channel() {
    let mut left = vec![0.0; 4096];
    left.extend(tone(300.0, 16000, 4096));
    let right = vec![0.1; 8192];

    let wave = Waveform::new(
      Array2::from_shape_vec((2, 8192), [left, right].concat()).unwrap(),
      16000,
    );
    let out = trim_silence(&wave, 20.0).unwrap();

    assert_eq!(out.channels(), 2);
    assert!(out.len() <= wave.len());
    assert_eq!(out.sample_rate(), 16000);
  }

  #[test]
  fn rejects_bad_threshold() {
    assert!(matches!(
      non_silent_span(&[0.0; 10], 0.0),
      Err(EnhanceError::InvalidConfig(_))
    ));
  }
}
