use std::{
  ops::Range,
  path::Path,
  sync::Mutex,
};

use ndarray::{Array2, ArrayD, Axis};
use ort::session::Session;
use serde::Serialize;

use super::mel::{MelSpectrogram, HOP};
use super::{Metric, Scorer};
use crate::config::DeviceConfig;
use crate::error::{EnhanceError, Result};
use crate::model::onnx::{build_session, run_session};
use crate::preprocess::resample;
use crate::stft::Waveform;

pub const SAMPLE_RATE: u32 = 16000;
/// Length of one scored segment, in seconds.
pub const INPUT_LENGTH: f64 = 9.01;

// `numpy.poly1d` coefficients, highest power first
const PERSONALIZED_SIG: [f64; 4] = [-0.01019296, 0.02751166, 1.19576786, -0.24348726];
const PERSONALIZED_BAK: [f64; 4] = [-0.04976499, 0.44276479, -0.1644611, 0.96883132];
const PERSONALIZED_OVR: [f64; 4] = [-0.00533021, 0.005101, 1.18058466, -0.11236046];

const REGULAR_SIG: [f64; 3] = [-0.08397278, 1.22083953, 0.0052439];
const REGULAR_BAK: [f64; 3] = [-0.13166888, 1.60915514, -0.39604546];
const REGULAR_OVR: [f64; 3] = [-0.06766283, 1.11546468, 0.04602535];

fn polyval(coefficients: &[f64], x: f64) -> f64 {
  coefficients.iter().fold(0.0, |acc, &c| acc * x + c)
}

/// Mean DNSMOS scores of one clip, raw network outputs and calibrated values.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MosScores {
  pub len_in_sec: f64,
  pub num_hops: usize,
  pub sig_raw: f64,
  pub bak_raw: f64,
  pub ovrl_raw: f64,
  pub sig: f64,
  pub bak: f64,
  pub ovrl: f64,
  /// Mean output of the P.808 network, when it is loaded.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub p808_mos: Option<f64>,
}

struct P808 {
  session: Mutex<Session>,
  mel: MelSpectrogram,
}

/// Non-intrusive MOS estimate from the DNS challenge `sig_bak_ovr` network.
pub struct DnsMos {
  session: Mutex<Session>,
  personalized: bool,
  p808: Option<P808>,
  report_p808: bool,
}

impl DnsMos {
  pub fn from_file(path: impl AsRef<Path>, device: &DeviceConfig, personalized: bool) -> Result<Self> {
    let session = build_session(path.as_ref(), device)?;

    Ok(Self {
      session: Mutex::new(session),
      personalized,
      p808: None,
      report_p808: false,
    })
  }

  /// Also runs the P.808 network (`model_v8.onnx`) on log-mel features of
  /// every segment.
  pub fn with_p808(mut self, path: impl AsRef<Path>, device: &DeviceConfig) -> Result<Self> {
    let session = build_session(path.as_ref(), device)?;

    self.p808 = Some(P808 {
      session: Mutex::new(session),
      mel: MelSpectrogram::new(SAMPLE_RATE),
    });
    Ok(self)
  }

  /// Makes [`Scorer::score`] return the P.808 MOS instead of OVRL.
  pub fn reporting_p808(mut self) -> Result<Self> {
    if self.p808.is_none() {
      return Err(EnhanceError::InvalidConfig(
        "P.808 scores need the P.808 model".to_owned(),
      ));
    }

    self.report_p808 = true;
    Ok(self)
  }

  fn calibrate(&self, sig: f64, bak: f64, ovr: f64) -> (f64, f64, f64) {
    if self.personalized {
      (
        polyval(&PERSONALIZED_SIG, sig),
        polyval(&PERSONALIZED_BAK, bak),
        polyval(&PERSONALIZED_OVR, ovr),
      )
    } else {
      (
        polyval(&REGULAR_SIG, sig),
        polyval(&REGULAR_BAK, bak),
        polyval(&REGULAR_OVR, ovr),
      )
    }
  }

  pub fn evaluate(&self, audio: &[f32], sample_rate: u32) -> Result<MosScores> {
    if audio.is_empty() {
      return Err(EnhanceError::InvalidInput("can not score an empty clip".to_owned()));
    }

    let audio = if sample_rate == SAMPLE_RATE {
      audio.to_vec()
    } else {
      resample(&Waveform::mono(audio.to_vec(), sample_rate), SAMPLE_RATE)?.downmix()
    };

    let actual_len = audio.len();
    let audio = tile(audio, segment_len());
    let (num_hops, segments) = segments(audio.len());

    let mut raw = Vec::with_capacity(segments.len());
    let mut p808_raw = Vec::new();
    for range in segments {
      let segment = &audio[range];
      let input = Array2::from_shape_vec((1, segment.len()), segment.to_vec())
        .map_err(|err| EnhanceError::Scoring(err.to_string()))?;
      raw.push(self.infer(input.into_dyn())?);

      if let Some(p808) = &self.p808 {
        // the network expects 900 frames, i.e. the segment minus one hop
        let features = p808.mel.normalized_db(&segment[..segment.len() - HOP])?;
        p808_raw.push(p808.infer(features)?);
      }
    }

    if raw.is_empty() {
      return Err(EnhanceError::Scoring("no segment long enough to score".to_owned()));
    }

    let calibrated: Vec<_> = raw
      .iter()
      .map(|&(sig, bak, ovr)| self.calibrate(sig, bak, ovr))
      .collect();

    let mean = |values: &[(f64, f64, f64)], pick: fn(&(f64, f64, f64)) -> f64| {
      values.iter().map(pick).sum::<f64>() / values.len() as f64
    };

    Ok(MosScores {
      len_in_sec: actual_len as f64 / SAMPLE_RATE as f64,
      num_hops,
      sig_raw: mean(&raw, |v| v.0),
      bak_raw: mean(&raw, |v| v.1),
      ovrl_raw: mean(&raw, |v| v.2),
      sig: mean(&calibrated, |v| v.0),
      bak: mean(&calibrated, |v| v.1),
      ovrl: mean(&calibrated, |v| v.2),
      p808_mos: (!p808_raw.is_empty())
        .then(|| p808_raw.iter().sum::<f64>() / p808_raw.len() as f64),
    })
  }

  fn infer(&self, input: ArrayD<f32>) -> Result<(f64, f64, f64)> {
    let output = run_session(&self.session, input)?;

    match output.as_slice() {
      Some(&[sig, bak, ovr, ..]) => Ok((sig as f64, bak as f64, ovr as f64)),
      _ => Err(EnhanceError::shape(&[1, 3], output.shape())),
    }
  }
}

impl P808 {
  fn infer(&self, features: Array2<f32>) -> Result<f64> {
    let output = run_session(&self.session, features.insert_axis(Axis(0)).into_dyn())?;

    match output.iter().next() {
      Some(&mos) => Ok(mos as f64),
      None => Err(EnhanceError::shape(&[1, 1, 1], output.shape())),
    }
  }
}

impl Scorer for DnsMos {
  fn metric(&self) -> Metric {
    if self.report_p808 {
      Metric::P808
    } else {
      Metric::Mos {
        personalized: self.personalized,
      }
    }
  }

  /// Overall quality (OVRL), or the P.808 MOS. The reference is ignored.
  fn score(&self, _reference: &[f32], test: &[f32], sample_rate: u32) -> Result<f64> {
    let scores = self.evaluate(test, sample_rate)?;

    if self.report_p808 {
      return scores
        .p808_mos
        .ok_or_else(|| EnhanceError::Scoring("no P.808 score".to_owned()));
    }

    Ok(scores.ovrl)
  }
}

fn segment_len() -> usize {
  (INPUT_LENGTH * SAMPLE_RATE as f64) as usize
}

// repeat the whole clip until it fills one segment
fn tile(mut audio: Vec<f32>, min_len: usize) -> Vec<f32> {
  while audio.len() < min_len {
    audio.extend_from_within(..);
  }
  audio
}

// one segment per second; trailing segments shorter than `INPUT_LENGTH` are dropped
fn segments(len: usize) -> (usize, Vec<Range<usize>>) {
  let fs = SAMPLE_RATE as f64;
  let num_hops = ((len as f64 / fs).floor() - INPUT_LENGTH).trunc() as i64 + 1;
  let num_hops = num_hops.max(0) as usize;

  let ranges = (0..num_hops)
    .map(|idx| {
      let start = idx * SAMPLE_RATE as usize;
      let end = ((idx as f64 + INPUT_LENGTH) * fs) as usize;
      start..end.min(len)
    })
    .filter(|r| r.len() >= segment_len())
    .collect();

  (num_hops, ranges)
}
