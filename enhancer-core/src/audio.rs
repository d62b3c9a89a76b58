use std::{
  fmt,
  fs::{self, File},
  io::BufWriter,
  path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use symphonia::core::{
  audio::Signal, codecs::CODEC_TYPE_NULL, errors::Error as SymphoniaError,
  io::MediaSourceStream, probe::Hint,
};

use crate::error::{EnhanceError, Result};
use crate::stft::{LengthPolicy, Waveform};

/// Sample encoding of written WAV files.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleFormat {
  #[default]
  Int16,
  Float32,
}

impl fmt::Display for SampleFormat {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      SampleFormat::Int16 => write!(f, "int16"),
      SampleFormat::Float32 => write!(f, "float32"),
    }
  }
}

impl SampleFormat {
  fn spec(&self, channels: u16, sample_rate: u32) -> hound::WavSpec {
    let (bits_per_sample, sample_format) = match self {
      SampleFormat::Int16 => (16, hound::SampleFormat::Int),
      SampleFormat::Float32 => (32, hound::SampleFormat::Float),
    };

    hound::WavSpec {
      channels,
      sample_rate,
      bits_per_sample,
      sample_format,
    }
  }
}

fn decode_err(path: &Path, reason: impl fmt::Display) -> EnhanceError {
  EnhanceError::Decode {
    path: path.to_path_buf(),
    reason: reason.to_string(),
  }
}

fn encode_err(path: &Path, reason: impl fmt::Display) -> EnhanceError {
  EnhanceError::Encode {
    path: path.to_path_buf(),
    reason: reason.to_string(),
  }
}

/// Decodes every channel of the first audio track in `path`.
#[tracing::instrument(skip_all, fields(path = ?path.as_ref()))]
pub fn read_audio(path: impl AsRef<Path>) -> Result<Waveform> {
  let path = path.as_ref();
  let src = File::open(path).map_err(|err| EnhanceError::io(path, err))?;
  let mss = MediaSourceStream::new(Box::new(src), Default::default());

  let mut hint = Hint::new();
  if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
    hint.with_extension(ext);
  }

  let probed = symphonia::default::get_probe()
    .format(&hint, mss, &Default::default(), &Default::default())
    .map_err(|err| decode_err(path, err))?;

  let mut format = probed.format;
  let track = format
    .tracks()
    .iter()
    .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
    .ok_or_else(|| decode_err(path, "no supported audio tracks"))?;

  let mut decoder = symphonia::default::get_codecs()
    .make(&track.codec_params, &Default::default())
    .map_err(|err| decode_err(path, err))?;

  let track_id = track.id;
  let mut sample_rate = track.codec_params.sample_rate;
  let mut samples: Vec<Vec<f32>> = track
    .codec_params
    .channels
    .map(|c| vec![Vec::new(); c.count()])
    .unwrap_or_default();

  tracing::debug!("Start decoding...");

  loop {
    let packet = match format.next_packet() {
      Ok(packet) => packet,
      Err(SymphoniaError::ResetRequired) => {
        return Err(decode_err(path, "stream parameters changed mid-file"));
      }
      Err(SymphoniaError::IoError(err))
        if err.kind() == std::io::ErrorKind::UnexpectedEof
          && err.to_string() == "end of stream" =>
      {
        break;
      }
      Err(err) => {
        return Err(decode_err(path, err));
      }
    };

    if packet.track_id() != track_id {
      tracing::warn!(
        timestamp = packet.ts,
        "The packet does not belong to the selected track, skip..."
      );
      continue;
    }

    match decoder.decode(&packet) {
      Ok(decoded) => {
        let spec = *decoded.spec();

        if sample_rate.is_none() {
          sample_rate = Some(spec.rate);
        }

        let channel_num = spec.channels.count();
        if samples.len() < channel_num {
          samples.resize_with(channel_num, Vec::new);
        }

        let mut buf = decoded.make_equivalent::<f32>();
        decoded.convert(&mut buf);

        for (ch, dst) in samples.iter_mut().enumerate().take(channel_num) {
          dst.extend_from_slice(buf.chan(ch));
        }
      }
      Err(SymphoniaError::IoError(_)) => {
        tracing::error!(
          timestamp = packet.ts,
          "The packet failed to decode due to an IO error, skip..."
        );
        continue;
      }
      Err(SymphoniaError::DecodeError(_)) => {
        tracing::warn!(
          timestamp = packet.ts,
          "The packet failed to decode due to invalid data, skip..."
        );
        continue;
      }
      Err(err) => {
        return Err(decode_err(path, err));
      }
    }
  }

  let sample_rate = sample_rate.ok_or_else(|| decode_err(path, "can not get sample rate"))?;

  if samples.is_empty() {
    return Err(decode_err(path, "no channel found"));
  }

  tracing::debug!(
    channels = samples.len(),
    sample_rate,
    length = samples[0].len(),
    "Audio decoded"
  );

  Waveform::from_channels(samples, sample_rate, LengthPolicy::Strict)
}

/// The hidden sibling `write_audio` writes to before renaming into place.
pub fn partial_path(path: &Path) -> PathBuf {
  let name = path
    .file_name()
    .map(|n| n.to_string_lossy().into_owned())
    .unwrap_or_default();

  path.with_file_name(format!(".{name}.partial"))
}

/// Writes `wave` as WAV. The file appears at `path` only once it is complete.
#[tracing::instrument(skip_all, fields(path = ?path.as_ref()))]
pub fn write_audio(path: impl AsRef<Path>, wave: &Waveform, format: SampleFormat) -> Result<()> {
  let path = path.as_ref();
  let channels = u16::try_from(wave.channels())
    .map_err(|_| encode_err(path, format!("too many channels ({})", wave.channels())))?;

  let temp = partial_path(path);

  let res = write_wav(&temp, wave, format.spec(channels, wave.sample_rate()))
    .and_then(|()| fs::rename(&temp, path).map_err(|err| EnhanceError::io(path, err)));

  if res.is_err() && temp.exists() {
    if let Err(err) = fs::remove_file(&temp) {
      tracing::warn!(path = ?temp, %err, "Failed to remove the partial output");
    }
  }

  res
}

fn write_wav(path: &Path, wave: &Waveform, spec: hound::WavSpec) -> Result<()> {
  let file = File::create(path).map_err(|err| EnhanceError::io(path, err))?;
  let mut writer =
    hound::WavWriter::new(BufWriter::new(file), spec).map_err(|err| encode_err(path, err))?;

  // interleaved, frame by frame
  for frame in wave.samples().columns() {
    for &v in frame {
      let res = match spec.sample_format {
        hound::SampleFormat::Int => {
          writer.write_sample((v.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16)
        }
        hound::SampleFormat::Float => writer.write_sample(v),
      };
      res.map_err(|err| encode_err(path, err))?;
    }
  }

  writer.finalize().map_err(|err| encode_err(path, err))
}
