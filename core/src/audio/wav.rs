//! WAV and base64 helpers for response payloads.

use std::io::Cursor;

use base64::Engine;
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};

use crate::model::ModelError;

/// Encode mono `f32` samples as a 16-bit PCM WAV held in memory.
pub fn encode_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>, ModelError> {
    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::with_capacity(44 + samples.len() * 2));
    {
        let mut writer = WavWriter::new(&mut cursor, spec)
            .map_err(|e| ModelError::Audio(format!("Failed to start WAV: {}", e)))?;
        for &sample in samples {
            let value = if sample.is_finite() {
                (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
            } else {
                0
            };
            writer
                .write_sample(value)
                .map_err(|e| ModelError::Audio(format!("Failed to write sample: {}", e)))?;
        }
        writer
            .finalize()
            .map_err(|e| ModelError::Audio(format!("Failed to finalize WAV: {}", e)))?;
    }
    Ok(cursor.into_inner())
}

/// Decode a WAV container into mono `f32` samples and its sample rate.
///
/// Multi-channel input is averaged down to one channel.
pub fn decode_wav(bytes: &[u8]) -> Result<(Vec<f32>, u32), ModelError> {
    let mut reader = WavReader::new(Cursor::new(bytes))
        .map_err(|e| ModelError::Audio(format!("Failed to parse WAV: {}", e)))?;

    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;

    let interleaved: Vec<f32> = match spec.sample_format {
        SampleFormat::Int => {
            let bits = spec.bits_per_sample.max(1) as u32;
            let max_val = if bits > 1 {
                ((1i64 << (bits - 1)) - 1) as f32
            } else {
                1.0
            };
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| (v as f32 / max_val).clamp(-1.0, 1.0)))
                .collect::<Result<Vec<f32>, _>>()
        }
        SampleFormat::Float => reader.samples::<f32>().collect::<Result<Vec<f32>, _>>(),
    }
    .map_err(|e| ModelError::Audio(format!("Failed to read samples: {}", e)))?;

    let samples = if channels > 1 {
        interleaved
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
            .collect()
    } else {
        interleaved
    };

    Ok((samples, spec.sample_rate))
}

/// Linear-interpolation resampling.
pub fn resample_linear(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || samples.is_empty() || from_rate == 0 || to_rate == 0 {
        return samples.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let new_len = (samples.len() as f64 / ratio).round() as usize;
    let last = samples.len() - 1;

    (0..new_len)
        .map(|i| {
            let src = i as f64 * ratio;
            let idx0 = (src.floor() as usize).min(last);
            let idx1 = (idx0 + 1).min(last);
            let frac = (src - idx0 as f64) as f32;
            samples[idx0] * (1.0 - frac) + samples[idx1] * frac
        })
        .collect()
}

pub fn encode_base64(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

pub fn decode_base64(data: &str) -> Result<Vec<u8>, base64::DecodeError> {
    base64::engine::general_purpose::STANDARD.decode(data.as_bytes())
}
