//! Streaming WAV codec using hound
//!
//! Capture emits a header chunk written by hound with an empty data section,
//! followed by raw little-endian f32 PCM chunks. Because the header is written
//! before the length is known, the decoder rewrites the RIFF and `data` sizes
//! from the bytes it actually received before handing them to hound.

use super::{Decoder, EncodedChunk, SampleBuffer};
use crate::error::DecodeError;
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use std::io::Cursor;

/// WAV header chunk for mono 32-bit float at `sample_rate`
pub fn header_chunk(sample_rate: u32) -> Result<EncodedChunk, hound::Error> {
    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 32,
        sample_format: SampleFormat::Float,
    };

    let mut bytes = Vec::new();
    let writer = WavWriter::new(Cursor::new(&mut bytes), spec)?;
    writer.finalize()?;

    Ok(EncodedChunk(bytes))
}

/// PCM data chunk for mono f32 samples
pub fn pcm_chunk(samples: &[f32]) -> EncodedChunk {
    let mut bytes = Vec::with_capacity(samples.len() * 4);
    for sample in samples {
        bytes.extend_from_slice(&sample.to_le_bytes());
    }
    EncodedChunk(bytes)
}

fn read_u32(bytes: &[u8], at: usize) -> Option<u32> {
    bytes
        .get(at..at + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

fn read_u16(bytes: &[u8], at: usize) -> Option<u16> {
    bytes.get(at..at + 2).map(|b| u16::from_le_bytes([b[0], b[1]]))
}

fn write_u32(bytes: &mut [u8], at: usize, value: u32) {
    bytes[at..at + 4].copy_from_slice(&value.to_le_bytes());
}

/// Fix up the sizes of a WAV whose header was written before its data.
///
/// The data section is taken to run to the end of the input, truncated to
/// whole frames.
fn repair_sizes(bytes: &[u8]) -> Result<Vec<u8>, DecodeError> {
    if bytes.is_empty() {
        return Err(DecodeError::Empty);
    }
    if bytes.len() < 12 || &bytes[0..4] != b"RIFF" || &bytes[8..12] != b"WAVE" {
        return Err(DecodeError::Malformed("not a RIFF/WAVE stream".to_string()));
    }

    let mut block_align: Option<usize> = None;
    let mut offset = 12;

    while offset + 8 <= bytes.len() {
        let id = &bytes[offset..offset + 4];
        let size = read_u32(bytes, offset + 4).unwrap_or(0) as usize;

        if id == b"fmt " {
            block_align = read_u16(bytes, offset + 8 + 12).map(usize::from);
        } else if id == b"data" {
            let align = block_align
                .filter(|&a| a > 0)
                .ok_or_else(|| DecodeError::Malformed("data before fmt chunk".to_string()))?;

            let data_start = offset + 8;
            let payload = (bytes.len() - data_start) / align * align;
            if payload == 0 {
                return Err(DecodeError::Empty);
            }

            let mut repaired = bytes[..data_start + payload].to_vec();
            let riff_size = u32::try_from(repaired.len() - 8)
                .map_err(|_| DecodeError::Malformed("recording too large".to_string()))?;
            write_u32(&mut repaired, 4, riff_size);
            write_u32(&mut repaired, offset + 4, payload as u32);
            return Ok(repaired);
        }

        offset += 8 + size + (size & 1);
    }

    Err(DecodeError::Malformed("missing data chunk".to_string()))
}

/// Decoder for the capture's streaming WAV output
#[derive(Clone, Copy, Debug, Default)]
pub struct WavDecoder;

impl Decoder for WavDecoder {
    fn decode(&self, bytes: &[u8]) -> Result<SampleBuffer, DecodeError> {
        let repaired = repair_sizes(bytes)?;

        let reader = WavReader::new(Cursor::new(repaired))
            .map_err(|e| DecodeError::Malformed(e.to_string()))?;
        let spec = reader.spec();

        let samples: Result<Vec<f32>, _> = match spec.sample_format {
            SampleFormat::Float => reader.into_samples::<f32>().collect(),
            SampleFormat::Int => {
                let max_value = (1i64 << (spec.bits_per_sample - 1)) as f32;
                reader
                    .into_samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / max_value))
                    .collect()
            }
        };
        let samples = samples.map_err(|e| DecodeError::Malformed(e.to_string()))?;

        if samples.is_empty() {
            return Err(DecodeError::Empty);
        }

        Ok(SampleBuffer::from_interleaved(
            spec.sample_rate,
            spec.channels as usize,
            &samples,
        ))
    }
}
