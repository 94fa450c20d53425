// PCM conversion between float samples and the 16-bit base64 framing used by
// the Live API in both directions.

use anyhow::{bail, Context, Result};
use base64::Engine;
use serde::{Deserialize, Serialize};

/// Scale factor between normalized float samples and signed 16-bit PCM
pub const PCM_SCALE: f32 = 32768.0;

/// Base64-encoded PCM payload with its mime type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaBlob {
    pub mime_type: String,
    pub data: String,
}

/// Mime type for raw 16-bit mono PCM at the given rate (e.g. `audio/pcm;rate=16000`)
pub fn pcm_mime_type(sample_rate: u32) -> String {
    format!("audio/pcm;rate={}", sample_rate)
}

/// Convert float samples to signed 16-bit PCM
///
/// Samples are multiplied by 32768 and truncated toward zero. Values outside
/// the i16 range saturate (1.0 maps to 32767).
pub fn float_to_pcm16(samples: &[f32]) -> Vec<i16> {
    samples.iter().map(|&s| (s * PCM_SCALE) as i16).collect()
}

/// Convert signed 16-bit PCM back to normalized floats
pub fn pcm16_to_float(samples: &[i16]) -> Vec<f32> {
    samples.iter().map(|&s| f32::from(s) / PCM_SCALE).collect()
}

/// Pack PCM samples as little-endian bytes
pub fn pcm16_to_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// Reinterpret little-endian bytes as PCM samples
///
/// A trailing odd byte is dropped.
pub fn bytes_to_pcm16(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|chunk| i16::from_le_bytes([chunk[0], chunk[1]]))
        .collect()
}

/// Encode one block of mono float samples as an outbound media blob
pub fn encode_block(samples: &[f32], sample_rate: u32) -> MediaBlob {
    let pcm = float_to_pcm16(samples);
    MediaBlob {
        mime_type: pcm_mime_type(sample_rate),
        data: base64::engine::general_purpose::STANDARD.encode(pcm16_to_bytes(&pcm)),
    }
}

/// Decoded mono audio ready for playback
#[derive(Debug, Clone, PartialEq)]
pub struct PcmBuffer {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl PcmBuffer {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Playback length in seconds
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / f64::from(self.sample_rate)
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Decode an inbound base64 audio fragment into a playable buffer
pub fn decode_fragment(data: &str, sample_rate: u32) -> Result<PcmBuffer> {
    if sample_rate == 0 {
        bail!("Output sample rate must be non-zero");
    }

    let bytes = base64::engine::general_purpose::STANDARD
        .decode(data)
        .context("Audio fragment is not valid base64")?;

    let pcm = bytes_to_pcm16(&bytes);

    Ok(PcmBuffer::new(pcm16_to_float(&pcm), sample_rate))
}
