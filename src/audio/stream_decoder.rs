//! Decoders for inbound audio chunks.

use anyhow::Result;

/// Converts one encoded chunk into mono f32 samples ready for scheduling.
pub trait StreamDecoder: Send {
    fn decode(&mut self, data: &[u8]) -> Result<Vec<f32>>;
}

/// Raw 16-bit little-endian PCM, as the live endpoint streams it (24 kHz mono).
/// Interleaved multi-channel input is downmixed by averaging.
#[derive(Debug, Clone)]
pub struct Pcm16Decoder {
    channels: usize,
}

impl Pcm16Decoder {
    pub fn new(channels: usize) -> Self {
        Self {
            channels: channels.max(1),
        }
    }
}

impl Default for Pcm16Decoder {
    fn default() -> Self {
        Self::new(1)
    }
}

impl StreamDecoder for Pcm16Decoder {
    fn decode(&mut self, data: &[u8]) -> Result<Vec<f32>> {
        let frame_bytes = 2 * self.channels;
        if data.len() % frame_bytes != 0 {
            anyhow::bail!(
                "PCM chunk of {} bytes is not a whole number of {}-channel frames",
                data.len(),
                self.channels
            );
        }
        let samples = data
            .chunks_exact(frame_bytes)
            .map(|frame| {
                let sum: f32 = frame
                    .chunks_exact(2)
                    .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / 32768.0)
                    .sum();
                sum / self.channels as f32
            })
            .collect();
        Ok(samples)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_mono() {
        let mut decoder = Pcm16Decoder::default();
        let mut bytes = Vec::new();
        for v in [0i16, 16384, -32768] {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        assert_eq!(decoder.decode(&bytes).unwrap(), vec![0.0, 0.5, -1.0]);
    }

    #[test]
    fn downmixes_stereo() {
        let mut decoder = Pcm16Decoder::new(2);
        let mut bytes = Vec::new();
        for v in [16384i16, 0] {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        assert_eq!(decoder.decode(&bytes).unwrap(), vec![0.25]);
    }

    #[test]
    fn rejects_partial_frames() {
        let mut decoder = Pcm16Decoder::default();
        assert!(decoder.decode(&[1, 2, 3]).is_err());
        assert!(decoder.decode(&[]).unwrap().is_empty());
    }
}
