//! Outbound path: level metering and PCM16 framing of microphone blocks.

use std::collections::VecDeque;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::config::PreOpenPolicy;
use crate::protocol::MediaBlob;

/// Root-mean-square amplitude of a block. Empty blocks are silent.
pub fn rms(block: &[f32]) -> f32 {
    if block.is_empty() {
        return 0.0;
    }
    let sum: f32 = block.iter().map(|s| s * s).sum();
    (sum / block.len() as f32).sqrt()
}

/// Converts f32 samples to 16-bit little-endian PCM, clamping to [-1, 1].
pub fn encode_pcm16(block: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(block.len() * 2);
    for &sample in block {
        let s = sample.clamp(-1.0, 1.0);
        let value = if s < 0.0 { s * 32768.0 } else { s * 32767.0 };
        out.extend_from_slice(&(value as i16).to_le_bytes());
    }
    out
}

/// Wire frame for one captured block.
pub fn encode_block(block: &[f32], mime_type: &str) -> MediaBlob {
    MediaBlob {
        mime_type: mime_type.to_string(),
        data: STANDARD.encode(encode_pcm16(block)),
    }
}

/// Input level indicator: rises instantly, falls by `decay` per block.
#[derive(Debug, Clone)]
pub struct VolumeMeter {
    scale: f32,
    decay: f32,
    level: f32,
}

impl VolumeMeter {
    pub fn new(scale: f32, decay: f32) -> Self {
        Self {
            scale,
            decay,
            level: 0.0,
        }
    }

    pub fn update(&mut self, block: &[f32]) -> f32 {
        self.level = (rms(block) * self.scale).max(self.level * self.decay);
        self.level
    }

    pub fn level(&self) -> f32 {
        self.level
    }

    pub fn reset(&mut self) {
        self.level = 0.0;
    }
}

/// Holds frames captured while the link is still opening.
#[derive(Debug)]
pub struct OutboundGate {
    policy: PreOpenPolicy,
    limit: usize,
    pending: VecDeque<MediaBlob>,
    dropped: u64,
}

impl OutboundGate {
    pub fn new(policy: PreOpenPolicy, limit: usize) -> Self {
        Self {
            policy,
            limit,
            pending: VecDeque::new(),
            dropped: 0,
        }
    }

    /// Called for frames that cannot be sent yet.
    pub fn hold(&mut self, blob: MediaBlob) {
        match self.policy {
            PreOpenPolicy::Drop => self.dropped += 1,
            PreOpenPolicy::Queue => {
                if self.limit == 0 {
                    self.dropped += 1;
                    return;
                }
                if self.pending.len() == self.limit {
                    self.pending.pop_front();
                    self.dropped += 1;
                }
                self.pending.push_back(blob);
            }
        }
    }

    /// Frames to flush once the link is open, oldest first.
    pub fn release(&mut self) -> Vec<MediaBlob> {
        self.pending.drain(..).collect()
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blob(tag: &str) -> MediaBlob {
        MediaBlob {
            mime_type: "audio/pcm;rate=16000".into(),
            data: tag.into(),
        }
    }

    #[test]
    fn rms_of_constant_block() {
        assert_eq!(rms(&[]), 0.0);
        assert!((rms(&[0.5; 64]) - 0.5).abs() < 1e-6);
        assert!((rms(&[0.5, -0.5, 0.5, -0.5]) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn meter_rises_instantly_and_decays() {
        let mut meter = VolumeMeter::new(100.0, 0.9);
        assert!((meter.update(&[0.5; 16]) - 50.0).abs() < 1e-4);
        assert!((meter.update(&[0.0; 16]) - 45.0).abs() < 1e-4);
        assert!((meter.update(&[0.0; 16]) - 40.5).abs() < 1e-4);
        // a louder block wins over the decayed value
        assert!((meter.update(&[0.6; 16]) - 60.0).abs() < 1e-4);
        meter.reset();
        assert_eq!(meter.level(), 0.0);
    }

    #[test]
    fn pcm16_clamps_and_is_little_endian() {
        let bytes = encode_pcm16(&[0.0, 1.0, -1.0, 2.0, -3.0]);
        let samples: Vec<i16> = bytes
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]))
            .collect();
        assert_eq!(samples, vec![0, 32767, -32768, 32767, -32768]);
    }

    #[test]
    fn encoded_block_is_base64_pcm() {
        let frame = encode_block(&[1.0], "audio/pcm;rate=16000");
        assert_eq!(frame.mime_type, "audio/pcm;rate=16000");
        assert_eq!(STANDARD.decode(frame.data).unwrap(), vec![0xff, 0x7f]);
    }

    #[test]
    fn drop_policy_keeps_nothing() {
        let mut gate = OutboundGate::new(PreOpenPolicy::Drop, 8);
        gate.hold(blob("a"));
        gate.hold(blob("b"));
        assert_eq!(gate.pending(), 0);
        assert_eq!(gate.dropped(), 2);
        assert!(gate.release().is_empty());
    }

    #[test]
    fn queue_policy_evicts_oldest() {
        let mut gate = OutboundGate::new(PreOpenPolicy::Queue, 2);
        gate.hold(blob("a"));
        gate.hold(blob("b"));
        gate.hold(blob("c"));
        assert_eq!(gate.dropped(), 1);
        let flushed: Vec<_> = gate.release().into_iter().map(|b| b.data).collect();
        assert_eq!(flushed, vec!["b", "c"]);
        assert_eq!(gate.pending(), 0);
    }
}
