//! Software output timeline: buffers placed at absolute frame positions,
//! mixed period by period.
//!
//! The clock is the number of frames rendered so far. Both the virtual and the
//! ALSA playback contexts drive one of these.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::event::BufferId;

#[derive(Debug)]
struct Voice {
    start: u64,
    samples: Arc<[f32]>,
}

impl Voice {
    fn end(&self) -> u64 {
        self.start + self.samples.len() as u64
    }
}

#[derive(Debug)]
pub struct Timeline {
    sample_rate: u32,
    position: u64,
    voices: BTreeMap<BufferId, Voice>,
}

impl Timeline {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate: sample_rate.max(1),
            position: 0,
            voices: BTreeMap::new(),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Current clock in seconds.
    pub fn now(&self) -> f64 {
        self.position as f64 / self.sample_rate as f64
    }

    pub fn seconds_to_frames(&self, seconds: f64) -> u64 {
        (seconds.max(0.0) * self.sample_rate as f64).round() as u64
    }

    /// Places a buffer at `at` seconds. Anything in the past starts now.
    pub fn schedule(&mut self, id: BufferId, samples: Arc<[f32]>, at: f64) {
        let start = self.seconds_to_frames(at).max(self.position);
        self.voices.insert(id, Voice { start, samples });
    }

    /// Removes a buffer without it counting as finished.
    pub fn cancel(&mut self, id: BufferId) -> bool {
        self.voices.remove(&id).is_some()
    }

    pub fn clear(&mut self) {
        self.voices.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.voices.is_empty()
    }

    pub fn len(&self) -> usize {
        self.voices.len()
    }

    /// Mixes the next `out.len()` frames into `out` and advances the clock.
    /// Returns the buffers that finished within this period, earliest end first.
    pub fn render(&mut self, out: &mut [f32]) -> Vec<BufferId> {
        out.fill(0.0);
        let period_start = self.position;
        let period_end = period_start + out.len() as u64;

        for voice in self.voices.values() {
            let from = voice.start.max(period_start);
            let to = voice.end().min(period_end);
            if from >= to {
                continue;
            }
            for frame in from..to {
                let src = (frame - voice.start) as usize;
                let dst = (frame - period_start) as usize;
                out[dst] += voice.samples[src];
            }
        }
        for sample in out.iter_mut() {
            *sample = sample.clamp(-1.0, 1.0);
        }

        self.position = period_end;
        self.collect_finished()
    }

    /// Advances the clock by `frames` without keeping the mix.
    pub fn advance(&mut self, frames: u64) -> Vec<BufferId> {
        let mut finished = Vec::new();
        let mut scratch = vec![0.0f32; 4096];
        let mut remaining = frames;
        while remaining > 0 {
            let n = remaining.min(scratch.len() as u64) as usize;
            finished.extend(self.render(&mut scratch[..n]));
            remaining -= n as u64;
        }
        // zero-length buffers finish on the next tick even if nothing was rendered
        if frames == 0 {
            finished.extend(self.collect_finished());
        }
        finished
    }

    fn collect_finished(&mut self) -> Vec<BufferId> {
        let mut done: Vec<(u64, BufferId)> = self
            .voices
            .iter()
            .filter(|(_, v)| v.end() <= self.position)
            .map(|(id, v)| (v.end(), *id))
            .collect();
        done.sort();
        for (_, id) in &done {
            self.voices.remove(id);
        }
        done.into_iter().map(|(_, id)| id).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ones(n: usize) -> Arc<[f32]> {
        vec![0.25f32; n].into()
    }

    #[test]
    fn clock_follows_rendered_frames() {
        let mut t = Timeline::new(100);
        assert_eq!(t.now(), 0.0);
        t.advance(50);
        assert_eq!(t.now(), 0.5);
    }

    #[test]
    fn buffer_plays_at_its_start_and_finishes() {
        let mut t = Timeline::new(10);
        t.schedule(1, ones(5), 0.3);
        let mut out = [0.0f32; 10];
        let finished = t.render(&mut out);
        assert_eq!(finished, vec![1]);
        assert_eq!(&out[..3], &[0.0; 3]);
        assert_eq!(&out[3..8], &[0.25; 5]);
        assert_eq!(&out[8..], &[0.0; 2]);
        assert!(t.is_empty());
    }

    #[test]
    fn past_start_is_moved_to_now() {
        let mut t = Timeline::new(10);
        t.advance(10);
        t.schedule(1, ones(10), 0.0);
        assert!(t.advance(9).is_empty());
        assert_eq!(t.advance(1), vec![1]);
    }

    #[test]
    fn cancelled_buffer_never_finishes() {
        let mut t = Timeline::new(10);
        t.schedule(1, ones(5), 0.0);
        assert!(t.cancel(1));
        assert!(!t.cancel(1));
        assert!(t.advance(20).is_empty());
    }

    #[test]
    fn overlapping_voices_are_mixed_and_clamped() {
        let mut t = Timeline::new(4);
        t.schedule(1, vec![0.75f32; 4].into(), 0.0);
        t.schedule(2, vec![0.75f32; 4].into(), 0.0);
        let mut out = [0.0f32; 4];
        let finished = t.render(&mut out);
        assert_eq!(out, [1.0; 4]);
        assert_eq!(finished, vec![1, 2]);
    }
}
