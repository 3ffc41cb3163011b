//! Gapless playback scheduling of inbound chunks.
//!
//! Each chunk starts at `max(cursor, now)` and pushes the cursor to its own
//! end, so consecutive chunks abut exactly. This assumes chunks arrive before
//! their predecessor has finished playing; a late chunk simply starts at `now`
//! and leaves a gap.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;

use super::PlaybackContext;
use crate::event::BufferId;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledBuffer {
    pub id: BufferId,
    pub start: f64,
    pub duration: f64,
}

impl ScheduledBuffer {
    pub fn end(&self) -> f64 {
        self.start + self.duration
    }
}

#[derive(Debug, Default)]
pub struct PlaybackScheduler {
    cursor: f64,
    next_id: BufferId,
    scheduled: BTreeMap<BufferId, ScheduledBuffer>,
}

impl PlaybackScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next free instant on the output timeline.
    pub fn cursor(&self) -> f64 {
        self.cursor
    }

    pub fn len(&self) -> usize {
        self.scheduled.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scheduled.is_empty()
    }

    /// Schedules decoded samples right after everything already queued.
    pub fn schedule(
        &mut self,
        ctx: &mut dyn PlaybackContext,
        samples: Vec<f32>,
    ) -> Result<ScheduledBuffer> {
        let duration = samples.len() as f64 / ctx.sample_rate().max(1) as f64;
        let start = self.cursor.max(ctx.current_time());
        let id = self.next_id;

        ctx.start(id, Arc::from(samples), start)?;

        let record = ScheduledBuffer {
            id,
            start,
            duration,
        };
        self.next_id += 1;
        self.cursor = record.end();
        self.scheduled.insert(id, record);
        Ok(record)
    }

    /// Marks a buffer as played out. Returns true when this emptied the set.
    pub fn finish(&mut self, id: BufferId) -> bool {
        self.scheduled.remove(&id).is_some() && self.scheduled.is_empty()
    }

    /// Stops everything in flight and rewinds the cursor to zero.
    /// Individual stop failures are logged and skipped.
    pub fn interrupt(&mut self, ctx: Option<&mut dyn PlaybackContext>) -> usize {
        let stopped = self.scheduled.len();
        if let Some(ctx) = ctx {
            for id in self.scheduled.keys() {
                if let Err(e) = ctx.stop(*id) {
                    log::warn!("Failed to stop playback buffer {}: {}", id, e);
                }
            }
        }
        self.scheduled.clear();
        self.cursor = 0.0;
        stopped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Context with a hand-set clock that records every call.
    struct ManualContext {
        now: f64,
        started: Vec<(BufferId, f64)>,
        stopped: Vec<BufferId>,
        fail_stop: Option<BufferId>,
    }

    impl ManualContext {
        fn new() -> Self {
            Self {
                now: 0.0,
                started: Vec::new(),
                stopped: Vec::new(),
                fail_stop: None,
            }
        }
    }

    impl PlaybackContext for ManualContext {
        fn sample_rate(&self) -> u32 {
            4
        }
        fn current_time(&self) -> f64 {
            self.now
        }
        fn start(&mut self, id: BufferId, _samples: Arc<[f32]>, at: f64) -> Result<()> {
            self.started.push((id, at));
            Ok(())
        }
        fn stop(&mut self, id: BufferId) -> Result<()> {
            if self.fail_stop == Some(id) {
                anyhow::bail!("already stopped");
            }
            self.stopped.push(id);
            Ok(())
        }
        fn close(&mut self) -> Result<()> {
            Ok(())
        }
        fn is_closed(&self) -> bool {
            false
        }
    }

    const RATE: f64 = 4.0;

    fn seconds(s: f64) -> Vec<f32> {
        vec![0.0; (s * RATE) as usize]
    }

    #[test]
    fn consecutive_chunks_abut_despite_jitter() {
        let mut ctx = ManualContext::new();
        let mut scheduler = PlaybackScheduler::new();

        let a = scheduler.schedule(&mut ctx, seconds(0.5)).unwrap();
        ctx.now = 0.25;
        let b = scheduler.schedule(&mut ctx, seconds(1.25)).unwrap();
        ctx.now = 1.5;
        let c = scheduler.schedule(&mut ctx, seconds(2.0)).unwrap();

        assert_eq!(a.start, 0.0);
        assert_eq!(b.start, a.end());
        assert_eq!(c.start, b.end());
        assert_eq!(scheduler.cursor(), 3.75);
        assert_eq!(ctx.started, vec![(0, 0.0), (1, 0.5), (2, 1.75)]);
    }

    #[test]
    fn never_schedules_in_the_past() {
        let mut ctx = ManualContext::new();
        let mut scheduler = PlaybackScheduler::new();
        scheduler.schedule(&mut ctx, seconds(0.5)).unwrap();
        ctx.now = 3.0;
        let late = scheduler.schedule(&mut ctx, seconds(0.5)).unwrap();
        assert_eq!(late.start, 3.0);
        assert_eq!(scheduler.cursor(), 3.5);
    }

    #[test]
    fn finish_reports_only_the_last_buffer() {
        let mut ctx = ManualContext::new();
        let mut scheduler = PlaybackScheduler::new();
        let a = scheduler.schedule(&mut ctx, seconds(1.0)).unwrap();
        let b = scheduler.schedule(&mut ctx, seconds(1.0)).unwrap();
        assert!(!scheduler.finish(a.id));
        assert!(!scheduler.finish(a.id));
        assert!(scheduler.finish(b.id));
        assert!(!scheduler.finish(b.id));
    }

    #[test]
    fn interrupt_stops_all_and_rewinds() {
        let mut ctx = ManualContext::new();
        let mut scheduler = PlaybackScheduler::new();
        scheduler.schedule(&mut ctx, seconds(1.0)).unwrap();
        scheduler.schedule(&mut ctx, seconds(1.0)).unwrap();
        ctx.fail_stop = Some(0);

        assert_eq!(scheduler.interrupt(Some(&mut ctx as &mut dyn PlaybackContext)), 2);
        assert_eq!(ctx.stopped, vec![1]);
        assert!(scheduler.is_empty());
        assert_eq!(scheduler.cursor(), 0.0);

        ctx.now = 5.0;
        let next = scheduler.schedule(&mut ctx, seconds(1.0)).unwrap();
        assert_eq!(next.start, 5.0);
    }

    #[test]
    fn interrupt_with_nothing_scheduled_is_a_no_op() {
        let mut ctx = ManualContext::new();
        let mut scheduler = PlaybackScheduler::new();
        assert_eq!(scheduler.interrupt(Some(&mut ctx as &mut dyn PlaybackContext)), 0);
        assert_eq!(scheduler.interrupt(None), 0);
        assert!(ctx.stopped.is_empty());
        assert_eq!(scheduler.cursor(), 0.0);
    }
}
