use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use alsa::pcm::PCM;
use anyhow::Result;

use super::alsa_device::Negotiated;
use super::timeline::Timeline;
use crate::event::{CallEvent, EventSink};

const MAX_RECOVERY_RETRIES: u32 = 3;

/// Renders the shared timeline one period at a time and writes it to ALSA.
/// The blocking write paces the loop, so the timeline clock tracks the device.
pub fn play_thread(
    pcm: PCM,
    params: Negotiated,
    timeline: Arc<Mutex<Timeline>>,
    sink: EventSink,
    running: &AtomicBool,
) -> Result<()> {
    let period = params.period_size.max(1);
    let mut mix = vec![0.0f32; period];
    let mut out = vec![0i16; period];

    let io = pcm.io_i16()?;

    log::info!(
        "Playback started: rate={}, period={}",
        params.sample_rate,
        period,
    );

    while running.load(Ordering::Relaxed) {
        let finished = {
            let mut timeline = timeline.lock().unwrap_or_else(|p| p.into_inner());
            timeline.render(&mut mix)
        };
        for id in finished {
            sink.send(CallEvent::PlaybackEnded(id));
        }

        for (dst, src) in out.iter_mut().zip(&mix) {
            *dst = (src * 32767.0) as i16;
        }

        // 写入失败时恢复 PCM 并重试剩余帧，持续失败则丢弃本周期
        let mut frames_written = 0;
        let mut retry_count = 0u32;
        while frames_written < period {
            match io.writei(&out[frames_written..]) {
                Ok(n) => {
                    frames_written += n;
                    retry_count = 0;
                }
                Err(e) => {
                    log::warn!("ALSA XRUN or error: {}, recovering...", e);
                    retry_count += 1;
                    if let Err(e2) = pcm.prepare() {
                        log::error!("Failed to recover PCM playback: {}", e2);
                        return Err(e2.into());
                    }
                    if retry_count >= MAX_RECOVERY_RETRIES {
                        log::error!(
                            "Max recovery retries ({}) reached. Dropping {} unwritten frames.",
                            retry_count,
                            period - frames_written
                        );
                        break;
                    }
                }
            }
        }
    }

    log::info!("Playback stopped");
    Ok(())
}
