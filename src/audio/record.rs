use std::sync::atomic::{AtomicBool, Ordering};

use alsa::pcm::PCM;
use anyhow::Result;

use super::alsa_device::Negotiated;
use crate::event::{CallEvent, EventSink};

/// Reads periods from the capture PCM, regroups them into fixed-size mono
/// blocks and posts each block to the call. Nothing is ever written to an
/// output device from here.
pub fn record_thread(
    pcm: PCM,
    params: Negotiated,
    block_size: usize,
    sink: EventSink,
    running: &AtomicBool,
) -> Result<()> {
    let block_size = block_size.max(1);
    let mut read_buf = vec![0i16; params.period_size.max(1)];
    let mut block: Vec<f32> = Vec::with_capacity(block_size);

    let io = pcm.io_i16()?;

    log::info!(
        "Recording started: rate={}, period={}, block={}",
        params.sample_rate,
        params.period_size,
        block_size,
    );

    while running.load(Ordering::Relaxed) {
        match io.readi(&mut read_buf) {
            Ok(frames) => {
                for &sample in &read_buf[..frames] {
                    block.push(sample as f32 / 32768.0);
                    if block.len() == block_size {
                        let full = std::mem::replace(&mut block, Vec::with_capacity(block_size));
                        if !sink.send(CallEvent::Captured(full)) {
                            log::warn!("Call controller gone, stopping capture");
                            return Ok(());
                        }
                    }
                }
            }
            Err(e) => {
                log::warn!("ALSA capture error: {}, recovering...", e);
                if let Err(e2) = pcm.prepare() {
                    log::error!("Failed to recover PCM capture: {}", e2);
                    return Err(e2.into());
                }
            }
        }
    }

    log::info!("Recording stopped");
    Ok(())
}
