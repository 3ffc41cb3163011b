//! ALSA PCM setup for the call: mono S16LE in both directions.

use alsa::pcm::{Access, Format, HwParams, PCM};
use alsa::{Direction, ValueOr};
use anyhow::{Context, Result};

/// What the hardware actually agreed to.
#[derive(Debug, Clone)]
pub struct Negotiated {
    pub sample_rate: u32,
    pub channels: u32,
    /// Period size in frames
    pub period_size: usize,
}

/// Requested PCM configuration.
#[derive(Debug, Clone)]
pub struct PcmRequest<'a> {
    pub device: &'a str,
    pub direction: Direction,
    pub sample_rate: u32,
    pub period_size: Option<usize>,
}

impl<'a> PcmRequest<'a> {
    pub fn capture(device: &'a str, sample_rate: u32) -> Self {
        Self {
            device,
            direction: Direction::Capture,
            sample_rate,
            period_size: None,
        }
    }

    pub fn playback(device: &'a str, sample_rate: u32, period_size: usize) -> Self {
        Self {
            device,
            direction: Direction::Playback,
            sample_rate,
            period_size: (period_size > 0).then_some(period_size),
        }
    }

    fn label(&self) -> &'static str {
        match self.direction {
            Direction::Capture => "Capture",
            Direction::Playback => "Playback",
        }
    }

    pub fn open(&self) -> Result<(PCM, Negotiated)> {
        let pcm = PCM::new(self.device, self.direction, false).with_context(|| {
            format!("Failed to open PCM device '{}' for {}", self.device, self.label())
        })?;

        {
            let hwp = HwParams::any(&pcm).context("Failed to initialize HwParams")?;
            hwp.set_access(Access::RWInterleaved)?;
            hwp.set_format(Format::S16LE)?;
            hwp.set_channels(1)?;
            hwp.set_rate_near(self.sample_rate, ValueOr::Nearest)?;
            if let Some(ps) = self.period_size {
                hwp.set_period_size_near(ps as alsa::pcm::Frames, ValueOr::Nearest)?;
            }
            pcm.hw_params(&hwp)?;
        }

        let negotiated = {
            let hwp = pcm.hw_params_current()?;
            Negotiated {
                sample_rate: hwp.get_rate()?,
                channels: hwp.get_channels()?,
                period_size: hwp.get_period_size()? as usize,
            }
        };

        if negotiated.sample_rate != self.sample_rate {
            // 采样率不一致时时钟和编码都会错位，直接拒绝
            anyhow::bail!(
                "{} device '{}' refused {} Hz (got {} Hz)",
                self.label(),
                self.device,
                self.sample_rate,
                negotiated.sample_rate
            );
        }

        log::info!(
            "ALSA {}: device={}, rate={}, channels={}, period_size={}",
            self.label(),
            self.device,
            negotiated.sample_rate,
            negotiated.channels,
            negotiated.period_size,
        );

        Ok((pcm, negotiated))
    }
}
