//! Sample capture: a fixed-capacity ring written by the cpal callback and
//! drained by the analysis thread.

use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{SampleFormat, SizedSample, StreamConfig};
use rustfft::num_traits::ToPrimitive;
use tracing::debug;

use crate::error::AudioError;

/// Mono sample ring. Overwrites the oldest data once full.
pub struct SampleRing {
    data: Vec<f32>,
    write_idx: usize,
    filled: bool,
}

impl SampleRing {
    pub fn new(cap: usize) -> Self {
        Self {
            data: vec![0.0; cap.max(1)],
            write_idx: 0,
            filled: false,
        }
    }

    #[inline]
    pub fn push(&mut self, x: f32) {
        self.data[self.write_idx] = x;
        self.write_idx = (self.write_idx + 1) % self.data.len();
        if self.write_idx == 0 {
            self.filled = true;
        }
    }

    pub fn len(&self) -> usize {
        if self.filled {
            self.data.len()
        } else {
            self.write_idx
        }
    }

    pub fn is_empty(&self) -> bool {
        !self.filled && self.write_idx == 0
    }

    /// Copy the most recent `n` samples into `out`. False if fewer than `n`
    /// samples have been captured so far.
    pub fn tail(&self, n: usize, out: &mut Vec<f32>) -> bool {
        let cap = self.data.len();
        if n == 0 {
            out.clear();
            return true;
        }
        if self.len() < n {
            return false;
        }

        out.resize(n, 0.0);
        if self.filled {
            let start = (self.write_idx + cap - n) % cap;
            if start + n <= cap {
                out.copy_from_slice(&self.data[start..start + n]);
            } else {
                let first = cap - start;
                out[..first].copy_from_slice(&self.data[start..cap]);
                out[first..].copy_from_slice(&self.data[..n - first]);
            }
        } else {
            out.copy_from_slice(&self.data[self.write_idx - n..self.write_idx]);
        }
        true
    }

    pub fn clear(&mut self) {
        self.data.fill(0.0);
        self.write_idx = 0;
        self.filled = false;
    }
}

/// Shared write handle to the ring. The capture callback and the stub feed
/// used in tests both push through this.
#[derive(Clone)]
pub struct SampleFeed {
    ring: Arc<Mutex<SampleRing>>,
}

impl SampleFeed {
    pub fn new(cap: usize) -> Self {
        Self {
            ring: Arc::new(Mutex::new(SampleRing::new(cap))),
        }
    }

    /// Push mono samples. Uses `try_lock` so the audio callback never blocks
    /// behind an in-flight analysis read.
    pub fn push(&self, samples: &[f32]) {
        if let Ok(mut ring) = self.ring.try_lock() {
            for &s in samples {
                ring.push(s);
            }
        }
    }

    /// Copy the most recent `n` samples into `out`.
    pub fn tail(&self, n: usize, out: &mut Vec<f32>) -> bool {
        match self.ring.lock() {
            Ok(ring) => ring.tail(n, out),
            Err(_) => false,
        }
    }

    pub fn clear(&self) {
        if let Ok(mut ring) = self.ring.lock() {
            ring.clear();
        }
    }
}

/// Build and start a capture stream that downmixes to mono into `feed`.
pub fn build_capture_stream(
    device: &cpal::Device,
    feed: SampleFeed,
) -> Result<cpal::Stream, AudioError> {
    let default_config = device
        .default_input_config()
        .map_err(|e| AudioError::DeviceUnavailable(e.to_string()))?;
    let sample_format = default_config.sample_format();
    let config: StreamConfig = default_config.into();

    debug!(
        channels = config.channels,
        rate = config.sample_rate.0,
        format = ?sample_format,
        "building capture stream"
    );

    let stream = match sample_format {
        SampleFormat::F32 => build_stream::<f32>(device, &config, feed)?,
        SampleFormat::I16 => build_stream::<i16>(device, &config, feed)?,
        SampleFormat::U16 => build_stream::<u16>(device, &config, feed)?,
        other => {
            return Err(AudioError::ElementLinkFailed(format!(
                "unsupported sample format {other:?}"
            )))
        }
    };

    stream
        .play()
        .map_err(|e| AudioError::ElementLinkFailed(e.to_string()))?;
    Ok(stream)
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    feed: SampleFeed,
) -> Result<cpal::Stream, AudioError>
where
    T: SizedSample + ToPrimitive,
{
    let channels = config.channels.max(1) as usize;
    let mut mono = Vec::new();

    let stream = device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                mono.clear();
                for frame in data.chunks_exact(channels) {
                    let mut acc = 0.0f32;
                    for s in frame {
                        acc += s.to_f32().unwrap_or(0.0);
                    }
                    mono.push(acc / channels as f32);
                }
                feed.push(&mono);
            },
            |err| debug!("capture stream error: {err}"),
            None,
        )
        .map_err(|e| AudioError::ElementLinkFailed(e.to_string()))?;

    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_tail_reports_underfill() {
        let mut ring = SampleRing::new(8);
        ring.push(1.0);
        let mut out = Vec::new();
        assert!(!ring.tail(2, &mut out));
        assert!(ring.tail(1, &mut out));
        assert_eq!(out, vec![1.0]);
    }

    #[test]
    fn ring_tail_wraps_around() {
        let mut ring = SampleRing::new(4);
        for i in 0..6 {
            ring.push(i as f32);
        }
        let mut out = Vec::new();
        assert!(ring.tail(4, &mut out));
        assert_eq!(out, vec![2.0, 3.0, 4.0, 5.0]);

        assert!(ring.tail(3, &mut out));
        assert_eq!(out, vec![3.0, 4.0, 5.0]);
    }

    #[test]
    fn feed_round_trips_samples() {
        let feed = SampleFeed::new(16);
        feed.push(&[0.1, 0.2, 0.3]);
        let mut out = Vec::new();
        assert!(feed.tail(3, &mut out));
        assert_eq!(out, vec![0.1, 0.2, 0.3]);

        feed.clear();
        assert!(!feed.tail(1, &mut out));
    }
}
