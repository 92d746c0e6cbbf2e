//! Audio capture and spectrum analysis pipeline.
//!
//! A cpal input stream pushes samples into a shared ring; a dedicated
//! analysis thread wakes once per interval, drains pending control messages,
//! analyzes the latest window, and delivers sign-corrected magnitudes to the
//! registered tick callback. The capture stream can be hot-swapped without
//! touching the analysis stage.

pub mod analyzer;
pub mod capture;
pub mod devices;

use std::sync::{Arc, Mutex};
use std::thread;

use crossbeam_channel::{unbounded, RecvTimeoutError, Sender};
use tracing::{debug, trace, warn};

pub use analyzer::{AnalysisConfig, SpectrumAnalyzer, FFT_SIZE};
pub use capture::SampleFeed;
pub use devices::{DeviceDescriptor, DeviceKind, SourceCatalog};

use crate::error::AudioError;

/// Handler invoked once per completed analysis interval, on the analysis
/// thread — asynchronous and possibly concurrent relative to the render loop.
pub type TickCallback = Arc<dyn Fn(&[f32]) + Send + Sync>;

enum ControlMsg {
    SetBandCount(u32),
    SetThreshold(f32),
    SetInterval(std::time::Duration),
    Stop,
}

/// The capture → analyze → publish chain.
pub struct SpectrumSource {
    feed: SampleFeed,
    control: Sender<ControlMsg>,
    thread: Option<thread::JoinHandle<()>>,
    stream: Option<cpal::Stream>,
    device: Option<DeviceDescriptor>,
    callback: Arc<Mutex<Option<TickCallback>>>,
}

impl SpectrumSource {
    /// Build and start the chain on `device`.
    pub fn start(
        config: AnalysisConfig,
        device: &DeviceDescriptor,
    ) -> Result<Self, AudioError> {
        let mut source = Self::start_detached(config)?.0;
        let cpal_device = devices::open_device(&device.name)?;
        let stream = capture::build_capture_stream(&cpal_device, source.feed.clone())?;
        source.stream = Some(stream);
        source.device = Some(device.clone());
        debug!(device = %device.name, "spectrum source started");
        Ok(source)
    }

    /// Start the analysis stage without a capture stream, returning the feed
    /// handle a stream would otherwise own. This is the seam the capture
    /// callback writes through in production and the stub backend for tests.
    pub fn start_detached(config: AnalysisConfig) -> Result<(Self, SampleFeed), AudioError> {
        config
            .validate()
            .map_err(AudioError::ElementLinkFailed)?;

        let feed = SampleFeed::new(FFT_SIZE * 4);
        let callback: Arc<Mutex<Option<TickCallback>>> = Arc::new(Mutex::new(None));
        let (tx, rx) = unbounded();

        let thread_feed = feed.clone();
        let thread_callback = Arc::clone(&callback);
        let handle = thread::spawn(move || {
            let mut analyzer = SpectrumAnalyzer::new(config.band_count, config.threshold_db);
            let mut interval = config.interval;
            let mut window = Vec::with_capacity(FFT_SIZE);
            let mut raw = Vec::with_capacity(analyzer.band_count());

            loop {
                // Control messages are applied between ticks, so no tick runs
                // against a half-reconfigured stage.
                match rx.recv_timeout(interval) {
                    Ok(ControlMsg::SetBandCount(n)) => {
                        analyzer.set_band_count(n);
                        continue;
                    }
                    Ok(ControlMsg::SetThreshold(db)) => {
                        analyzer.set_threshold(db);
                        continue;
                    }
                    Ok(ControlMsg::SetInterval(d)) => {
                        interval = d;
                        continue;
                    }
                    Ok(ControlMsg::Stop) | Err(RecvTimeoutError::Disconnected) => break,
                    Err(RecvTimeoutError::Timeout) => {}
                }

                if !thread_feed.tail(FFT_SIZE, &mut window) {
                    trace!("tick skipped: capture window not yet full");
                    continue;
                }

                let expected = analyzer.band_count();
                let magnitudes = analyzer.analyze(&window);
                if let Err(e) = validate_magnitudes(magnitudes, expected) {
                    warn!("dropping analysis tick: {e}");
                    continue;
                }

                // Negative-dB magnitudes become positive magnitude-like values.
                raw.clear();
                raw.extend(magnitudes.iter().map(|&db| -db));

                let cb = thread_callback.lock().unwrap().clone();
                if let Some(cb) = cb {
                    cb(&raw);
                }
            }
            debug!("analysis thread stopped");
        });

        let source = Self {
            feed: feed.clone(),
            control: tx,
            thread: Some(handle),
            stream: None,
            device: None,
            callback,
        };
        Ok((source, feed))
    }

    /// Register the per-tick handler. Replaces any previous handler.
    pub fn on_tick(&self, callback: impl Fn(&[f32]) + Send + Sync + 'static) {
        *self.callback.lock().unwrap() = Some(Arc::new(callback));
    }

    pub fn device(&self) -> Option<&DeviceDescriptor> {
        self.device.as_ref()
    }

    /// Hot-swap the capture device. The analysis stage and sample ring stay
    /// up; the new stream is built before the old one is dropped, so at most
    /// one interval lacks fresh samples.
    pub fn set_device(&mut self, device: &DeviceDescriptor) -> Result<(), AudioError> {
        let cpal_device = devices::open_device(&device.name)?;
        let stream = capture::build_capture_stream(&cpal_device, self.feed.clone())?;
        self.stream = Some(stream);
        self.device = Some(device.clone());
        debug!(device = %device.name, "capture device swapped");
        Ok(())
    }

    pub fn set_band_count(&self, band_count: u32) {
        let _ = self.control.send(ControlMsg::SetBandCount(band_count));
    }

    pub fn set_threshold(&self, threshold_db: f32) {
        let _ = self.control.send(ControlMsg::SetThreshold(threshold_db));
    }

    pub fn set_interval(&self, interval: std::time::Duration) {
        let _ = self.control.send(ControlMsg::SetInterval(interval));
    }

    /// Tear down stream and analysis thread. Idempotent; safe mid-tick and
    /// after a partially failed start.
    pub fn stop(&mut self) {
        self.stream.take();
        let _ = self.control.send(ControlMsg::Stop);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for SpectrumSource {
    fn drop(&mut self) {
        self.stop();
    }
}

fn validate_magnitudes(magnitudes: &[f32], expected: usize) -> Result<(), AudioError> {
    if magnitudes.len() != expected {
        return Err(AudioError::MalformedAnalysisMessage(format!(
            "expected {expected} magnitudes, got {}",
            magnitudes.len()
        )));
    }
    if let Some(bad) = magnitudes.iter().find(|m| !m.is_finite()) {
        return Err(AudioError::MalformedAnalysisMessage(format!(
            "non-finite magnitude {bad}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn quick_config(band_count: u32) -> AnalysisConfig {
        AnalysisConfig {
            band_count,
            threshold_db: -80.0,
            interval: Duration::from_millis(10),
        }
    }

    fn wait_for_tick(rx: &crossbeam_channel::Receiver<Vec<f32>>) -> Vec<f32> {
        rx.recv_timeout(Duration::from_secs(2))
            .expect("no analysis tick arrived")
    }

    #[test]
    fn detached_pipeline_delivers_sign_corrected_ticks() {
        let (source, feed) = SpectrumSource::start_detached(quick_config(16)).unwrap();
        let (tx, rx) = crossbeam_channel::unbounded();
        source.on_tick(move |raw| {
            let _ = tx.send(raw.to_vec());
        });

        // silence: every band floors at -80 dB, published as +80
        feed.push(&vec![0.0; FFT_SIZE]);
        let tick = wait_for_tick(&rx);
        assert_eq!(tick.len(), 16);
        assert!(tick.iter().all(|&v| (v - 80.0).abs() < 1e-3));
    }

    #[test]
    fn published_values_are_negated_magnitudes() {
        let (source, feed) = SpectrumSource::start_detached(quick_config(8)).unwrap();
        let (tx, rx) = crossbeam_channel::unbounded();
        source.on_tick(move |raw| {
            let _ = tx.send(raw.to_vec());
        });

        let sine: Vec<f32> = (0..FFT_SIZE)
            .map(|i| (2.0 * std::f32::consts::PI * 1000.0 * i as f32 / 48_000.0).sin())
            .collect();
        feed.push(&sine);

        let tick = wait_for_tick(&rx);
        // analyzer emits dB <= 0, so every published value is >= 0
        assert!(tick.iter().all(|&v| (0.0..=80.0).contains(&v)));
        // and the tone keeps at least one band well off the silence floor
        assert!(tick.iter().any(|&v| v < 79.0));
    }

    #[test]
    fn band_count_reconfigures_between_ticks() {
        let (source, feed) = SpectrumSource::start_detached(quick_config(8)).unwrap();
        let (tx, rx) = crossbeam_channel::unbounded();
        source.on_tick(move |raw| {
            let _ = tx.send(raw.len());
        });

        feed.push(&vec![0.0; FFT_SIZE]);
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(2)).unwrap(),
            8
        );

        source.set_band_count(24);
        // drain until the new width shows up; reconfiguration may race one tick
        let mut len = 8;
        for _ in 0..50 {
            feed.push(&vec![0.0; FFT_SIZE]);
            len = rx.recv_timeout(Duration::from_secs(2)).unwrap();
            if len == 24 {
                break;
            }
        }
        assert_eq!(len, 24);
    }

    #[test]
    fn stop_is_idempotent_and_ends_ticks() {
        let (mut source, feed) = SpectrumSource::start_detached(quick_config(4)).unwrap();
        let (tx, rx) = crossbeam_channel::unbounded();
        source.on_tick(move |raw| {
            let _ = tx.send(raw.to_vec());
        });
        feed.push(&vec![0.0; FFT_SIZE]);
        let _ = wait_for_tick(&rx);

        source.stop();
        source.stop();

        while rx.try_recv().is_ok() {}
        feed.push(&vec![0.0; FFT_SIZE]);
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    }

    #[test]
    fn invalid_config_fails_to_start() {
        let bad = AnalysisConfig {
            band_count: 0,
            ..AnalysisConfig::default()
        };
        assert!(matches!(
            SpectrumSource::start_detached(bad),
            Err(AudioError::ElementLinkFailed(_))
        ));
    }

    #[test]
    fn malformed_magnitudes_are_rejected() {
        assert!(validate_magnitudes(&[0.0, -10.0], 2).is_ok());
        assert!(validate_magnitudes(&[0.0], 2).is_err());
        assert!(validate_magnitudes(&[f32::NAN, 0.0], 2).is_err());
    }
}
