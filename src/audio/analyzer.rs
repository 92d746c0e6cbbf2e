//! FFT-based spectrum analysis producing per-band dB magnitudes.
//!
//! The analyzer owns its FFT plan and scratch buffers and is driven by the
//! analysis thread: one `analyze` call per tick over the latest window of
//! captured samples. Output magnitudes are dB relative to full scale, floored
//! at the configured threshold, so values sit in `[threshold_db, 0]`.

use std::sync::Arc;
use std::time::Duration;

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};

/// Samples per analysis window.
pub const FFT_SIZE: usize = 2048;

/// Parameters of one pipeline run.
#[derive(Debug, Clone)]
pub struct AnalysisConfig {
    /// Number of spectral bands emitted per tick (1..=256).
    pub band_count: u32,
    /// Magnitude floor in dB; quieter bands clamp to this value.
    pub threshold_db: f32,
    /// Time between analysis ticks.
    pub interval: Duration,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            band_count: 70,
            threshold_db: -80.0,
            interval: Duration::from_millis(50),
        }
    }
}

impl AnalysisConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !(1..=256).contains(&self.band_count) {
            return Err(format!("band count must be 1..=256, got {}", self.band_count));
        }
        if self.threshold_db >= 0.0 {
            return Err(format!(
                "threshold must be below 0 dB, got {}",
                self.threshold_db
            ));
        }
        if self.interval.is_zero() {
            return Err("analysis interval must be non-zero".into());
        }
        Ok(())
    }
}

pub struct SpectrumAnalyzer {
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    fft_buffer: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
    band_count: usize,
    threshold_db: f32,
    magnitudes: Vec<f32>,
}

impl SpectrumAnalyzer {
    pub fn new(band_count: u32, threshold_db: f32) -> Self {
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(FFT_SIZE);
        let scratch_len = fft.get_inplace_scratch_len();

        // Pre-compute Hann window
        let window: Vec<f32> = (0..FFT_SIZE)
            .map(|i| {
                let t = i as f32 / (FFT_SIZE - 1) as f32;
                0.5 * (1.0 - (2.0 * std::f32::consts::PI * t).cos())
            })
            .collect();

        let band_count = band_count.clamp(1, 256) as usize;
        Self {
            fft,
            window,
            fft_buffer: vec![Complex::new(0.0, 0.0); FFT_SIZE],
            scratch: vec![Complex::new(0.0, 0.0); scratch_len],
            band_count,
            threshold_db,
            magnitudes: vec![threshold_db; band_count],
        }
    }

    pub fn band_count(&self) -> usize {
        self.band_count
    }

    /// Change the number of emitted bands; the magnitude buffer resizes with it.
    pub fn set_band_count(&mut self, band_count: u32) {
        self.band_count = band_count.clamp(1, 256) as usize;
        self.magnitudes = vec![self.threshold_db; self.band_count];
    }

    pub fn set_threshold(&mut self, threshold_db: f32) {
        self.threshold_db = threshold_db;
    }

    /// Analyze one window of samples and return `band_count` dB magnitudes.
    ///
    /// `samples` shorter than the FFT size are treated as silence-padded.
    /// NaN/Inf samples are sanitized to 0 so they cannot contaminate every
    /// band through the transform.
    pub fn analyze(&mut self, samples: &[f32]) -> &[f32] {
        for i in 0..FFT_SIZE {
            let s = samples.get(i).copied().unwrap_or(0.0);
            let s = if s.is_finite() { s } else { 0.0 };
            self.fft_buffer[i] = Complex::new(s * self.window[i], 0.0);
        }

        self.fft
            .process_with_scratch(&mut self.fft_buffer, &mut self.scratch);

        // Positive frequencies only, grouped linearly into band_count bands.
        let half = FFT_SIZE / 2;
        let norm = 1.0 / (FFT_SIZE as f32 * FFT_SIZE as f32);
        for b in 0..self.band_count {
            let start = b * half / self.band_count;
            let end = (((b + 1) * half / self.band_count).max(start + 1)).min(half);

            let mut power = 0.0f32;
            for bin in start..end {
                power += self.fft_buffer[bin].norm_sqr() * norm;
            }
            power /= (end - start) as f32;

            let db = 10.0 * power.max(1e-12).log10();
            self.magnitudes[b] = db.clamp(self.threshold_db, 0.0);
        }

        &self.magnitudes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, sample_rate: f32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * std::f32::consts::PI * freq * i as f32 / sample_rate).sin())
            .collect()
    }

    #[test]
    fn silence_floors_at_threshold() {
        let mut analyzer = SpectrumAnalyzer::new(16, -80.0);
        let bands = analyzer.analyze(&vec![0.0; FFT_SIZE]);
        assert_eq!(bands.len(), 16);
        assert!(bands.iter().all(|&b| b == -80.0));
    }

    #[test]
    fn sine_concentrates_in_matching_band() {
        let band_count = 32u32;
        let sample_rate = 48_000.0;
        let freq = 2_000.0;
        let mut analyzer = SpectrumAnalyzer::new(band_count, -80.0);
        let bands = analyzer.analyze(&sine(freq, sample_rate, FFT_SIZE)).to_vec();

        let bin = (freq * FFT_SIZE as f32 / sample_rate) as usize;
        let expected = bin * band_count as usize / (FFT_SIZE / 2);

        let loudest = bands
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap();
        assert!(
            loudest.abs_diff(expected) <= 1,
            "loudest band {loudest}, expected near {expected}: {bands:?}"
        );
        // distant bands stay far quieter
        assert!(bands[loudest] > bands[band_count as usize - 1] + 20.0);
    }

    #[test]
    fn magnitudes_stay_in_threshold_range() {
        let mut analyzer = SpectrumAnalyzer::new(24, -80.0);
        let bands = analyzer.analyze(&sine(440.0, 48_000.0, FFT_SIZE));
        assert!(bands.iter().all(|&b| (-80.0..=0.0).contains(&b)));
    }

    #[test]
    fn non_finite_samples_are_sanitized() {
        let mut analyzer = SpectrumAnalyzer::new(8, -80.0);
        let mut samples = vec![0.0; FFT_SIZE];
        samples[0] = f32::NAN;
        samples[1] = f32::INFINITY;
        let bands = analyzer.analyze(&samples);
        assert!(bands.iter().all(|b| b.is_finite()));
    }

    #[test]
    fn set_band_count_resizes_output() {
        let mut analyzer = SpectrumAnalyzer::new(8, -80.0);
        analyzer.set_band_count(70);
        assert_eq!(analyzer.band_count(), 70);
        assert_eq!(analyzer.analyze(&vec![0.0; FFT_SIZE]).len(), 70);
    }

    #[test]
    fn short_input_is_padded_not_rejected() {
        let mut analyzer = SpectrumAnalyzer::new(8, -80.0);
        let bands = analyzer.analyze(&[0.5; 32]);
        assert_eq!(bands.len(), 8);
        assert!(bands.iter().all(|b| b.is_finite()));
    }

    #[test]
    fn config_validation() {
        assert!(AnalysisConfig::default().validate().is_ok());

        let bad = AnalysisConfig {
            band_count: 0,
            ..Default::default()
        };
        assert!(bad.validate().is_err());

        let bad = AnalysisConfig {
            threshold_db: 1.0,
            ..Default::default()
        };
        assert!(bad.validate().is_err());

        let bad = AnalysisConfig {
            interval: Duration::ZERO,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }
}
