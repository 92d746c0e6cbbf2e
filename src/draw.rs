//! Band-to-bar mapping and frame pacing.
//!
//! `render` is a pure function from a band snapshot to stroked line segments
//! in pixel space; the wgpu layer turns those into quads. Keeping the mapping
//! pure keeps the flip/orientation/blend arithmetic testable without a GPU.

use std::time::{Duration, Instant};

/// Practical ceiling of the sign-corrected magnitudes, matching the analysis
/// threshold of -80 dB. Used to normalize band values for extent and color.
pub const MAGNITUDE_CEILING: f32 = 80.0;

/// Which axis the bars are laid out along.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Orientation {
    /// Bars arranged along x, extending vertically.
    #[default]
    Horizontal,
    /// Bars arranged along y, extending horizontally.
    Vertical,
}

/// Visual parameters for one render pass.
#[derive(Debug, Clone)]
pub struct RenderConfig {
    pub line_width: f32,
    pub color: [f32; 4],
    pub flip_vertical: bool,
    pub flip_horizontal: bool,
    pub orientation: Orientation,
    /// Caps how many render bands are drawn.
    pub spect_override: Option<u32>,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            line_width: 5.0,
            color: [1.0, 0.4, 1.0, 1.0],
            flip_vertical: false,
            flip_horizontal: false,
            orientation: Orientation::Horizontal,
            spect_override: None,
        }
    }
}

/// One stroked line segment in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bar {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
    pub width: f32,
    pub color: [f32; 4],
}

/// Map band magnitudes to bar segments for a `width` x `height` surface.
///
/// Each visible band draws one segment from the baseline edge toward
/// `extent * clamp(v/80, 0, 1)`, with the base color blended toward white
/// along the band axis and scaled by a minimum-brightness intensity term.
/// Out-of-range or non-finite band values render as zero intensity.
pub fn render(bands: &[f32], config: &RenderConfig, width: f32, height: f32) -> Vec<Bar> {
    let len = bands.len();
    let visible = config
        .spect_override
        .map(|n| n as usize)
        .unwrap_or(len)
        .min(len);
    if visible == 0 {
        return Vec::new();
    }

    let mut bars = Vec::with_capacity(visible);
    for i in 0..visible {
        let v = bands.get(i).copied().unwrap_or(0.0);
        let v = if v.is_finite() { v } else { 0.0 };
        let norm = (v / MAGNITUDE_CEILING).clamp(0.0, 1.0);

        let blend = if visible > 1 {
            let t = i as f32 / (visible - 1) as f32;
            if config.flip_horizontal {
                1.0 - t
            } else {
                t
            }
        } else {
            0.0
        };
        let intensity = norm.sqrt().max(0.2);
        let color = [
            (config.color[0] + (1.0 - config.color[0]) * blend) * intensity,
            (config.color[1] + (1.0 - config.color[1]) * blend) * intensity,
            (config.color[2] + (1.0 - config.color[2]) * blend) * intensity,
            config.color[3],
        ];

        let bar = match config.orientation {
            Orientation::Horizontal => {
                let x = config.line_width / 2.0 + i as f32 * width / visible as f32;
                let x = if config.flip_horizontal { width - x } else { x };
                let (y0, y1) = if config.flip_vertical {
                    (0.0, height - height * norm)
                } else {
                    (height, height * norm)
                };
                Bar {
                    x0: x,
                    y0,
                    x1: x,
                    y1,
                    width: config.line_width,
                    color,
                }
            }
            Orientation::Vertical => {
                let y = config.line_width / 2.0 + i as f32 * height / visible as f32;
                let y = if config.flip_vertical { height - y } else { y };
                let (x0, x1) = if config.flip_horizontal {
                    (0.0, width - width * norm)
                } else {
                    (width, width * norm)
                };
                Bar {
                    x0,
                    y0: y,
                    x1,
                    y1: y,
                    width: config.line_width,
                    color,
                }
            }
        };
        bars.push(bar);
    }

    bars
}

/// Repeating render deadline at `1000/fps` ms.
///
/// The timer is not self-adjusting: `set_fps` cancels the schedule and
/// restarts it with the new period, and that is the only way to change
/// cadence.
#[derive(Debug)]
pub struct FrameTimer {
    fps: u32,
    period: Duration,
    next: Instant,
}

impl FrameTimer {
    pub fn new(fps: u32) -> Self {
        let fps = fps.max(1);
        let period = Duration::from_secs_f64(1.0 / fps as f64);
        Self {
            fps,
            period,
            next: Instant::now() + period,
        }
    }

    pub fn fps(&self) -> u32 {
        self.fps
    }

    /// Restart the schedule with a new rate.
    pub fn set_fps(&mut self, fps: u32) {
        *self = Self::new(fps);
    }

    /// True when a frame is due; advances the deadline when it fires.
    pub fn tick(&mut self, now: Instant) -> bool {
        if now >= self.next {
            self.next = now + self.period;
            true
        } else {
            false
        }
    }

    pub fn next_deadline(&self) -> Instant {
        self.next
    }
}
