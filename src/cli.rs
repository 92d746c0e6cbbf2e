//! Command-line argument parsing.

use clap::Parser;

/// Command line arguments
#[derive(Parser, Debug)]
#[command(name = "Specwave")]
#[command(about = "Audio-reactive spectrum visualizer", long_about = None)]
pub struct Args {
    /// Capture device name (overrides the stored setting for this run)
    #[arg(long, value_name = "NAME")]
    pub device: Option<String>,

    /// List available capture devices and exit
    #[arg(long)]
    pub list_devices: bool,

    /// Render frame rate (overrides the stored setting for this run)
    #[arg(long, value_name = "FPS")]
    pub fps: Option<u32>,

    /// Number of analyzed spectrum bands (overrides the stored setting)
    #[arg(long, value_name = "N")]
    pub bands: Option<u32>,
}

impl Args {
    /// Fold run-time overrides into the stored settings snapshot.
    pub fn apply(&self, settings: &mut crate::config::VizSettings) {
        if let Some(device) = &self.device {
            settings.device = Some(device.clone());
        }
        if let Some(fps) = self.fps {
            settings.fps = fps.clamp(1, 240);
        }
        if let Some(bands) = self.bands {
            settings.band_count = bands.clamp(1, 256);
        }
    }
}
