//! Typed settings store with change notifications and TOML persistence.
//!
//! Stands in for the desktop settings daemon: collaborators read a snapshot,
//! mutate through typed setters, and consume the change stream at their own
//! reconfigure boundary. Layering follows defaults -> config file -> env
//! overrides -> clamping sanitization.

use std::path::PathBuf;
use std::sync::Mutex;
use std::{env, fs};

use anyhow::{Context, Result};
use crossbeam_channel::{unbounded, Receiver, Sender};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::draw::Orientation;

/// Everything the visualizer can be configured with.
#[derive(Debug, Clone, PartialEq)]
pub struct VizSettings {
    pub band_count: u32,
    pub width: u32,
    pub height: u32,
    pub line_width: f32,
    pub fps: u32,
    pub color: [f32; 4],
    pub flip_vertical: bool,
    pub flip_horizontal: bool,
    pub orientation: Orientation,
    pub override_enabled: bool,
    pub override_count: u32,
    pub position: (i32, i32),
    pub device: Option<String>,
}

impl Default for VizSettings {
    fn default() -> Self {
        Self {
            band_count: 70,
            width: 720,
            height: 200,
            line_width: 5.0,
            fps: 30,
            color: [1.0, 0.4, 1.0, 1.0],
            flip_vertical: false,
            flip_horizontal: false,
            orientation: Orientation::Horizontal,
            override_enabled: false,
            override_count: 70,
            position: (0, 0),
            device: None,
        }
    }
}

impl VizSettings {
    /// Cap on drawn bands, when enabled.
    pub fn spect_override(&self) -> Option<u32> {
        self.override_enabled.then_some(self.override_count)
    }

    /// Render bands are mirrored/duplicated past the analyzed ones.
    pub fn render_band_count(&self) -> usize {
        (self.band_count as usize) * 4 / 3
    }

    fn sanitize(&mut self) {
        // clamp instead of failing
        self.band_count = self.band_count.clamp(1, 256);
        self.width = self.width.clamp(1, 7680);
        self.height = self.height.clamp(1, 4320);
        self.line_width = self.line_width.clamp(1.0, 20.0);
        self.fps = self.fps.clamp(1, 240);
        for c in &mut self.color {
            *c = c.clamp(0.0, 1.0);
        }
        self.override_count = self.override_count.clamp(1, 256);
    }
}

/// One typed change event, emitted by the setter that caused it.
#[derive(Debug, Clone, PartialEq)]
pub enum SettingsChange {
    BandCount(u32),
    Size(u32, u32),
    LineWidth(f32),
    Fps(u32),
    Color([f32; 4]),
    FlipVertical(bool),
    FlipHorizontal(bool),
    Orientation(Orientation),
    Override(Option<u32>),
    Position(i32, i32),
    Device(String),
}

/// Settings plus subscription table and optional on-disk backing file.
pub struct SettingsStore {
    settings: Mutex<VizSettings>,
    subscribers: Mutex<Vec<Sender<SettingsChange>>>,
    path: Option<PathBuf>,
}

impl SettingsStore {
    /// Load from the user config dir (or `SPECWAVE_CONFIG`), apply env
    /// overrides, and sanitize.
    pub fn load() -> Result<Self> {
        let path = config_path()?;
        let mut settings = VizSettings::default();

        if path.exists() {
            let text = fs::read_to_string(&path)
                .with_context(|| format!("failed to read settings: {}", path.display()))?;
            let file: FileSettings = toml::from_str(&text)
                .with_context(|| format!("invalid TOML in {}", path.display()))?;
            file.apply(&mut settings);
        }

        apply_env(&mut settings);
        settings.sanitize();

        Ok(Self {
            settings: Mutex::new(settings),
            subscribers: Mutex::new(Vec::new()),
            path: Some(path),
        })
    }

    /// Store without a backing file. Used by tests and `--list-devices` runs.
    pub fn in_memory(settings: VizSettings) -> Self {
        Self {
            settings: Mutex::new(settings),
            subscribers: Mutex::new(Vec::new()),
            path: None,
        }
    }

    /// Current snapshot.
    pub fn get(&self) -> VizSettings {
        self.settings.lock().unwrap().clone()
    }

    /// Subscribe to all future changes.
    pub fn subscribe(&self) -> Receiver<SettingsChange> {
        let (tx, rx) = unbounded();
        self.subscribers.lock().unwrap().push(tx);
        rx
    }

    pub fn set_band_count(&self, n: u32) {
        let n = n.clamp(1, 256);
        self.update(|s| s.band_count = n, SettingsChange::BandCount(n));
    }

    pub fn set_size(&self, width: u32, height: u32) {
        self.update(
            |s| {
                s.width = width.max(1);
                s.height = height.max(1);
            },
            SettingsChange::Size(width, height),
        );
    }

    pub fn set_line_width(&self, width: f32) {
        let width = width.clamp(1.0, 20.0);
        self.update(|s| s.line_width = width, SettingsChange::LineWidth(width));
    }

    pub fn set_fps(&self, fps: u32) {
        let fps = fps.clamp(1, 240);
        self.update(|s| s.fps = fps, SettingsChange::Fps(fps));
    }

    pub fn set_color(&self, color: [f32; 4]) {
        self.update(|s| s.color = color, SettingsChange::Color(color));
    }

    pub fn set_flip_vertical(&self, flip: bool) {
        self.update(|s| s.flip_vertical = flip, SettingsChange::FlipVertical(flip));
    }

    pub fn set_flip_horizontal(&self, flip: bool) {
        self.update(
            |s| s.flip_horizontal = flip,
            SettingsChange::FlipHorizontal(flip),
        );
    }

    pub fn set_orientation(&self, orientation: Orientation) {
        self.update(
            |s| s.orientation = orientation,
            SettingsChange::Orientation(orientation),
        );
    }

    pub fn set_override(&self, cap: Option<u32>) {
        self.update(
            |s| match cap {
                Some(n) => {
                    s.override_enabled = true;
                    s.override_count = n.clamp(1, 256);
                }
                None => s.override_enabled = false,
            },
            SettingsChange::Override(cap),
        );
    }

    pub fn set_position(&self, x: i32, y: i32) {
        self.update(|s| s.position = (x, y), SettingsChange::Position(x, y));
    }

    pub fn set_device(&self, name: String) {
        self.update(
            |s| s.device = Some(name.clone()),
            SettingsChange::Device(name.clone()),
        );
    }

    fn update(&self, apply: impl FnOnce(&mut VizSettings), change: SettingsChange) {
        {
            let mut settings = self.settings.lock().unwrap();
            apply(&mut settings);
        }
        self.notify(change);
        self.save();
    }

    fn notify(&self, change: SettingsChange) {
        let mut subscribers = self.subscribers.lock().unwrap();
        subscribers.retain(|tx| tx.send(change.clone()).is_ok());
    }

    fn save(&self) {
        let Some(path) = &self.path else {
            return;
        };
        let file = FileSettings::from(&self.get());
        let text = match toml::to_string_pretty(&file) {
            Ok(text) => text,
            Err(e) => {
                warn!("failed to serialize settings: {e}");
                return;
            }
        };
        if let Some(dir) = path.parent() {
            let _ = fs::create_dir_all(dir);
        }
        if let Err(e) = fs::write(path, text) {
            warn!("failed to persist settings to {}: {e}", path.display());
        }
    }
}

fn config_path() -> Result<PathBuf> {
    if let Ok(p) = env::var("SPECWAVE_CONFIG") {
        return Ok(PathBuf::from(p));
    }
    Ok(dirs::config_dir()
        .context("failed to resolve config directory")?
        .join("specwave.toml"))
}

fn apply_env(settings: &mut VizSettings) {
    if let Some(v) = env_parse::<u32>("SPECWAVE_BANDS") {
        settings.band_count = v;
    }
    if let Some(v) = env_parse::<u32>("SPECWAVE_FPS") {
        settings.fps = v;
    }
    if let Ok(v) = env::var("SPECWAVE_DEVICE") {
        settings.device = Some(v);
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.parse::<T>().ok())
}

/// On-disk representation; every field optional so partial files load.
#[derive(Debug, Default, Serialize, Deserialize)]
struct FileSettings {
    band_count: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
    line_width: Option<f32>,
    fps: Option<u32>,
    color: Option<[f32; 4]>,
    flip_vertical: Option<bool>,
    flip_horizontal: Option<bool>,
    orientation: Option<String>,
    override_enabled: Option<bool>,
    override_count: Option<u32>,
    position: Option<(i32, i32)>,
    device: Option<String>,
}

impl FileSettings {
    fn apply(self, settings: &mut VizSettings) {
        if let Some(v) = self.band_count {
            settings.band_count = v;
        }
        if let Some(v) = self.width {
            settings.width = v;
        }
        if let Some(v) = self.height {
            settings.height = v;
        }
        if let Some(v) = self.line_width {
            settings.line_width = v;
        }
        if let Some(v) = self.fps {
            settings.fps = v;
        }
        if let Some(v) = self.color {
            settings.color = v;
        }
        if let Some(v) = self.flip_vertical {
            settings.flip_vertical = v;
        }
        if let Some(v) = self.flip_horizontal {
            settings.flip_horizontal = v;
        }
        if let Some(v) = self.orientation {
            settings.orientation = match v.as_str() {
                "vertical" => Orientation::Vertical,
                _ => Orientation::Horizontal,
            };
        }
        if let Some(v) = self.override_enabled {
            settings.override_enabled = v;
        }
        if let Some(v) = self.override_count {
            settings.override_count = v;
        }
        if let Some(v) = self.position {
            settings.position = v;
        }
        if self.device.is_some() {
            settings.device = self.device;
        }
    }
}

impl From<&VizSettings> for FileSettings {
    fn from(s: &VizSettings) -> Self {
        Self {
            band_count: Some(s.band_count),
            width: Some(s.width),
            height: Some(s.height),
            line_width: Some(s.line_width),
            fps: Some(s.fps),
            color: Some(s.color),
            flip_vertical: Some(s.flip_vertical),
            flip_horizontal: Some(s.flip_horizontal),
            orientation: Some(
                match s.orientation {
                    Orientation::Horizontal => "horizontal",
                    Orientation::Vertical => "vertical",
                }
                .to_string(),
            ),
            override_enabled: Some(s.override_enabled),
            override_count: Some(s.override_count),
            position: Some(s.position),
            device: s.device.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setters_emit_typed_changes() {
        let store = SettingsStore::in_memory(VizSettings::default());
        let rx = store.subscribe();

        store.set_fps(60);
        store.set_band_count(32);
        store.set_position(10, 20);

        assert_eq!(rx.try_recv().unwrap(), SettingsChange::Fps(60));
        assert_eq!(rx.try_recv().unwrap(), SettingsChange::BandCount(32));
        assert_eq!(rx.try_recv().unwrap(), SettingsChange::Position(10, 20));
        assert!(rx.try_recv().is_err());

        let snapshot = store.get();
        assert_eq!(snapshot.fps, 60);
        assert_eq!(snapshot.band_count, 32);
        assert_eq!(snapshot.position, (10, 20));
    }

    #[test]
    fn setters_clamp_into_valid_ranges() {
        let store = SettingsStore::in_memory(VizSettings::default());
        store.set_band_count(9999);
        store.set_fps(0);
        assert_eq!(store.get().band_count, 256);
        assert_eq!(store.get().fps, 1);
    }

    #[test]
    fn override_toggles_cap() {
        let store = SettingsStore::in_memory(VizSettings::default());
        assert_eq!(store.get().spect_override(), None);

        store.set_override(Some(12));
        assert_eq!(store.get().spect_override(), Some(12));

        store.set_override(None);
        assert_eq!(store.get().spect_override(), None);
    }

    #[test]
    fn render_band_count_expands_by_a_third() {
        let mut settings = VizSettings::default();
        settings.band_count = 70;
        assert_eq!(settings.render_band_count(), 93);
        settings.band_count = 3;
        assert_eq!(settings.render_band_count(), 4);
    }

    #[test]
    fn partial_file_round_trip() {
        let mut settings = VizSettings::default();
        let file: FileSettings = toml::from_str("fps = 120\norientation = \"vertical\"").unwrap();
        file.apply(&mut settings);
        assert_eq!(settings.fps, 120);
        assert_eq!(settings.orientation, Orientation::Vertical);
        // untouched keys keep defaults
        assert_eq!(settings.band_count, 70);

        let out = toml::to_string_pretty(&FileSettings::from(&settings)).unwrap();
        assert!(out.contains("fps = 120"));
        assert!(out.contains("orientation = \"vertical\""));
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let store = SettingsStore::in_memory(VizSettings::default());
        drop(store.subscribe());
        store.set_fps(45);
        assert!(store.subscribers.lock().unwrap().is_empty());
    }
}
