//! Specwave - a live audio-reactive spectrum visualizer.
//!
//! A capture stream feeds the analyzer on its own schedule; the window
//! repaints on an independent frame timer. The two only meet at the
//! frequency buffer.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use crossbeam_channel::Receiver;
use tracing::{debug, info, warn};
use winit::{
    application::ApplicationHandler,
    dpi::{LogicalSize, PhysicalPosition},
    event::{ElementState, KeyEvent, MouseButton, WindowEvent},
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    keyboard::{KeyCode, PhysicalKey},
    window::{Window, WindowId},
};

use specwave::audio::{AnalysisConfig, DeviceDescriptor, SourceCatalog, SpectrumSource};
use specwave::bands::{expand, FrequencyBuffer};
use specwave::cli::Args;
use specwave::config::{SettingsChange, SettingsStore, VizSettings};
use specwave::draw::{render, FrameTimer, RenderConfig};
use specwave::error::AudioError;
use specwave::placement::{self, PlacementRect};
use specwave::rendering::RenderSystem;

/// Main application state
struct App {
    settings: Arc<SettingsStore>,
    changes: Receiver<SettingsChange>,
    /// Current effective settings (stored values plus CLI overrides).
    viz: VizSettings,

    window: Option<Arc<Window>>,
    render_system: Option<RenderSystem>,

    catalog: SourceCatalog,
    source: Option<SpectrumSource>,
    freq: Arc<FrequencyBuffer>,

    timer: FrameTimer,
}

impl App {
    fn new(settings: Arc<SettingsStore>, viz: VizSettings) -> Self {
        let changes = settings.subscribe();
        let freq = Arc::new(FrequencyBuffer::new(viz.render_band_count()));
        let timer = FrameTimer::new(viz.fps);
        Self {
            settings,
            changes,
            viz,
            window: None,
            render_system: None,
            catalog: SourceCatalog::new(),
            source: None,
            freq,
            timer,
        }
    }

    /// Stored device name, else the default output's monitor (with retry),
    /// else the first enumerated capture endpoint.
    fn choose_device(&mut self) -> Result<DeviceDescriptor, AudioError> {
        if let Some(name) = &self.viz.device {
            return Ok(DeviceDescriptor::from_name(name.clone()));
        }
        match self
            .catalog
            .default_with_retry(5, Duration::from_millis(200))
        {
            Ok(device) => Ok(device),
            Err(AudioError::NoDefaultDevice) => {
                warn!("no default monitor endpoint; falling back to first capture device");
                self.catalog
                    .refresh()?
                    .first()
                    .cloned()
                    .ok_or(AudioError::NoDefaultDevice)
            }
            Err(e) => Err(e),
        }
    }

    fn start_audio(&mut self) {
        let config = AnalysisConfig {
            band_count: self.viz.band_count,
            ..AnalysisConfig::default()
        };

        let device = match self.choose_device() {
            Ok(device) => device,
            Err(e) => {
                // recoverable: keep rendering the zeroed buffer
                warn!("no capture device available yet: {e}");
                return;
            }
        };

        match SpectrumSource::start(config, &device) {
            Ok(source) => {
                let freq = Arc::clone(&self.freq);
                source.on_tick(move |raw| {
                    // render resolution expands the analyzed bands by a third
                    freq.publish(expand(raw, raw.len() * 4 / 3));
                });
                info!(device = %device.name, "audio pipeline running");
                self.source = Some(source);
            }
            Err(e) => {
                // fatal to the pipeline, not to the host
                warn!("audio pipeline failed to start: {e}");
            }
        }
    }

    /// Apply queued settings changes at the reconfigure boundary.
    fn drain_settings_changes(&mut self) {
        while let Ok(change) = self.changes.try_recv() {
            debug!(?change, "applying settings change");
            match change {
                SettingsChange::BandCount(n) => {
                    self.viz.band_count = n;
                    if let Some(source) = &self.source {
                        source.set_band_count(n);
                    }
                }
                SettingsChange::Fps(fps) => {
                    self.viz.fps = fps;
                    self.timer.set_fps(fps);
                }
                SettingsChange::Size(width, height) => {
                    self.viz.width = width;
                    self.viz.height = height;
                    if let Some(window) = &self.window {
                        let _ = window.request_inner_size(LogicalSize::new(width, height));
                    }
                }
                SettingsChange::Position(x, y) => {
                    if self.viz.position != (x, y) {
                        self.viz.position = (x, y);
                        if let Some(window) = &self.window {
                            window.set_outer_position(PhysicalPosition::new(x, y));
                        }
                    }
                }
                SettingsChange::Device(name) => {
                    self.viz.device = Some(name.clone());
                    if let Some(source) = &mut self.source {
                        let device = DeviceDescriptor::from_name(name);
                        if let Err(e) = self.catalog.select(&device, source) {
                            warn!("device switch failed: {e}");
                        }
                    }
                }
                SettingsChange::LineWidth(v) => self.viz.line_width = v,
                SettingsChange::Color(c) => self.viz.color = c,
                SettingsChange::FlipVertical(f) => self.viz.flip_vertical = f,
                SettingsChange::FlipHorizontal(f) => self.viz.flip_horizontal = f,
                SettingsChange::Orientation(o) => self.viz.orientation = o,
                SettingsChange::Override(cap) => match cap {
                    Some(n) => {
                        self.viz.override_enabled = true;
                        self.viz.override_count = n;
                    }
                    None => self.viz.override_enabled = false,
                },
            }
        }
    }

    fn render_config(&self) -> RenderConfig {
        RenderConfig {
            line_width: self.viz.line_width,
            color: self.viz.color,
            flip_vertical: self.viz.flip_vertical,
            flip_horizontal: self.viz.flip_horizontal,
            orientation: self.viz.orientation,
            spect_override: self.viz.spect_override(),
        }
    }

    /// Render a single frame from the current buffer snapshot.
    fn render_frame(&mut self) {
        let config = self.render_config();
        let bands = self.freq.snapshot();
        let Some(render_system) = &mut self.render_system else {
            return;
        };

        let (width, height) = render_system.surface_size();
        let bars = render(&bands, &config, width as f32, height as f32);
        render_system.update_bars(&bars);

        match render_system.render() {
            Ok(()) => {}
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                let (w, h) = render_system.surface_size();
                render_system.resize(w, h);
            }
            Err(e) => warn!("render error: {e:?}"),
        }
    }

    /// Keep the surface inside the monitor work area and persist where it
    /// lands. Clamping is idempotent, so the follow-up move event settles.
    fn handle_moved(&mut self, pos: PhysicalPosition<i32>) {
        let Some(window) = &self.window else {
            return;
        };
        let Some(area) = work_area(window) else {
            return;
        };

        let size = window.outer_size();
        let clamped = placement::clamp(
            (pos.x, pos.y),
            (size.width as i32, size.height as i32),
            area,
        );
        if clamped != (pos.x, pos.y) {
            window.set_outer_position(PhysicalPosition::new(clamped.0, clamped.1));
        }
        if self.viz.position != clamped {
            self.viz.position = clamped;
            self.settings.set_position(clamped.0, clamped.1);
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return; // Already initialized
        }

        let window_attributes = Window::default_attributes()
            .with_title("Specwave")
            .with_inner_size(LogicalSize::new(self.viz.width, self.viz.height))
            .with_position(PhysicalPosition::new(
                self.viz.position.0,
                self.viz.position.1,
            ));

        let window = Arc::new(
            event_loop
                .create_window(window_attributes)
                .expect("failed to create window"),
        );

        let render_system = pollster::block_on(RenderSystem::new(Arc::clone(&window)))
            .expect("failed to initialize rendering");

        self.window = Some(window);
        self.render_system = Some(render_system);

        self.start_audio();
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        self.drain_settings_changes();

        if self.timer.tick(Instant::now()) {
            if let Some(window) = &self.window {
                window.request_redraw();
            }
        }
        event_loop.set_control_flow(ControlFlow::WaitUntil(self.timer.next_deadline()));
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _window_id: WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => {
                if let Some(mut source) = self.source.take() {
                    source.stop();
                }
                event_loop.exit();
            }
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        state: ElementState::Pressed,
                        physical_key: PhysicalKey::Code(KeyCode::Escape),
                        ..
                    },
                ..
            } => event_loop.exit(),
            WindowEvent::MouseInput {
                state: ElementState::Pressed,
                button: MouseButton::Left,
                ..
            } => {
                if let Some(window) = &self.window {
                    let _ = window.drag_window();
                }
            }
            WindowEvent::Moved(pos) => self.handle_moved(pos),
            WindowEvent::Resized(size) => {
                if let Some(render_system) = &mut self.render_system {
                    render_system.resize(size.width, size.height);
                }
            }
            WindowEvent::RedrawRequested => self.render_frame(),
            _ => {}
        }
    }
}

/// Work area of the monitor currently hosting the window.
fn work_area(window: &Window) -> Option<PlacementRect> {
    let monitor = window.current_monitor()?;
    let pos = monitor.position();
    let size = monitor.size();
    Some(PlacementRect::new(
        pos.x,
        pos.y,
        size.width as i32,
        size.height as i32,
    ))
}

fn list_devices() -> Result<()> {
    let mut catalog = SourceCatalog::new();
    let devices = catalog
        .refresh()
        .map_err(|e| anyhow!("device enumeration failed: {e}"))?;
    for device in devices {
        println!("{:<14} {}", format!("[{:?}]", device.kind), device.name);
    }
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    if args.list_devices {
        return list_devices();
    }

    let settings = Arc::new(SettingsStore::load().context("failed to load settings")?);
    let mut viz = settings.get();
    args.apply(&mut viz);

    info!(
        bands = viz.band_count,
        fps = viz.fps,
        "starting visualizer"
    );

    let mut app = App::new(settings, viz);
    let event_loop = EventLoop::new().context("failed to create event loop")?;
    event_loop.run_app(&mut app)?;
    Ok(())
}
