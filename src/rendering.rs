//! Rendering system with wgpu pipeline and buffer management.
//!
//! Bars arrive as pixel-space segments from `draw::render`; this layer turns
//! them into quads and pushes them through an orthographic pipeline with
//! alpha blending.

use bytemuck::{Pod, Zeroable};
use glam::Mat4;
use wgpu::util::DeviceExt;

use crate::draw::Bar;

/// Upper bound on quads kept in the vertex buffer (render bands are capped at
/// 256 analysis bands plus mirror expansion).
const MAX_BARS: usize = 1024;
const VERTICES_PER_BAR: usize = 6;

/// Uniform buffer for the bar shader (pixel-space orthographic projection).
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
struct Uniforms {
    view_proj: [[f32; 4]; 4],
}

/// Vertex data for one bar-quad corner (position + RGBA).
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
struct BarVertex {
    position: [f32; 2],
    color: [f32; 4],
}

/// Rendering system managing wgpu device, pipeline, and buffers.
pub struct RenderSystem {
    surface: wgpu::Surface<'static>,
    device: wgpu::Device,
    queue: wgpu::Queue,
    config: wgpu::SurfaceConfiguration,
    render_pipeline: wgpu::RenderPipeline,
    vertex_buffer: wgpu::Buffer,
    uniform_buffer: wgpu::Buffer,
    uniform_bind_group: wgpu::BindGroup,
    vertex_count: u32,
}

impl RenderSystem {
    /// Create new rendering system targeting `window`.
    pub async fn new(window: std::sync::Arc<winit::window::Window>) -> Result<Self, String> {
        let size = window.inner_size();

        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        // Surface requires the window to live as long as it does (Arc)
        let surface = instance
            .create_surface(window)
            .map_err(|e| format!("Failed to create surface: {}", e))?;

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::LowPower,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .ok_or("Failed to find suitable GPU adapter")?;

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Main Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                    memory_hints: Default::default(),
                },
                None,
            )
            .await
            .map_err(|e| format!("Failed to request device: {}", e))?;

        let surface_caps = surface.get_capabilities(&adapter);
        let surface_format = surface_caps
            .formats
            .iter()
            .find(|f| f.is_srgb())
            .copied()
            .unwrap_or(surface_caps.formats[0]);

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: wgpu::PresentMode::Fifo,
            alpha_mode: surface_caps.alpha_modes[0],
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &config);

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Bar Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shader.wgsl").into()),
        });

        let vertex_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Bar Vertex Buffer"),
            size: (MAX_BARS * VERTICES_PER_BAR * std::mem::size_of::<BarVertex>())
                as wgpu::BufferAddress,
            usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let uniforms = Uniforms {
            view_proj: pixel_projection(config.width as f32, config.height as f32)
                .to_cols_array_2d(),
        };

        let uniform_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Uniform Buffer"),
            contents: bytemuck::cast_slice(&[uniforms]),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });

        let uniform_bind_group_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("Uniform Bind Group Layout"),
                entries: &[wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                }],
            });

        let uniform_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Uniform Bind Group"),
            layout: &uniform_bind_group_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: uniform_buffer.as_entire_binding(),
            }],
        });

        let render_pipeline_layout =
            device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("Render Pipeline Layout"),
                bind_group_layouts: &[&uniform_bind_group_layout],
                push_constant_ranges: &[],
            });

        let render_pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Bar Render Pipeline"),
            layout: Some(&render_pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                buffers: &[wgpu::VertexBufferLayout {
                    array_stride: std::mem::size_of::<BarVertex>() as wgpu::BufferAddress,
                    step_mode: wgpu::VertexStepMode::Vertex,
                    attributes: &[
                        wgpu::VertexAttribute {
                            offset: 0,
                            shader_location: 0,
                            format: wgpu::VertexFormat::Float32x2,
                        },
                        wgpu::VertexAttribute {
                            offset: std::mem::size_of::<[f32; 2]>() as wgpu::BufferAddress,
                            shader_location: 1,
                            format: wgpu::VertexFormat::Float32x4,
                        },
                    ],
                }],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: config.format,
                    blend: Some(wgpu::BlendState::ALPHA_BLENDING),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                strip_index_format: None,
                front_face: wgpu::FrontFace::Ccw,
                cull_mode: None,
                polygon_mode: wgpu::PolygonMode::Fill,
                unclipped_depth: false,
                conservative: false,
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        Ok(Self {
            surface,
            device,
            queue,
            config,
            render_pipeline,
            vertex_buffer,
            uniform_buffer,
            uniform_bind_group,
            vertex_count: 0,
        })
    }

    pub fn surface_size(&self) -> (u32, u32) {
        (self.config.width, self.config.height)
    }

    /// Reconfigure the surface and projection after a window resize.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.config.width = width.max(1);
        self.config.height = height.max(1);
        self.surface.configure(&self.device, &self.config);

        let uniforms = Uniforms {
            view_proj: pixel_projection(self.config.width as f32, self.config.height as f32)
                .to_cols_array_2d(),
        };
        self.queue
            .write_buffer(&self.uniform_buffer, 0, bytemuck::cast_slice(&[uniforms]));
    }

    /// Upload the bar quads for the next frame.
    pub fn update_bars(&mut self, bars: &[Bar]) {
        let mut vertices = Vec::with_capacity(bars.len().min(MAX_BARS) * VERTICES_PER_BAR);
        for bar in bars.iter().take(MAX_BARS) {
            let [a, b, c, d] = bar_corners(bar);
            for position in [a, b, c, a, c, d] {
                vertices.push(BarVertex {
                    position,
                    color: bar.color,
                });
            }
        }
        self.vertex_count = vertices.len() as u32;
        if !vertices.is_empty() {
            self.queue
                .write_buffer(&self.vertex_buffer, 0, bytemuck::cast_slice(&vertices));
        }
    }

    /// Render a frame from the last uploaded bars.
    pub fn render(&self) -> Result<(), wgpu::SurfaceError> {
        let output = self.surface.get_current_texture()?;
        let view = output
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Render Encoder"),
            });

        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Render Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            if self.vertex_count > 0 {
                render_pass.set_pipeline(&self.render_pipeline);
                render_pass.set_bind_group(0, &self.uniform_bind_group, &[]);
                render_pass.set_vertex_buffer(0, self.vertex_buffer.slice(..));
                render_pass.draw(0..self.vertex_count, 0..1);
            }
        }

        self.queue.submit(std::iter::once(encoder.finish()));
        output.present();

        Ok(())
    }
}

/// Orthographic projection mapping pixel coordinates (origin top-left,
/// y down) to clip space.
fn pixel_projection(width: f32, height: f32) -> Mat4 {
    Mat4::orthographic_rh(0.0, width.max(1.0), height.max(1.0), 0.0, -1.0, 1.0)
}

/// Corners of the quad covering a stroked bar segment.
fn bar_corners(bar: &Bar) -> [[f32; 2]; 4] {
    let half = bar.width.max(1.0) / 2.0;
    if (bar.x0 - bar.x1).abs() <= f32::EPSILON {
        // vertical stroke
        let (top, bottom) = (bar.y0.min(bar.y1), bar.y0.max(bar.y1));
        [
            [bar.x0 - half, top],
            [bar.x0 - half, bottom],
            [bar.x0 + half, bottom],
            [bar.x0 + half, top],
        ]
    } else {
        // horizontal stroke
        let (left, right) = (bar.x0.min(bar.x1), bar.x0.max(bar.x1));
        [
            [left, bar.y0 - half],
            [left, bar.y0 + half],
            [right, bar.y0 + half],
            [right, bar.y0 - half],
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(x0: f32, y0: f32, x1: f32, y1: f32, width: f32) -> Bar {
        Bar {
            x0,
            y0,
            x1,
            y1,
            width,
            color: [1.0; 4],
        }
    }

    #[test]
    fn vertical_stroke_expands_sideways() {
        let corners = bar_corners(&bar(10.0, 100.0, 10.0, 20.0, 4.0));
        assert_eq!(
            corners,
            [[8.0, 20.0], [8.0, 100.0], [12.0, 100.0], [12.0, 20.0]]
        );
    }

    #[test]
    fn horizontal_stroke_expands_up_down() {
        let corners = bar_corners(&bar(80.0, 50.0, 30.0, 50.0, 4.0));
        assert_eq!(
            corners,
            [[30.0, 48.0], [30.0, 52.0], [80.0, 52.0], [80.0, 48.0]]
        );
    }

    #[test]
    fn zero_length_stroke_still_has_area() {
        let corners = bar_corners(&bar(10.0, 100.0, 10.0, 100.0, 5.0));
        assert!(corners[0][0] < corners[2][0]);
    }

    #[test]
    fn projection_maps_pixel_corners_to_clip() {
        let proj = pixel_projection(720.0, 200.0);
        let top_left = proj * glam::Vec4::new(0.0, 0.0, 0.0, 1.0);
        let bottom_right = proj * glam::Vec4::new(720.0, 200.0, 0.0, 1.0);
        assert!((top_left.x + 1.0).abs() < 1e-5 && (top_left.y - 1.0).abs() < 1e-5);
        assert!((bottom_right.x - 1.0).abs() < 1e-5 && (bottom_right.y + 1.0).abs() < 1e-5);
    }
}
