use std::sync::Arc;

use anyhow::Context;
use wgpu::util::DeviceExt;
use winit::{
    application::ApplicationHandler,
    event::*,
    event_loop::{ActiveEventLoop, EventLoop},
    window::Window,
};

use crate::{
    config::AppConfig,
    mesh::{DrawMesh, Vertex},
};

pub mod config;
pub mod depth;
pub mod logging;
pub mod mesh;
pub mod resources;
pub mod shader;
pub mod timing;

#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct FrameUniform {
    elapsed_ms: f32,
    aspect_ratio: f32,
    _padding: [f32; 2],
}

impl FrameUniform {
    fn new(width: u32, height: u32) -> Self {
        let mut uniform = Self {
            elapsed_ms: 0.0,
            aspect_ratio: 1.0,
            _padding: [0.0; 2],
        };
        uniform.update_aspect_ratio(width, height);
        uniform
    }

    fn update_aspect_ratio(&mut self, width: u32, height: u32) {
        if width > 0 && height > 0 {
            self.aspect_ratio = width as f32 / height as f32;
        }
    }
}

pub struct State {
    surface: wgpu::Surface<'static>, // the target of the rendering
    surface_config: wgpu::SurfaceConfiguration,
    is_surface_configured: bool,
    device: wgpu::Device,
    queue: wgpu::Queue,
    frame_uniform: FrameUniform,
    frame_buffer: wgpu::Buffer,
    frame_bind_group: wgpu::BindGroup,
    // None when the shader program failed to build; frames are then only cleared
    render_pipeline: Option<wgpu::RenderPipeline>,
    mesh: mesh::GpuMesh,
    depth_buffer: Option<depth::DepthBuffer>,
    clock: timing::FrameClock,
    config: AppConfig,
    window: Arc<Window>,
}

impl State {
    pub async fn new(window: Arc<Window>, config: AppConfig) -> anyhow::Result<Self> {
        let size = window.inner_size();

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });

        let surface = instance
            .create_surface(window.clone())
            .context("unable to create a surface for the window")?;

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .context("no graphics adapter compatible with the window")?;

        log::info!("using adapter {:?}", adapter.get_info().name);

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("main_device"),
                required_features: wgpu::Features::empty(),
                experimental_features: wgpu::ExperimentalFeatures::disabled(),
                required_limits: wgpu::Limits::default(),
                memory_hints: Default::default(),
                trace: wgpu::Trace::Off,
            })
            .await
            .context("unable to create the graphics device")?;

        let surface_capabilities = surface.get_capabilities(&adapter);

        // find a usable srgb format, otherwise just fall back to the first format
        let surface_format = surface_capabilities
            .formats
            .iter()
            .find(|f| f.is_srgb())
            .copied()
            .or_else(|| surface_capabilities.formats.first().copied())
            .context("surface reports no supported formats")?;

        let surface_config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: if config.window.vsync {
                wgpu::PresentMode::AutoVsync
            } else {
                wgpu::PresentMode::AutoNoVsync
            },
            alpha_mode: surface_capabilities
                .alpha_modes
                .first()
                .copied()
                .unwrap_or(wgpu::CompositeAlphaMode::Auto),
            desired_maximum_frame_latency: 2,
            view_formats: vec![],
        };
        surface.configure(&device, &surface_config);

        let frame_uniform = FrameUniform::new(surface_config.width, surface_config.height);

        let frame_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("frame buffer"),
            contents: bytemuck::cast_slice(&[frame_uniform]),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });

        let frame_bind_group_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                entries: &[wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                }],
                label: Some("frame_bind_group_layout"),
            });

        let frame_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            layout: &frame_bind_group_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: frame_buffer.as_entire_binding(),
            }],
            label: Some("frame_bind_group"),
        });

        let mesh_data = mesh::MeshData::from_scene(&config.scene)?;
        let mesh = mesh::GpuMesh::upload(
            &device,
            &format!("{:?}", config.scene.shape),
            &mesh_data,
        )?;
        log::info!(
            "uploaded {} mesh: {} vertices, {} triangles",
            mesh.name,
            mesh_data.vertices.len(),
            mesh_data.triangle_count()
        );

        let depth_buffer = config
            .rendering
            .depth_test
            .then(|| depth::DepthBuffer::new(&device, &surface_config, "depth buffer"));

        // shader failures are reported but never fatal
        let render_pipeline = match shader::ShaderProgram::load(&config.shaders) {
            Ok(program) => {
                // anything naga let through but the device rejects is still a link failure
                let scope = device.push_error_scope(wgpu::ErrorFilter::Validation);
                let pipeline = create_render_pipeline(
                    &device,
                    &program,
                    &frame_bind_group_layout,
                    surface_config.format,
                    config.rendering.depth_test,
                );
                match scope.pop().await {
                    None => {
                        log::info!("shader program: OK");
                        Some(pipeline)
                    }
                    Some(e) => {
                        log::error!("shader program failed to link: {}", e);
                        None
                    }
                }
            }
            Err(e) => {
                log::error!("{:#}", e);
                None
            }
        };

        Ok(Self {
            surface,
            surface_config,
            is_surface_configured: true,
            device,
            queue,
            frame_uniform,
            frame_buffer,
            frame_bind_group,
            render_pipeline,
            mesh,
            depth_buffer,
            clock: timing::FrameClock::start(),
            config,
            window,
        })
    }

    pub fn update(&mut self) {
        self.clock.tick();

        self.frame_uniform.elapsed_ms = if self.config.rendering.animate {
            self.clock.elapsed_ms()
        } else {
            0.0
        };
        self.queue.write_buffer(
            &self.frame_buffer,
            0,
            bytemuck::cast_slice(&[self.frame_uniform]),
        );

        if self.clock.should_report(self.config.rendering.stats_interval) {
            let avg = self.clock.average_frame_seconds();
            log::debug!(
                "frame {}: {:.2} ms avg ({:.0} fps)",
                self.clock.frames(),
                avg * 1000.0,
                if avg > 0.0 { 1.0 / avg } else { 0.0 }
            );
        }
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        if width > 0 && height > 0 {
            self.surface_config.width = width;
            self.surface_config.height = height;

            self.surface.configure(&self.device, &self.surface_config);
            self.is_surface_configured = true;

            if self.depth_buffer.is_some() {
                self.depth_buffer = Some(depth::DepthBuffer::new(
                    &self.device,
                    &self.surface_config,
                    "depth buffer",
                ));
            }

            self.frame_uniform.update_aspect_ratio(width, height);
        } else {
            // minimised; keep the old configuration until a real size arrives
            self.is_surface_configured = false;
            log::warn!("resize was called with width 0 or height 0");
        }
    }

    pub fn render(&mut self) -> Result<(), wgpu::SurfaceError> {
        self.window.request_redraw();

        if !self.is_surface_configured {
            return Ok(());
        }

        let target_surface = self.surface.get_current_texture()?;

        let target_view = target_surface
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());

        let mut command_encoder =
            self.device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("render command encoder"),
                });

        {
            let mut render_pass = command_encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("render pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &target_view,
                    resolve_target: None,
                    depth_slice: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(self.config.rendering.clear_color()),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: self.depth_buffer.as_ref().map(|depth| {
                    wgpu::RenderPassDepthStencilAttachment {
                        view: &depth.view,
                        depth_ops: Some(wgpu::Operations {
                            load: wgpu::LoadOp::Clear(1.0),
                            store: wgpu::StoreOp::Store,
                        }),
                        stencil_ops: None,
                    }
                }),
                occlusion_query_set: None,
                timestamp_writes: None,
                multiview_mask: None,
            });

            if let Some(pipeline) = &self.render_pipeline {
                render_pass.set_pipeline(pipeline);
                render_pass.draw_mesh(&self.mesh, &self.frame_bind_group);
            }
        }

        self.queue.submit(std::iter::once(command_encoder.finish()));

        target_surface.present();
        Ok(())
    }
}

fn create_render_pipeline(
    device: &wgpu::Device,
    program: &shader::ShaderProgram,
    frame_bind_group_layout: &wgpu::BindGroupLayout,
    color_format: wgpu::TextureFormat,
    depth_test: bool,
) -> wgpu::RenderPipeline {
    let (vertex_module, fragment_module) = program.create_modules(device);

    let render_pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some("render pipeline layout"),
        bind_group_layouts: &[frame_bind_group_layout],
        immediate_size: 0,
    });

    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some("render pipeline"),
        layout: Some(&render_pipeline_layout),
        vertex: wgpu::VertexState {
            module: &vertex_module,
            entry_point: Some(program.vertex.entry.as_str()),
            buffers: &[mesh::PositionVertex::desc()],
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        },
        fragment: Some(wgpu::FragmentState {
            module: &fragment_module,
            entry_point: Some(program.fragment.entry.as_str()),
            targets: &[Some(wgpu::ColorTargetState {
                format: color_format,
                blend: Some(wgpu::BlendState::REPLACE),
                write_mask: wgpu::ColorWrites::ALL,
            })],
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        }),
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            strip_index_format: None,
            front_face: wgpu::FrontFace::Ccw,
            cull_mode: None,
            unclipped_depth: false,
            polygon_mode: wgpu::PolygonMode::Fill,
            conservative: false,
        },
        depth_stencil: depth_test.then(|| wgpu::DepthStencilState {
            format: depth::DepthBuffer::FORMAT,
            depth_write_enabled: true,
            depth_compare: wgpu::CompareFunction::Less,
            stencil: wgpu::StencilState::default(),
            bias: wgpu::DepthBiasState::default(),
        }),
        multisample: wgpu::MultisampleState {
            count: 1,
            mask: !0,
            alpha_to_coverage_enabled: false,
        },
        multiview_mask: None,
        cache: None,
    })
}

pub struct App {
    config: AppConfig,
    state: Option<State>,
    init_error: Option<anyhow::Error>,
}

impl App {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            state: None,
            init_error: None,
        }
    }

    fn init_state(&self, event_loop: &ActiveEventLoop) -> anyhow::Result<State> {
        let window_attributes = Window::default_attributes()
            .with_title(self.config.window.title.clone())
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ))
            .with_resizable(self.config.window.resizable);

        let window = Arc::new(
            event_loop
                .create_window(window_attributes)
                .context("failed to create window")?,
        );

        pollster::block_on(State::new(window, self.config.clone()))
            .context("failed to initialize the graphics context")
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.state.is_some() {
            return;
        }

        match self.init_state(event_loop) {
            Ok(state) => {
                state.window.request_redraw();
                self.state = Some(state);
            }
            Err(e) => {
                log::error!("{:#}", e);
                self.init_error = Some(e);
                event_loop.exit();
            }
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _window_id: winit::window::WindowId,
        event: WindowEvent,
    ) {
        let state = match &mut self.state {
            Some(state) => state,
            None => return,
        };

        match event {
            WindowEvent::CloseRequested => event_loop.exit(),
            WindowEvent::Resized(size) => state.resize(size.width, size.height),
            WindowEvent::RedrawRequested => {
                state.update();

                match state.render() {
                    Ok(_) => {}
                    // reconfigure the surface if it's lost or outdated
                    Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                        let size = state.window.inner_size();
                        state.resize(size.width, size.height);
                    }
                    Err(e) => {
                        log::error!("unable to render: {}", e);
                    }
                };
            }
            _ => {}
        }
    }
}

/// Runs with the configuration found in `config/` and the environment.
pub fn run() -> anyhow::Result<()> {
    let (config, config_error) = match AppConfig::load() {
        Ok(config) => (config, None),
        Err(e) => (AppConfig::default(), Some(e)),
    };

    logging::init_logging(&config.logging);
    if let Some(e) = config_error {
        log::warn!("{}. Using defaults.", e);
    }

    run_with_config(config)
}

pub fn run_with_config(config: AppConfig) -> anyhow::Result<()> {
    let event_loop = EventLoop::new()?;
    let mut app = App::new(config);

    event_loop.run_app(&mut app)?;

    match app.init_error.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_uniform_matches_shader_contract() {
        assert_eq!(
            std::mem::size_of::<FrameUniform>(),
            shader::FRAME_UNIFORM_SIZE as usize
        );
    }

    #[test]
    fn frame_uniform_tracks_aspect_ratio() {
        let mut uniform = FrameUniform::new(1600, 800);
        assert_eq!(uniform.aspect_ratio, 2.0);

        uniform.update_aspect_ratio(0, 800);
        assert_eq!(uniform.aspect_ratio, 2.0);

        uniform.update_aspect_ratio(400, 800);
        assert_eq!(uniform.aspect_ratio, 0.5);
        assert_eq!(uniform.elapsed_ms, 0.0);
    }
}
