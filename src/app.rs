// src/app.rs
//! Application shell
//!
//! [`PeatApp`] owns the winit event loop and splits the engine across two
//! threads: a render thread that runs the simulation callbacks and
//! [`GraphicsCore::update`], and the event-loop thread, which only blits
//! the most recent front buffer onto the window surface. The two sides
//! share nothing but a [`FrontBufferHandle`] and a resize channel, so a
//! slow frame never stalls the window.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::JoinHandle;

use anyhow::Context as _;
use cgmath::Vector3;
use winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    window::{Window, WindowAttributes},
};

use crate::gfx::rendering::GraphicsCore;
use crate::gfx::resources::FrontBufferHandle;
use crate::gfx::scene::Scene;
use crate::gfx::{Camera, RenderContext};
use crate::settings::EngineSettings;
use crate::time::FrameTimer;

const BLIT_SHADER: &str = include_str!("gfx/rendering/shaders/blit.wgsl");

/// Per-frame simulation hook. Runs on the render thread with exclusive
/// access to the scene.
pub type UpdateCallback = Box<dyn FnMut(&mut Scene, f32) + Send>;

pub struct PeatApp {
    event_loop: Option<EventLoop<()>>,
    app_state: AppState,
    update_callback: Option<UpdateCallback>,
    fixed_callback: Option<UpdateCallback>,
}

struct AppState {
    settings: EngineSettings,
    camera_pose: (Vector3<f32>, Vector3<f32>),
    window: Option<Arc<Window>>,
    presenter: Option<Presenter>,
    render_thread: Option<RenderThread>,
    // Handed to the render thread on startup.
    scene: Option<Scene>,
    update_callback: Option<UpdateCallback>,
    fixed_callback: Option<UpdateCallback>,
}

/// Render-thread side: owns the graphics core and the scene for the
/// lifetime of the thread.
struct RenderThread {
    handle: JoinHandle<()>,
    stop: Arc<AtomicBool>,
    resize_tx: mpsc::Sender<(u32, u32)>,
}

impl PeatApp {
    /// Create an application with default settings and an empty scene.
    pub async fn new() -> Self {
        Self::with_settings(EngineSettings::new())
    }

    pub fn with_settings(settings: EngineSettings) -> Self {
        let event_loop = EventLoop::new().expect("Failed to create event loop");

        Self {
            event_loop: Some(event_loop),
            app_state: AppState {
                settings,
                camera_pose: (Vector3::new(6.0, 4.5, 6.0), Vector3::new(-24.0, 45.0, 0.0)),
                window: None,
                presenter: None,
                render_thread: None,
                scene: Some(Scene::new()),
                update_callback: None,
                fixed_callback: None,
            },
            update_callback: None,
            fixed_callback: None,
        }
    }

    /// Scene contents before the render thread takes ownership. Populate
    /// objects, lights and volumes here; after [`run`](Self::run) the scene
    /// is only reachable from the update callbacks.
    pub fn scene_mut(&mut self) -> &mut Scene {
        self.app_state
            .scene
            .as_mut()
            .expect("scene is present until the render thread starts")
    }

    /// Initial camera position and euler rotation in degrees.
    pub fn set_camera_pose(&mut self, position: Vector3<f32>, rotation: Vector3<f32>) {
        self.app_state.camera_pose = (position, rotation);
    }

    /// Variable-rate hook, called once per rendered frame with the frame
    /// delta in seconds.
    pub fn set_update<F>(&mut self, update_fn: F)
    where
        F: FnMut(&mut Scene, f32) + Send + 'static,
    {
        self.update_callback = Some(Box::new(update_fn));
    }

    /// Fixed-rate hook, called zero or more times per frame on the
    /// fixed-timestep accumulator.
    pub fn set_fixed_update<F>(&mut self, update_fn: F)
    where
        F: FnMut(&mut Scene, f32) + Send + 'static,
    {
        self.fixed_callback = Some(Box::new(update_fn));
    }

    /// Run the application (consumes self and starts the event loop).
    pub fn run(mut self) {
        let _ = env_logger::try_init();

        self.app_state.update_callback = self.update_callback.take();
        self.app_state.fixed_callback = self.fixed_callback.take();

        let event_loop = self.event_loop.take().expect("Event loop already consumed");
        event_loop.set_control_flow(ControlFlow::Poll);

        event_loop
            .run_app(&mut self.app_state)
            .expect("Failed to run event loop");
    }
}

impl AppState {
    fn start_renderer(&mut self, window: Arc<Window>) -> anyhow::Result<()> {
        let size = window.inner_size();
        let width = size.width.max(1);
        let height = size.height.max(1);

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });
        let surface = instance
            .create_surface(window.clone())
            .context("surface creation failed")?;

        let ctx = pollster::block_on(RenderContext::new(&instance, Some(&surface)))?;
        let device = ctx.device_arc();
        let queue = ctx.queue_arc();

        let capabilities = surface.get_capabilities(ctx.adapter());
        // The gamma pass already encodes sRGB into the frame chain, so the
        // surface view must not re-encode it.
        let format = capabilities
            .formats
            .iter()
            .copied()
            .find(|format| !format.is_srgb())
            .unwrap_or(capabilities.formats[0]);
        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width,
            height,
            present_mode: capabilities.present_modes[0],
            alpha_mode: capabilities.alpha_modes[0],
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &config);

        let mut core = GraphicsCore::new(ctx, self.settings.clone())?;
        let mut camera = Camera::create(core.ctx(), width, height)?;
        camera.transform.position = self.camera_pose.0;
        camera.transform.rotation = self.camera_pose.1;
        let front = camera.front_buffer_handle();
        core.set_camera(camera)?;

        let presenter = Presenter::new(surface, config, device, queue, front);

        let (resize_tx, resize_rx) = mpsc::channel();
        let stop = Arc::new(AtomicBool::new(false));
        let scene = self
            .scene
            .take()
            .expect("scene is present until the render thread starts");
        let settings = self.settings.clone();
        let update_callback = self.update_callback.take();
        let fixed_callback = self.fixed_callback.take();

        let thread_stop = stop.clone();
        let handle = std::thread::Builder::new()
            .name("peat-render".into())
            .spawn(move || {
                render_loop(
                    core,
                    scene,
                    settings,
                    update_callback,
                    fixed_callback,
                    resize_rx,
                    thread_stop,
                );
            })
            .context("render thread spawn failed")?;

        self.presenter = Some(presenter);
        self.render_thread = Some(RenderThread {
            handle,
            stop,
            resize_tx,
        });
        Ok(())
    }

    fn handle_resize(&mut self, width: u32, height: u32) {
        // Minimized windows report zero; keep the last real size.
        if width == 0 || height == 0 {
            return;
        }
        if let Some(presenter) = self.presenter.as_mut() {
            presenter.resize(width, height);
        }
        if let Some(render) = self.render_thread.as_ref() {
            let _ = render.resize_tx.send((width, height));
        }
    }

    fn shutdown(&mut self) {
        if let Some(render) = self.render_thread.take() {
            render.stop.store(true, Ordering::Relaxed);
            if render.handle.join().is_err() {
                log::error!("render thread panicked");
            }
        }
        self.presenter = None;
    }
}

impl ApplicationHandler for AppState {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let attributes = WindowAttributes::default()
            .with_title("peat")
            .with_inner_size(winit::dpi::LogicalSize::new(1280, 720));
        let window = match event_loop.create_window(attributes) {
            Ok(window) => Arc::new(window),
            Err(err) => {
                log::error!("window creation failed: {err}");
                event_loop.exit();
                return;
            }
        };
        self.window = Some(window.clone());

        if let Err(err) = self.start_renderer(window) {
            log::error!("renderer startup failed: {err:#}");
            event_loop.exit();
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _window_id: winit::window::WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::KeyboardInput {
                event:
                    winit::event::KeyEvent {
                        physical_key: winit::keyboard::PhysicalKey::Code(key_code),
                        ..
                    },
                ..
            } => {
                if matches!(key_code, winit::keyboard::KeyCode::Escape) {
                    event_loop.exit();
                }
            }
            WindowEvent::Resized(PhysicalSize { width, height }) => {
                self.handle_resize(width, height);
            }
            WindowEvent::CloseRequested => {
                event_loop.exit();
            }
            WindowEvent::RedrawRequested => {
                if let Some(presenter) = self.presenter.as_mut() {
                    if let Err(err) = presenter.present() {
                        log::warn!("presentation skipped: {err:#}");
                    }
                }
            }
            _ => (),
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(ref window) = self.window {
            window.request_redraw();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        self.shutdown();
    }
}

/// Frame pacing, simulation and rendering, off the event-loop thread.
fn render_loop(
    mut core: GraphicsCore,
    mut scene: Scene,
    settings: EngineSettings,
    mut update_callback: Option<UpdateCallback>,
    mut fixed_callback: Option<UpdateCallback>,
    resize_rx: mpsc::Receiver<(u32, u32)>,
    stop: Arc<AtomicBool>,
) {
    let mut timer = FrameTimer::new(settings.frame_cap_hz, settings.fixed_timestep_hz);

    while !stop.load(Ordering::Relaxed) {
        let delta = timer.tick();

        // Only the newest size matters; drain the channel.
        let mut pending_resize = None;
        while let Ok(size) = resize_rx.try_recv() {
            pending_resize = Some(size);
        }
        if let Some((width, height)) = pending_resize {
            if let Some(camera) = core.camera_mut() {
                if let Err(err) = camera.resize(width, height) {
                    log::warn!("camera resize rejected: {err}");
                }
            }
        }

        let mut steps = 0;
        while let Some(step) = timer.fixed_step() {
            if let Some(callback) = fixed_callback.as_mut() {
                callback(&mut scene, step);
            }
            steps += 1;
            if steps >= timer.max_steps_per_frame() {
                break;
            }
        }
        if let Some(callback) = update_callback.as_mut() {
            callback(&mut scene, delta);
        }

        if let Err(err) = core.update(&mut scene, delta) {
            log::error!("frame failed, stopping render thread: {err}");
            break;
        }

        timer.wait_for_next_frame();
    }

    core.dispose();
}

/// Event-loop side of the frame hand-off: surface, blit pipeline and the
/// front buffer handle.
struct Presenter {
    surface: wgpu::Surface<'static>,
    config: wgpu::SurfaceConfiguration,
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    pipeline: wgpu::RenderPipeline,
    bind_layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
    front: FrontBufferHandle,
}

impl Presenter {
    fn new(
        surface: wgpu::Surface<'static>,
        config: wgpu::SurfaceConfiguration,
        device: Arc<wgpu::Device>,
        queue: Arc<wgpu::Queue>,
        front: FrontBufferHandle,
    ) -> Self {
        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("blit"),
            source: wgpu::ShaderSource::Wgsl(BLIT_SHADER.into()),
        });

        let bind_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("blit bindings"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("blit layout"),
            bind_group_layouts: &[&bind_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("blit pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &module,
                entry_point: Some("vs_main"),
                buffers: &[],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &module,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: config.format,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                ..Default::default()
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("blit sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        Self {
            surface,
            config,
            device,
            queue,
            pipeline,
            bind_layout,
            sampler,
            front,
        }
    }

    fn resize(&mut self, width: u32, height: u32) {
        self.config.width = width;
        self.config.height = height;
        self.surface.configure(&self.device, &self.config);
    }

    /// Acquire the front buffer and stretch it over the surface. During a
    /// resize the two can briefly disagree on size; the sampler hides the
    /// transient.
    fn present(&mut self) -> anyhow::Result<()> {
        let front = self.front.acquire_front()?;

        let surface_texture = match self.surface.get_current_texture() {
            Ok(texture) => texture,
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                self.surface.configure(&self.device, &self.config);
                return Ok(());
            }
            Err(wgpu::SurfaceError::Timeout) => return Ok(()),
            Err(err) => return Err(err.into()),
        };
        let target = surface_texture
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());

        // The front view rotates every acquire, so the bind group is
        // rebuilt per frame.
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("blit"),
            layout: &self.bind_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&front.view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
            ],
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("present"),
            });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("blit pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &target,
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
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.draw(0..3, 0..1);
        }
        self.queue.submit(std::iter::once(encoder.finish()));
        surface_texture.present();
        Ok(())
    }
}
