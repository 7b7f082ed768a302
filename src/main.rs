use std::env;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use log::{debug, error, info};
use pollster::block_on;
use winit::application::ApplicationHandler;
use winit::dpi::LogicalSize;
use winit::event::{DeviceEvent, DeviceId, ElementState, MouseButton, MouseScrollDelta, WindowEvent};
use winit::event_loop::{ActiveEventLoop, EventLoop, EventLoopProxy};
use winit::window::{Window, WindowId};

use obj_viewer::{
    AssetLoader, CameraRig, DirectorySource, FrameLoop, LoadError, LoadRequest, ObjModel, Renderer,
    Scene, SceneObject, SharedProgress,
};

fn main() {
    env_logger::init();
    if let Err(err) = run() {
        eprintln!("Error: {err:?}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let options = CliOptions::parse()?;
    if options.summary_only {
        return run_headless(&options);
    }
    match run_interactive(&options) {
        Ok(()) => Ok(()),
        Err(err) => {
            if err.downcast_ref::<WindowInitError>().is_some() {
                eprintln!(
                    "{err}. Falling back to --summary-only mode (set DISPLAY or install X11 libs to enable rendering)."
                );
                run_headless(&options)
            } else {
                Err(err)
            }
        }
    }
}

/// Loads the model without opening a window and prints the scene summary.
fn run_headless(options: &CliOptions) -> Result<()> {
    let loader = AssetLoader::new(DirectorySource::new(&options.assets_dir))
        .with_progress(|progress| debug!("{} fetched {} bytes", progress.stage, progress.bytes));
    let request = LoadRequest::new(&options.mtl_file, &options.obj_file);

    let mut scene = Scene::with_default_lights();
    match block_on(loader.load(&request)) {
        Ok(model) => {
            info!(
                "loaded {} ({} surfaces, {} triangles)",
                request.geometry_file(),
                model.surfaces.len(),
                model.triangle_count()
            );
            scene.push(SceneObject::from_model(options.obj_file.clone(), model));
        }
        Err(err) => eprintln!("Failed to load model: {err}"),
    }

    print_summary(&scene);
    Ok(())
}

fn run_interactive(options: &CliOptions) -> Result<()> {
    let event_loop = EventLoop::<ViewerEvent>::with_user_event()
        .build()
        .map_err(|err| WindowInitError::from_error("event loop", err))?;
    let proxy = event_loop.create_proxy();

    let mut app = ViewerApp::new(options, proxy);
    event_loop.run_app(&mut app)?;

    if let Some(err) = app.last_error.take() {
        return Err(err);
    }

    print_summary(&app.scene);
    Ok(())
}

fn print_summary(scene: &Scene) {
    println!(
        "Scene contains {} object(s), {} triangle(s)",
        scene.objects.len(),
        scene.triangle_count()
    );
    for object in &scene.objects {
        println!(" - {}: {} surface(s)", object.name, object.model.surfaces.len());
        for surface in &object.model.surfaces {
            println!(
                "   - {} ({} triangles)",
                surface.material.name,
                surface.triangle_count()
            );
        }
    }
}

/// Events delivered back to the winit loop from worker threads.
#[derive(Debug)]
enum ViewerEvent {
    LoadFinished(Result<ObjModel, LoadError>),
}

/// Which pointer drag is in progress, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DragMode {
    Rotate,
    Pan,
}

struct ViewerApp {
    assets_dir: PathBuf,
    request: LoadRequest,
    proxy: EventLoopProxy<ViewerEvent>,
    renderer: Option<Renderer>,
    scene: Scene,
    rig: CameraRig,
    frames: FrameLoop,
    progress: SharedProgress,
    drag: Option<DragMode>,
    last_error: Option<anyhow::Error>,
}

impl ViewerApp {
    fn new(options: &CliOptions, proxy: EventLoopProxy<ViewerEvent>) -> Self {
        Self {
            assets_dir: options.assets_dir.clone(),
            request: LoadRequest::new(&options.mtl_file, &options.obj_file),
            proxy,
            renderer: None,
            scene: Scene::with_default_lights(),
            rig: CameraRig::default(),
            frames: FrameLoop::default(),
            progress: SharedProgress::new(),
            drag: None,
            last_error: None,
        }
    }

    /// Starts the two-stage model load on a worker thread; the result
    /// comes back through the event-loop proxy.
    fn spawn_loader(&self) {
        let source = DirectorySource::new(&self.assets_dir);
        let request = self.request.clone();
        let proxy = self.proxy.clone();
        let progress = self.progress.clone();
        std::thread::spawn(move || {
            let loader =
                AssetLoader::new(source).with_progress(move |update| progress.record(update));
            let result = block_on(loader.load(&request));
            if proxy.send_event(ViewerEvent::LoadFinished(result)).is_err() {
                debug!("event loop closed before the model load finished");
            }
        });
    }

    fn redraw(&mut self, event_loop: &ActiveEventLoop) {
        let Some(renderer) = self.renderer.as_mut() else {
            return;
        };

        let mut surface_error = None;
        let alive = self.frames.tick(&mut self.rig, &self.scene, |scene, camera| {
            if let Err(err) = renderer.render(scene, camera) {
                surface_error = Some(err);
            }
            Ok(())
        });

        match surface_error {
            Some(wgpu::SurfaceError::Lost) | Some(wgpu::SurfaceError::Outdated) => {
                let size = renderer.window().inner_size();
                renderer.resize(size);
            }
            Some(wgpu::SurfaceError::OutOfMemory) => {
                self.last_error = Some(anyhow!("GPU is out of memory"));
                event_loop.exit();
                return;
            }
            Some(err) => {
                info!("surface error: {err}; retrying next frame");
            }
            None => {}
        }

        if alive {
            renderer.window().request_redraw();
        } else {
            event_loop.exit();
        }
    }
}

impl ApplicationHandler<ViewerEvent> for ViewerApp {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.renderer.is_some() {
            return;
        }

        let attributes = Window::default_attributes()
            .with_title("OBJ Viewer")
            .with_inner_size(LogicalSize::new(1280.0, 720.0));
        let window = match event_loop.create_window(attributes) {
            Ok(window) => Arc::new(window),
            Err(err) => {
                self.last_error = Some(WindowInitError::from_error("window", err).into());
                event_loop.exit();
                return;
            }
        };

        let size = window.inner_size();
        match block_on(Renderer::new(Arc::clone(&window))) {
            Ok(renderer) => {
                self.rig.camera.set_aspect(size.width, size.height);
                self.renderer = Some(renderer);
            }
            Err(err) => {
                self.last_error = Some(err);
                event_loop.exit();
                return;
            }
        }

        self.spawn_loader();
        window.request_redraw();
    }

    fn user_event(&mut self, _event_loop: &ActiveEventLoop, event: ViewerEvent) {
        match event {
            ViewerEvent::LoadFinished(Ok(model)) => {
                if let Some(progress) = self.progress.latest() {
                    debug!("final load progress: {} bytes", progress.bytes);
                }
                info!(
                    "loaded {} ({} surfaces, {} triangles)",
                    self.request.geometry_file(),
                    model.surfaces.len(),
                    model.triangle_count()
                );
                self.scene.push(SceneObject::from_model(
                    self.request.geometry_file().to_string(),
                    model,
                ));
            }
            // The viewer keeps running with whatever is already on screen.
            ViewerEvent::LoadFinished(Err(err)) => {
                error!("model load failed: {err}");
            }
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent,
    ) {
        let Some(renderer) = self.renderer.as_mut() else {
            return;
        };
        if window_id != renderer.window_id() {
            return;
        }

        match event {
            WindowEvent::CloseRequested => {
                self.frames.cancel_token().cancel();
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                if size == renderer.size() {
                    return;
                }
                renderer.resize(size);
                self.rig.camera.set_aspect(size.width, size.height);
            }
            WindowEvent::MouseInput { state, button, .. } => {
                let mode = match button {
                    MouseButton::Left => Some(DragMode::Rotate),
                    MouseButton::Right => Some(DragMode::Pan),
                    _ => None,
                };
                if let Some(mode) = mode {
                    match state {
                        ElementState::Pressed => self.drag = Some(mode),
                        ElementState::Released => {
                            if self.drag == Some(mode) {
                                self.drag = None;
                            }
                        }
                    }
                }
            }
            WindowEvent::MouseWheel { delta, .. } => {
                let amount = match delta {
                    MouseScrollDelta::LineDelta(_, y) => y,
                    MouseScrollDelta::PixelDelta(position) => position.y as f32 / 50.0,
                };
                self.rig.controller.zoom(amount);
            }
            WindowEvent::RedrawRequested => {
                self.redraw(event_loop);
            }
            _ => {}
        }
    }

    fn device_event(
        &mut self,
        _event_loop: &ActiveEventLoop,
        _device_id: DeviceId,
        event: DeviceEvent,
    ) {
        if let DeviceEvent::MouseMotion { delta: (dx, dy) } = event {
            match self.drag {
                Some(DragMode::Rotate) => self.rig.controller.rotate(dx as f32, dy as f32),
                Some(DragMode::Pan) => self.rig.controller.pan(dx as f32, dy as f32),
                None => {}
            }
        }
    }
}

#[derive(Debug)]
struct WindowInitError {
    message: String,
}

impl WindowInitError {
    fn from_error(stage: &str, err: impl fmt::Display) -> Self {
        Self {
            message: format!("failed to initialize {stage}: {err}"),
        }
    }
}

impl fmt::Display for WindowInitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for WindowInitError {}

struct CliOptions {
    assets_dir: PathBuf,
    mtl_file: String,
    obj_file: String,
    summary_only: bool,
}

impl CliOptions {
    fn parse() -> Result<Self> {
        let mut assets_dir = PathBuf::from("./assets");
        let mut mtl_file = "model.mtl".to_string();
        let mut obj_file = "model.obj".to_string();
        let mut summary_only = false;
        let mut saw_dir = false;

        let mut args = env::args().skip(1);
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--mtl" => {
                    mtl_file = args
                        .next()
                        .ok_or_else(|| anyhow!("--mtl requires a file name"))?;
                }
                "--obj" => {
                    obj_file = args
                        .next()
                        .ok_or_else(|| anyhow!("--obj requires a file name"))?;
                }
                "--summary-only" => summary_only = true,
                other if !other.starts_with('-') && !saw_dir => {
                    assets_dir = PathBuf::from(other);
                    saw_dir = true;
                }
                other => {
                    return Err(anyhow!(
                        "Unknown argument: {other}. Usage: obj-viewer [assets-dir] [--mtl FILE] [--obj FILE] [--summary-only]"
                    ));
                }
            }
        }

        Ok(Self {
            assets_dir,
            mtl_file,
            obj_file,
            summary_only,
        })
    }
}
