//! Desktop preview window: drives a [`LiveSurface`] from a winit event loop
//! and copies its back buffer into the window's swapchain every frame.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use winit::dpi::PhysicalSize;
use winit::event::{ElementState, Event, KeyEvent, WindowEvent};
use winit::event_loop::{ControlFlow, EventLoopBuilder};
use winit::keyboard::{Key, ModifiersState, NamedKey};
use winit::window::{Window, WindowBuilder};

use crate::compile::ProgramCompiler;
use crate::device::{DeviceHub, DeviceLease};
use crate::gpu::{GpuDevice, GpuPowerPreference, TextureCache, WgpuBackend, WgpuOptions};
use crate::host::{FrameStatus, LiveSurface};
use crate::lifecycle::ProgramState;
use crate::types::{ChannelKind, SurfaceSettings, SurfaceSize};

/// A texture to load into a channel slot when the preview starts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelSource {
    pub slot: usize,
    pub path: PathBuf,
    pub kind: ChannelKind,
}

/// Everything the preview window needs besides the compiler.
#[derive(Clone, Debug)]
pub struct PreviewConfig {
    pub title: String,
    pub size: SurfaceSize,
    pub settings: SurfaceSettings,
    pub channels: Vec<ChannelSource>,
    pub power: GpuPowerPreference,
}

/// Surface formats the back buffer can be rendered in and copied from.
const COPYABLE_FORMATS: [wgpu::TextureFormat; 4] = [
    wgpu::TextureFormat::Bgra8Unorm,
    wgpu::TextureFormat::Rgba8Unorm,
    wgpu::TextureFormat::Bgra8UnormSrgb,
    wgpu::TextureFormat::Rgba8UnormSrgb,
];

struct Presenter {
    lease: DeviceLease<GpuDevice>,
    surface: wgpu::Surface<'static>,
    config: wgpu::SurfaceConfiguration,
}

impl Presenter {
    fn new(lease: DeviceLease<GpuDevice>, window: Arc<Window>) -> Result<Self> {
        let gpu = lease.device();
        let surface = gpu
            .instance
            .create_surface(window.clone())
            .context("failed to create rendering surface")?;
        let caps = surface.get_capabilities(&gpu.adapter);
        if !caps.usages.contains(wgpu::TextureUsages::COPY_DST) {
            anyhow::bail!("surface does not accept copies from the back buffer");
        }
        let format = COPYABLE_FORMATS
            .into_iter()
            .find(|format| caps.formats.contains(format))
            .ok_or_else(|| anyhow!("no 8-bit RGBA surface format among {:?}", caps.formats))?;
        let size = window.inner_size();
        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_DST,
            format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: caps
                .present_modes
                .first()
                .copied()
                .unwrap_or(wgpu::PresentMode::Fifo),
            alpha_mode: caps
                .alpha_modes
                .first()
                .copied()
                .unwrap_or(wgpu::CompositeAlphaMode::Auto),
            view_formats: vec![],
            desired_maximum_frame_latency: 1,
        };
        surface.configure(&gpu.device, &config);
        tracing::debug!(
            format = ?format,
            width = config.width,
            height = config.height,
            "configured preview surface"
        );
        Ok(Self {
            lease,
            surface,
            config,
        })
    }

    fn format(&self) -> wgpu::TextureFormat {
        self.config.format
    }

    fn resize(&mut self, size: PhysicalSize<u32>) {
        if size.width == 0 || size.height == 0 {
            return;
        }
        self.config.width = size.width;
        self.config.height = size.height;
        self.surface.configure(&self.lease.device().device, &self.config);
    }

    fn reconfigure(&mut self) {
        self.surface.configure(&self.lease.device().device, &self.config);
    }

    fn present(&mut self, back_buffer: &wgpu::Texture) -> Result<(), wgpu::SurfaceError> {
        let frame = self.surface.get_current_texture()?;
        let gpu = self.lease.device();
        let extent = wgpu::Extent3d {
            width: back_buffer.width().min(frame.texture.width()),
            height: back_buffer.height().min(frame.texture.height()),
            depth_or_array_layers: 1,
        };
        let mut encoder = gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("fxlive present"),
            });
        encoder.copy_texture_to_texture(
            back_buffer.as_image_copy(),
            frame.texture.as_image_copy(),
            extent,
        );
        gpu.queue.submit(Some(encoder.finish()));
        frame.present();
        Ok(())
    }
}

fn load_channels(
    surface: &mut LiveSurface<WgpuBackend>,
    cache: &mut TextureCache,
    gpu: &GpuDevice,
    channels: &[ChannelSource],
) {
    for source in channels {
        let loaded = cache
            .load(gpu, &source.path, source.kind)
            .and_then(|texture| {
                surface
                    .assign_channel(source.slot, texture, source.kind)
                    .map_err(anyhow::Error::from)
            });
        if let Err(err) = loaded {
            tracing::warn!(
                slot = source.slot,
                path = %source.path.display(),
                error = %err,
                "channel texture unavailable; the slot stays empty"
            );
        }
    }
    cache.prune();
}

fn status_title(base: &str, surface: &LiveSurface<WgpuBackend>) -> String {
    if surface.is_halted() {
        return format!("{base} [halted]");
    }
    match surface.program_state() {
        ProgramState::Uninitialized | ProgramState::Compiling => format!("{base} [compiling]"),
        ProgramState::Active => base.to_string(),
        ProgramState::CompileFailed => format!("{base} [compile error]"),
    }
}

fn is_recompile_key(event: &KeyEvent, modifiers: ModifiersState) -> bool {
    if event.state != ElementState::Pressed || event.repeat {
        return false;
    }
    match &event.logical_key {
        Key::Named(NamedKey::F5) => true,
        Key::Character(value) => modifiers.control_key() && value.eq_ignore_ascii_case("s"),
        _ => false,
    }
}

/// Opens the preview window and runs until it is closed.
pub fn run_preview(config: PreviewConfig, compiler: Box<dyn ProgramCompiler>) -> Result<()> {
    let event_loop = EventLoopBuilder::new()
        .build()
        .map_err(|err| anyhow!("failed to create event loop: {err}"))?;

    let window = WindowBuilder::new()
        .with_title(config.title.as_str())
        .with_inner_size(PhysicalSize::new(config.size.width, config.size.height))
        .build(&event_loop)
        .map_err(|err| anyhow!("failed to create preview window: {err}"))?;
    let window = Arc::new(window);

    let power = config.power;
    let hub = DeviceHub::new(move || GpuDevice::new(power));
    let presenter_lease = hub.acquire().context("failed to initialise GPU")?;
    let mut presenter = Presenter::new(presenter_lease, window.clone())?;

    let inner = window.inner_size();
    let mut surface = LiveSurface::<WgpuBackend>::new(
        Arc::clone(&hub),
        WgpuOptions {
            format: presenter.format(),
        },
        config.settings.clone(),
        compiler,
        SurfaceSize::new(inner.width, inner.height),
    );
    surface
        .on_activate()
        .context("failed to activate live surface")?;

    let mut textures = TextureCache::new();
    load_channels(
        &mut surface,
        &mut textures,
        presenter.lease.device(),
        &config.channels,
    );

    tracing::info!(
        template = %config.settings.template.display(),
        source = %config.settings.source.display(),
        "preview running; press Ctrl+S or F5 to recompile"
    );

    let base_title = config.title.clone();
    let mut title = String::new();
    let mut modifiers = ModifiersState::empty();
    let mut last_tick = Instant::now();

    let run_result = event_loop.run(move |event, elwt| match event {
        Event::WindowEvent { window_id, event } if window_id == window.id() => match event {
            WindowEvent::CloseRequested | WindowEvent::Destroyed => {
                surface.on_deactivate();
                elwt.exit();
            }
            WindowEvent::ModifiersChanged(state) => {
                modifiers = state.state();
            }
            WindowEvent::KeyboardInput { event, .. } => {
                if is_recompile_key(&event, modifiers) {
                    tracing::info!("recompile requested");
                    surface.request_recompile();
                } else if event.state == ElementState::Pressed
                    && matches!(event.logical_key, Key::Named(NamedKey::Escape))
                {
                    surface.on_deactivate();
                    elwt.exit();
                }
            }
            WindowEvent::Resized(size) => {
                presenter.resize(size);
                surface.on_surface_size_changed(size.width, size.height);
            }
            WindowEvent::RedrawRequested => {
                let now = Instant::now();
                let elapsed = now.duration_since(last_tick);
                last_tick = now;

                match surface.on_frame_tick(elapsed) {
                    Ok(FrameStatus::Rendered { .. } | FrameStatus::Cleared) => {
                        let presented = surface
                            .backend()
                            .map(|backend| presenter.present(backend.back_buffer()));
                        match presented {
                            Some(Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated)) => {
                                presenter.reconfigure();
                            }
                            Some(Err(wgpu::SurfaceError::OutOfMemory)) => {
                                tracing::error!("surface out of memory; exiting preview");
                                surface.on_deactivate();
                                elwt.exit();
                            }
                            Some(Err(wgpu::SurfaceError::Timeout)) => {
                                tracing::debug!("surface timeout; retrying next frame");
                            }
                            Some(Err(other)) => {
                                tracing::warn!("surface error: {other:?}; retrying next frame");
                            }
                            Some(Ok(())) | None => {}
                        }
                    }
                    Ok(FrameStatus::Inactive | FrameStatus::Halted) => {}
                    Err(err) => {
                        tracing::error!(
                            error = %err,
                            "preview stopped rendering; close the window to exit"
                        );
                    }
                }

                let next_title = status_title(&base_title, &surface);
                if next_title != title {
                    window.set_title(&next_title);
                    title = next_title;
                }
            }
            _ => {}
        },
        Event::AboutToWait => {
            if !surface.is_halted() {
                window.request_redraw();
            }
            elwt.set_control_flow(ControlFlow::Wait);
        }
        _ => {}
    });

    run_result.map_err(|err| anyhow!("window event loop error: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copyable_formats_are_eight_bit() {
        for format in COPYABLE_FORMATS {
            assert_eq!(format.block_copy_size(None), Some(4));
        }
    }
}
