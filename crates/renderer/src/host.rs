//! The live surface: what a host window drives once per frame.

use std::sync::Arc;
use std::time::Duration;

use crate::assemble::ShaderAssembler;
use crate::backend::{QuadGeometry, RenderBackend};
use crate::binding::FrameClock;
use crate::channels::{Channel, ChannelSlots};
use crate::compile::ProgramCompiler;
use crate::device::DeviceHub;
use crate::error::RenderError;
use crate::lifecycle::{CompileInputs, ProgramManager, ProgramState, UpdateOutcome};
use crate::program::ShaderProgram;
use crate::types::{
    ChannelKind, RasterizerState, SamplerState, SurfaceSettings, SurfaceSize, CHANNEL_COUNT,
};

/// What a frame tick did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameStatus {
    /// A program was drawn through `passes` passes after `assignments` parameter writes.
    Rendered { passes: usize, assignments: usize },
    /// No program is active; the back buffer was only cleared.
    Cleared,
    /// The surface has not been activated.
    Inactive,
    /// A fatal error tore the surface down; it stays dark until re-activated.
    Halted,
}

struct Live<B: RenderBackend> {
    backend: B,
    quad: B::Quad,
}

/// Hot-reloading shader preview bound to one render target.
pub struct LiveSurface<B: RenderBackend> {
    hub: Arc<DeviceHub<B::Device>>,
    options: B::Options,
    settings: SurfaceSettings,
    assembler: ShaderAssembler,
    compiler: Box<dyn ProgramCompiler>,
    programs: ProgramManager<B::Program>,
    channels: ChannelSlots<B::Texture>,
    clock: FrameClock,
    size: SurfaceSize,
    resize_pending: bool,
    live: Option<Live<B>>,
    halted: bool,
}

impl<B: RenderBackend> LiveSurface<B> {
    pub fn new(
        hub: Arc<DeviceHub<B::Device>>,
        options: B::Options,
        settings: SurfaceSettings,
        compiler: Box<dyn ProgramCompiler>,
        size: SurfaceSize,
    ) -> Self {
        let assembler = ShaderAssembler::new(
            &settings.template,
            &settings.source,
            &settings.scratch_dir,
        );
        Self {
            hub,
            options,
            settings,
            assembler,
            compiler,
            programs: ProgramManager::new(),
            channels: ChannelSlots::new(),
            clock: FrameClock::new(),
            size: size.clamped(),
            resize_pending: false,
            live: None,
            halted: false,
        }
    }

    /// Acquires the shared device and builds the back buffer and quad.
    pub fn on_activate(&mut self) -> Result<(), RenderError> {
        if self.live.is_some() {
            return Ok(());
        }
        let lease = self.hub.acquire()?;
        let mut backend = B::create(lease, self.size, &self.options)?;
        let quad = backend.create_quad()?;
        self.live = Some(Live { backend, quad });
        self.resize_pending = false;
        self.halted = false;
        self.programs.reset();
        tracing::info!(size = %self.size, "live surface activated");
        Ok(())
    }

    /// Releases the program, the back buffer and the device lease.
    pub fn on_deactivate(&mut self) {
        self.programs.reset();
        if self.live.take().is_some() {
            tracing::info!("live surface deactivated");
        }
    }

    /// Records the new size; the back buffer is rebuilt at the start of the next frame.
    pub fn on_surface_size_changed(&mut self, width: u32, height: u32) {
        let size = SurfaceSize::new(width, height).clamped();
        if size != self.size {
            tracing::debug!(from = %self.size, to = %size, "surface resized");
            self.size = size;
            self.resize_pending = true;
        }
    }

    /// Runs one frame. `elapsed` is the time since the previous tick.
    pub fn on_frame_tick(&mut self, elapsed: Duration) -> Result<FrameStatus, RenderError> {
        if self.halted {
            return Ok(FrameStatus::Halted);
        }
        if self.live.is_none() {
            return Ok(FrameStatus::Inactive);
        }
        match self.render_frame(elapsed) {
            Ok(status) => Ok(status),
            Err(err) => {
                tracing::error!(error = %err, "live surface halted");
                self.programs.reset();
                self.live = None;
                self.halted = true;
                Err(err)
            }
        }
    }

    fn render_frame(&mut self, elapsed: Duration) -> Result<FrameStatus, RenderError> {
        let Some(live) = self.live.as_mut() else {
            return Ok(FrameStatus::Inactive);
        };
        let backend = &mut live.backend;

        if self.resize_pending {
            backend.recreate_back_buffer(self.size)?;
            self.resize_pending = false;
        }

        let source = self.settings.source.clone();
        let binary = self.settings.binary_path();
        let inputs = CompileInputs {
            source: &source,
            binary: &binary,
            assembler: &self.assembler,
            compiler: self.compiler.as_ref(),
            kinds: self.channels.kinds(),
        };
        if self.programs.update(backend, &inputs)? == UpdateOutcome::Failed {
            tracing::trace!("frame continues with previous program");
        }

        let delta = self.clock.tick(elapsed);
        self.channels.advance(delta);
        let frame = self.clock.uniforms(self.size.width, self.size.height);

        let assignments = match self.programs.active_mut() {
            Some(active) => active
                .plan
                .apply(&mut active.program, &frame, &self.channels, backend)?,
            None => 0,
        };

        backend.begin_frame()?;
        backend.clear(self.settings.clear_color);

        let status = match self.programs.active() {
            Some(active) => {
                backend.set_sampler_state(SamplerState::POINT_WRAP);
                backend.set_rasterizer_state(RasterizerState::CULL_NONE);
                backend.bind_quad(&live.quad);
                let mut passes = 0;
                for (technique_index, technique) in active.program.techniques().iter().enumerate() {
                    for pass_index in 0..technique.passes.len() {
                        backend.apply_pass(&active.program, technique_index, pass_index)?;
                        backend.draw_indexed(QuadGeometry::PRIMITIVE_COUNT)?;
                        passes += 1;
                    }
                }
                FrameStatus::Rendered {
                    passes,
                    assignments,
                }
            }
            None => FrameStatus::Cleared,
        };

        backend.finish_frame()?;
        tracing::trace!(?status, "frame complete");
        Ok(status)
    }

    /// Forces a compile on the next frame even if the source is unchanged.
    pub fn request_recompile(&mut self) {
        self.programs.invalidate();
    }

    pub fn last_compile_diagnostics(&self) -> &str {
        self.programs.diagnostics()
    }

    pub fn program_state(&self) -> ProgramState {
        self.programs.state()
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    pub fn size(&self) -> SurfaceSize {
        self.size
    }

    pub fn settings(&self) -> &SurfaceSettings {
        &self.settings
    }

    /// Binds `texture` to `slot`. The program is recompiled so its declarations match.
    pub fn assign_channel(
        &mut self,
        slot: usize,
        texture: Arc<B::Texture>,
        kind: ChannelKind,
    ) -> Result<(), RenderError> {
        if slot >= CHANNEL_COUNT {
            return Err(RenderError::Binding(format!(
                "channel slot {slot} out of range (0-{})",
                CHANNEL_COUNT - 1
            )));
        }
        self.channels.set(slot, Some(Channel::new(texture, kind)));
        self.programs.invalidate();
        tracing::info!(channel = slot, kind = %kind, "channel assigned");
        Ok(())
    }

    pub fn clear_channel(&mut self, slot: usize) {
        if slot < CHANNEL_COUNT && self.channels.set(slot, None).is_some() {
            self.programs.invalidate();
            tracing::info!(channel = slot, "channel cleared");
        }
    }

    pub fn channels(&self) -> &ChannelSlots<B::Texture> {
        &self.channels
    }

    pub fn backend(&self) -> Option<&B> {
        self.live.as_ref().map(|live| &live.backend)
    }

    pub fn backend_mut(&mut self) -> Option<&mut B> {
        self.live.as_mut().map(|live| &mut live.backend)
    }

    /// Number of parameters the active program declares, if one is active.
    pub fn active_parameter_count(&self) -> Option<usize> {
        self.programs
            .active()
            .map(|active| active.program.parameters().len())
    }
}
