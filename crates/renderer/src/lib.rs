//! Live shader preview pipeline.
//!
//! A user pixel shader is spliced into a template together with one
//! declaration per bound texture channel, compiled by an external compiler
//! and hot-swapped into a running surface whenever the source changes on
//! disk. The overall flow of a frame is:
//!
//! ```text
//!   host window ──▶ LiveSurface::on_frame_tick
//!                        │
//!                        ├─▶ ProgramManager::update ─▶ assemble ─▶ compile ─▶ reflect
//!                        │
//!                        ├─▶ BindingPlan::apply ─▶ declared uniforms only
//!                        │
//!                        └─▶ RenderBackend: clear, bind quad, draw every pass
//! ```
//!
//! Rendering goes through the [`RenderBackend`] trait; [`gpu::WgpuBackend`] is
//! the wgpu implementation and [`window::run_preview`] the desktop host.

pub mod assemble;
pub mod backend;
pub mod binding;
pub mod channels;
pub mod compile;
pub mod device;
pub mod error;
pub mod gpu;
pub mod host;
pub mod lifecycle;
pub mod program;
pub mod staleness;
pub mod types;
pub mod window;

#[cfg(test)]
mod testing;

pub use assemble::ShaderAssembler;
pub use backend::{QuadGeometry, QuadVertex, RenderBackend};
pub use binding::{BindingPlan, FrameClock, FrameUniforms, UniformSource};
pub use channels::{Channel, ChannelSlots, ChannelTexture, TextureExtent};
pub use compile::{
    CompileFailure, CompileOutcome, CompilerSettings, ExternalCompiler, ProgramCompiler,
};
pub use device::{DeviceHub, DeviceLease};
pub use error::RenderError;
pub use host::{FrameStatus, LiveSurface};
pub use lifecycle::{ProgramManager, ProgramState, UpdateOutcome};
pub use program::{ParameterDesc, ParameterType, ShaderProgram};
pub use types::{ChannelKind, ClearColor, SurfaceSettings, SurfaceSize, CHANNEL_COUNT};
pub use window::{run_preview, ChannelSource, PreviewConfig};
