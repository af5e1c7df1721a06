//! wgpu implementation of the render backend.
//!
//! - `context` creates the instance, adapter, device and queue shared through
//!   the device hub.
//! - `reflect` reads parameters, resource slots and fragment entry points out
//!   of compiled SPIR-V.
//! - `program` turns a binary into pipelines plus uniform buffers that
//!   parameter writes land in.
//! - `channels` loads 2D, cubemap and volume textures for channel slots.
//! - `backend` records frame commands and encodes them into one render pass
//!   over the off-screen back buffer.

mod backend;
mod channels;
mod context;
mod program;
mod reflect;

pub use backend::{WgpuBackend, WgpuOptions, WgpuQuad};
pub use channels::{load_texture, GpuTexture, TextureCache};
pub use context::{GpuDevice, GpuPowerPreference};
pub use program::WgpuProgram;
