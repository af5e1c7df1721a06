//! The seam between the live pipeline and a concrete graphics API.

use std::sync::Arc;

use bytemuck::{Pod, Zeroable};

use crate::channels::ChannelTexture;
use crate::device::DeviceLease;
use crate::error::RenderError;
use crate::program::ShaderProgram;
use crate::types::{ChannelKind, ClearColor, RasterizerState, SamplerState, SurfaceSize};

/// Position, colour and texture coordinate of a quad corner.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct QuadVertex {
    pub position: [f32; 3],
    pub color: [u8; 4],
    pub uv: [f32; 2],
}

impl QuadVertex {
    const fn new(position: [f32; 3], uv: [f32; 2]) -> Self {
        Self {
            position,
            color: [255, 255, 255, 255],
            uv,
        }
    }
}

/// The full-screen quad every program is drawn onto.
pub struct QuadGeometry;

impl QuadGeometry {
    pub const VERTICES: [QuadVertex; 4] = [
        QuadVertex::new([-1.0, -1.0, 0.0], [0.0, 1.0]),
        QuadVertex::new([1.0, 1.0, 0.0], [1.0, 0.0]),
        QuadVertex::new([-1.0, 1.0, 0.0], [0.0, 0.0]),
        QuadVertex::new([1.0, -1.0, 0.0], [1.0, 1.0]),
    ];

    pub const INDICES: [u32; 6] = [0, 2, 1, 0, 3, 1];

    pub const PRIMITIVE_COUNT: u32 = 2;
}

/// Everything the live surface needs from a graphics API.
///
/// Draw-state calls (`clear` through `draw_indexed`) are recorded between
/// [`begin_frame`](RenderBackend::begin_frame) and
/// [`finish_frame`](RenderBackend::finish_frame); the back buffer is only
/// recreated outside that window.
pub trait RenderBackend: Sized {
    type Device: Send + Sync + 'static;
    type Options: Clone;
    type Texture: ChannelTexture;
    type Program: ShaderProgram<Texture = Self::Texture>;
    type Quad;

    fn create(
        lease: DeviceLease<Self::Device>,
        size: SurfaceSize,
        options: &Self::Options,
    ) -> Result<Self, RenderError>;

    fn back_buffer_size(&self) -> SurfaceSize;

    fn recreate_back_buffer(&mut self, size: SurfaceSize) -> Result<(), RenderError>;

    fn create_quad(&mut self) -> Result<Self::Quad, RenderError>;

    /// Builds a program from the compiler's output.
    fn load_program(&mut self, binary: &[u8]) -> Result<Self::Program, RenderError>;

    /// 1x1 stand-in bound to declared channels that have no usable texture.
    fn placeholder(&mut self, kind: ChannelKind) -> Result<Arc<Self::Texture>, RenderError>;

    fn begin_frame(&mut self) -> Result<(), RenderError>;

    fn clear(&mut self, color: ClearColor);

    fn set_sampler_state(&mut self, state: SamplerState);

    fn set_rasterizer_state(&mut self, state: RasterizerState);

    fn bind_quad(&mut self, quad: &Self::Quad);

    /// Makes `technique`/`pass` of `program` current, capturing its parameter values.
    fn apply_pass(
        &mut self,
        program: &Self::Program,
        technique: usize,
        pass: usize,
    ) -> Result<(), RenderError>;

    fn draw_indexed(&mut self, primitive_count: u32) -> Result<(), RenderError>;

    fn finish_frame(&mut self) -> Result<(), RenderError>;
}
