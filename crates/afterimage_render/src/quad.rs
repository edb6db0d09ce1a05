//! Shared full-screen quad
//!
//! Every pass draws the same two triangles. The compositor creates the
//! buffers once and recreates them after a context loss; passes and effect
//! layers only read them.

use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use parking_lot::RwLock;

use crate::context::GraphicsContext;
use crate::error::GpuResult;
use crate::resource::BufferHandle;

/// Quad vertex: clip-space position, uv derived in the shader
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct QuadVertex {
    pub position: [f32; 2],
}

/// Corners, counter-clockwise from top right
pub const QUAD_VERTICES: [QuadVertex; 4] = [
    QuadVertex { position: [1.0, 1.0] },
    QuadVertex { position: [-1.0, 1.0] },
    QuadVertex { position: [-1.0, -1.0] },
    QuadVertex { position: [1.0, -1.0] },
];

pub const QUAD_INDICES: [u32; 6] = [0, 1, 2, 0, 2, 3];

/// Number of indices in one quad draw
pub const QUAD_INDEX_COUNT: u32 = QUAD_INDICES.len() as u32;

/// Backend buffers of the quad
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScreenQuad {
    pub vertex_buffer: BufferHandle,
    pub index_buffer: BufferHandle,
    /// Context generation the buffers belong to
    pub generation: u64,
}

impl ScreenQuad {
    /// Upload the quad buffers
    pub fn create(gpu: &mut dyn GraphicsContext) -> GpuResult<Self> {
        let vertex_buffer = gpu.create_vertex_buffer(bytemuck::cast_slice(&QUAD_VERTICES))?;
        let index_buffer = match gpu.create_index_buffer(&QUAD_INDICES) {
            Ok(buffer) => buffer,
            Err(e) => {
                gpu.release_buffer(vertex_buffer);
                return Err(e);
            }
        };
        Ok(Self {
            vertex_buffer,
            index_buffer,
            generation: gpu.generation(),
        })
    }

    pub fn release(&self, gpu: &mut dyn GraphicsContext) {
        gpu.release_buffer(self.vertex_buffer);
        gpu.release_buffer(self.index_buffer);
    }

    /// Whether the buffers are still valid on this context
    pub fn is_current(&self, gpu: &dyn GraphicsContext) -> bool {
        self.generation == gpu.generation()
    }
}

/// Non-owning view of the compositor's quad. Only the compositor writes.
pub type SharedQuad = Arc<RwLock<Option<ScreenQuad>>>;

/// Empty shared slot
pub fn shared_quad() -> SharedQuad {
    Arc::new(RwLock::new(None))
}
