//! Compositor error types

use thiserror::Error;

/// Errors reported by a graphics backend
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GpuError {
    #[error("Out of GPU memory ({requested_bytes} bytes requested)")]
    OutOfMemory { requested_bytes: u64 },

    #[error("Graphics context lost")]
    ContextLost,
}

/// Result type for backend operations
pub type GpuResult<T> = std::result::Result<T, GpuError>;

/// Post-processing errors
///
/// None of these cross the per-frame boundary: `render` and `direct_render`
/// absorb them and report through [`Diagnostics`](crate::Diagnostics).
#[derive(Debug, Error)]
pub enum PostProcessError {
    #[error("Render target allocation failed ({width}x{height})")]
    ResourceExhaustion {
        width: u32,
        height: u32,
        #[source]
        source: GpuError,
    },

    #[error("Misconfigured chain: {0}")]
    MisconfiguredChain(String),

    #[error("Graphics context lost")]
    ContextLost,

    #[error("GPU error: {0}")]
    Gpu(#[from] GpuError),

    #[error("Configuration error: {0}")]
    Config(#[from] serde_json::Error),
}

/// Result type for compositor operations
pub type Result<T> = std::result::Result<T, PostProcessError>;
