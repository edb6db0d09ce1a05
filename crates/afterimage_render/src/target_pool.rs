//! Render Target Pool
//!
//! Off-screen color targets for the ping-pong chain. Targets are addressed by
//! a logical [`RenderTargetId`] that survives context loss: `rebuild_all`
//! recreates the backend texture behind every id and bumps its generation
//! stamp, so passes keep working with the handles they already hold.
//!
//! - `acquire` hands out an idle target with a matching descriptor, or
//!   allocates a new one. A target in use is never handed out twice.
//! - `release` returns a target for reuse in the same frame or the next.
//! - `end_frame` releases everything acquired this frame.
//! - `trim` destroys targets left idle for too long (resolution changes).

use std::collections::BTreeMap;

use afterimage_core::define_id;

use crate::context::GraphicsContext;
use crate::error::{GpuError, PostProcessError, Result};
use crate::resource::{TextureDesc, TextureFormat, TextureHandle};

define_id!(
    /// Logical handle of a pooled render target
    RenderTargetId
);

/// Snapshot of a pooled target
#[derive(Clone, Debug, PartialEq)]
pub struct RenderTargetInfo {
    pub id: RenderTargetId,
    pub desc: TextureDesc,
    /// Backend texture, None after a failed rebuild
    pub texture: Option<TextureHandle>,
    /// Bumped each time the backend texture is recreated
    pub generation: u32,
    pub in_use: bool,
    pub idle_frames: u32,
}

struct RenderTarget {
    desc: TextureDesc,
    texture: Option<TextureHandle>,
    generation: u32,
    in_use: bool,
    used_this_frame: bool,
    idle_frames: u32,
}

impl RenderTarget {
    fn info(&self, id: RenderTargetId) -> RenderTargetInfo {
        RenderTargetInfo {
            id,
            desc: self.desc.clone(),
            texture: self.texture,
            generation: self.generation,
            in_use: self.in_use,
            idle_frames: self.idle_frames,
        }
    }
}

/// Pool of reusable off-screen color targets
#[derive(Default)]
pub struct RenderTargetPool {
    /// Ordered by id, which is creation order
    targets: BTreeMap<RenderTargetId, RenderTarget>,
    allocations: u64,
    rebuilds: u64,
}

impl RenderTargetPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire a single-sampled color target
    pub fn acquire(
        &mut self,
        gpu: &mut dyn GraphicsContext,
        width: u32,
        height: u32,
        format: TextureFormat,
    ) -> Result<RenderTargetId> {
        self.acquire_desc(gpu, &TextureDesc::color(width, height, format))
    }

    /// Acquire a target matching `desc` exactly
    pub fn acquire_desc(
        &mut self,
        gpu: &mut dyn GraphicsContext,
        desc: &TextureDesc,
    ) -> Result<RenderTargetId> {
        let idle = self
            .targets
            .iter()
            .find(|(_, t)| !t.in_use && t.desc == *desc)
            .map(|(id, _)| *id);

        if let Some(id) = idle {
            if let Some(target) = self.targets.get_mut(&id) {
                // Lost its texture in a failed rebuild; try again now
                if target.texture.is_none() {
                    let texture = gpu
                        .create_texture(desc)
                        .map_err(|e| exhaustion(desc, e))?;
                    target.texture = Some(texture);
                    target.generation = target.generation.wrapping_add(1);
                }
                target.in_use = true;
                target.used_this_frame = true;
                target.idle_frames = 0;
                log::trace!("Reusing render target {} ({}x{})", id, desc.width, desc.height);
            }
            return Ok(id);
        }

        let texture = gpu
            .create_texture(desc)
            .map_err(|e| exhaustion(desc, e))?;
        let id = RenderTargetId::new();
        self.targets.insert(
            id,
            RenderTarget {
                desc: desc.clone(),
                texture: Some(texture),
                generation: 0,
                in_use: true,
                used_this_frame: true,
                idle_frames: 0,
            },
        );
        self.allocations += 1;
        log::debug!(
            "Allocated render target {} ({}x{} {:?})",
            id,
            desc.width,
            desc.height,
            desc.format
        );
        Ok(id)
    }

    /// Mark a target idle. Releasing an unknown or idle target is a no-op.
    pub fn release(&mut self, id: RenderTargetId) {
        if let Some(target) = self.targets.get_mut(&id) {
            target.in_use = false;
        }
    }

    /// Mark the idle target backing `texture` in use, so it cannot be
    /// handed out until released. None if the texture is not pooled or is
    /// already in use.
    pub fn hold_texture(&mut self, texture: TextureHandle) -> Option<RenderTargetId> {
        let (id, target) = self
            .targets
            .iter_mut()
            .find(|(_, t)| !t.in_use && t.texture == Some(texture))?;
        target.in_use = true;
        target.used_this_frame = true;
        Some(*id)
    }

    /// Backend texture of a target
    pub fn texture(&self, id: RenderTargetId) -> Option<TextureHandle> {
        self.targets.get(&id).and_then(|t| t.texture)
    }

    pub fn info(&self, id: RenderTargetId) -> Option<RenderTargetInfo> {
        self.targets.get(&id).map(|t| t.info(id))
    }

    pub fn is_in_use(&self, id: RenderTargetId) -> bool {
        self.targets.get(&id).map_or(false, |t| t.in_use)
    }

    /// Release every target and age the ones unused this frame
    pub fn end_frame(&mut self) {
        for target in self.targets.values_mut() {
            target.in_use = false;
            if target.used_this_frame {
                target.idle_frames = 0;
            } else {
                target.idle_frames = target.idle_frames.saturating_add(1);
            }
            target.used_this_frame = false;
        }
    }

    /// Destroy idle targets unused for more than `max_idle_frames` frames.
    /// Returns the number destroyed.
    pub fn trim(&mut self, gpu: &mut dyn GraphicsContext, max_idle_frames: u32) -> usize {
        let stale: Vec<RenderTargetId> = self
            .targets
            .iter()
            .filter(|(_, t)| !t.in_use && t.idle_frames > max_idle_frames)
            .map(|(id, _)| *id)
            .collect();

        for id in &stale {
            if let Some(target) = self.targets.remove(id) {
                if let Some(texture) = target.texture {
                    gpu.release_texture(texture);
                }
            }
        }
        if !stale.is_empty() {
            log::debug!("Trimmed {} idle render targets", stale.len());
        }
        stale.len()
    }

    /// Recreate every backend texture, keeping logical ids.
    ///
    /// Targets whose texture cannot be recreated keep their id with no
    /// texture and are retried on their next `acquire`. The first error is
    /// returned after every target has been attempted.
    pub fn rebuild_all(&mut self, gpu: &mut dyn GraphicsContext) -> Result<()> {
        let mut first_error = None;
        for (id, target) in self.targets.iter_mut() {
            // Old handles belong to a dead context; never release them
            target.texture = None;
            target.in_use = false;
            match gpu.create_texture(&target.desc) {
                Ok(texture) => {
                    target.texture = Some(texture);
                    target.generation = target.generation.wrapping_add(1);
                }
                Err(e) => {
                    log::warn!("Failed to rebuild render target {}: {}", id, e);
                    if first_error.is_none() {
                        first_error = Some(exhaustion(&target.desc, e));
                    }
                }
            }
        }
        self.rebuilds += 1;
        log::info!("Rebuilt {} render targets", self.targets.len());
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Release every texture and forget all targets
    pub fn dispose(&mut self, gpu: &mut dyn GraphicsContext) {
        for (_, target) in std::mem::take(&mut self.targets) {
            if let Some(texture) = target.texture {
                gpu.release_texture(texture);
            }
        }
    }

    /// Targets created over the pool's lifetime (rebuilds excluded)
    pub fn allocation_count(&self) -> u64 {
        self.allocations
    }

    /// Targets currently tracked
    pub fn live_count(&self) -> usize {
        self.targets.len()
    }

    /// Targets currently handed out
    pub fn in_use_count(&self) -> usize {
        self.targets.values().filter(|t| t.in_use).count()
    }

    pub fn rebuild_count(&self) -> u64 {
        self.rebuilds
    }

    /// Snapshots of all targets, in creation order
    pub fn targets(&self) -> Vec<RenderTargetInfo> {
        self.targets.iter().map(|(id, t)| t.info(*id)).collect()
    }
}

fn exhaustion(desc: &TextureDesc, err: GpuError) -> PostProcessError {
    match err {
        GpuError::ContextLost => PostProcessError::ContextLost,
        source => PostProcessError::ResourceExhaustion {
            width: desc.width,
            height: desc.height,
            source,
        },
    }
}
