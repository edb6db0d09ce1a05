//! Glow layer
//!
//! Emissive meshes bleed light onto their surroundings. The extracted
//! emissive image is blurred at two resolutions (the main texture ratio and
//! half of it) and both levels are added onto the scene color, scaled by the
//! layer intensity.

use std::collections::BTreeSet;

use super::{EffectLayer, EffectLayerCore, EffectMesh, LayerStats, OwnedTexture};
use crate::camera::{Camera, MeshId};
use crate::compositor::FrameContext;
use crate::config::GlowLayerConfig;
use crate::context::GraphicsContext;
use crate::error::Result;
use crate::pass::builtin::{self, program, BlurParams};
use crate::pass::{PassChain, PassOptions, PostProcess, SamplerSource};
use crate::quad::SharedQuad;
use crate::resource::TextureHandle;
use crate::target_pool::RenderTargetPool;

/// Sampler of the second blur level in the merge pass
const LEVEL2_SAMPLER: &str = "textureSampler2";

pub struct GlowLayer {
    core: EffectLayerCore,
    config: GlowLayerConfig,
    included_only: BTreeSet<MeshId>,
    excluded: BTreeSet<MeshId>,
    blur1: PassChain,
    blur2: PassChain,
    level1: OwnedTexture,
    level2: OwnedTexture,
    merge: PostProcess,
}

impl GlowLayer {
    pub fn new(name: impl Into<String>, config: GlowLayerConfig, quad: SharedQuad) -> Self {
        let mut core = EffectLayerCore::new(name, quad);
        core.set_intensity(config.intensity);
        core.set_rendering_group(config.rendering_group);
        core.set_main_texture_ratio(config.main_texture_ratio);
        core.set_main_texture_fixed_size(config.main_texture_fixed_size);
        core.set_neutral_color(config.neutral_color);
        core.set_alpha_mode(config.alpha_mode);
        core.set_texture_format(config.texture_format);

        let name = core.name().to_string();
        let mut layer = Self {
            blur1: PassChain::new(format!("{}.blur1", name)),
            blur2: PassChain::new(format!("{}.blur2", name)),
            merge: merge_effect(&name, &config),
            core,
            config,
            included_only: BTreeSet::new(),
            excluded: BTreeSet::new(),
            level1: OwnedTexture::default(),
            level2: OwnedTexture::default(),
        };
        layer.build_blur_chains();
        layer
    }

    pub fn config(&self) -> &GlowLayerConfig {
        &self.config
    }

    pub fn add_mesh(&mut self, mesh: EffectMesh) {
        self.core.add_mesh(mesh);
    }

    pub fn remove_mesh(&mut self, mesh: MeshId) -> Option<EffectMesh> {
        self.included_only.remove(&mesh);
        self.excluded.remove(&mesh);
        self.core.remove_mesh(mesh)
    }

    /// Once any mesh is included-only, only included meshes glow
    pub fn add_included_only_mesh(&mut self, mesh: MeshId) {
        self.included_only.insert(mesh);
    }

    pub fn remove_included_only_mesh(&mut self, mesh: MeshId) {
        self.included_only.remove(&mesh);
    }

    pub fn add_excluded_mesh(&mut self, mesh: MeshId) {
        self.excluded.insert(mesh);
    }

    pub fn remove_excluded_mesh(&mut self, mesh: MeshId) {
        self.excluded.remove(&mesh);
    }

    pub fn set_mesh_intensity(&mut self, mesh: MeshId, intensity: f32) {
        self.core.set_mesh_intensity(mesh, intensity);
    }

    pub fn intensity(&self) -> f32 {
        self.core.intensity()
    }

    pub fn set_intensity(&mut self, intensity: f32) {
        self.config.intensity = intensity;
        self.core.set_intensity(intensity);
    }

    pub fn blur_kernel_size(&self) -> f32 {
        self.config.blur_kernel_size
    }

    pub fn set_blur_kernel_size(&mut self, kernel: f32) {
        self.config.blur_kernel_size = kernel;
        let (k1, k2) = self.kernels();
        for (chain, kernel) in [(&mut self.blur1, k1), (&mut self.blur2, k2)] {
            let passes = chain.passes_mut();
            passes[0].set_params(BlurParams::horizontal(kernel));
            passes[1].set_params(BlurParams::vertical(kernel));
        }
    }

    pub fn set_ldr_merge(&mut self, ldr: bool) {
        self.config.ldr_merge = ldr;
    }

    /// Blurred textures of the last frame, level 1 then level 2
    pub fn blur_textures(&self) -> (Option<TextureHandle>, Option<TextureHandle>) {
        (self.level1.handle(), self.level2.handle())
    }

    /// Kernel of each level, in texels of that level
    fn kernels(&self) -> (f32, f32) {
        let ratio = self.config.main_texture_ratio;
        let k1 = self.config.blur_kernel_size * ratio;
        (k1, k1 * 0.5)
    }

    fn build_blur_chains(&mut self) {
        let (k1, k2) = self.kernels();
        let ratio = self.config.main_texture_ratio;
        let fixed = self.config.main_texture_fixed_size;
        let format = self.config.texture_format;

        for (level, chain, ratio, kernel) in [
            (0u32, &mut self.blur1, ratio, k1),
            (1u32, &mut self.blur2, ratio * 0.5, k2),
        ] {
            let mut options = PassOptions {
                ratio,
                format: Some(format),
                ..Default::default()
            };
            if let Some(size) = fixed {
                let side = (size >> level).max(1);
                options.fixed_size = Some((side, side));
                options.ratio = 1.0;
            }
            let name = chain.name().to_string();
            chain.add(builtin::blur(
                format!("{}.h", name),
                BlurParams::horizontal(kernel),
                options.clone(),
            ));
            chain.add(builtin::blur(
                format!("{}.v", name),
                BlurParams::vertical(kernel),
                options,
            ));
        }
    }
}

fn merge_effect(name: &str, config: &GlowLayerConfig) -> PostProcess {
    let mut merge = PostProcess::new(format!("{}.merge", name), program::GLOW_MERGE)
        .with_sampler(LEVEL2_SAMPLER, SamplerSource::Unbound)
        .with_alpha_mode(config.alpha_mode);
    merge.options_mut().auto_clear = false;
    merge
}

impl EffectLayer for GlowLayer {
    fn core(&self) -> &EffectLayerCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut EffectLayerCore {
        &mut self.core
    }

    fn is_ready(&mut self, gpu: &mut dyn GraphicsContext) -> bool {
        // Poll everything so all effects compile in parallel
        let mut ready = self.core.is_extract_ready(gpu);
        for pass in self
            .blur1
            .passes_mut()
            .iter_mut()
            .chain(self.blur2.passes_mut().iter_mut())
        {
            ready &= pass.is_ready(gpu);
        }
        ready &= self.merge.is_ready(gpu);
        ready
    }

    fn contributes(&self, mesh: &EffectMesh) -> bool {
        self.core.in_rendering_group(mesh)
            && (self.included_only.is_empty() || self.included_only.contains(&mesh.id))
            && !self.excluded.contains(&mesh.id)
            && self.core.mesh_intensity(mesh.id) > 0.0
    }

    fn create_merge_effect(&self) -> PostProcess {
        merge_effect(self.core.name(), &self.config)
    }

    fn set_emissive_texture_and_color(&self, mesh: &EffectMesh, extract: &mut PostProcess) -> bool {
        if !self.contributes(mesh) {
            return false;
        }
        extract.set_uniform("emissiveColor", mesh.color);
        extract.set_uniform("glowIntensity", self.core.mesh_intensity(mesh.id));
        extract.set_uniform("colorOnly", 0.0f32);
        true
    }

    fn internal_render(
        &mut self,
        fc: &mut FrameContext<'_>,
        camera: &Camera,
        main_texture: TextureHandle,
        scene_target: TextureHandle,
    ) -> LayerStats {
        let mut stats = LayerStats::default();

        let size1 = self.blur1.passes()[1].compute_size(camera);
        let size2 = self.blur2.passes()[1].compute_size(camera);
        let Some(level1) = self.core.ensure_texture(fc, &mut self.level1, "level1", size1) else {
            return stats;
        };
        let Some(level2) = self.core.ensure_texture(fc, &mut self.level2, "level2", size2) else {
            return stats;
        };

        stats.draw_calls += self.core.blur(fc, camera, &mut self.blur1, main_texture, level1);
        stats.draw_calls += self.core.blur(fc, camera, &mut self.blur2, level1, level2);

        self.merge.set_alpha_mode(self.config.alpha_mode);
        self.merge.set_sampler(LEVEL2_SAMPLER, SamplerSource::Texture(level2));
        self.merge
            .set_uniform("ldrMerge", if self.config.ldr_merge { 1.0f32 } else { 0.0 });
        if self
            .core
            .compose(fc, camera, &mut self.merge, level1, scene_target)
        {
            stats.draw_calls += 1;
            stats.composed = true;
        }
        stats
    }

    fn rebuild(&mut self, _gpu: &mut dyn GraphicsContext) -> Result<()> {
        self.core.invalidate();
        self.level1.invalidate();
        self.level2.invalidate();
        self.blur1.invalidate();
        self.blur2.invalidate();
        self.merge = self.create_merge_effect();
        Ok(())
    }

    fn release_targets(&mut self, pool: &mut RenderTargetPool) {
        self.blur1.release_targets(pool);
        self.blur2.release_targets(pool);
        self.merge.release_output(pool);
    }

    fn dispose(&mut self, gpu: &mut dyn GraphicsContext, pool: &mut RenderTargetPool) {
        self.core.dispose(gpu, pool);
        self.level1.release(gpu);
        self.level2.release(gpu);
        self.blur1.dispose(gpu, pool);
        self.blur2.dispose(gpu, pool);
        self.merge.dispose(gpu, pool);
        log::info!("Glow layer '{}' disposed", self.core.name());
    }
}

impl std::fmt::Debug for GlowLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GlowLayer")
            .field("core", &self.core)
            .field("config", &self.config)
            .finish()
    }
}
