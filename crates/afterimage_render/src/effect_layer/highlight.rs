//! Highlight layer
//!
//! Outlines selected meshes with a colored glow. Each highlighted mesh is
//! drawn flat in its highlight color, blurred once, then blended over the
//! scene. The scene renderer marks highlighted meshes in the stencil buffer
//! with [`HIGHLIGHT_STENCIL_REF`]; the merge tests against it to restrict the
//! glow to the inside of the meshes, their outside, or both.

use std::collections::{BTreeMap, BTreeSet};

use super::{EffectLayer, EffectLayerCore, EffectMesh, LayerStats, OwnedTexture};
use crate::camera::{Camera, MeshId};
use crate::compositor::FrameContext;
use crate::config::HighlightLayerConfig;
use crate::context::GraphicsContext;
use crate::error::Result;
use crate::pass::builtin::{self, program, BlurParams};
use crate::pass::{PassChain, PassOptions, PostProcess};
use crate::quad::SharedQuad;
use crate::resource::{Color, CompareFunction, StencilState, TextureHandle};
use crate::target_pool::RenderTargetPool;

/// Stencil value the scene writes under highlighted meshes
pub const HIGHLIGHT_STENCIL_REF: u8 = 0x02;

/// Blur kernel at a blur size of 1, in blur texture texels
const BASE_KERNEL: f32 = 8.0;

pub struct HighlightLayer {
    core: EffectLayerCore,
    config: HighlightLayerConfig,
    /// Highlighted meshes and their glow-emissive-only flag
    highlighted: BTreeMap<MeshId, bool>,
    excluded: BTreeSet<MeshId>,
    blur: PassChain,
    blurred: OwnedTexture,
    merge: PostProcess,
}

impl HighlightLayer {
    pub fn new(name: impl Into<String>, config: HighlightLayerConfig, quad: SharedQuad) -> Self {
        let mut core = EffectLayerCore::new(name, quad);
        core.set_intensity(config.intensity);
        core.set_rendering_group(config.rendering_group);
        core.set_main_texture_ratio(config.main_texture_ratio);
        core.set_neutral_color(config.neutral_color);
        core.set_alpha_mode(config.alpha_mode);
        core.set_texture_format(config.texture_format);

        let name = core.name().to_string();
        let options = PassOptions {
            ratio: config.blur_texture_size_ratio,
            format: Some(config.texture_format),
            ..Default::default()
        };
        let mut blur = PassChain::new(format!("{}.blur", name));
        blur.add(builtin::blur(
            format!("{}.blur.h", name),
            BlurParams::horizontal(BASE_KERNEL * config.blur_horizontal_size),
            options.clone(),
        ));
        blur.add(builtin::blur(
            format!("{}.blur.v", name),
            BlurParams::vertical(BASE_KERNEL * config.blur_vertical_size),
            options,
        ));

        Self {
            merge: merge_effect(&name),
            core,
            config,
            highlighted: BTreeMap::new(),
            excluded: BTreeSet::new(),
            blur,
            blurred: OwnedTexture::default(),
        }
    }

    pub fn config(&self) -> &HighlightLayerConfig {
        &self.config
    }

    /// Highlight a mesh. With `glow_emissive_only` the glow follows the
    /// mesh's emissive texture instead of its flat silhouette.
    pub fn add_mesh(&mut self, mesh: EffectMesh, color: Color, glow_emissive_only: bool) {
        self.core.add_mesh(mesh.with_color(color));
        self.highlighted.insert(mesh.id, glow_emissive_only);
    }

    pub fn remove_mesh(&mut self, mesh: MeshId) -> Option<EffectMesh> {
        self.highlighted.remove(&mesh);
        self.core.remove_mesh(mesh)
    }

    pub fn add_excluded_mesh(&mut self, mesh: MeshId) {
        self.excluded.insert(mesh);
    }

    pub fn remove_excluded_mesh(&mut self, mesh: MeshId) {
        self.excluded.remove(&mesh);
    }

    pub fn inner_glow(&self) -> bool {
        self.config.inner_glow
    }

    pub fn set_inner_glow(&mut self, enabled: bool) {
        self.config.inner_glow = enabled;
    }

    pub fn outer_glow(&self) -> bool {
        self.config.outer_glow
    }

    pub fn set_outer_glow(&mut self, enabled: bool) {
        self.config.outer_glow = enabled;
    }

    pub fn set_blur_horizontal_size(&mut self, size: f32) {
        self.config.blur_horizontal_size = size;
        self.blur.passes_mut()[0].set_params(BlurParams::horizontal(BASE_KERNEL * size));
    }

    pub fn set_blur_vertical_size(&mut self, size: f32) {
        self.config.blur_vertical_size = size;
        self.blur.passes_mut()[1].set_params(BlurParams::vertical(BASE_KERNEL * size));
    }

    pub fn blurred_texture(&self) -> Option<TextureHandle> {
        self.blurred.handle()
    }

    /// Stencil test restricting the merge
    pub fn merge_stencil(&self) -> StencilState {
        match (self.config.inner_glow, self.config.outer_glow) {
            (true, false) => StencilState::test(CompareFunction::Equal, HIGHLIGHT_STENCIL_REF),
            (false, true) => StencilState::test(CompareFunction::NotEqual, HIGHLIGHT_STENCIL_REF),
            _ => StencilState::disabled(),
        }
    }
}

fn merge_effect(name: &str) -> PostProcess {
    let mut merge = PostProcess::new(format!("{}.merge", name), program::HIGHLIGHT_MERGE);
    merge.options_mut().auto_clear = false;
    merge
}

impl EffectLayer for HighlightLayer {
    fn core(&self) -> &EffectLayerCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut EffectLayerCore {
        &mut self.core
    }

    fn is_ready(&mut self, gpu: &mut dyn GraphicsContext) -> bool {
        let mut ready = self.core.is_extract_ready(gpu);
        for pass in self.blur.passes_mut() {
            ready &= pass.is_ready(gpu);
        }
        ready &= self.merge.is_ready(gpu);
        ready
    }

    fn need_stencil(&self) -> bool {
        true
    }

    fn contributes(&self, mesh: &EffectMesh) -> bool {
        self.core.in_rendering_group(mesh)
            && self.highlighted.contains_key(&mesh.id)
            && !self.excluded.contains(&mesh.id)
    }

    fn should_render(&self) -> bool {
        (self.config.inner_glow || self.config.outer_glow)
            && self.core.is_enabled()
            && self.core.meshes().iter().any(|m| self.contributes(m))
    }

    fn create_merge_effect(&self) -> PostProcess {
        merge_effect(self.core.name())
    }

    fn set_emissive_texture_and_color(&self, mesh: &EffectMesh, extract: &mut PostProcess) -> bool {
        let Some(&emissive_only) = self.highlighted.get(&mesh.id) else {
            return false;
        };
        if self.excluded.contains(&mesh.id) {
            return false;
        }
        extract.set_uniform("emissiveColor", mesh.color);
        extract.set_uniform("glowIntensity", 1.0f32);
        extract.set_uniform("colorOnly", if emissive_only { 0.0f32 } else { 1.0 });
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

        let size = self.blur.passes()[1].compute_size(camera);
        let Some(blurred) = self.core.ensure_texture(fc, &mut self.blurred, "blur", size) else {
            return stats;
        };
        stats.draw_calls += self.core.blur(fc, camera, &mut self.blur, main_texture, blurred);

        let stencil = self.merge_stencil();
        self.merge.set_stencil(stencil);
        if self
            .core
            .compose(fc, camera, &mut self.merge, blurred, scene_target)
        {
            stats.draw_calls += 1;
            stats.composed = true;
        }
        stats
    }

    fn rebuild(&mut self, _gpu: &mut dyn GraphicsContext) -> Result<()> {
        self.core.invalidate();
        self.blurred.invalidate();
        self.blur.invalidate();
        self.merge = self.create_merge_effect();
        Ok(())
    }

    fn release_targets(&mut self, pool: &mut RenderTargetPool) {
        self.blur.release_targets(pool);
        self.merge.release_output(pool);
    }

    fn dispose(&mut self, gpu: &mut dyn GraphicsContext, pool: &mut RenderTargetPool) {
        self.core.dispose(gpu, pool);
        self.blurred.release(gpu);
        self.blur.dispose(gpu, pool);
        self.merge.dispose(gpu, pool);
        log::info!("Highlight layer '{}' disposed", self.core.name());
    }
}

impl std::fmt::Debug for HighlightLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HighlightLayer")
            .field("core", &self.core)
            .field("highlighted", &self.highlighted.len())
            .field("inner_glow", &self.config.inner_glow)
            .field("outer_glow", &self.config.outer_glow)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::Diagnostics;
    use crate::headless::HeadlessContext;
    use crate::quad::{shared_quad, ScreenQuad};
    use crate::resource::AlphaMode;

    const RED: Color = Color::rgb(1.0, 0.0, 0.0);

    struct Scene {
        gpu: HeadlessContext,
        pool: RenderTargetPool,
        quad: SharedQuad,
        diagnostics: Diagnostics,
        camera: Camera,
        target: TextureHandle,
        mesh: EffectMesh,
    }

    /// 16x16 black scene with a mesh covering [4, 12) on both axes, marked
    /// in the scene's stencil
    fn scene() -> Scene {
        let mut gpu = HeadlessContext::new(16, 16);
        let quad = shared_quad();
        *quad.write() = Some(ScreenQuad::create(&mut gpu).unwrap());

        let emissive = gpu.create_filled_texture(16, 16, [0.0; 4]);
        gpu.fill_rect(emissive, (4, 4), (12, 12), [1.0; 4]);
        let target = gpu.create_filled_texture(16, 16, [0.0, 0.0, 0.0, 1.0]);
        gpu.fill_stencil(Some(target), (4, 4), (12, 12), HIGHLIGHT_STENCIL_REF);

        Scene {
            gpu,
            pool: RenderTargetPool::new(),
            quad,
            diagnostics: Diagnostics::new(),
            camera: Camera::new("main", 16, 16),
            target,
            mesh: EffectMesh::new(MeshId::new(), Some(emissive)),
        }
    }

    fn render(s: &mut Scene, layer: &mut HighlightLayer) -> LayerStats {
        let mut fc = FrameContext::new(&mut s.gpu, &mut s.pool, &s.quad, &mut s.diagnostics, 1);
        layer.render(&mut fc, &s.camera, s.target)
    }

    #[test]
    fn test_stencil_follows_glow_toggles() {
        let mut layer = HighlightLayer::new("hl", HighlightLayerConfig::default(), shared_quad());
        assert!(!layer.merge_stencil().enabled);

        layer.set_outer_glow(false);
        assert_eq!(layer.merge_stencil().func, CompareFunction::Equal);

        layer.set_outer_glow(true);
        layer.set_inner_glow(false);
        assert_eq!(layer.merge_stencil().func, CompareFunction::NotEqual);
        assert_eq!(layer.merge_stencil().reference, HIGHLIGHT_STENCIL_REF);
    }

    #[test]
    fn test_should_render() {
        let mut layer = HighlightLayer::new("hl", HighlightLayerConfig::default(), shared_quad());
        assert!(!layer.should_render());
        assert!(layer.need_stencil());

        let mesh = EffectMesh::new(MeshId::new(), None);
        layer.add_mesh(mesh, RED, false);
        assert!(layer.should_render());

        layer.set_inner_glow(false);
        layer.set_outer_glow(false);
        assert!(!layer.should_render());

        layer.set_outer_glow(true);
        layer.add_excluded_mesh(mesh.id);
        assert!(!layer.should_render());
    }

    #[test]
    fn test_color_only_flag() {
        let mut layer = HighlightLayer::new("hl", HighlightLayerConfig::default(), shared_quad());
        let flat = EffectMesh::new(MeshId::new(), None);
        let textured = EffectMesh::new(MeshId::new(), None);
        layer.add_mesh(flat, RED, false);
        layer.add_mesh(textured, RED, true);

        let mut extract = PostProcess::new("extract", program::EMISSIVE_EXTRACT);
        let flat = *layer.core().mesh(flat.id).unwrap();
        assert!(layer.set_emissive_texture_and_color(&flat, &mut extract));
        assert_eq!(extract.uniforms().get("colorOnly").map(|v| v.as_f32()), Some(1.0));

        let textured = *layer.core().mesh(textured.id).unwrap();
        assert!(layer.set_emissive_texture_and_color(&textured, &mut extract));
        assert_eq!(extract.uniforms().get("colorOnly").map(|v| v.as_f32()), Some(0.0));
    }

    #[test]
    fn test_outer_glow_leaves_mesh_untouched() {
        let mut s = scene();
        let mut layer = HighlightLayer::new("hl", HighlightLayerConfig::default(), s.quad.clone());
        layer.set_inner_glow(false);
        layer.add_mesh(s.mesh, RED, false);

        let stats = render(&mut s, &mut layer);

        // extract + horizontal + vertical + merge
        assert_eq!(stats.draw_calls, 4);
        let merge = s.gpu.draws().last().unwrap();
        assert_eq!(merge.alpha_mode, AlphaMode::Combine);
        assert_eq!(merge.stencil.func, CompareFunction::NotEqual);

        assert_eq!(s.gpu.read_pixel(s.target, 8, 8).unwrap()[0], 0.0);
        assert!(s.gpu.read_pixel(s.target, 3, 8).unwrap()[0] > 0.0);
    }

    #[test]
    fn test_inner_glow_stays_inside() {
        let mut s = scene();
        let mut layer = HighlightLayer::new("hl", HighlightLayerConfig::default(), s.quad.clone());
        layer.set_outer_glow(false);
        layer.add_mesh(s.mesh, RED, false);

        render(&mut s, &mut layer);

        let inside = s.gpu.read_pixel(s.target, 8, 8).unwrap();
        assert!(inside[0] > 0.0);
        assert_eq!(inside[1], 0.0);
        assert_eq!(s.gpu.read_pixel(s.target, 1, 8).unwrap()[0], 0.0);
    }
}
