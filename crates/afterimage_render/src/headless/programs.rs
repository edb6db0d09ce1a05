//! CPU kernels for the built-in programs
//!
//! A kernel shades one fragment: it gets the fragment's uv, the sampled
//! textures and the bound uniforms, and returns an RGBA color. Sampling is
//! nearest-texel with clamp-to-edge addressing.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::pass::builtin::program;
use crate::pass::SOURCE_SAMPLER;
use crate::resource::UniformValue;

/// Fragment shader stand-in
pub type Kernel = Arc<dyn Fn(&Fragment<'_>) -> [f32; 4] + Send + Sync>;

/// Texel snapshot of a bound texture
#[derive(Clone, Debug)]
pub struct Sampled {
    pub width: u32,
    pub height: u32,
    pub texels: Vec<[f32; 4]>,
}

impl Sampled {
    pub fn texel(&self, x: i64, y: i64) -> [f32; 4] {
        let x = x.clamp(0, self.width as i64 - 1) as usize;
        let y = y.clamp(0, self.height as i64 - 1) as usize;
        self.texels[y * self.width as usize + x]
    }

    pub fn sample(&self, uv: [f32; 2]) -> [f32; 4] {
        let x = (uv[0] * self.width as f32).floor() as i64;
        let y = (uv[1] * self.height as f32).floor() as i64;
        self.texel(x, y)
    }
}

/// Inputs of one fragment invocation
pub struct Fragment<'a> {
    pub uv: [f32; 2],
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub(crate) samplers: &'a BTreeMap<String, Sampled>,
    pub(crate) uniforms: &'a BTreeMap<String, UniformValue>,
}

impl<'a> Fragment<'a> {
    /// Sample a bound texture; unbound samplers read transparent black
    pub fn sample(&self, sampler: &str, uv: [f32; 2]) -> [f32; 4] {
        self.samplers
            .get(sampler)
            .map_or([0.0; 4], |s| s.sample(uv))
    }

    pub fn sampled(&self, sampler: &str) -> Option<&Sampled> {
        self.samplers.get(sampler)
    }

    pub fn float(&self, name: &str, default: f32) -> f32 {
        self.uniforms.get(name).map_or(default, |v| v.as_f32())
    }

    pub fn vec2(&self, name: &str, default: [f32; 2]) -> [f32; 2] {
        self.uniforms.get(name).map_or(default, |v| {
            let v = v.as_vec4();
            [v[0], v[1]]
        })
    }

    pub fn vec4(&self, name: &str, default: [f32; 4]) -> [f32; 4] {
        self.uniforms.get(name).map_or(default, |v| v.as_vec4())
    }

    pub fn int(&self, name: &str, default: i32) -> i32 {
        match self.uniforms.get(name) {
            Some(UniformValue::Int(v)) => *v,
            Some(other) => other.as_f32() as i32,
            None => default,
        }
    }

    fn source(&self) -> [f32; 4] {
        self.sample(SOURCE_SAMPLER, self.uv)
    }
}

/// Kernels for every built-in program
pub fn builtin_kernels() -> BTreeMap<String, Kernel> {
    let mut kernels: BTreeMap<String, Kernel> = BTreeMap::new();
    kernels.insert(program::PASS_THROUGH.into(), Arc::new(pass_through));
    kernels.insert(program::GRAYSCALE.into(), Arc::new(grayscale));
    kernels.insert(program::TONE_MAPPING.into(), Arc::new(tone_mapping));
    kernels.insert(program::VIGNETTE.into(), Arc::new(vignette));
    kernels.insert(program::CHROMATIC_ABERRATION.into(), Arc::new(chromatic_aberration));
    kernels.insert(program::BLUR.into(), Arc::new(blur));
    kernels.insert(program::EMISSIVE_EXTRACT.into(), Arc::new(emissive_extract));
    kernels.insert(program::GLOW_MERGE.into(), Arc::new(glow_merge));
    kernels.insert(program::HIGHLIGHT_MERGE.into(), Arc::new(highlight_merge));
    kernels
}

fn pass_through(f: &Fragment<'_>) -> [f32; 4] {
    f.source()
}

fn luminance(c: [f32; 4]) -> f32 {
    0.2126 * c[0] + 0.7152 * c[1] + 0.0722 * c[2]
}

fn mix(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

fn grayscale(f: &Fragment<'_>) -> [f32; 4] {
    let c = f.source();
    let l = luminance(c);
    let t = f.float("degree", 1.0);
    [mix(c[0], l, t), mix(c[1], l, t), mix(c[2], l, t), c[3]]
}

fn tone_mapping(f: &Fragment<'_>) -> [f32; 4] {
    let c = f.source();
    let exposure = f.float("exposure", 1.0);
    let op = f.int("operator", 2);

    fn hable(x: f32) -> f32 {
        let (a, b, c, d, e, f) = (0.15, 0.50, 0.10, 0.20, 0.02, 0.30);
        ((x * (a * x + c * b) + d * e) / (x * (a * x + b) + d * f)) - e / f
    }

    let map = |v: f32| -> f32 {
        let x = v * exposure;
        match op {
            0 => x / (x + 1.0),
            1 => hable(x) / hable(11.2),
            _ => ((x * (2.51 * x + 0.03)) / (x * (2.43 * x + 0.59) + 0.14)).clamp(0.0, 1.0),
        }
    };
    [map(c[0]), map(c[1]), map(c[2]), c[3]]
}

fn vignette(f: &Fragment<'_>) -> [f32; 4] {
    let c = f.source();
    let center = f.vec2("vignetteCenter", [0.5, 0.5]);
    let weight = f.float("vignetteWeight", 1.5);
    let stretch = f.float("vignetteStretch", 0.0);
    let color = f.vec4("vignetteColor", [0.0, 0.0, 0.0, 1.0]);

    let ox = ((f.uv[0] - center[0]) * 2.0).abs();
    let oy = ((f.uv[1] - center[1]) * 2.0).abs();
    let sx = ox * (1.0 + stretch * oy);
    let sy = oy * (1.0 + stretch * ox);
    let distance = (sx * sx + sy * sy) * 0.5;
    let factor = (1.0 - weight * distance).clamp(0.0, 1.0);

    [
        mix(color[0], c[0], factor),
        mix(color[1], c[1], factor),
        mix(color[2], c[2], factor),
        c[3],
    ]
}

fn chromatic_aberration(f: &Fragment<'_>) -> [f32; 4] {
    let amount = f.float("aberrationAmount", 30.0);
    let radial_intensity = f.float("radialIntensity", 0.0);
    let center = f.vec2("centerPosition", [0.5, 0.5]);
    let screen = f.vec2("screenSize", [f.width as f32, f.height as f32]);
    let mut direction = f.vec2("direction", [0.0, 0.0]);

    let radial = [f.uv[0] - center[0], f.uv[1] - center[1]];
    let radial_len = (radial[0] * radial[0] + radial[1] * radial[1]).sqrt();
    if direction == [0.0, 0.0] {
        if radial_len > 0.0 {
            direction = [radial[0] / radial_len, radial[1] / radial_len];
        } else {
            direction = [0.0, 0.0];
        }
    }
    let falloff = 1.0 + radial_intensity * radial_len;
    let offset = [
        direction[0] * amount * falloff / screen[0].max(1.0),
        direction[1] * amount * falloff / screen[1].max(1.0),
    ];

    let r = f.sample(SOURCE_SAMPLER, [f.uv[0] + offset[0], f.uv[1] + offset[1]]);
    let center_texel = f.source();
    let b = f.sample(SOURCE_SAMPLER, [f.uv[0] - offset[0], f.uv[1] - offset[1]]);
    [r[0], center_texel[1], b[2], center_texel[3]]
}

/// Gaussian weights for a kernel measured in texels
pub fn gaussian_weights(kernel: f32) -> Vec<f32> {
    let radius = (kernel * 0.5).ceil().clamp(1.0, 64.0) as i32;
    let sigma = (radius as f32 * 0.5).max(0.5);
    let mut weights: Vec<f32> = (-radius..=radius)
        .map(|i| {
            let x = i as f32;
            (-(x * x) / (2.0 * sigma * sigma)).exp()
        })
        .collect();
    let sum: f32 = weights.iter().sum();
    for w in &mut weights {
        *w /= sum;
    }
    weights
}

fn blur(f: &Fragment<'_>) -> [f32; 4] {
    let Some(source) = f.sampled(SOURCE_SAMPLER) else {
        return [0.0; 4];
    };
    let direction = f.vec2("direction", [1.0, 0.0]);
    let texel = f.vec2(
        "texelSize",
        [1.0 / source.width as f32, 1.0 / source.height as f32],
    );
    let weights = gaussian_weights(f.float("kernel", 16.0));
    let radius = (weights.len() / 2) as i32;

    let mut out = [0.0f32; 4];
    for (k, w) in weights.iter().enumerate() {
        let i = (k as i32 - radius) as f32;
        let uv = [
            f.uv[0] + direction[0] * texel[0] * i,
            f.uv[1] + direction[1] * texel[1] * i,
        ];
        let s = source.sample(uv);
        for c in 0..4 {
            out[c] += s[c] * w;
        }
    }
    out
}

fn emissive_extract(f: &Fragment<'_>) -> [f32; 4] {
    let emissive = f.sample("emissiveSampler", f.uv);
    let color = f.vec4("emissiveColor", [1.0; 4]);
    let intensity = f.float("glowIntensity", 1.0);
    let color_only = f.float("colorOnly", 0.0);

    let mut out = [0.0; 4];
    for c in 0..3 {
        let textured = emissive[c] * color[c];
        let flat = color[c] * emissive[3];
        out[c] = mix(textured, flat, color_only) * intensity;
    }
    out[3] = emissive[3] * color[3];
    out
}

fn glow_merge(f: &Fragment<'_>) -> [f32; 4] {
    let level1 = f.source();
    let level2 = f.sample("textureSampler2", f.uv);
    let intensity = f.float("intensity", 1.0);
    let ldr = f.float("ldrMerge", 0.0) > 0.5;

    let mut out = [0.0, 0.0, 0.0, 1.0];
    for c in 0..3 {
        let v = (level1[c] + level2[c]) * intensity;
        out[c] = if ldr { v.clamp(0.0, 1.0) } else { v };
    }
    out
}

fn highlight_merge(f: &Fragment<'_>) -> [f32; 4] {
    let blurred = f.source();
    let intensity = f.float("intensity", 1.0);
    let coverage = blurred[3].clamp(0.0, 1.0);
    let inv = 1.0 / coverage.max(1e-4);
    [
        blurred[0] * inv,
        blurred[1] * inv,
        blurred[2] * inv,
        (coverage * intensity).clamp(0.0, 1.0),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fragment<'a>(
        samplers: &'a BTreeMap<String, Sampled>,
        uniforms: &'a BTreeMap<String, UniformValue>,
        uv: [f32; 2],
    ) -> Fragment<'a> {
        Fragment {
            uv,
            x: 0,
            y: 0,
            width: 4,
            height: 4,
            samplers,
            uniforms,
        }
    }

    fn solid(color: [f32; 4]) -> Sampled {
        Sampled {
            width: 4,
            height: 4,
            texels: vec![color; 16],
        }
    }

    #[test]
    fn test_gaussian_weights_normalized() {
        for kernel in [1.0, 8.0, 32.0, 500.0] {
            let weights = gaussian_weights(kernel);
            let sum: f32 = weights.iter().sum();
            assert!((sum - 1.0).abs() < 1e-5);
            assert_eq!(weights.len() % 2, 1);
        }
        assert_eq!(gaussian_weights(500.0).len(), 129);
    }

    #[test]
    fn test_blur_preserves_uniform_image() {
        let mut samplers = BTreeMap::new();
        samplers.insert(SOURCE_SAMPLER.to_string(), solid([0.25, 0.5, 0.75, 1.0]));
        let uniforms = BTreeMap::new();
        let out = blur(&fragment(&samplers, &uniforms, [0.1, 0.9]));
        for (a, b) in out.iter().zip([0.25, 0.5, 0.75, 1.0]) {
            assert!((a - b).abs() < 1e-5);
        }
    }

    #[test]
    fn test_grayscale_luminance() {
        let mut samplers = BTreeMap::new();
        samplers.insert(SOURCE_SAMPLER.to_string(), solid([1.0, 0.0, 0.0, 1.0]));
        let uniforms = BTreeMap::new();
        let out = grayscale(&fragment(&samplers, &uniforms, [0.5, 0.5]));
        assert!((out[0] - 0.2126).abs() < 1e-6);
        assert_eq!(out[0], out[1]);
        assert_eq!(out[3], 1.0);
    }

    #[test]
    fn test_vignette_darkens_corners_only() {
        let mut samplers = BTreeMap::new();
        samplers.insert(SOURCE_SAMPLER.to_string(), solid([1.0, 1.0, 1.0, 1.0]));
        let uniforms = BTreeMap::new();
        let center = vignette(&fragment(&samplers, &uniforms, [0.5, 0.5]));
        let corner = vignette(&fragment(&samplers, &uniforms, [0.0, 0.0]));
        assert_eq!(center[0], 1.0);
        assert!(corner[0] < 0.5);
    }

    #[test]
    fn test_glow_merge_zero_intensity() {
        let mut samplers = BTreeMap::new();
        samplers.insert(SOURCE_SAMPLER.to_string(), solid([1.0, 1.0, 1.0, 1.0]));
        samplers.insert("textureSampler2".to_string(), solid([1.0, 1.0, 1.0, 1.0]));
        let mut uniforms = BTreeMap::new();
        uniforms.insert("intensity".to_string(), UniformValue::Float(0.0));
        let out = glow_merge(&fragment(&samplers, &uniforms, [0.5, 0.5]));
        assert_eq!(&out[..3], &[0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_unbound_sampler_reads_black() {
        let samplers = BTreeMap::new();
        let uniforms = BTreeMap::new();
        assert_eq!(pass_through(&fragment(&samplers, &uniforms, [0.5, 0.5])), [0.0; 4]);
    }
}
