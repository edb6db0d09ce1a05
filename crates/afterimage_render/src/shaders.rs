//! WGSL sources for the built-in programs
//!
//! GPU backends compile these; the headless backend runs equivalent CPU
//! kernels keyed by the same program names. Every program shares the
//! full-screen quad vertex stage and reads its input through
//! `textureSampler`.

use crate::pass::builtin::program;

const VERTEX_STAGE: &str = r#"
struct VertexInput {
    @location(0) position: vec2<f32>,
}

struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
}

@vertex
fn vs_main(input: VertexInput) -> VertexOutput {
    var output: VertexOutput;
    output.position = vec4<f32>(input.position, 0.0, 1.0);
    output.uv = input.position * vec2<f32>(0.5, -0.5) + vec2<f32>(0.5, 0.5);
    return output;
}
"#;

const SOURCE_BINDINGS: &str = r#"
@group(0) @binding(0)
var textureSampler: texture_2d<f32>;

@group(0) @binding(1)
var linearSampler: sampler;
"#;

/// WGSL source of a built-in program, None for unknown keys
pub fn program_source(name: &str) -> Option<String> {
    let body = match name {
        program::PASS_THROUGH => pass_through_fragment(),
        program::GRAYSCALE => grayscale_fragment(),
        program::TONE_MAPPING => tone_mapping_fragment(),
        program::VIGNETTE => vignette_fragment(),
        program::CHROMATIC_ABERRATION => chromatic_aberration_fragment(),
        program::BLUR => blur_fragment(),
        program::EMISSIVE_EXTRACT => emissive_extract_fragment(),
        program::GLOW_MERGE => glow_merge_fragment(),
        program::HIGHLIGHT_MERGE => highlight_merge_fragment(),
        _ => return None,
    };
    Some(format!("{VERTEX_STAGE}{SOURCE_BINDINGS}{body}"))
}

fn pass_through_fragment() -> &'static str {
    r#"
@fragment
fn fs_main(input: VertexOutput) -> @location(0) vec4<f32> {
    return textureSample(textureSampler, linearSampler, input.uv);
}
"#
}

fn grayscale_fragment() -> &'static str {
    r#"
struct Uniforms {
    degree: f32,
}

@group(1) @binding(0)
var<uniform> uniforms: Uniforms;

@fragment
fn fs_main(input: VertexOutput) -> @location(0) vec4<f32> {
    let color = textureSample(textureSampler, linearSampler, input.uv);
    let luminance = dot(color.rgb, vec3<f32>(0.2126, 0.7152, 0.0722));
    return vec4<f32>(mix(color.rgb, vec3<f32>(luminance), uniforms.degree), color.a);
}
"#
}

fn tone_mapping_fragment() -> &'static str {
    r#"
struct Uniforms {
    operator: i32,
    exposure: f32,
}

@group(1) @binding(0)
var<uniform> uniforms: Uniforms;

fn hable(x: vec3<f32>) -> vec3<f32> {
    let a = 0.15;
    let b = 0.50;
    let c = 0.10;
    let d = 0.20;
    let e = 0.02;
    let f = 0.30;
    return ((x * (a * x + c * b) + d * e) / (x * (a * x + b) + d * f)) - e / f;
}

fn aces(x: vec3<f32>) -> vec3<f32> {
    return clamp((x * (2.51 * x + 0.03)) / (x * (2.43 * x + 0.59) + 0.14), vec3<f32>(0.0), vec3<f32>(1.0));
}

@fragment
fn fs_main(input: VertexOutput) -> @location(0) vec4<f32> {
    let color = textureSample(textureSampler, linearSampler, input.uv);
    let hdr = color.rgb * uniforms.exposure;
    var mapped: vec3<f32>;
    if (uniforms.operator == 0) {
        mapped = hdr / (hdr + vec3<f32>(1.0));
    } else if (uniforms.operator == 1) {
        mapped = hable(hdr) / hable(vec3<f32>(11.2));
    } else {
        mapped = aces(hdr);
    }
    return vec4<f32>(mapped, color.a);
}
"#
}

fn vignette_fragment() -> &'static str {
    r#"
struct Uniforms {
    vignetteColor: vec4<f32>,
    vignetteCenter: vec2<f32>,
    vignetteWeight: f32,
    vignetteStretch: f32,
}

@group(1) @binding(0)
var<uniform> uniforms: Uniforms;

@fragment
fn fs_main(input: VertexOutput) -> @location(0) vec4<f32> {
    let color = textureSample(textureSampler, linearSampler, input.uv);
    let offset = (input.uv - uniforms.vignetteCenter) * 2.0;
    let stretched = abs(offset) * (1.0 + uniforms.vignetteStretch * abs(offset.yx));
    let distance = dot(stretched, stretched) * 0.5;
    let factor = clamp(1.0 - uniforms.vignetteWeight * distance, 0.0, 1.0);
    return vec4<f32>(mix(uniforms.vignetteColor.rgb, color.rgb, factor), color.a);
}
"#
}

fn chromatic_aberration_fragment() -> &'static str {
    r#"
struct Uniforms {
    direction: vec2<f32>,
    centerPosition: vec2<f32>,
    screenSize: vec2<f32>,
    aberrationAmount: f32,
    radialIntensity: f32,
}

@group(1) @binding(0)
var<uniform> uniforms: Uniforms;

@fragment
fn fs_main(input: VertexOutput) -> @location(0) vec4<f32> {
    let radial = input.uv - uniforms.centerPosition;
    var direction = uniforms.direction;
    if (length(direction) == 0.0) {
        direction = normalize(radial + vec2<f32>(1e-6));
    }
    let falloff = 1.0 + uniforms.radialIntensity * length(radial);
    let offset = direction * uniforms.aberrationAmount * falloff / uniforms.screenSize;
    let r = textureSample(textureSampler, linearSampler, input.uv + offset).r;
    let center = textureSample(textureSampler, linearSampler, input.uv);
    let b = textureSample(textureSampler, linearSampler, input.uv - offset).b;
    return vec4<f32>(r, center.g, b, center.a);
}
"#
}

fn blur_fragment() -> &'static str {
    r#"
struct Uniforms {
    direction: vec2<f32>,
    texelSize: vec2<f32>,
    kernel: f32,
}

@group(1) @binding(0)
var<uniform> uniforms: Uniforms;

@fragment
fn fs_main(input: VertexOutput) -> @location(0) vec4<f32> {
    let radius = i32(min(ceil(uniforms.kernel * 0.5), 64.0));
    let sigma = max(f32(radius) * 0.5, 0.5);
    let step = uniforms.direction * uniforms.texelSize;
    var sum = vec4<f32>(0.0);
    var weight_sum = 0.0;
    for (var i = -radius; i <= radius; i = i + 1) {
        let x = f32(i);
        let w = exp(-(x * x) / (2.0 * sigma * sigma));
        sum = sum + textureSample(textureSampler, linearSampler, input.uv + step * x) * w;
        weight_sum = weight_sum + w;
    }
    return sum / weight_sum;
}
"#
}

fn emissive_extract_fragment() -> &'static str {
    r#"
@group(0) @binding(2)
var emissiveSampler: texture_2d<f32>;

struct Uniforms {
    emissiveColor: vec4<f32>,
    glowIntensity: f32,
    colorOnly: f32,
}

@group(1) @binding(0)
var<uniform> uniforms: Uniforms;

@fragment
fn fs_main(input: VertexOutput) -> @location(0) vec4<f32> {
    let emissive = textureSample(emissiveSampler, linearSampler, input.uv);
    let textured = emissive.rgb * uniforms.emissiveColor.rgb;
    let flat = uniforms.emissiveColor.rgb * emissive.a;
    let rgb = mix(textured, flat, uniforms.colorOnly) * uniforms.glowIntensity;
    return vec4<f32>(rgb, emissive.a * uniforms.emissiveColor.a);
}
"#
}

fn glow_merge_fragment() -> &'static str {
    r#"
@group(0) @binding(2)
var textureSampler2: texture_2d<f32>;

struct Uniforms {
    intensity: f32,
    ldrMerge: f32,
}

@group(1) @binding(0)
var<uniform> uniforms: Uniforms;

@fragment
fn fs_main(input: VertexOutput) -> @location(0) vec4<f32> {
    let level1 = textureSample(textureSampler, linearSampler, input.uv);
    let level2 = textureSample(textureSampler2, linearSampler, input.uv);
    var rgb = (level1.rgb + level2.rgb) * uniforms.intensity;
    if (uniforms.ldrMerge > 0.5) {
        rgb = clamp(rgb, vec3<f32>(0.0), vec3<f32>(1.0));
    }
    return vec4<f32>(rgb, 1.0);
}
"#
}

fn highlight_merge_fragment() -> &'static str {
    r#"
struct Uniforms {
    intensity: f32,
}

@group(1) @binding(0)
var<uniform> uniforms: Uniforms;

@fragment
fn fs_main(input: VertexOutput) -> @location(0) vec4<f32> {
    let blurred = textureSample(textureSampler, linearSampler, input.uv);
    let coverage = clamp(blurred.a, 0.0, 1.0);
    let rgb = blurred.rgb / max(coverage, 1e-4);
    return vec4<f32>(rgb, clamp(coverage * uniforms.intensity, 0.0, 1.0));
}
"#
}
