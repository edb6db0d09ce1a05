//! Render Resources - backend handle and state types
//!
//! Opaque handles and plain state descriptions shared between the
//! compositor and whatever graphics backend implements
//! [`GraphicsContext`](crate::GraphicsContext).

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! backend_handle {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(pub u64);

        impl $name {
            /// Get the raw backend value
            pub fn raw(&self) -> u64 {
                self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($label, "({})"), self.0)
            }
        }
    };
}

backend_handle!(
    /// Backend texture (color buffer) handle
    TextureHandle,
    "Texture"
);
backend_handle!(
    /// Backend compiled effect (shader program) handle
    EffectHandle,
    "Effect"
);
backend_handle!(
    /// Backend vertex or index buffer handle
    BufferHandle,
    "Buffer"
);

/// Color target formats supported by the pool
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextureFormat {
    Rgba8Unorm,
    Bgra8Unorm,
    Rgba16Float,
    Rgba32Float,
}

impl TextureFormat {
    /// Bytes per pixel
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            Self::Rgba8Unorm | Self::Bgra8Unorm => 4,
            Self::Rgba16Float => 8,
            Self::Rgba32Float => 16,
        }
    }

    /// Check if the format stores values outside [0, 1]
    pub fn is_hdr(&self) -> bool {
        matches!(self, Self::Rgba16Float | Self::Rgba32Float)
    }
}

impl Default for TextureFormat {
    fn default() -> Self {
        Self::Rgba8Unorm
    }
}

/// Texture creation descriptor
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TextureDesc {
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub sample_count: u32,
}

impl TextureDesc {
    /// Single-sampled color texture
    pub fn color(width: u32, height: u32, format: TextureFormat) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
            format,
            sample_count: 1,
        }
    }

    /// Size in bytes
    pub fn byte_size(&self) -> u64 {
        self.width as u64
            * self.height as u64
            * self.format.bytes_per_pixel() as u64
            * self.sample_count.max(1) as u64
    }
}

/// Linear RGBA color
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color {
    pub const TRANSPARENT: Self = Self::rgba(0.0, 0.0, 0.0, 0.0);
    pub const BLACK: Self = Self::rgba(0.0, 0.0, 0.0, 1.0);
    pub const WHITE: Self = Self::rgba(1.0, 1.0, 1.0, 1.0);

    pub const fn rgba(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    pub const fn rgb(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b, a: 1.0 }
    }

    pub fn to_array(self) -> [f32; 4] {
        [self.r, self.g, self.b, self.a]
    }

    /// Color with every channel multiplied by `factor`
    pub fn scale(self, factor: f32) -> Self {
        Self::rgba(
            self.r * factor,
            self.g * factor,
            self.b * factor,
            self.a * factor,
        )
    }
}

impl Default for Color {
    fn default() -> Self {
        Self::TRANSPARENT
    }
}

impl From<[f32; 4]> for Color {
    fn from(v: [f32; 4]) -> Self {
        Self::rgba(v[0], v[1], v[2], v[3])
    }
}

/// Blend mode applied by the backend while a pass draws
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlphaMode {
    /// Opaque: source replaces destination
    Disabled,
    /// rgb = dst + src * src.a, destination alpha kept
    Add,
    /// Standard "over" compositing
    Combine,
    /// rgb = src * dst
    Multiply,
}

impl Default for AlphaMode {
    fn default() -> Self {
        Self::Disabled
    }
}

/// Stencil comparison
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareFunction {
    Never,
    Less,
    Equal,
    LessEqual,
    Greater,
    NotEqual,
    GreaterEqual,
    Always,
}

impl CompareFunction {
    /// Evaluate `reference <op> value`
    pub fn test(&self, reference: u8, value: u8) -> bool {
        match self {
            Self::Never => false,
            Self::Less => reference < value,
            Self::Equal => reference == value,
            Self::LessEqual => reference <= value,
            Self::Greater => reference > value,
            Self::NotEqual => reference != value,
            Self::GreaterEqual => reference >= value,
            Self::Always => true,
        }
    }
}

/// Stencil test state
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct StencilState {
    pub enabled: bool,
    pub func: CompareFunction,
    pub reference: u8,
    pub mask: u8,
}

impl StencilState {
    /// Stencil test off
    pub const fn disabled() -> Self {
        Self {
            enabled: false,
            func: CompareFunction::Always,
            reference: 0,
            mask: 0xFF,
        }
    }

    /// Stencil test on with the given comparison
    pub const fn test(func: CompareFunction, reference: u8) -> Self {
        Self {
            enabled: true,
            func,
            reference,
            mask: 0xFF,
        }
    }

    /// Whether a fragment over `value` passes
    pub fn passes(&self, value: u8) -> bool {
        !self.enabled || self.func.test(self.reference & self.mask, value & self.mask)
    }
}

impl Default for StencilState {
    fn default() -> Self {
        Self::disabled()
    }
}

/// Primitive topology for indexed draws
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DrawMode {
    Triangles,
    TriangleStrip,
}

/// A value for a named shader uniform
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UniformValue {
    Float(f32),
    Vec2([f32; 2]),
    Vec3([f32; 3]),
    Vec4([f32; 4]),
    Int(i32),
}

impl UniformValue {
    /// Scalar view (first component)
    pub fn as_f32(&self) -> f32 {
        match *self {
            Self::Float(v) => v,
            Self::Vec2(v) => v[0],
            Self::Vec3(v) => v[0],
            Self::Vec4(v) => v[0],
            Self::Int(v) => v as f32,
        }
    }

    /// Vector view, padded with zeros
    pub fn as_vec4(&self) -> [f32; 4] {
        match *self {
            Self::Float(v) => [v, 0.0, 0.0, 0.0],
            Self::Vec2(v) => [v[0], v[1], 0.0, 0.0],
            Self::Vec3(v) => [v[0], v[1], v[2], 0.0],
            Self::Vec4(v) => v,
            Self::Int(v) => [v as f32, 0.0, 0.0, 0.0],
        }
    }
}

impl From<f32> for UniformValue {
    fn from(v: f32) -> Self {
        Self::Float(v)
    }
}

impl From<[f32; 2]> for UniformValue {
    fn from(v: [f32; 2]) -> Self {
        Self::Vec2(v)
    }
}

impl From<[f32; 3]> for UniformValue {
    fn from(v: [f32; 3]) -> Self {
        Self::Vec3(v)
    }
}

impl From<[f32; 4]> for UniformValue {
    fn from(v: [f32; 4]) -> Self {
        Self::Vec4(v)
    }
}

impl From<Color> for UniformValue {
    fn from(c: Color) -> Self {
        Self::Vec4(c.to_array())
    }
}

impl From<i32> for UniformValue {
    fn from(v: i32) -> Self {
        Self::Int(v)
    }
}
