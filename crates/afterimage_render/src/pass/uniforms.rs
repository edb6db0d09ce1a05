//! Typed uniform parameters
//!
//! Each built-in effect describes its parameters with a plain struct that
//! implements [`UniformBlock`]. The struct is the schema: it names the
//! uniforms the effect declares and writes their values into a
//! [`UniformValues`] bag when the pass binds. Nothing is injected at run time.

use crate::resource::{Color, UniformValue};

/// Ordered name → value bag. Setting an existing name replaces its value.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct UniformValues {
    values: Vec<(String, UniformValue)>,
}

impl UniformValues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a builder
    pub fn builder() -> UniformBuilder {
        UniformBuilder::default()
    }

    pub fn set(&mut self, name: &str, value: impl Into<UniformValue>) {
        let value = value.into();
        match self.values.iter_mut().find(|(n, _)| n == name) {
            Some(slot) => slot.1 = value,
            None => self.values.push((name.to_string(), value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<UniformValue> {
        self.values.iter().find(|(n, _)| n == name).map(|(_, v)| *v)
    }

    pub fn remove(&mut self, name: &str) -> Option<UniformValue> {
        let index = self.values.iter().position(|(n, _)| n == name)?;
        Some(self.values.remove(index).1)
    }

    /// Copy every value of `other` over this bag
    pub fn extend_from(&mut self, other: &UniformValues) {
        for (name, value) in &other.values {
            self.set(name, *value);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, UniformValue)> + '_ {
        self.values.iter().map(|(n, v)| (n.as_str(), *v))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.values.iter().map(|(n, _)| n.as_str())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Builder for [`UniformValues`]
#[derive(Clone, Debug, Default)]
pub struct UniformBuilder {
    values: UniformValues,
}

impl UniformBuilder {
    pub fn float(mut self, name: &str, value: f32) -> Self {
        self.values.set(name, UniformValue::Float(value));
        self
    }

    pub fn vec2(mut self, name: &str, value: [f32; 2]) -> Self {
        self.values.set(name, UniformValue::Vec2(value));
        self
    }

    pub fn vec3(mut self, name: &str, value: [f32; 3]) -> Self {
        self.values.set(name, UniformValue::Vec3(value));
        self
    }

    pub fn vec4(mut self, name: &str, value: [f32; 4]) -> Self {
        self.values.set(name, UniformValue::Vec4(value));
        self
    }

    pub fn color(mut self, name: &str, value: Color) -> Self {
        self.values.set(name, value);
        self
    }

    pub fn int(mut self, name: &str, value: i32) -> Self {
        self.values.set(name, UniformValue::Int(value));
        self
    }

    pub fn build(self) -> UniformValues {
        self.values
    }
}

/// A typed parameter block for an effect
pub trait UniformBlock: Send + Sync {
    /// Uniform names the block writes, declared on the effect
    fn uniform_names(&self) -> &'static [&'static str];

    /// Write current values
    fn write(&self, out: &mut UniformValues);

    /// Values as a fresh bag
    fn to_values(&self) -> UniformValues {
        let mut values = UniformValues::new();
        self.write(&mut values);
        values
    }
}
