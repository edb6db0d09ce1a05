//! Generational identifiers
//!
//! Every long-lived object in the compositor (passes, effect layers, cameras,
//! pooled render targets) is addressed through a small copyable [`Id`]. The
//! upper half of the id carries a generation so a slot can be recycled without
//! an old handle silently aliasing the new occupant.

use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};

/// A unique identifier with a generation counter
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Id {
    /// Lower 32 bits: index, upper 32 bits: generation
    bits: u64,
}

impl Id {
    /// Create a new ID from index and generation
    #[inline]
    pub const fn new(index: u32, generation: u32) -> Self {
        Self {
            bits: (generation as u64) << 32 | index as u64,
        }
    }

    /// The null id, never produced by a generator
    #[inline]
    pub const fn null() -> Self {
        Self { bits: u64::MAX }
    }

    #[inline]
    pub const fn is_null(&self) -> bool {
        self.bits == u64::MAX
    }

    #[inline]
    pub const fn index(&self) -> u32 {
        self.bits as u32
    }

    #[inline]
    pub const fn generation(&self) -> u32 {
        (self.bits >> 32) as u32
    }

    #[inline]
    pub const fn to_bits(&self) -> u64 {
        self.bits
    }

    #[inline]
    pub const fn from_bits(bits: u64) -> Self {
        Self { bits }
    }
}

impl Default for Id {
    fn default() -> Self {
        Self::null()
    }
}

impl fmt::Debug for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "Id(null)")
        } else {
            write!(f, "Id({}v{})", self.index(), self.generation())
        }
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "null")
        } else {
            write!(f, "{}v{}", self.index(), self.generation())
        }
    }
}

/// Thread-safe monotonically increasing id source
pub struct IdGenerator {
    next: AtomicU64,
}

impl IdGenerator {
    pub const fn new() -> Self {
        Self {
            next: AtomicU64::new(0),
        }
    }

    /// Generate the next unique ID
    pub fn next(&self) -> Id {
        let index = self.next.fetch_add(1, Ordering::Relaxed);
        Id::new(index as u32, 0)
    }

    /// Number of ids handed out so far
    pub fn issued(&self) -> u64 {
        self.next.load(Ordering::Relaxed)
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Declare a typed id newtype backed by a process-wide [`IdGenerator`].
///
/// ```ignore
/// afterimage_core::define_id!(
///     /// Identifies a post-process pass
///     PassId
/// );
/// let a = PassId::new();
/// assert_ne!(a, PassId::new());
/// ```
#[macro_export]
macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(pub $crate::Id);

        impl $name {
            /// Allocate a fresh, process-unique id
            pub fn new() -> Self {
                static GENERATOR: $crate::IdGenerator = $crate::IdGenerator::new();
                Self(GENERATOR.next())
            }

            pub fn id(&self) -> $crate::Id {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, "{}#{}", stringify!($name), self.0)
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    define_id!(
        /// Test-only id
        WidgetId
    );

    #[test]
    fn test_id_creation() {
        let id = Id::new(42, 7);
        assert_eq!(id.index(), 42);
        assert_eq!(id.generation(), 7);
        assert!(!id.is_null());
        assert!(Id::null().is_null());
    }

    #[test]
    fn test_generator_unique() {
        let generator = IdGenerator::new();
        let a = generator.next();
        let b = generator.next();
        assert_ne!(a, b);
        assert_eq!(generator.issued(), 2);
    }

    #[test]
    fn test_typed_ids() {
        let a = WidgetId::new();
        let b = WidgetId::new();
        assert_ne!(a, b);
        assert_eq!(a.id().index() + 1, b.id().index());
    }
}
