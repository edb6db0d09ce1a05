//! # afterimage_core - Compositor Core Primitives
//!
//! Zero-dependency building blocks shared by the post-processing crates:
//! - **Ids**: generational identifiers for passes, layers, cameras and targets
//! - **Observers**: ordered listener lists with removable handles
//!
//! Nothing in here knows about GPUs. The render crate layers the frame
//! pipeline on top of these.

#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(not(feature = "std"))]
extern crate alloc;

#[cfg(feature = "std")]
extern crate std as alloc;

pub mod id;
pub mod observable;

pub use id::*;
pub use observable::*;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::id::{Id, IdGenerator};
    pub use crate::observable::{ObserverHandle, ObserverRegistry};
}
