//! Atomic type selection.
//!
//! Every atomic in the crate is imported through here so that builds with
//! the `loom` feature swap in loom's model-checked variants. Ordinary
//! builds re-export the std types unchanged.

#[cfg(not(feature = "loom"))]
pub use std::sync::atomic::{AtomicU8, AtomicU64, AtomicUsize, Ordering};

#[cfg(feature = "loom")]
pub use loom::sync::atomic::{AtomicU8, AtomicU64, AtomicUsize, Ordering};
