//! Public facade crate for `respan`.
//!
//! This crate intentionally contains no IO or backend-specific logic.
//! It re-exports the backend-agnostic types/traits from `respan-core`.

pub use respan_core::*;
