//! Shared type definitions for the unfurl crate
//!
//! Deterministic hash collections are used throughout so that generated
//! project files come out byte-identical across runs.

use std::hash::BuildHasherDefault;

use indexmap::{IndexMap, IndexSet};
use rustc_hash::FxHasher;

/// An [`IndexMap`] using the fast FxHasher, preserving insertion order
pub type FxIndexMap<K, V> = IndexMap<K, V, BuildHasherDefault<FxHasher>>;

/// An [`IndexSet`] using the fast FxHasher, preserving insertion order
pub type FxIndexSet<T> = IndexSet<T, BuildHasherDefault<FxHasher>>;

/// Minor version of the Python standard library table used when classifying
/// imports (3.12)
pub const PYTHON_MINOR_VERSION: u8 = 12;
