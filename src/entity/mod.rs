//! Entities and interval-compressed entity sets.
//!
//! Every object the runtime moves around (node, face, cell, or anything a
//! client registers) is identified by an [`Entity`]: a plain integer handle.
//! Domains of entities are kept in [`EntitySet`], an ordered set stored as a
//! minimal list of disjoint closed intervals, which is the universal domain
//! type for every container in this crate.

pub mod allocator;
pub mod set;

pub use allocator::{allocate_distributed, allocate_local};
pub use set::EntitySet;

/// Opaque integer identifier for a mesh entity.
///
/// Non-negative values identify real entities; negative values are sentinels
/// (boundary tags, "no neighbor") and never appear in an [`EntitySet`]
/// produced by the allocator. Identifiers are never reused once released.
pub type Entity = i32;
