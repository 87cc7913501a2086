//! The pack/unpack seam between containers and the redistribution protocol.
//!
//! Pack format, per entity in ascending domain order: an optional `u32`
//! element count (multi-valued containers only) followed by the raw value
//! bytes. Buffers are plain `Vec<u8>` whose lifetime matches one collective
//! exchange.

use crate::entity::EntitySet;
use crate::map::Map;

/// A container whose contents can be serialized per entity-subset and
/// rebuilt from received chunks.
pub trait Container: Sized {
    /// Entities this container currently answers for.
    fn domain(&self) -> &EntitySet;

    /// Exact byte size of `pack(sub)`. `sub` must lie inside `domain()`.
    fn pack_size(&self, sub: &EntitySet) -> usize;

    /// Append the values of `sub` (ascending entity order) to `out`.
    fn pack(&self, sub: &EntitySet, out: &mut Vec<u8>);

    /// Rebuild a container from per-sender chunks, in ascending sender
    /// order. Each chunk pairs the destination entities (ascending) with the
    /// bytes the sender packed for them; chunk sets must be pairwise
    /// disjoint and together form the new domain.
    ///
    /// # Panics
    /// Panics if a chunk's byte stream does not match its entity set — that
    /// is a partition-construction bug upstream, not a recoverable fault.
    fn unpack_concat(chunks: &[(EntitySet, Vec<u8>)]) -> Self;

    /// Rebuild this container with every entity renamed through `m`
    /// (`new[m[e]] = old[e]`). `m` must be defined and injective on
    /// `domain()`.
    fn remap_domain(&self, m: &Map) -> Self;
}
