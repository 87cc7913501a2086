//! Fixed, little-endian wire records for the exchange paths.
//!
//! Entity sets travel as an entity-count header followed by `(lo,hi)`
//! interval pairs of 32-bit integers. Relation pairs and counts are plain
//! `Pod` records. Container *payload* bytes are packed in native layout (the
//! transport is a homogeneous cluster); only the framing records here commit
//! to an endianness.

use crate::entity::{Entity, EntitySet};
use crate::mesh_error::MeshDistError;
use bytemuck::{Pod, Zeroable};
use std::mem::size_of;

pub fn cast_slice<T: Pod>(v: &[T]) -> &[u8] {
    bytemuck::cast_slice(v)
}

pub fn cast_slice_mut<T: Pod>(v: &mut [T]) -> &mut [u8] {
    bytemuck::cast_slice_mut(v)
}

/// Decode a byte buffer into typed records, copying so the source alignment
/// does not matter.
pub fn decode_records<T: Pod>(bytes: &[u8]) -> Result<Vec<T>, MeshDistError> {
    let sz = size_of::<T>();
    if sz == 0 || bytes.len() % sz != 0 {
        return Err(MeshDistError::MalformedWire(format!(
            "{} bytes is not a whole number of {}-byte records",
            bytes.len(),
            sz
        )));
    }
    let mut out = vec![T::zeroed(); bytes.len() / sz];
    cast_slice_mut(&mut out).copy_from_slice(bytes);
    Ok(out)
}

/// Count of following records.
#[repr(transparent)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct WireCount {
    n_le: u32,
}

impl WireCount {
    pub fn new(n: usize) -> Self {
        WireCount {
            n_le: (n as u32).to_le(),
        }
    }
    pub fn get(&self) -> usize {
        u32::from_le(self.n_le) as usize
    }
}

/// One closed interval of an entity set.
#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct WireInterval {
    lo_le: i32,
    hi_le: i32,
}

impl WireInterval {
    pub fn new(lo: Entity, hi: Entity) -> Self {
        WireInterval {
            lo_le: lo.to_le(),
            hi_le: hi.to_le(),
        }
    }
    pub fn lo(&self) -> Entity {
        i32::from_le(self.lo_le)
    }
    pub fn hi(&self) -> Entity {
        i32::from_le(self.hi_le)
    }
}

/// A `(target, source)` relation instance routed to the target's owner.
#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct WireRelation {
    target_le: i32,
    source_le: i32,
}

impl WireRelation {
    pub fn new(target: Entity, source: Entity) -> Self {
        WireRelation {
            target_le: target.to_le(),
            source_le: source.to_le(),
        }
    }
    pub fn target(&self) -> Entity {
        i32::from_le(self.target_le)
    }
    pub fn source(&self) -> Entity {
        i32::from_le(self.source_le)
    }
}

/// Serialize an entity set: entity count, then interval pairs.
pub fn encode_entity_set(set: &EntitySet) -> Vec<u8> {
    let mut out = Vec::with_capacity(size_of::<WireCount>() + set.num_intervals() * 8);
    out.extend_from_slice(cast_slice(std::slice::from_ref(&WireCount::new(set.size()))));
    for &(lo, hi) in set.intervals() {
        out.extend_from_slice(cast_slice(std::slice::from_ref(&WireInterval::new(lo, hi))));
    }
    out
}

/// Inverse of [`encode_entity_set`]; verifies the count header.
pub fn decode_entity_set(bytes: &[u8]) -> Result<EntitySet, MeshDistError> {
    let hdr = size_of::<WireCount>();
    if bytes.len() < hdr {
        return Err(MeshDistError::MalformedWire(
            "entity set shorter than its count header".into(),
        ));
    }
    let count = decode_records::<WireCount>(&bytes[..hdr])?[0].get();
    let ivals = decode_records::<WireInterval>(&bytes[hdr..])?;
    let set = EntitySet::from_intervals(ivals.iter().map(|iv| (iv.lo(), iv.hi())));
    if set.size() != count {
        return Err(MeshDistError::MalformedWire(format!(
            "entity set header says {count} entities, intervals hold {}",
            set.size()
        )));
    }
    Ok(set)
}

// Compile-time sanity checks.
const _: () = {
    assert!(size_of::<WireCount>() == 4);
    assert!(size_of::<WireInterval>() == 8);
    assert!(size_of::<WireRelation>() == 8);
};

#[cfg(test)]
mod layout_tests {
    use super::*;
    use static_assertions::assert_eq_size;

    assert_eq_size!(WireCount, u32);
    assert_eq_size!(WireInterval, [i32; 2]);
    assert_eq_size!(WireRelation, [i32; 2]);
}
