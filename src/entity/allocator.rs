//! Process-wide entity identifier allocation.
//!
//! Identifier ranges come from a single monotonically increasing counter, so
//! entities are never reused once released. Distributed allocation carves the
//! counter into contiguous per-rank blocks: every rank contributes its local
//! count, blocks are assigned in ascending rank order, and all ranks advance
//! the counter by the same global total so subsequent allocations agree.

use crate::comm::collectives::all_gather;
use crate::comm::communicator::{CommTag, Communicator};
use crate::entity::{Entity, EntitySet};
use crate::mesh_error::MeshDistError;
use once_cell::sync::Lazy;
use parking_lot::Mutex;

static NEXT_ENTITY: Lazy<Mutex<Entity>> = Lazy::new(|| Mutex::new(0));

/// Allocate `count` fresh identifiers on this process alone.
///
/// Only valid in serial sections (or for rank-private scratch entities);
/// distributed code must use [`allocate_distributed`] so all ranks advance
/// the counter in lockstep.
pub fn allocate_local(count: usize) -> EntitySet {
    if count == 0 {
        return EntitySet::empty();
    }
    let mut next = NEXT_ENTITY.lock();
    let lo = *next;
    let hi = lo
        .checked_add(count as Entity - 1)
        .expect("entity identifier space exhausted");
    *next = hi + 1;
    EntitySet::interval(lo, hi)
}

/// Allocate `count` identifiers on every rank, in contiguous blocks by
/// ascending rank. Returns this rank's block.
///
/// Collective: every rank must call with its own `count`.
pub fn allocate_distributed<C: Communicator>(
    comm: &C,
    count: usize,
    tag: CommTag,
) -> Result<EntitySet, MeshDistError> {
    let counts: Vec<u64> = all_gather(comm, &(count as u64), tag)?;
    let prefix: u64 = counts.iter().take(comm.rank()).sum();
    let total: u64 = counts.iter().sum();

    let mut next = NEXT_ENTITY.lock();
    let base = *next;
    *next = base
        .checked_add(total as Entity)
        .expect("entity identifier space exhausted");
    drop(next);

    if count == 0 {
        return Ok(EntitySet::empty());
    }
    let lo = base + prefix as Entity;
    Ok(EntitySet::interval(lo, lo + count as Entity - 1))
}

#[cfg(test)]
pub(crate) fn reset_for_tests() {
    *NEXT_ENTITY.lock() = 0;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn blocks_are_disjoint_and_monotone() {
        reset_for_tests();
        let a = allocate_local(10);
        let b = allocate_local(5);
        assert_eq!(a.size(), 10);
        assert_eq!(b.size(), 5);
        assert!((&a & &b).is_empty());
        assert!(a.max().unwrap() < b.min().unwrap());
    }

    #[test]
    #[serial]
    fn zero_count_is_empty() {
        reset_for_tests();
        assert!(allocate_local(0).is_empty());
    }

    #[test]
    #[serial]
    fn serial_distributed_allocation() {
        use crate::comm::communicator::NoComm;
        reset_for_tests();
        let s = allocate_distributed(&NoComm, 7, CommTag::new(0x100)).unwrap();
        assert_eq!(s, EntitySet::interval(0, 6));
        let t = allocate_distributed(&NoComm, 3, CommTag::new(0x101)).unwrap();
        assert_eq!(t, EntitySet::interval(7, 9));
    }
}
