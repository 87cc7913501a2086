//! Ownership partitions of an entity universe.
//!
//! A partition is one [`EntitySet`] per rank; the sets are pairwise disjoint
//! and together cover a declared universe. This module provides the naive
//! contiguous split, partition validation, and rank-ownership lookup; the
//! graph-partitioner path lives in [`graph`] and the mesh-derived face/node
//! partitions in [`derived`].

pub mod derived;
pub mod graph;

use crate::entity::{Entity, EntitySet};
use crate::mesh_error::MeshDistError;

/// Breakpoints of the naive contiguous split of `[min,max]` into `p` nearly
/// equal ranges; rank `i` owns `[vec[i], vec[i+1])`. The remainder goes to
/// the first ranks.
pub fn simple_partition_vec(min: Entity, max: Entity, p: usize) -> Vec<Entity> {
    assert!(p > 0, "cannot partition over zero ranks");
    assert!(min <= max, "empty universe [{min},{max}]");
    let n = max as i64 - min as i64 + 1;
    let chunk = n / p as i64;
    let rem = n % p as i64;
    let mut breaks = Vec::with_capacity(p + 1);
    let mut at = min as i64;
    breaks.push(min);
    for i in 0..p as i64 {
        at += chunk + if i < rem { 1 } else { 0 };
        breaks.push(at as Entity);
    }
    breaks
}

/// The naive contiguous partition of `[min,max]` over `p` ranks.
pub fn simple_partition(min: Entity, max: Entity, p: usize) -> Vec<EntitySet> {
    let breaks = simple_partition_vec(min, max, p);
    (0..p)
        .map(|i| EntitySet::interval(breaks[i], breaks[i + 1] - 1))
        .collect()
}

/// Check that `parts` is a true partition of `universe`: pairwise disjoint
/// and covering.
pub fn validate_partition(
    parts: &[EntitySet],
    universe: &EntitySet,
) -> Result<(), MeshDistError> {
    let mut seen = EntitySet::empty();
    for (i, p) in parts.iter().enumerate() {
        let overlap = &seen & p;
        if !overlap.is_empty() {
            // find the earlier claimant for the diagnostic
            let j = parts[..i]
                .iter()
                .position(|q| !(q & &overlap).is_empty())
                .unwrap_or(0);
            return Err(MeshDistError::PartitionOverlap(j, i, overlap.to_string()));
        }
        seen = &seen | p;
    }
    let missing = universe - &seen;
    if !missing.is_empty() {
        return Err(MeshDistError::PartitionCoverage(missing.to_string()));
    }
    Ok(())
}

/// Entity → owning-rank lookup over a full partition.
#[derive(Clone, Debug)]
pub struct OwnerLookup {
    spans: Vec<(Entity, Entity, usize)>,
    parts: Vec<EntitySet>,
}

impl OwnerLookup {
    pub fn from_partition(parts: &[EntitySet]) -> Self {
        let mut spans = Vec::new();
        for (rank, set) in parts.iter().enumerate() {
            for &(lo, hi) in set.intervals() {
                spans.push((lo, hi, rank));
            }
        }
        spans.sort_unstable();
        OwnerLookup {
            spans,
            parts: parts.to_vec(),
        }
    }

    /// Rank owning `e`, or `None` if `e` is outside the partitioned universe.
    pub fn owner_of(&self, e: Entity) -> Option<usize> {
        self.spans
            .binary_search_by(|&(lo, hi, _)| {
                if hi < e {
                    std::cmp::Ordering::Less
                } else if lo > e {
                    std::cmp::Ordering::Greater
                } else {
                    std::cmp::Ordering::Equal
                }
            })
            .ok()
            .map(|i| self.spans[i].2)
    }

    /// Number of ranks in the partition.
    pub fn num_ranks(&self) -> usize {
        self.parts.len()
    }

    /// Split `set` into per-owner pieces.
    pub fn split(&self, set: &EntitySet) -> Vec<EntitySet> {
        self.parts.iter().map(|p| p & set).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_partition_vec_even() {
        assert_eq!(simple_partition_vec(0, 99, 4), vec![0, 25, 50, 75, 100]);
    }

    #[test]
    fn simple_partition_vec_remainder_to_first_ranks() {
        // 10 entities over 3 ranks: sizes 4,3,3
        assert_eq!(simple_partition_vec(0, 9, 3), vec![0, 4, 7, 10]);
        let parts = simple_partition(0, 9, 3);
        assert_eq!(parts[0].size(), 4);
        assert_eq!(parts[1].size(), 3);
        assert_eq!(parts[2].size(), 3);
    }

    #[test]
    fn simple_partition_is_valid() {
        let parts = simple_partition(0, 99, 4);
        assert!(parts.iter().all(|p| p.size() == 25));
        validate_partition(&parts, &EntitySet::interval(0, 99)).unwrap();
    }

    #[test]
    fn validate_detects_overlap() {
        let parts = vec![EntitySet::interval(0, 5), EntitySet::interval(5, 9)];
        let err = validate_partition(&parts, &EntitySet::interval(0, 9)).unwrap_err();
        assert!(matches!(err, MeshDistError::PartitionOverlap(0, 1, _)));
    }

    #[test]
    fn validate_detects_gap() {
        let parts = vec![EntitySet::interval(0, 3), EntitySet::interval(6, 9)];
        let err = validate_partition(&parts, &EntitySet::interval(0, 9)).unwrap_err();
        assert!(matches!(err, MeshDistError::PartitionCoverage(_)));
    }

    #[test]
    fn owner_lookup() {
        let parts = vec![
            EntitySet::from_intervals([(0, 4), (20, 24)]),
            EntitySet::interval(5, 19),
        ];
        let lk = OwnerLookup::from_partition(&parts);
        assert_eq!(lk.owner_of(3), Some(0));
        assert_eq!(lk.owner_of(21), Some(0));
        assert_eq!(lk.owner_of(10), Some(1));
        assert_eq!(lk.owner_of(25), None);
        let pieces = lk.split(&EntitySet::interval(3, 6));
        assert_eq!(pieces[0], EntitySet::interval(3, 4));
        assert_eq!(pieces[1], EntitySet::interval(5, 6));
    }
}
