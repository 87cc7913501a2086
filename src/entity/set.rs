//! `EntitySet`: ordered, interval-compressed sets of entity identifiers.
//!
//! An `EntitySet` stores a sorted list of disjoint, non-adjacent closed
//! intervals `[lo,hi]`. This is the universal domain type: container
//! domains, ownership partitions, clone regions and request sets are all
//! `EntitySet`s. The representation is minimal by construction — adjacent
//! intervals are merged — so equality of sets is equality of interval lists.
//!
//! # Invariants
//!
//! - Intervals satisfy `lo <= hi`.
//! - Intervals are sorted by `lo` and pairwise disjoint.
//! - No two intervals are adjacent (`runs[i].1 + 1 < runs[i+1].0`).
//!
//! These are checked after construction in debug builds and can be verified
//! manually via [`DebugInvariants::validate_invariants`].

use crate::debug_invariants::DebugInvariants;
use crate::entity::Entity;
use crate::mesh_error::MeshDistError;
use std::fmt;

/// Ordered set of entities, compressed as disjoint closed intervals.
#[derive(Clone, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct EntitySet {
    runs: Vec<(Entity, Entity)>,
}

impl EntitySet {
    /// The empty set.
    #[inline]
    pub const fn empty() -> Self {
        EntitySet { runs: Vec::new() }
    }

    /// The closed interval `[lo,hi]`; empty if `lo > hi`.
    pub fn interval(lo: Entity, hi: Entity) -> Self {
        if lo > hi {
            EntitySet::empty()
        } else {
            EntitySet {
                runs: vec![(lo, hi)],
            }
        }
    }

    /// The set containing exactly `e`.
    #[inline]
    pub fn singleton(e: Entity) -> Self {
        EntitySet::interval(e, e)
    }

    /// Build a set from arbitrary intervals, normalizing as needed.
    pub fn from_intervals<I>(intervals: I) -> Self
    where
        I: IntoIterator<Item = (Entity, Entity)>,
    {
        let mut runs: Vec<(Entity, Entity)> = intervals
            .into_iter()
            .filter(|&(lo, hi)| lo <= hi)
            .collect();
        runs.sort_unstable();
        let mut out = EntitySet::empty();
        for (lo, hi) in runs {
            out.push_run(lo, hi);
        }
        out.debug_assert_invariants();
        out
    }

    /// Membership test; `O(log k)` in the number of intervals.
    pub fn contains(&self, e: Entity) -> bool {
        self.runs
            .binary_search_by(|&(lo, hi)| {
                if hi < e {
                    std::cmp::Ordering::Less
                } else if lo > e {
                    std::cmp::Ordering::Greater
                } else {
                    std::cmp::Ordering::Equal
                }
            })
            .is_ok()
    }

    /// Number of entities in the set.
    pub fn size(&self) -> usize {
        self.runs
            .iter()
            .map(|&(lo, hi)| (hi as i64 - lo as i64 + 1) as usize)
            .sum()
    }

    /// Whether the set is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    /// Smallest entity, if any.
    #[inline]
    pub fn min(&self) -> Option<Entity> {
        self.runs.first().map(|&(lo, _)| lo)
    }

    /// Largest entity, if any.
    #[inline]
    pub fn max(&self) -> Option<Entity> {
        self.runs.last().map(|&(_, hi)| hi)
    }

    /// Number of stored intervals.
    #[inline]
    pub fn num_intervals(&self) -> usize {
        self.runs.len()
    }

    /// The intervals in ascending order.
    #[inline]
    pub fn intervals(&self) -> &[(Entity, Entity)] {
        &self.runs
    }

    /// Iterate over every entity in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = Entity> + '_ {
        self.runs.iter().flat_map(|&(lo, hi)| lo..=hi)
    }

    /// Set union.
    pub fn union(&self, other: &EntitySet) -> EntitySet {
        let merged = itertools::merge(self.runs.iter().copied(), other.runs.iter().copied());
        let mut out = EntitySet {
            runs: Vec::with_capacity(self.runs.len() + other.runs.len()),
        };
        for (lo, hi) in merged {
            out.push_run(lo, hi);
        }
        out.debug_assert_invariants();
        out
    }

    /// Set intersection.
    pub fn intersect(&self, other: &EntitySet) -> EntitySet {
        let (a, b) = (&self.runs, &other.runs);
        let mut out = Vec::new();
        let (mut i, mut j) = (0usize, 0usize);
        while i < a.len() && j < b.len() {
            let (alo, ahi) = a[i];
            let (blo, bhi) = b[j];
            let lo = alo.max(blo);
            let hi = ahi.min(bhi);
            if lo <= hi {
                out.push((lo, hi));
            }
            if ahi < bhi {
                i += 1;
            } else {
                j += 1;
            }
        }
        let set = EntitySet { runs: out };
        set.debug_assert_invariants();
        set
    }

    /// Set difference `self - other`.
    pub fn difference(&self, other: &EntitySet) -> EntitySet {
        let b = &other.runs;
        let mut out = Vec::new();
        let mut j = 0usize;
        for &(alo, ahi) in &self.runs {
            while j < b.len() && b[j].1 < alo {
                j += 1;
            }
            let mut lo = alo;
            let mut jj = j;
            let mut covered_to_end = false;
            while jj < b.len() && b[jj].0 <= ahi {
                let (blo, bhi) = b[jj];
                if blo > lo {
                    out.push((lo, blo - 1));
                }
                if bhi >= ahi {
                    covered_to_end = true;
                    break;
                }
                lo = bhi + 1;
                jj += 1;
            }
            if !covered_to_end && lo <= ahi {
                out.push((lo, ahi));
            }
        }
        let set = EntitySet { runs: out };
        set.debug_assert_invariants();
        set
    }

    /// Complement of `self` within `universe`.
    pub fn complement_in(&self, universe: &EntitySet) -> EntitySet {
        universe.difference(self)
    }

    /// Translate every entity by `d`. Panics on identifier overflow.
    pub fn shift(&self, d: Entity) -> EntitySet {
        let runs = self
            .runs
            .iter()
            .map(|&(lo, hi)| {
                (
                    lo.checked_add(d).expect("entity identifier overflow in shift"),
                    hi.checked_add(d).expect("entity identifier overflow in shift"),
                )
            })
            .collect();
        EntitySet { runs }
    }

    // Append a run known to start at or after every stored run, merging when
    // it overlaps or touches the last one.
    fn push_run(&mut self, lo: Entity, hi: Entity) {
        match self.runs.last_mut() {
            Some(last) if lo as i64 <= last.1 as i64 + 1 => {
                last.1 = last.1.max(hi);
            }
            _ => self.runs.push((lo, hi)),
        }
    }
}

impl DebugInvariants for EntitySet {
    fn debug_assert_invariants(&self) {
        crate::dist_debug_assert_ok!(self.validate_invariants(), "EntitySet invalid");
    }

    fn validate_invariants(&self) -> Result<(), MeshDistError> {
        for &(lo, hi) in &self.runs {
            if lo > hi {
                return Err(MeshDistError::InvalidInterval { lo, hi });
            }
        }
        for w in self.runs.windows(2) {
            let (_, hi0) = w[0];
            let (lo1, hi1) = w[1];
            if (hi0 as i64) + 1 >= lo1 as i64 {
                return Err(MeshDistError::InvalidInterval { lo: lo1, hi: hi1 });
            }
        }
        Ok(())
    }
}

impl FromIterator<Entity> for EntitySet {
    fn from_iter<I: IntoIterator<Item = Entity>>(iter: I) -> Self {
        let mut items: Vec<Entity> = iter.into_iter().collect();
        items.sort_unstable();
        items.dedup();
        let mut out = EntitySet::empty();
        for e in items {
            out.push_run(e, e);
        }
        out.debug_assert_invariants();
        out
    }
}

impl std::ops::BitOr for &EntitySet {
    type Output = EntitySet;
    fn bitor(self, rhs: &EntitySet) -> EntitySet {
        self.union(rhs)
    }
}

impl std::ops::BitAnd for &EntitySet {
    type Output = EntitySet;
    fn bitand(self, rhs: &EntitySet) -> EntitySet {
        self.intersect(rhs)
    }
}

impl std::ops::Sub for &EntitySet {
    type Output = EntitySet;
    fn sub(self, rhs: &EntitySet) -> EntitySet {
        self.difference(rhs)
    }
}

impl fmt::Debug for EntitySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntitySet{self}")
    }
}

impl fmt::Display for EntitySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, &(lo, hi)) in self.runs.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            if lo == hi {
                write!(f, "[{lo}]")?;
            } else {
                write!(f, "[{lo},{hi}]")?;
            }
        }
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(v: &[Entity]) -> EntitySet {
        v.iter().copied().collect()
    }

    #[test]
    fn build_and_compress() {
        let s = set(&[1, 2, 3, 7, 8, 12]);
        assert_eq!(s.intervals(), &[(1, 3), (7, 8), (12, 12)]);
        assert_eq!(s.size(), 6);
        assert_eq!(s.min(), Some(1));
        assert_eq!(s.max(), Some(12));
    }

    #[test]
    fn from_intervals_normalizes() {
        let s = EntitySet::from_intervals([(5, 9), (0, 3), (4, 4), (20, 10)]);
        // (20,10) is empty; (0,3),(4,4),(5,9) merge into one run
        assert_eq!(s.intervals(), &[(0, 9)]);
    }

    #[test]
    fn contains_and_iter() {
        let s = set(&[0, 1, 5, 6, 7]);
        assert!(s.contains(0));
        assert!(s.contains(6));
        assert!(!s.contains(2));
        assert!(!s.contains(8));
        let back: Vec<Entity> = s.iter().collect();
        assert_eq!(back, vec![0, 1, 5, 6, 7]);
    }

    #[test]
    fn union_merges_adjacent() {
        let a = EntitySet::interval(0, 4);
        let b = EntitySet::interval(5, 9);
        assert_eq!((&a | &b).intervals(), &[(0, 9)]);
    }

    #[test]
    fn intersect_and_difference() {
        let a = EntitySet::from_intervals([(0, 9), (20, 29)]);
        let b = EntitySet::from_intervals([(5, 24)]);
        assert_eq!((&a & &b).intervals(), &[(5, 9), (20, 24)]);
        assert_eq!((&a - &b).intervals(), &[(0, 4), (25, 29)]);
        assert_eq!((&b - &a).intervals(), &[(10, 19)]);
    }

    #[test]
    fn difference_splits_run() {
        let a = EntitySet::interval(0, 10);
        let b = set(&[3, 4, 7]);
        assert_eq!((&a - &b).intervals(), &[(0, 2), (5, 6), (8, 10)]);
    }

    #[test]
    fn algebra_identities() {
        let a = set(&[1, 2, 3, 10]);
        let b = set(&[3, 4, 5]);
        assert_eq!(&(&a | &b) & &a, a);
        assert!((&a - &a).is_empty());
        let universe = EntitySet::interval(0, 15);
        let c = a.complement_in(&universe);
        assert_eq!(&(&a | &c), &universe);
        assert!((&a & &c).is_empty());
    }

    #[test]
    fn shift_translates_runs() {
        let a = EntitySet::from_intervals([(0, 2), (5, 5)]);
        assert_eq!(a.shift(100).intervals(), &[(100, 102), (105, 105)]);
        assert_eq!(a.shift(100).shift(-100), a);
    }

    #[test]
    fn display_format() {
        let a = EntitySet::from_intervals([(0, 2), (5, 5)]);
        assert_eq!(format!("{a}"), "([0,2],[5])");
    }

    #[test]
    fn serde_roundtrip() {
        let a = EntitySet::from_intervals([(3, 9), (40, 41)]);
        let s = serde_json::to_string(&a).unwrap();
        let b: EntitySet = serde_json::from_str(&s).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn negative_entities_are_representable() {
        // Sentinel values can appear in image sets even though the allocator
        // never hands them out.
        let s = set(&[-3, -2, 4]);
        assert_eq!(s.intervals(), &[(-3, -2), (4, 4)]);
        assert!(s.contains(-2));
    }
}
