//! Containers over entity-set domains.
//!
//! Three container kinds share the same layout idea: one contiguous owned
//! buffer indexed by `entity - domain.min()`. [`Map`] holds one entity value
//! per entity, [`MultiMap`] holds an entity sequence per entity behind a
//! monotone offset array, and [`Store`] holds one fixed-size `Pod` value per
//! entity. All three implement [`Container`], the pack/unpack seam the
//! redistribution protocol moves bytes through.

pub mod container;
pub mod map;
pub mod multi_map;
pub mod store;

pub use container::Container;
pub use map::Map;
pub use multi_map::MultiMap;
pub use store::Store;

use crate::entity::{Entity, EntitySet};

/// Build the sorted, deduplicated set of `vals`.
///
/// Dense value ranges (range no more than twice the element count) use a
/// bitmap over the range; sparse far-spread values fall back to sort+dedup,
/// avoiding a pathological `O(range)` allocation.
pub(crate) fn image_of_values(mut vals: Vec<Entity>) -> EntitySet {
    if vals.is_empty() {
        return EntitySet::empty();
    }
    let mn = *vals.iter().min().unwrap();
    let mx = *vals.iter().max().unwrap();
    let range = mx as i64 - mn as i64 + 1;
    if range <= 2 * vals.len() as i64 {
        let mut bits = vec![false; range as usize];
        for v in &vals {
            bits[(*v as i64 - mn as i64) as usize] = true;
        }
        let mut intervals = Vec::new();
        let mut run_start: Option<i64> = None;
        for (i, &b) in bits.iter().enumerate() {
            match (b, run_start) {
                (true, None) => run_start = Some(i as i64),
                (false, Some(s)) => {
                    intervals.push(((mn as i64 + s) as Entity, (mn as i64 + i as i64 - 1) as Entity));
                    run_start = None;
                }
                _ => {}
            }
        }
        if let Some(s) = run_start {
            intervals.push(((mn as i64 + s) as Entity, mx));
        }
        EntitySet::from_intervals(intervals)
    } else {
        vals.sort_unstable();
        vals.dedup();
        vals.into_iter().collect()
    }
}
