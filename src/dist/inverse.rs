//! Distributed inverse-map construction.
//!
//! Given a relation `preimage → image` spread over ranks and a target
//! ownership partition of the image, build `image → {sources}` as a
//! [`MultiMap`] on each image owner. Two-pass counting throughout: pairs are
//! exchanged through a count-sized all-to-all, receivers accumulate exact
//! per-target degrees, allocate once, then fill slots back to front with a
//! decrementing cursor so every slot is written exactly once.

use crate::comm::collectives::all_to_all_v_records;
use crate::comm::communicator::{Communicator, ExchangeTags};
use crate::comm::wire::WireRelation;
use crate::entity::{Entity, EntitySet};
use crate::map::{Map, MultiMap, Store};
use crate::mesh_error::MeshDistError;
use crate::partition::OwnerLookup;

/// Anything usable as the input relation of an inverse-map build.
pub trait Relation {
    /// Entities the relation is defined on.
    fn domain(&self) -> &EntitySet;
    /// All `(source, target)` instances with `source` in `within`.
    fn pairs<'a>(&'a self, within: &'a EntitySet) -> Box<dyn Iterator<Item = (Entity, Entity)> + 'a>;
}

impl Relation for Map {
    fn domain(&self) -> &EntitySet {
        Map::domain(self)
    }
    fn pairs<'a>(&'a self, within: &'a EntitySet) -> Box<dyn Iterator<Item = (Entity, Entity)> + 'a> {
        Box::new(
            self.iter()
                .filter(move |&(s, _)| within.contains(s))
                .map(|(s, t)| (s, t)),
        )
    }
}

impl Relation for MultiMap {
    fn domain(&self) -> &EntitySet {
        MultiMap::domain(self)
    }
    fn pairs<'a>(&'a self, within: &'a EntitySet) -> Box<dyn Iterator<Item = (Entity, Entity)> + 'a> {
        Box::new(
            self.iter()
                .filter(move |&(s, _)| within.contains(s))
                .flat_map(|(s, row)| row.iter().map(move |&t| (s, t))),
        )
    }
}

/// Build the inverse of `rel` over a distributed image.
///
/// `input_preimage` restricts which local sources contribute;
/// `image_lookup` is the full ownership partition of the image and
/// `image_local` this rank's piece of it. The result maps every entity of
/// `image_local` to the exact set of sources relating to it (no defined
/// order within a row).
///
/// # Panics
/// Panics when a target falls outside the declared image partition, or when
/// a pair is routed to a rank whose `image_local` does not contain it — both
/// are partition-construction bugs.
pub fn distributed_inverse_map<R, C>(
    rel: &R,
    input_preimage: &EntitySet,
    image_lookup: &OwnerLookup,
    image_local: &EntitySet,
    comm: &C,
    tags: ExchangeTags,
) -> Result<MultiMap, MeshDistError>
where
    R: Relation,
    C: Communicator,
{
    let n = comm.size();

    // Pass 1 on the send side: bucket pairs by the target's owner.
    let mut sends: Vec<Vec<WireRelation>> = vec![Vec::new(); n];
    for (s, t) in rel.pairs(input_preimage) {
        let owner = image_lookup
            .owner_of(t)
            .unwrap_or_else(|| panic!("inverse-map target {t} outside the declared image"));
        sends[owner].push(WireRelation::new(t, s));
    }
    let recvs = all_to_all_v_records::<WireRelation, C>(comm, &sends, tags)?;

    // Pass 1 on the receive side: exact degrees.
    let mut counts: Store<i32> = Store::allocate(image_local.clone());
    for batch in &recvs {
        for r in batch {
            let t = r.target();
            assert!(
                image_local.contains(t),
                "inverse-map target {t} routed to a rank that does not own it"
            );
            *counts.get_mut(t) += 1;
        }
    }

    // Pass 2: allocate exactly, fill back to front with decrementing cursors.
    let mut result = MultiMap::allocate(&counts);
    let base = result.base();
    let mut cursor: Vec<usize> = result.offsets()[1..].to_vec();
    for batch in &recvs {
        for r in batch {
            let t = r.target();
            let slot = (t - base) as usize;
            cursor[slot] -= 1;
            let k = cursor[slot];
            result.values_mut()[k] = r.source();
        }
    }
    debug_assert!(
        cursor
            .iter()
            .zip(result.offsets().iter())
            .all(|(&c, &o)| c == o),
        "inverse-map fill cursors did not return to their row starts"
    );
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::communicator::{CommTag, NoComm};

    #[test]
    fn serial_multimap_inverse() {
        // 0→{5,6}, 1→{6}, 2→{5}  inverts to  5→{0,2}, 6→{0,1}
        let mm = MultiMap::from_rows([(0, &[5, 6][..]), (1, &[6][..]), (2, &[5][..])]);
        let image = EntitySet::interval(5, 6);
        let lookup = OwnerLookup::from_partition(std::slice::from_ref(&image));
        let inv = distributed_inverse_map(
            &mm,
            &EntitySet::interval(0, 2),
            &lookup,
            &image,
            &NoComm,
            ExchangeTags::from_base(CommTag::new(0x200)),
        )
        .unwrap();
        let mut r5: Vec<Entity> = inv.row(5).to_vec();
        let mut r6: Vec<Entity> = inv.row(6).to_vec();
        r5.sort_unstable();
        r6.sort_unstable();
        assert_eq!(r5, vec![0, 2]);
        assert_eq!(r6, vec![0, 1]);
    }

    #[test]
    fn serial_map_inverse_counts_are_exact() {
        let dom = EntitySet::interval(0, 3);
        let mut m = Map::allocate(dom.clone());
        m.set(0, 9);
        m.set(1, 8);
        m.set(2, 9);
        m.set(3, 9);
        let image = EntitySet::interval(8, 9);
        let lookup = OwnerLookup::from_partition(std::slice::from_ref(&image));
        let inv = distributed_inverse_map(
            &m,
            &dom,
            &lookup,
            &image,
            &NoComm,
            ExchangeTags::from_base(CommTag::new(0x210)),
        )
        .unwrap();
        assert_eq!(inv.degree(9), 3);
        assert_eq!(inv.degree(8), 1);
        assert_eq!(inv.row(8), &[1]);
    }

    #[test]
    fn preimage_restriction_is_honored() {
        let mm = MultiMap::from_rows([(0, &[5][..]), (1, &[5][..])]);
        let image = EntitySet::singleton(5);
        let lookup = OwnerLookup::from_partition(std::slice::from_ref(&image));
        let inv = distributed_inverse_map(
            &mm,
            &EntitySet::singleton(1),
            &lookup,
            &image,
            &NoComm,
            ExchangeTags::from_base(CommTag::new(0x220)),
        )
        .unwrap();
        assert_eq!(inv.row(5), &[1]);
    }

    #[test]
    #[should_panic(expected = "outside the declared image")]
    fn target_outside_image_is_fatal() {
        let mm = MultiMap::from_rows([(0, &[99][..])]);
        let image = EntitySet::singleton(5);
        let lookup = OwnerLookup::from_partition(std::slice::from_ref(&image));
        let _ = distributed_inverse_map(
            &mm,
            &EntitySet::singleton(0),
            &lookup,
            &image,
            &NoComm,
            ExchangeTags::from_base(CommTag::new(0x230)),
        );
    }
}
