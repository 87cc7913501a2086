//! Local / global / file numbering translation.
//!
//! Three coordinate spaces cover every entity's life: the per-process local
//! space used for indexing, the cross-run canonical global space assigned
//! once at initial distributed allocation, and the stable file space used
//! for persisted data. [`DistNumbering`] holds the two maps (`l2g`, `g2f`)
//! and the translation routines move whole containers between the local and
//! file orders, which is what lets a grid written by `n` ranks be read back
//! by `m`.

use crate::comm::collectives::{all_gather, all_reduce_max, all_reduce_min};
use crate::comm::communicator::{CommTag, Communicator, ExchangeTags};
use crate::entity::{Entity, EntitySet};
use crate::map::{Container, Map};
use crate::mesh_error::MeshDistError;
use crate::partition::{simple_partition, OwnerLookup};
use crate::dist::redistribute::{redistribute, transpose_parts};

/// The `l2g` / `g2f` pair of one entity kind on one rank.
///
/// `l2g` maps this rank's local entities to canonical global ordinals; `g2f`
/// maps global ordinals to file ordinals and starts out as the identity over
/// the owned block until a file numbering is fixed. After clone expansion
/// `g2f` also answers for referenced-but-unowned globals.
#[derive(Clone, Debug)]
pub struct DistNumbering {
    l2g: Map,
    g2f: Map,
}

impl DistNumbering {
    /// Assign contiguous global blocks by ascending rank: rank `r`'s locals
    /// get globals `[Σ counts[..r], Σ counts[..r+1])`.
    pub fn contiguous<C: Communicator>(
        comm: &C,
        local: &EntitySet,
        tag: CommTag,
    ) -> Result<Self, MeshDistError> {
        let counts: Vec<u64> = all_gather(comm, &(local.size() as u64), tag)?;
        let prefix: u64 = counts.iter().take(comm.rank()).sum();

        let mut l2g = Map::allocate(local.clone());
        for (i, e) in local.iter().enumerate() {
            l2g.set(e, (prefix + i as u64) as Entity);
        }
        let gset = if local.is_empty() {
            EntitySet::empty()
        } else {
            EntitySet::interval(
                prefix as Entity,
                (prefix + local.size() as u64 - 1) as Entity,
            )
        };
        let mut g2f = Map::allocate(gset.clone());
        for g in gset.iter() {
            g2f.set(g, g);
        }
        Ok(DistNumbering { l2g, g2f })
    }

    /// Wrap existing maps.
    pub fn new(l2g: Map, g2f: Map) -> Self {
        DistNumbering { l2g, g2f }
    }

    #[inline]
    pub fn l2g(&self) -> &Map {
        &self.l2g
    }

    #[inline]
    pub fn g2f(&self) -> &Map {
        &self.g2f
    }

    /// Replace the file numbering (fixed once at file-write time).
    pub fn set_file_numbering(&mut self, g2f: Map) {
        self.g2f = g2f;
    }

    /// Mutable access for clone expansion of the file numbering.
    pub fn g2f_mut(&mut self) -> &mut Map {
        &mut self.g2f
    }

    /// `newnum = g2f ∘ l2g` over `dom`: the file ordinal of every local
    /// entity in `dom`.
    ///
    /// # Panics
    /// Panics if some global in `l2g[dom]` is outside `g2f`'s domain —
    /// expand `g2f` over the clone region first.
    pub fn newnum(&self, dom: &EntitySet) -> Map {
        let mut nn = Map::allocate(dom.clone());
        for e in dom.iter() {
            nn.set(e, self.l2g.get(e));
        }
        nn.compose(&self.g2f, dom);
        nn
    }
}

/// Number of tags [`local_to_file_order`] / [`file_to_local_order`] consume
/// starting at their base tag.
pub const fn order_tag_span() -> u16 {
    8
}

/// Copy the restriction of `c` to `dom` through the pack seam.
fn restrict_container<T: Container>(c: &T, dom: &EntitySet) -> T {
    let missing = dom - c.domain();
    assert!(
        missing.is_empty(),
        "restriction domain {missing} outside the container"
    );
    let mut buf = Vec::with_capacity(c.pack_size(dom));
    c.pack(dom, &mut buf);
    T::unpack_concat(&[(dom.clone(), buf)])
}

/// Redistribute `c|_dom` into the file-numbering space.
///
/// The file space is split contiguously over the ranks; the returned
/// container's domain starts at zero and `domain + offset` recovers true
/// file ordinals.
pub fn local_to_file_order<T, C>(
    c: &T,
    dom: &EntitySet,
    dist: &DistNumbering,
    comm: &C,
    base_tag: CommTag,
) -> Result<(T, Entity), MeshDistError>
where
    T: Container,
    C: Communicator,
{
    let nn = dist.newnum(dom);
    let fset = nn.image(dom);
    assert_eq!(
        fset.size(),
        dom.size(),
        "file numbering is not injective over the domain"
    );

    let fmin = all_reduce_min(comm, fset.min().unwrap_or(Entity::MAX), base_tag)?;
    let fmax = all_reduce_max(comm, fset.max().unwrap_or(Entity::MIN), base_tag.offset(1))?;
    assert!(fmin <= fmax, "file space is empty across all ranks");
    let file_parts = simple_partition(fmin, fmax, comm.size());
    let offset = file_parts[comm.rank()].min().unwrap();

    let cf = restrict_container(c, dom).remap_domain(&nn);
    let send_parts: Vec<EntitySet> = file_parts.iter().map(|p| p & &fset).collect();
    let recv_file = transpose_parts(
        &send_parts,
        comm,
        ExchangeTags::from_base(base_tag.offset(2)),
    )?;
    let recv_parts: Vec<EntitySet> = recv_file.iter().map(|s| s.shift(-offset)).collect();
    let out = redistribute(&cf, &send_parts, &recv_parts, comm, base_tag.offset(4))?;
    Ok((out, offset))
}

/// The exact inverse of [`local_to_file_order`]: route file-ordered data
/// back to the ranks that currently own the corresponding local entities.
pub fn file_to_local_order<T, C>(
    cfile: &T,
    dom: &EntitySet,
    offset: Entity,
    dist: &DistNumbering,
    comm: &C,
    base_tag: CommTag,
) -> Result<T, MeshDistError>
where
    T: Container,
    C: Communicator,
{
    let nn = dist.newnum(dom);
    let fset = nn.image(dom);
    assert_eq!(
        fset.size(),
        dom.size(),
        "file numbering is not injective over the domain"
    );

    // Reconstruct the contiguous file blocks from every rank's (offset, len).
    let block: [i64; 2] = [offset as i64, cfile.domain().size() as i64];
    let blocks_raw: Vec<[i64; 2]> = all_gather(comm, &block, base_tag)?;
    let blocks: Vec<EntitySet> = blocks_raw
        .iter()
        .map(|b| {
            if b[1] == 0 {
                EntitySet::empty()
            } else {
                EntitySet::interval(b[0] as Entity, (b[0] + b[1] - 1) as Entity)
            }
        })
        .collect();
    let lookup = OwnerLookup::from_partition(&blocks);

    let want = lookup.split(&fset);
    let covered = want
        .iter()
        .fold(EntitySet::empty(), |acc, s| &acc | s);
    assert_eq!(
        covered, fset,
        "requested file ordinals fall outside every rank's file block"
    );

    let serve_file = transpose_parts(&want, comm, ExchangeTags::from_base(base_tag.offset(1)))?;
    let serve_local: Vec<EntitySet> = serve_file.iter().map(|s| s.shift(-offset)).collect();
    let cf: T = redistribute(cfile, &serve_local, &want, comm, base_tag.offset(3))?;

    // File → local rename; `nn` is injective so the inverse is a Map.
    let mut inv = Map::allocate(fset);
    for e in dom.iter() {
        inv.set(nn.get(e), e);
    }
    Ok(cf.remap_domain(&inv))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::communicator::NoComm;
    use crate::map::Store;

    #[test]
    fn contiguous_numbering_serial() {
        let local = EntitySet::interval(100, 104);
        let dn = DistNumbering::contiguous(&NoComm, &local, CommTag::new(0x400)).unwrap();
        assert_eq!(dn.l2g().get(100), 0);
        assert_eq!(dn.l2g().get(104), 4);
        assert_eq!(dn.g2f().get(3), 3);
        let nn = dn.newnum(&local);
        assert_eq!(nn.get(102), 2);
    }

    #[test]
    fn file_roundtrip_serial_identity() {
        let local = EntitySet::interval(10, 14);
        let dn = DistNumbering::contiguous(&NoComm, &local, CommTag::new(0x410)).unwrap();
        let mut s: Store<i32> = Store::allocate(local.clone());
        for (i, e) in local.iter().enumerate() {
            s.set(e, 1000 + i as i32);
        }
        let (filed, offset) =
            local_to_file_order(&s, &local, &dn, &NoComm, CommTag::new(0x420)).unwrap();
        assert_eq!(offset, 0);
        assert_eq!(filed.domain().size(), 5);
        let back =
            file_to_local_order(&filed, &local, offset, &dn, &NoComm, CommTag::new(0x430)).unwrap();
        assert_eq!(back, s);
    }

    #[test]
    fn file_roundtrip_serial_permuted() {
        // a non-monotone file numbering must still round-trip
        let local = EntitySet::interval(0, 3);
        let mut dn = DistNumbering::contiguous(&NoComm, &local, CommTag::new(0x440)).unwrap();
        let gset = EntitySet::interval(0, 3);
        let mut g2f = Map::allocate(gset);
        g2f.set(0, 2);
        g2f.set(1, 0);
        g2f.set(2, 3);
        g2f.set(3, 1);
        dn.set_file_numbering(g2f);

        let mut s: Store<i32> = Store::allocate(local.clone());
        for e in 0..=3 {
            s.set(e, 50 + e);
        }
        let (filed, offset) =
            local_to_file_order(&s, &local, &dn, &NoComm, CommTag::new(0x450)).unwrap();
        // entity 1 has file ordinal 0, so slot 0 of the filed container holds its value
        assert_eq!(*filed.get(0 - offset), 51);
        let back =
            file_to_local_order(&filed, &local, offset, &dn, &NoComm, CommTag::new(0x460)).unwrap();
        assert_eq!(back, s);
    }
}
