//! Clone (ghost) expansion: grow a container's represented domain so it can
//! answer queries for entities owned elsewhere.
//!
//! One request/reply round trip with the owners: requests travel as encoded
//! entity sets, replies as packed container bytes. The received entries are
//! read-only snapshots — nothing refreshes them implicitly, so staleness is
//! a caller responsibility. Calling again with an already-resolved set is a
//! no-op.

use crate::comm::collectives::all_to_all_v;
use crate::comm::communicator::{CommTag, Communicator, ExchangeTags};
use crate::comm::wire::{decode_entity_set, decode_records, encode_entity_set};
use crate::entity::{Entity, EntitySet};
use crate::map::{Container, Map, MultiMap, Store};
use crate::mesh_error::MeshDistError;
use crate::partition::OwnerLookup;

/// Request/reply skeleton shared by the typed expansions: returns, per
/// owner rank, the entity set served plus the packed reply bytes.
fn exchange_clone_data<T, C>(
    container: &T,
    requests: &EntitySet,
    owners: &OwnerLookup,
    comm: &C,
    base_tag: CommTag,
) -> Result<Vec<(EntitySet, Vec<u8>)>, MeshDistError>
where
    T: Container,
    C: Communicator,
{
    let needed = requests - container.domain();
    let want = owners.split(&needed);
    let covered = want.iter().fold(EntitySet::empty(), |acc, s| &acc | s);
    assert!(
        covered == needed,
        "clone request {} lies outside the ownership partition",
        &needed - &covered
    );
    let req_bytes: Vec<Vec<u8>> = want.iter().map(encode_entity_set).collect();
    let served_reqs = all_to_all_v(comm, &req_bytes, ExchangeTags::from_base(base_tag))?;

    // Serve: every requested entity must be locally owned, or the partition
    // used for routing is corrupt.
    let mut replies: Vec<Vec<u8>> = Vec::with_capacity(served_reqs.len());
    for (peer, bytes) in served_reqs.iter().enumerate() {
        let asked = decode_entity_set(bytes)?;
        let missing = &asked - container.domain();
        assert!(
            missing.is_empty(),
            "rank {peer} requested clone entities {missing} this rank does not hold"
        );
        let mut buf = Vec::with_capacity(container.pack_size(&asked));
        container.pack(&asked, &mut buf);
        replies.push(buf);
    }
    let reply_bytes = all_to_all_v(comm, &replies, ExchangeTags::from_base(base_tag.offset(2)))?;
    Ok(want.into_iter().zip(reply_bytes).collect())
}

/// Number of tags one expansion consumes starting at its base tag.
pub const fn expand_tag_span() -> u16 {
    4
}

/// Extend `map` to also answer for `requests`, fetching values from their
/// owners. Permanently grows the represented domain; idempotent for
/// already-resolved entities.
pub fn expand_map<C: Communicator>(
    map: &mut Map,
    requests: &EntitySet,
    owners: &OwnerLookup,
    comm: &C,
    base_tag: CommTag,
) -> Result<(), MeshDistError> {
    let chunks = exchange_clone_data(map, requests, owners, comm, base_tag)?;
    let grown: EntitySet = chunks
        .iter()
        .fold(Container::domain(map).clone(), |acc, (set, _)| &acc | set);
    if &grown == Container::domain(map) {
        return Ok(());
    }

    let mut out = Map::allocate(grown);
    for (e, v) in map.iter() {
        out.set(e, v);
    }
    for (set, bytes) in &chunks {
        let vals: Vec<Entity> = decode_records(bytes)?;
        if vals.len() != set.size() {
            return Err(MeshDistError::MalformedWire(format!(
                "clone reply holds {} values for {} entities",
                vals.len(),
                set.size()
            )));
        }
        for (e, v) in set.iter().zip(vals) {
            out.set(e, v);
        }
    }
    *map = out;
    Ok(())
}

/// Extend `mm` to also answer for `requests`; the multi-valued analogue of
/// [`expand_map`].
pub fn expand_multi_map<C: Communicator>(
    mm: &mut MultiMap,
    requests: &EntitySet,
    owners: &OwnerLookup,
    comm: &C,
    base_tag: CommTag,
) -> Result<(), MeshDistError> {
    let chunks = exchange_clone_data(mm, requests, owners, comm, base_tag)?;
    let grown: EntitySet = chunks
        .iter()
        .fold(Container::domain(mm).clone(), |acc, (set, _)| &acc | set);
    if &grown == Container::domain(mm) {
        return Ok(());
    }

    // Scratch translation table: entity → (offset, degree) into each reply.
    let mut rows: hashbrown::HashMap<Entity, (usize, usize, usize)> = hashbrown::HashMap::new();
    for (ci, (set, bytes)) in chunks.iter().enumerate() {
        let mut pos = 0usize;
        for e in set.iter() {
            assert!(
                pos + 4 <= bytes.len(),
                "clone reply truncated at entity {e}"
            );
            let mut raw = [0u8; 4];
            raw.copy_from_slice(&bytes[pos..pos + 4]);
            let deg = u32::from_ne_bytes(raw) as usize;
            pos += 4;
            rows.insert(e, (ci, pos, deg));
            pos += deg * std::mem::size_of::<Entity>();
        }
        assert!(
            pos == bytes.len(),
            "clone reply has bytes left over after its entity set"
        );
    }

    let mut counts: Store<i32> = Store::allocate(grown);
    for (e, _) in mm.iter() {
        counts.set(e, mm.degree(e) as i32);
    }
    for (&e, &(_, _, deg)) in rows.iter() {
        counts.set(e, deg as i32);
    }
    let mut out = MultiMap::allocate(&counts);
    for e in MultiMap::domain(mm).clone().iter() {
        out.row_mut(e).copy_from_slice(mm.row(e));
    }
    for (&e, &(ci, pos, deg)) in rows.iter() {
        let bytes = &chunks[ci].1;
        let row = out.row_mut(e);
        for (k, slot) in row.iter_mut().enumerate().take(deg) {
            let at = pos + k * std::mem::size_of::<Entity>();
            let mut raw = [0u8; std::mem::size_of::<Entity>()];
            let n = raw.len();
            raw.copy_from_slice(&bytes[at..at + n]);
            *slot = Entity::from_ne_bytes(raw);
        }
    }
    *mm = out;
    Ok(())
}
