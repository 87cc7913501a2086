//! Partitions derived from the cell partition: faces, then nodes.
//!
//! A face follows one of its adjacent cells; a node follows one of the faces
//! touching it. Both rules are fixed here so repeated runs over the same
//! input place every entity identically (up to the documented node
//! tie-break).

use crate::comm::collectives::all_to_all_v_records;
use crate::comm::communicator::{Communicator, ExchangeTags};
use crate::comm::wire::WireRelation;
use crate::entity::{Entity, EntitySet};
use crate::map::{Map, MultiMap};
use crate::mesh_error::MeshDistError;
use crate::partition::OwnerLookup;

/// Assign every local face to a rank, given the (clone-expanded) cell
/// ownership map.
///
/// Rule: a face goes to the owner of its left cell unless that cell is a
/// boundary sentinel, in which case the right cell decides; when both cells
/// are real and owned by different ranks, the higher rank wins.
///
/// # Panics
/// Panics on a face with two boundary sentinels: such a face belongs to no
/// cell and indicates corrupt connectivity.
pub fn face_owner_map(cl: &Map, cr: &Map, cell_owner: &Map) -> Map {
    let faces = cl.domain();
    assert_eq!(
        faces,
        cr.domain(),
        "cl/cr must share one face domain"
    );
    let mut owner = Map::allocate(faces.clone());
    for f in faces.iter() {
        let (l, r) = (cl.get(f), cr.get(f));
        let o = match (l >= 0, r >= 0) {
            (true, true) => cell_owner.get(l).max(cell_owner.get(r)),
            (true, false) => cell_owner.get(l),
            (false, true) => cell_owner.get(r),
            (false, false) => panic!("face {f} has no adjacent cell (cl={l}, cr={r})"),
        };
        owner.set(f, o);
    }
    owner
}

/// Assign every locally held node to a rank: a node goes to the owner of
/// some face that touches it.
///
/// Each rank emits `(node, face_owner)` for the nodes of its local faces and
/// routes the pair to the node's current holder per `node_lookup`. Holders
/// apply the pairs in ascending sender rank; when several faces claim one
/// node the last received write wins. Returns the owner map over this rank's
/// currently held nodes.
pub fn node_owner_map<C: Communicator>(
    face2node: &MultiMap,
    face_owner: &Map,
    local_nodes: &EntitySet,
    node_lookup: &OwnerLookup,
    comm: &C,
    tags: ExchangeTags,
) -> Result<Map, MeshDistError> {
    let n = comm.size();
    let mut sends: Vec<Vec<WireRelation>> = vec![Vec::new(); n];
    for (f, row) in face2node.iter() {
        let o = face_owner.get(f);
        for &node in row {
            let holder = node_lookup
                .owner_of(node)
                .unwrap_or_else(|| panic!("node {node} outside the node universe"));
            sends[holder].push(WireRelation::new(node, o));
        }
    }
    let recvs = all_to_all_v_records::<WireRelation, C>(comm, &sends, tags)?;

    let mut owner = Map::allocate(local_nodes.clone());
    let mut touched = vec![false; local_nodes.size()];
    let index: hashbrown::HashMap<Entity, usize> = local_nodes
        .iter()
        .enumerate()
        .map(|(i, e)| (e, i))
        .collect();
    for batch in &recvs {
        for rel in batch {
            let (node, o) = (rel.target(), rel.source());
            let slot = index
                .get(&node)
                .unwrap_or_else(|| panic!("node {node} routed to a rank that does not hold it"));
            owner.set(node, o);
            touched[*slot] = true;
        }
    }
    assert!(
        touched.iter().all(|&t| t),
        "some nodes are touched by no face; node universe and connectivity disagree"
    );
    Ok(owner)
}

/// Turn an owner map into the send view of a partition: element `i` holds
/// the locally held entities destined for rank `i`.
pub fn owner_send_parts(owner: &Map, nparts: usize) -> Vec<EntitySet> {
    let mut buckets: Vec<Vec<Entity>> = vec![Vec::new(); nparts];
    for (e, o) in owner.iter() {
        assert!(
            o >= 0 && (o as usize) < nparts,
            "entity {e} assigned to nonexistent rank {o}"
        );
        buckets[o as usize].push(e);
    }
    buckets.into_iter().map(|b| b.into_iter().collect()).collect()
}
