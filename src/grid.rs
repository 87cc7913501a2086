//! Grid-chunk distribution: the pipeline a grid reader runs after ingesting
//! raw per-rank pieces of a finite-volume mesh.
//!
//! Control flow: compute a cell partition over the cell adjacency graph
//! (graph partitioner, or the naive split as silent fallback) → derive the
//! face partition from the cells each face touches → derive the node
//! partition from the faces → redistribute every container into the new
//! ownership → assign fresh contiguous global numbers and rewrite all cell
//! and node references through them.
//!
//! Raw chunks use one shared global numbering per entity kind, with each
//! rank holding one contiguous block (what a parallel reader naturally
//! produces).

use crate::comm::collectives::{all_gather, all_to_all_v, all_to_all_v_records};
use crate::comm::communicator::{CommTag, Communicator, ExchangeTags};
use crate::comm::wire::{decode_entity_set, encode_entity_set, WireRelation};
use crate::dist::expand::expand_map;
use crate::dist::numbering::DistNumbering;
use crate::dist::redistribute::{redistribute, transpose_parts};
use crate::entity::{Entity, EntitySet};
use crate::map::{Container, Map, MultiMap, Store};
use crate::mesh_error::MeshDistError;
use crate::partition::derived::{face_owner_map, node_owner_map, owner_send_parts};
use crate::partition::graph::{partition_cells, AdjacencyGraph};
use crate::partition::OwnerLookup;

/// One rank's piece of a raw grid, in shared global numbering.
#[derive(Clone, Debug)]
pub struct GridChunk {
    /// Cells held by this rank (one contiguous block).
    pub cells: EntitySet,
    /// Node positions for the nodes held by this rank (one contiguous block).
    pub pos: Store<[f64; 3]>,
    /// Face → node connectivity for the faces held by this rank.
    pub face2node: MultiMap,
    /// Face → left cell; negative values are boundary sentinels.
    pub cl: Map,
    /// Face → right cell; negative values are boundary sentinels.
    pub cr: Map,
}

/// A distributed grid: the repartitioned chunk plus the renumbering maps
/// (old shared global → new global) used to rewrite references.
#[derive(Clone, Debug)]
pub struct GridDistribution {
    pub chunk: GridChunk,
    pub cell_newnum: Map,
    pub face_newnum: Map,
    pub node_newnum: Map,
}

/// Knobs for [`distribute_grid`].
#[derive(Clone, Copy, Debug)]
pub struct PartitionOptions {
    /// Attempt the external graph partitioner before the naive split.
    pub use_graph_partitioner: bool,
}

impl Default for PartitionOptions {
    fn default() -> Self {
        PartitionOptions {
            use_graph_partitioner: true,
        }
    }
}

const TAG_CELL_DIST: CommTag = CommTag::new(0x5000);
const TAG_ADJ: CommTag = CommTag::new(0x5010);
const TAG_PARTITION: CommTag = CommTag::new(0x5020);
const TAG_CELL_OWNER: CommTag = CommTag::new(0x5030);
const TAG_NODE_BLOCKS: CommTag = CommTag::new(0x5040);
const TAG_NODE_OWNER: CommTag = CommTag::new(0x5050);
const TAG_MOVE: CommTag = CommTag::new(0x5100);
const TAG_RENUMBER: CommTag = CommTag::new(0x5200);

/// Repartition and renumber a raw grid chunk.
pub fn distribute_grid<C: Communicator>(
    chunk: &GridChunk,
    comm: &C,
    opts: PartitionOptions,
) -> Result<GridDistribution, MeshDistError> {
    let n = comm.size();
    let faces = Container::domain(&chunk.cl).clone();
    assert_eq!(&faces, Container::domain(&chunk.cr), "cl/cr face domains differ");
    assert_eq!(
        &faces,
        Container::domain(&chunk.face2node),
        "face2node and cl/cr face domains differ"
    );

    // Cell blocks across ranks, and the adjacency graph over them.
    let cell_blocks = gather_blocks(comm, &chunk.cells, TAG_CELL_DIST)?;
    let cell_lookup = OwnerLookup::from_partition(&cell_blocks);
    let graph = build_cell_adjacency(chunk, &cell_blocks, &cell_lookup, comm)?;

    // New cell ownership.
    let cell_send = partition_cells(
        &graph,
        comm,
        ExchangeTags::from_base(TAG_PARTITION),
        opts.use_graph_partitioner,
    )?;
    let mut cell_owner = Map::allocate(chunk.cells.clone());
    for (rank, set) in cell_send.iter().enumerate() {
        for e in set.iter() {
            cell_owner.set(e, rank as Entity);
        }
    }

    // Faces reference remote cells; expand the owner map over the clone
    // region before deriving the face partition.
    let refs = referenced_cells(chunk);
    expand_map(&mut cell_owner, &refs, &cell_lookup, comm, TAG_CELL_OWNER)?;
    let face_owner = face_owner_map(&chunk.cl, &chunk.cr, &cell_owner);
    let face_send = owner_send_parts(&face_owner, n);

    // Node ownership follows the faces.
    let node_blocks = gather_blocks(comm, chunk.pos.domain(), TAG_NODE_BLOCKS)?;
    let node_lookup = OwnerLookup::from_partition(&node_blocks);
    let node_owner = node_owner_map(
        &chunk.face2node,
        &face_owner,
        chunk.pos.domain(),
        &node_lookup,
        comm,
        ExchangeTags::from_base(TAG_NODE_OWNER),
    )?;
    let node_send = owner_send_parts(&node_owner, n);

    // Physically move every container into the new ownership. Identities are
    // kept through the move; renumbering happens afterwards.
    let cell_recv = transpose_parts(&cell_send, comm, ExchangeTags::from_base(TAG_MOVE))?;
    let face_recv = transpose_parts(&face_send, comm, ExchangeTags::from_base(TAG_MOVE.offset(2)))?;
    let node_recv = transpose_parts(&node_send, comm, ExchangeTags::from_base(TAG_MOVE.offset(4)))?;
    let cl2 = redistribute(&chunk.cl, &face_send, &face_recv, comm, TAG_MOVE.offset(6))?;
    let cr2 = redistribute(&chunk.cr, &face_send, &face_recv, comm, TAG_MOVE.offset(10))?;
    let f2n2 = redistribute(&chunk.face2node, &face_send, &face_recv, comm, TAG_MOVE.offset(14))?;
    let pos2 = redistribute(&chunk.pos, &node_send, &node_recv, comm, TAG_MOVE.offset(18))?;

    let new_cells_old = cell_recv
        .iter()
        .fold(EntitySet::empty(), |acc, s| &acc | s);
    let new_faces_old = Container::domain(&cl2).clone();
    let new_nodes_old = Container::domain(&pos2).clone();

    // Fresh contiguous global numbers per kind; the l2g of a contiguous
    // numbering over the received entities is exactly old-global→new-global.
    let mut cell_newnum = DistNumbering::contiguous(comm, &new_cells_old, TAG_RENUMBER)?
        .l2g()
        .clone();
    let face_newnum = DistNumbering::contiguous(comm, &new_faces_old, TAG_RENUMBER.offset(1))?
        .l2g()
        .clone();
    let mut node_newnum = DistNumbering::contiguous(comm, &new_nodes_old, TAG_RENUMBER.offset(2))?
        .l2g()
        .clone();

    // cl/cr still reference old cell numbers of cells that may now live
    // elsewhere; same for face2node and nodes. Expand the renumber maps over
    // those references, under the *new* ownership.
    let new_cell_parts = gather_sets(comm, &new_cells_old, TAG_RENUMBER.offset(3))?;
    let new_cell_lookup = OwnerLookup::from_partition(&new_cell_parts);
    let cell_refs2 = &(&nonnegative(&cl2.image(&new_faces_old))
        | &nonnegative(&cr2.image(&new_faces_old)))
        - &new_cells_old;
    expand_map(
        &mut cell_newnum,
        &(&cell_refs2 | &new_cells_old),
        &new_cell_lookup,
        comm,
        TAG_RENUMBER.offset(5),
    )?;

    let new_node_parts = gather_sets(comm, &new_nodes_old, TAG_RENUMBER.offset(9))?;
    let new_node_lookup = OwnerLookup::from_partition(&new_node_parts);
    let node_refs2 = &f2n2.image(&new_faces_old) - &new_nodes_old;
    expand_map(
        &mut node_newnum,
        &(&node_refs2 | &new_nodes_old),
        &new_node_lookup,
        comm,
        TAG_RENUMBER.offset(11),
    )?;

    // Rewrite values, then rename domains.
    let mut cl3 = cl2;
    let mut cr3 = cr2;
    let mut f2n3 = f2n2;
    cl3.compose(&cell_newnum, &new_faces_old);
    cr3.compose(&cell_newnum, &new_faces_old);
    f2n3.compose(&node_newnum, &new_faces_old);

    let cl4 = cl3.remap_domain(&face_newnum);
    let cr4 = cr3.remap_domain(&face_newnum);
    let f2n4 = f2n3.remap_domain(&face_newnum);
    let pos4 = pos2.remap_domain(&node_newnum);
    let new_cells = cell_newnum.image(&new_cells_old);

    log::debug!(
        "distribute_grid rank {}: {} cells, {} faces, {} nodes after repartition",
        comm.rank(),
        new_cells.size(),
        Container::domain(&cl4).size(),
        Container::domain(&pos4).size()
    );

    Ok(GridDistribution {
        chunk: GridChunk {
            cells: new_cells,
            pos: pos4,
            face2node: f2n4,
            cl: cl4,
            cr: cr4,
        },
        cell_newnum,
        face_newnum,
        node_newnum,
    })
}

/// Orient faces by cell color: after this, every interior face has
/// `color[cl] < color[cr]` and boundary sentinels sit on the right. A
/// swapped face also reverses its node ring.
///
/// # Panics
/// Panics on an interior face whose two cells share a color (degenerate
/// input data), and on a face with two boundary sentinels.
pub fn color_matrix(cl: &mut Map, cr: &mut Map, face2node: &mut MultiMap, color: &Map) {
    let faces = Container::domain(cl).clone();
    assert_eq!(&faces, Container::domain(cr), "cl/cr face domains differ");
    for f in faces.iter() {
        let (l, r) = (cl.get(f), cr.get(f));
        let swap = match (l >= 0, r >= 0) {
            (true, true) => {
                let (a, b) = (color.get(l), color.get(r));
                assert!(
                    a != b,
                    "color tie on interior face {f}: both cells colored {a}"
                );
                a > b
            }
            (false, true) => true,
            (true, false) => false,
            (false, false) => panic!("face {f} has no adjacent cell (cl={l}, cr={r})"),
        };
        if swap {
            cl.set(f, r);
            cr.set(f, l);
            face2node.row_mut(f).reverse();
        }
    }
}

/// All real cells referenced by this rank's faces.
fn referenced_cells(chunk: &GridChunk) -> EntitySet {
    let faces = Container::domain(&chunk.cl);
    &nonnegative(&chunk.cl.image(faces)) | &nonnegative(&chunk.cr.image(faces))
}

fn nonnegative(set: &EntitySet) -> EntitySet {
    set.intersect(&EntitySet::interval(0, Entity::MAX))
}

/// Gather every rank's contiguous block into a partition vector.
fn gather_blocks<C: Communicator>(
    comm: &C,
    local: &EntitySet,
    tag: CommTag,
) -> Result<Vec<EntitySet>, MeshDistError> {
    assert!(
        local.num_intervals() <= 1,
        "raw chunk blocks must be contiguous, got {local}"
    );
    let block: [i64; 2] = [
        local.min().unwrap_or(0) as i64,
        local.size() as i64,
    ];
    let raw: Vec<[i64; 2]> = all_gather(comm, &block, tag)?;
    Ok(raw
        .iter()
        .map(|b| {
            if b[1] == 0 {
                EntitySet::empty()
            } else {
                EntitySet::interval(b[0] as Entity, (b[0] + b[1] - 1) as Entity)
            }
        })
        .collect())
}

/// Gather every rank's (arbitrary-shape) entity set.
fn gather_sets<C: Communicator>(
    comm: &C,
    local: &EntitySet,
    tag: CommTag,
) -> Result<Vec<EntitySet>, MeshDistError> {
    let encoded = encode_entity_set(local);
    let sends: Vec<Vec<u8>> = (0..comm.size()).map(|_| encoded.clone()).collect();
    let recvs = all_to_all_v(comm, &sends, ExchangeTags::from_base(tag))?;
    recvs.iter().map(|b| decode_entity_set(b)).collect()
}

/// Build the distributed cell adjacency graph: two cells are adjacent iff
/// they share a face. Each interior face contributes its edge to both
/// endpoint owners.
fn build_cell_adjacency<C: Communicator>(
    chunk: &GridChunk,
    cell_blocks: &[EntitySet],
    cell_lookup: &OwnerLookup,
    comm: &C,
) -> Result<AdjacencyGraph, MeshDistError> {
    let n = comm.size();
    let me = comm.rank();
    let mut sends: Vec<Vec<WireRelation>> = vec![Vec::new(); n];
    for f in Container::domain(&chunk.cl).iter() {
        let (l, r) = (chunk.cl.get(f), chunk.cr.get(f));
        if l < 0 || r < 0 {
            continue;
        }
        let lo = cell_lookup
            .owner_of(l)
            .unwrap_or_else(|| panic!("cell {l} outside the cell universe"));
        let ro = cell_lookup
            .owner_of(r)
            .unwrap_or_else(|| panic!("cell {r} outside the cell universe"));
        sends[lo].push(WireRelation::new(l, r));
        sends[ro].push(WireRelation::new(r, l));
    }
    let recvs = all_to_all_v_records::<WireRelation, C>(comm, &sends, ExchangeTags::from_base(TAG_ADJ))?;

    let base = chunk.cells.min().unwrap_or(0);
    let nvtx = chunk.cells.size();
    let mut neighbors: Vec<Vec<Entity>> = vec![Vec::new(); nvtx];
    for batch in &recvs {
        for rel in batch {
            let (v, w) = (rel.target(), rel.source());
            assert!(
                chunk.cells.contains(v),
                "adjacency for cell {v} routed to a rank that does not hold it"
            );
            neighbors[(v - base) as usize].push(w);
        }
    }
    let mut xadj = Vec::with_capacity(nvtx + 1);
    let mut adjncy = Vec::new();
    xadj.push(0usize);
    for list in &mut neighbors {
        list.sort_unstable();
        list.dedup();
        adjncy.extend_from_slice(list);
        xadj.push(adjncy.len());
    }

    // vtxdist from the gathered blocks
    let mut vtxdist = Vec::with_capacity(n + 1);
    vtxdist.push(cell_blocks[0].min().unwrap_or(0));
    for b in cell_blocks {
        let last = *vtxdist.last().unwrap();
        vtxdist.push(last + b.size() as Entity);
    }
    debug_assert_eq!(vtxdist[me], base);
    Ok(AdjacencyGraph {
        vtxdist,
        xadj,
        adjncy,
    })
}
