//! Graph partitioning of a distributed CSR adjacency graph.
//!
//! Vertices (cells) are numbered globally and distributed in contiguous
//! blocks described by `vtxdist`, a prefix sum of per-rank vertex counts.
//! The k-way partitioner itself is an external service: with the
//! `metis-support` feature the graph is gathered onto every rank — serial
//! METIS produces the same answer everywhere — and each rank keeps its local
//! slice of `part[]`. Without the feature, [`graph_partition`] reports
//! [`MeshDistError::PartitionerUnavailable`] and callers degrade to the
//! naive contiguous split.

use crate::comm::collectives::{all_gather, all_to_all_v};
use crate::comm::communicator::{Communicator, ExchangeTags};
use crate::comm::wire::{cast_slice, decode_records};
use crate::entity::{Entity, EntitySet};
use crate::mesh_error::MeshDistError;

/// Distributed CSR adjacency graph over globally numbered vertices.
///
/// Rank `r` holds vertices `vtxdist[r] .. vtxdist[r+1]`; `xadj`/`adjncy`
/// describe only that local block, with `adjncy` in global numbering.
#[derive(Clone, Debug)]
pub struct AdjacencyGraph {
    pub vtxdist: Vec<Entity>,
    pub xadj: Vec<usize>,
    pub adjncy: Vec<Entity>,
}

impl AdjacencyGraph {
    pub fn num_local(&self) -> usize {
        self.xadj.len().saturating_sub(1)
    }
}

/// Partition the distributed graph into `nparts` parts.
///
/// Returns one target rank per local vertex. Every rank must call this
/// collectively with its own local block.
pub fn graph_partition<C: Communicator>(
    graph: &AdjacencyGraph,
    nparts: usize,
    comm: &C,
    tags: ExchangeTags,
) -> Result<Vec<i32>, MeshDistError> {
    let me = comm.rank();
    let n = comm.size();
    if graph.vtxdist.len() != n + 1 {
        return Err(MeshDistError::RankCountMismatch {
            expected: n + 1,
            got: graph.vtxdist.len(),
        });
    }

    // Gather every rank's (degree list, adjacency list) so each rank can run
    // the serial partitioner on the full graph.
    let degrees: Vec<u32> = graph
        .xadj
        .windows(2)
        .map(|w| (w[1] - w[0]) as u32)
        .collect();
    let mut block = Vec::new();
    block.extend_from_slice(cast_slice(&degrees));
    block.extend_from_slice(cast_slice(&graph.adjncy));
    let sends: Vec<Vec<u8>> = (0..n).map(|_| block.clone()).collect();
    let blocks = all_to_all_v(comm, &sends, tags)?;

    let nvtx_total = (graph.vtxdist[n] - graph.vtxdist[0]) as usize;
    let mut full_xadj: Vec<usize> = Vec::with_capacity(nvtx_total + 1);
    full_xadj.push(0);
    let mut full_adjncy: Vec<Entity> = Vec::new();
    for (rank, bytes) in blocks.iter().enumerate() {
        let nvtx = (graph.vtxdist[rank + 1] - graph.vtxdist[rank]) as usize;
        let deg_bytes = nvtx * std::mem::size_of::<u32>();
        if bytes.len() < deg_bytes {
            return Err(MeshDistError::BufferSizeMismatch {
                neighbor: rank,
                expected: deg_bytes,
                got: bytes.len(),
            });
        }
        let degs: Vec<u32> = decode_records(&bytes[..deg_bytes])?;
        let adj: Vec<Entity> = decode_records(&bytes[deg_bytes..])?;
        let expect: usize = degs.iter().map(|&d| d as usize).sum();
        if adj.len() != expect {
            return Err(MeshDistError::BufferSizeMismatch {
                neighbor: rank,
                expected: deg_bytes + expect * std::mem::size_of::<Entity>(),
                got: bytes.len(),
            });
        }
        for d in degs {
            full_xadj.push(full_xadj.last().unwrap() + d as usize);
        }
        full_adjncy.extend_from_slice(&adj);
    }

    let part = kway(&full_xadj, &full_adjncy, graph.vtxdist[0], nparts)?;
    let lo = (graph.vtxdist[me] - graph.vtxdist[0]) as usize;
    let hi = (graph.vtxdist[me + 1] - graph.vtxdist[0]) as usize;
    log::debug!(
        "graph_partition rank {me}: {} of {} vertices partitioned into {nparts} parts",
        hi - lo,
        nvtx_total
    );
    Ok(part[lo..hi].to_vec())
}

#[cfg(feature = "metis-support")]
fn kway(
    xadj: &[usize],
    adjncy: &[Entity],
    vtx_base: Entity,
    nparts: usize,
) -> Result<Vec<i32>, MeshDistError> {
    let nvtx = xadj.len() - 1;
    if nparts <= 1 || nvtx == 0 {
        return Ok(vec![0; nvtx]);
    }
    let mut xadj_i: Vec<metis::Idx> = xadj.iter().map(|&x| x as metis::Idx).collect();
    let mut adjncy_i: Vec<metis::Idx> = adjncy
        .iter()
        .map(|&v| (v - vtx_base) as metis::Idx)
        .collect();
    let mut part = vec![0 as metis::Idx; nvtx];
    metis::Graph::new(1, nparts as metis::Idx, &mut xadj_i, &mut adjncy_i)
        .part_kway(&mut part)
        .map_err(|e| MeshDistError::PartitionerFailed(e.to_string()))?;
    Ok(part.iter().map(|&p| p as i32).collect())
}

#[cfg(not(feature = "metis-support"))]
fn kway(
    _xadj: &[usize],
    _adjncy: &[Entity],
    _vtx_base: Entity,
    _nparts: usize,
) -> Result<Vec<i32>, MeshDistError> {
    Err(MeshDistError::PartitionerUnavailable)
}

/// Turn a per-vertex `part[]` into the send view of a cell partition:
/// element `i` is the set of local cells destined for rank `i`.
pub fn invert_part(graph: &AdjacencyGraph, part: &[i32], me: usize, nparts: usize) -> Vec<EntitySet> {
    assert_eq!(part.len(), graph.num_local(), "part[] / local vertex mismatch");
    let base = graph.vtxdist[me];
    let mut buckets: Vec<Vec<Entity>> = vec![Vec::new(); nparts];
    for (i, &p) in part.iter().enumerate() {
        buckets[p as usize].push(base + i as Entity);
    }
    buckets.into_iter().map(|b| b.into_iter().collect()).collect()
}

/// Cell partition send view: graph partition when enabled, silently
/// degrading to the naive contiguous split otherwise.
pub fn partition_cells<C: Communicator>(
    graph: &AdjacencyGraph,
    comm: &C,
    tags: ExchangeTags,
    use_graph: bool,
) -> Result<Vec<EntitySet>, MeshDistError> {
    let me = comm.rank();
    let n = comm.size();
    if use_graph {
        match graph_partition(graph, n, comm, tags) {
            Ok(part) => return Ok(invert_part(graph, &part, me, n)),
            Err(MeshDistError::PartitionerUnavailable) => {
                log::debug!("graph partitioner unavailable; using naive contiguous split");
            }
            Err(e) => return Err(e),
        }
    }
    let local = EntitySet::interval(graph.vtxdist[me], graph.vtxdist[me + 1] - 1);
    let naive = crate::partition::simple_partition(graph.vtxdist[0], graph.vtxdist[n] - 1, n);
    Ok(naive.iter().map(|p| p & &local).collect())
}

/// Gather per-rank local vertex counts into a `vtxdist` prefix vector.
pub fn vertex_distribution<C: Communicator>(
    comm: &C,
    local_count: usize,
    base: Entity,
    tag: crate::comm::communicator::CommTag,
) -> Result<Vec<Entity>, MeshDistError> {
    let counts: Vec<u64> = all_gather(comm, &(local_count as u64), tag)?;
    let mut vtxdist = Vec::with_capacity(counts.len() + 1);
    let mut at = base as i64;
    vtxdist.push(base);
    for c in counts {
        at += c as i64;
        vtxdist.push(at as Entity);
    }
    Ok(vtxdist)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::communicator::{CommTag, NoComm};

    fn path_graph(n: usize) -> AdjacencyGraph {
        // 0 - 1 - 2 - ... - (n-1)
        let mut xadj = vec![0usize];
        let mut adjncy = Vec::new();
        for i in 0..n as Entity {
            if i > 0 {
                adjncy.push(i - 1);
            }
            if (i as usize) < n - 1 {
                adjncy.push(i + 1);
            }
            xadj.push(adjncy.len());
        }
        AdjacencyGraph {
            vtxdist: vec![0, n as Entity],
            xadj,
            adjncy,
        }
    }

    #[test]
    fn naive_fallback_partitions_local_block() {
        let g = path_graph(10);
        let parts = partition_cells(&g, &NoComm, ExchangeTags::from_base(CommTag::new(1)), false)
            .unwrap();
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0], EntitySet::interval(0, 9));
    }

    #[cfg(not(feature = "metis-support"))]
    #[test]
    fn unavailable_partitioner_degrades_silently() {
        let g = path_graph(6);
        let parts =
            partition_cells(&g, &NoComm, ExchangeTags::from_base(CommTag::new(2)), true).unwrap();
        assert_eq!(parts[0].size(), 6);
    }

    #[cfg(feature = "metis-support")]
    #[test]
    fn metis_partition_covers_all_vertices() {
        let g = path_graph(8);
        let part = graph_partition(&g, 2, &NoComm, ExchangeTags::from_base(CommTag::new(3)))
            .unwrap();
        assert_eq!(part.len(), 8);
        assert!(part.iter().all(|&p| p == 0 || p == 1));
    }

    #[test]
    fn invert_part_builds_send_view() {
        let g = path_graph(4);
        let parts = invert_part(&g, &[1, 0, 1, 0], 0, 2);
        assert_eq!(parts[0], EntitySet::from_intervals([(1, 1), (3, 3)]));
        assert_eq!(parts[1], EntitySet::from_intervals([(0, 0), (2, 2)]));
    }

    #[test]
    fn vertex_distribution_serial() {
        let v = vertex_distribution(&NoComm, 5, 100, CommTag::new(4)).unwrap();
        assert_eq!(v, vec![100, 105]);
    }
}
