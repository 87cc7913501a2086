//! # mesh-dist
//!
//! mesh-dist is the runtime substrate of a parallel, entity-oriented
//! scientific-data framework: it stores unstructured-mesh simulation data in
//! containers over interval-compressed entity sets and moves those
//! containers between ranks. It provides the entity-set domain algebra,
//! relational Map/multiMap containers, graph and naive partitioning,
//! distributed inverse-map construction, a container redistribution
//! protocol, clone (ghost) expansion, and translation between the three
//! entity numbering spaces (per-rank local, cross-run global, stable
//! on-disk file).
//!
//! ## Execution model
//!
//! Pure SPMD: one process per rank, no threads, every operation synchronous.
//! Collective calls must be reached by all ranks or the job hangs; invariant
//! violations abort the whole job. The [`comm::Communicator`] façade has a
//! serial backend ([`comm::NoComm`]), an in-process multi-rank backend for
//! tests ([`comm::LocalComm`]), and an MPI backend behind the `mpi-support`
//! feature.
//!
//! ## Features
//! - `mpi-support`: the MPI communicator backend.
//! - `metis-support`: k-way graph partitioning via METIS; without it the
//!   partitioner reports unavailable and callers fall back to the naive
//!   contiguous split.

pub mod comm;
pub mod debug_invariants;
pub mod dist;
pub mod entity;
pub mod grid;
pub mod map;
pub mod mesh_error;
pub mod partition;

pub use debug_invariants::DebugInvariants;

/// A convenient prelude to import the most-used traits & types:
pub mod prelude {
    pub use crate::comm::collectives::{
        all_gather, all_reduce_max, all_reduce_min, all_reduce_sum, all_to_all, all_to_all_v,
        broadcast,
    };
    pub use crate::comm::communicator::{CommTag, Communicator, ExchangeTags, LocalComm, NoComm, Wait};
    #[cfg(feature = "mpi-support")]
    pub use crate::comm::communicator::MpiComm;
    pub use crate::debug_invariants::DebugInvariants;
    pub use crate::dist::expand::{expand_map, expand_multi_map};
    pub use crate::dist::inverse::distributed_inverse_map;
    pub use crate::dist::numbering::{file_to_local_order, local_to_file_order, DistNumbering};
    pub use crate::dist::redistribute::{redistribute, transpose_parts};
    pub use crate::entity::{Entity, EntitySet};
    pub use crate::grid::{color_matrix, distribute_grid, GridChunk, PartitionOptions};
    pub use crate::map::{Container, Map, MultiMap, Store};
    pub use crate::mesh_error::MeshDistError;
    pub use crate::partition::{
        simple_partition, simple_partition_vec, validate_partition, OwnerLookup,
    };
}
