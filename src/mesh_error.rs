//! `MeshDistError`: unified error type for mesh-dist public APIs.
//!
//! Only the explicitly recoverable paths report through this enum:
//! communication delivery failures, partitioner unavailability, and
//! malformed wire input. Invariant violations (domain mismatches, count
//! mismatches after redistribution, inverse-map targets outside the declared
//! image) abort the whole job via `panic!`, because a single corrupted rank
//! cannot safely continue in an SPMD program.

use thiserror::Error;

/// Unified error type for mesh-dist operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MeshDistError {
    /// A point-to-point exchange with a neighbor rank failed.
    #[error("communication with rank {neighbor} failed: {detail}")]
    CommError { neighbor: usize, detail: String },
    /// A received buffer did not have the negotiated size.
    #[error("buffer from rank {neighbor}: expected {expected} bytes, got {got}")]
    BufferSizeMismatch {
        neighbor: usize,
        expected: usize,
        got: usize,
    },
    /// The external graph partitioner is disabled or not compiled in.
    #[error("graph partitioner unavailable (built without `metis-support`)")]
    PartitionerUnavailable,
    /// The external graph partitioner reported a failure.
    #[error("graph partitioner failed: {0}")]
    PartitionerFailed(String),
    /// Two ranks claim ownership of the same entities.
    #[error("partition overlap: ranks {0} and {1} both own {2}")]
    PartitionOverlap(usize, usize, String),
    /// The partition does not cover the declared universe.
    #[error("partition does not cover universe; missing {0}")]
    PartitionCoverage(String),
    /// An entity-set or record stream on the wire failed to decode.
    #[error("malformed wire data: {0}")]
    MalformedWire(String),
    /// A per-rank argument vector does not match the communicator size.
    #[error("rank count mismatch: expected {expected} per-rank entries, got {got}")]
    RankCountMismatch { expected: usize, got: usize },
    /// An interval with `lo > hi` was supplied where a non-empty one is required.
    #[error("invalid interval [{lo},{hi}]")]
    InvalidInterval { lo: i32, hi: i32 },
}
