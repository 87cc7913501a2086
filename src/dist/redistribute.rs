//! The container redistribution protocol.
//!
//! Given a *send view* (`send_parts[i]` = locally held entities destined for
//! rank `i`, in current numbering) and a *receive view* (`recv_parts[p]` =
//! entities this rank will hold afterwards, per sender, in the destination
//! numbering), every container moves in one collective step: pack each
//! destination's subset in ascending entity order, exchange through a
//! size-prefixed all-to-all, unpack received buffers in ascending sender
//! rank.
//!
//! The receive view is usually the transpose of the send view
//! ([`transpose_parts`]), optionally shifted when the destination numbering
//! differs from the source numbering by a per-pair monotone renumbering
//! (file ordering does this). Within each sender/receiver pair the k-th
//! packed entity becomes the k-th received entity, which is what makes the
//! interval-by-interval concatenation well defined.
//!
//! Content is preserved byte for byte; the sender- and receiver-side entity
//! totals are computed independently and must agree, otherwise the partition
//! construction upstream is buggy and the job aborts.

use crate::comm::collectives::{all_reduce_sum, all_to_all_v};
use crate::comm::communicator::{CommTag, Communicator, ExchangeTags};
use crate::comm::wire::{decode_entity_set, encode_entity_set};
use crate::entity::EntitySet;
use crate::map::Container;
use crate::mesh_error::MeshDistError;

/// Exchange interval lists so every rank learns what it will receive:
/// `result[p]` is `send_parts_of_rank_p[me]`.
pub fn transpose_parts<C: Communicator>(
    send_parts: &[EntitySet],
    comm: &C,
    tags: ExchangeTags,
) -> Result<Vec<EntitySet>, MeshDistError> {
    let n = comm.size();
    if send_parts.len() != n {
        return Err(MeshDistError::RankCountMismatch {
            expected: n,
            got: send_parts.len(),
        });
    }
    let sends: Vec<Vec<u8>> = send_parts.iter().map(encode_entity_set).collect();
    let recvs = all_to_all_v(comm, &sends, tags)?;
    recvs.iter().map(|b| decode_entity_set(b)).collect()
}

/// Tag layout for one [`redistribute`] call: a transpose-free exchange uses
/// three sub-exchanges (entity totals, buffer sizes, buffer data).
const REDIST_SUBTAGS: u16 = 3;

/// Move container contents from the current ownership to a new one.
///
/// `send_parts[i] ∩ domain` is packed for rank `i`; the result's domain is
/// the union of `recv_parts`, filled per sender in ascending rank order.
/// See the module docs for the numbering contract between the two views.
///
/// # Panics
/// Panics when the globally summed send and receive entity counts disagree —
/// a partition-construction bug, not a transient fault.
pub fn redistribute<T, C>(
    container: &T,
    send_parts: &[EntitySet],
    recv_parts: &[EntitySet],
    comm: &C,
    base_tag: CommTag,
) -> Result<T, MeshDistError>
where
    T: Container,
    C: Communicator,
{
    let n = comm.size();
    let me = comm.rank();
    if send_parts.len() != n || recv_parts.len() != n {
        return Err(MeshDistError::RankCountMismatch {
            expected: n,
            got: send_parts.len().min(recv_parts.len()),
        });
    }

    let subs: Vec<EntitySet> = send_parts
        .iter()
        .map(|p| p & container.domain())
        .collect();

    // Independent totals; mismatch means the partition is corrupt.
    let send_total: u64 = subs.iter().map(|s| s.size() as u64).sum();
    let recv_total: u64 = recv_parts.iter().map(|s| s.size() as u64).sum();
    let global_send = all_reduce_sum(comm, send_total, base_tag)?;
    let global_recv = all_reduce_sum(comm, recv_total, base_tag.offset(1))?;
    assert!(
        global_send == global_recv,
        "redistribute: {global_send} entities packed but {global_recv} expected by receivers"
    );

    let mut sends: Vec<Vec<u8>> = Vec::with_capacity(n);
    for sub in &subs {
        let mut buf = Vec::with_capacity(container.pack_size(sub));
        container.pack(sub, &mut buf);
        sends.push(buf);
    }
    log::debug!(
        "redistribute rank {me}: sending {send_total} entities ({} bytes), receiving {recv_total}",
        sends.iter().map(Vec::len).sum::<usize>()
    );

    let recvs = all_to_all_v(comm, &sends, ExchangeTags::from_base(base_tag.offset(2)))?;

    let chunks: Vec<(EntitySet, Vec<u8>)> = recv_parts
        .iter()
        .cloned()
        .zip(recvs)
        .collect();
    Ok(T::unpack_concat(&chunks))
}

/// Number of tags one `redistribute` call consumes starting at its base tag;
/// callers running several redistributions derive bases this far apart.
pub const fn redistribute_tag_span() -> u16 {
    REDIST_SUBTAGS + 1
}
