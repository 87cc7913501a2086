//! Collective exchanges built on the point-to-point [`Communicator`] façade.
//!
//! Every function here is collective: all ranks must call it with matching
//! tags or the job hangs, which is treated as a deployment problem rather
//! than a runtime-handled condition. The implementation pattern follows the
//! completion paths of the rest of the crate: post every receive, post every
//! send, then drain all handles before returning so no buffer is left in
//! flight.
//!
//! Variable-size exchanges ([`all_to_all_v`]) run a count pass first so
//! receivers can preallocate exact buffers; no growable containers are needed
//! on the receive side.

use crate::comm::communicator::{CommTag, Communicator, ExchangeTags, Wait};
use crate::comm::wire::{cast_slice, decode_records};
use crate::mesh_error::MeshDistError;
use bytemuck::{Pod, Zeroable};

fn comm_err(neighbor: usize, what: &str) -> MeshDistError {
    MeshDistError::CommError {
        neighbor,
        detail: what.to_string(),
    }
}

/// Gather one `T` from every rank; result indexed by rank.
pub fn all_gather<T: Pod, C: Communicator>(
    comm: &C,
    item: &T,
    tag: CommTag,
) -> Result<Vec<T>, MeshDistError> {
    let n = comm.size();
    let me = comm.rank();
    let bytes = std::mem::size_of::<T>();

    let mut pending = Vec::with_capacity(n.saturating_sub(1));
    for peer in (0..n).filter(|&p| p != me) {
        let mut slot = vec![0u8; bytes];
        let h = comm.irecv(peer, tag.as_u16(), &mut slot);
        pending.push((peer, h));
    }
    let mut sends = Vec::with_capacity(n.saturating_sub(1));
    for peer in (0..n).filter(|&p| p != me) {
        sends.push(comm.isend(peer, tag.as_u16(), cast_slice(std::slice::from_ref(item))));
    }

    let mut out = vec![T::zeroed(); n];
    out[me] = *item;
    let mut maybe_err = None;
    for (peer, h) in pending {
        match h.wait() {
            Some(data) if data.len() == bytes => {
                if maybe_err.is_none() {
                    out[peer] = decode_records::<T>(&data)?[0];
                }
            }
            Some(data) => {
                if maybe_err.is_none() {
                    maybe_err = Some(MeshDistError::BufferSizeMismatch {
                        neighbor: peer,
                        expected: bytes,
                        got: data.len(),
                    });
                }
            }
            None => {
                if maybe_err.is_none() {
                    maybe_err = Some(comm_err(peer, "no data in all_gather"));
                }
            }
        }
    }
    for s in sends {
        let _ = s.wait();
    }
    match maybe_err {
        Some(e) => Err(e),
        None => Ok(out),
    }
}

/// Uniform all-to-all: rank `r` receives `send[r*k..(r+1)*k]` from every
/// peer; `send.len()` must be `size * k`.
pub fn all_to_all<T: Pod, C: Communicator>(
    comm: &C,
    send: &[T],
    tag: CommTag,
) -> Result<Vec<T>, MeshDistError> {
    let n = comm.size();
    let me = comm.rank();
    assert!(
        send.len() % n == 0,
        "all_to_all: {} items do not split over {} ranks",
        send.len(),
        n
    );
    let k = send.len() / n;
    let bytes = k * std::mem::size_of::<T>();

    let mut pending = Vec::with_capacity(n.saturating_sub(1));
    for peer in (0..n).filter(|&p| p != me) {
        let mut slot = vec![0u8; bytes];
        let h = comm.irecv(peer, tag.as_u16(), &mut slot);
        pending.push((peer, h));
    }
    let mut sends = Vec::with_capacity(n.saturating_sub(1));
    for peer in (0..n).filter(|&p| p != me) {
        sends.push(comm.isend(peer, tag.as_u16(), cast_slice(&send[peer * k..(peer + 1) * k])));
    }

    let mut out = vec![T::zeroed(); n * k];
    out[me * k..(me + 1) * k].copy_from_slice(&send[me * k..(me + 1) * k]);
    let mut maybe_err = None;
    for (peer, h) in pending {
        match h.wait() {
            Some(data) if data.len() == bytes => {
                if maybe_err.is_none() {
                    out[peer * k..(peer + 1) * k].copy_from_slice(&decode_records::<T>(&data)?);
                }
            }
            Some(data) => {
                if maybe_err.is_none() {
                    maybe_err = Some(MeshDistError::BufferSizeMismatch {
                        neighbor: peer,
                        expected: bytes,
                        got: data.len(),
                    });
                }
            }
            None => {
                if maybe_err.is_none() {
                    maybe_err = Some(comm_err(peer, "no data in all_to_all"));
                }
            }
        }
    }
    for s in sends {
        let _ = s.wait();
    }
    match maybe_err {
        Some(e) => Err(e),
        None => Ok(out),
    }
}

/// Variable-size all-to-all. `sends[i]` goes to rank `i`; the result holds
/// one buffer per sender rank. A count pass sizes the receive buffers first.
pub fn all_to_all_v<C: Communicator>(
    comm: &C,
    sends: &[Vec<u8>],
    tags: ExchangeTags,
) -> Result<Vec<Vec<u8>>, MeshDistError> {
    let n = comm.size();
    let me = comm.rank();
    if sends.len() != n {
        return Err(MeshDistError::RankCountMismatch {
            expected: n,
            got: sends.len(),
        });
    }

    // Count pass: exact receive sizes.
    let send_sizes: Vec<u64> = sends.iter().map(|b| b.len() as u64).collect();
    let recv_sizes = all_to_all::<u64, C>(comm, &send_sizes, tags.sizes)?;
    log::trace!(
        "all_to_all_v rank {me}: send {:?} recv {:?}",
        send_sizes,
        recv_sizes
    );

    // Data pass; zero-size pairs are skipped on both sides.
    let mut pending = Vec::new();
    for peer in (0..n).filter(|&p| p != me) {
        let len = recv_sizes[peer] as usize;
        if len == 0 {
            continue;
        }
        let mut slot = vec![0u8; len];
        let h = comm.irecv(peer, tags.data.as_u16(), &mut slot);
        pending.push((peer, h));
    }
    let mut send_handles = Vec::new();
    for peer in (0..n).filter(|&p| p != me) {
        if sends[peer].is_empty() {
            continue;
        }
        send_handles.push(comm.isend(peer, tags.data.as_u16(), &sends[peer]));
    }

    let mut out: Vec<Vec<u8>> = (0..n).map(|_| Vec::new()).collect();
    out[me] = sends[me].clone();
    let mut maybe_err = None;
    for (peer, h) in pending {
        let expected = recv_sizes[peer] as usize;
        match h.wait() {
            Some(data) if data.len() == expected => {
                if maybe_err.is_none() {
                    out[peer] = data;
                }
            }
            Some(data) => {
                if maybe_err.is_none() {
                    maybe_err = Some(MeshDistError::BufferSizeMismatch {
                        neighbor: peer,
                        expected,
                        got: data.len(),
                    });
                }
            }
            None => {
                if maybe_err.is_none() {
                    maybe_err = Some(comm_err(peer, "no data in all_to_all_v"));
                }
            }
        }
    }
    for s in send_handles {
        let _ = s.wait();
    }
    match maybe_err {
        Some(e) => Err(e),
        None => Ok(out),
    }
}

/// Typed wrapper over [`all_to_all_v`] for `Pod` record streams.
pub fn all_to_all_v_records<T: Pod, C: Communicator>(
    comm: &C,
    sends: &[Vec<T>],
    tags: ExchangeTags,
) -> Result<Vec<Vec<T>>, MeshDistError> {
    let byte_sends: Vec<Vec<u8>> = sends.iter().map(|v| cast_slice(v).to_vec()).collect();
    let byte_recvs = all_to_all_v(comm, &byte_sends, tags)?;
    byte_recvs.iter().map(|b| decode_records::<T>(b)).collect()
}

/// Sum of `value` over all ranks.
pub fn all_reduce_sum<T, C>(comm: &C, value: T, tag: CommTag) -> Result<T, MeshDistError>
where
    T: Pod + num_traits::Zero + std::ops::Add<Output = T>,
    C: Communicator,
{
    Ok(all_gather(comm, &value, tag)?
        .into_iter()
        .fold(T::zero(), |a, b| a + b))
}

/// Minimum of `value` over all ranks.
pub fn all_reduce_min<T, C>(comm: &C, value: T, tag: CommTag) -> Result<T, MeshDistError>
where
    T: Pod + Ord,
    C: Communicator,
{
    Ok(all_gather(comm, &value, tag)?.into_iter().min().unwrap())
}

/// Maximum of `value` over all ranks.
pub fn all_reduce_max<T, C>(comm: &C, value: T, tag: CommTag) -> Result<T, MeshDistError>
where
    T: Pod + Ord,
    C: Communicator,
{
    Ok(all_gather(comm, &value, tag)?.into_iter().max().unwrap())
}

/// Broadcast `value` from `root` to every rank.
pub fn broadcast<T: Pod, C: Communicator>(
    comm: &C,
    root: usize,
    value: &mut T,
    tag: CommTag,
) -> Result<(), MeshDistError> {
    let n = comm.size();
    let me = comm.rank();
    if me == root {
        let mut sends = Vec::with_capacity(n.saturating_sub(1));
        for peer in (0..n).filter(|&p| p != root) {
            sends.push(comm.isend(peer, tag.as_u16(), cast_slice(std::slice::from_ref(value))));
        }
        for s in sends {
            let _ = s.wait();
        }
    } else {
        let bytes = std::mem::size_of::<T>();
        let mut slot = vec![0u8; bytes];
        let h = comm.irecv(root, tag.as_u16(), &mut slot);
        match h.wait() {
            Some(data) if data.len() == bytes => {
                *value = decode_records::<T>(&data)?[0];
            }
            Some(data) => {
                return Err(MeshDistError::BufferSizeMismatch {
                    neighbor: root,
                    expected: bytes,
                    got: data.len(),
                });
            }
            None => return Err(comm_err(root, "no data in broadcast")),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::communicator::{LocalComm, NoComm};

    fn on_universe<F>(n: usize, f: F) -> Vec<std::thread::JoinHandle<()>>
    where
        F: Fn(LocalComm) + Send + Sync + Clone + 'static,
    {
        LocalComm::universe(n)
            .into_iter()
            .map(|comm| {
                let f = f.clone();
                std::thread::spawn(move || f(comm))
            })
            .collect()
    }

    #[test]
    fn all_gather_serial() {
        let v = all_gather(&NoComm, &41u64, CommTag::new(1)).unwrap();
        assert_eq!(v, vec![41]);
    }

    #[test]
    fn all_gather_three_ranks() {
        let handles = on_universe(3, |comm| {
            let mine = comm.rank() as u64 * 10;
            let v = all_gather(&comm, &mine, CommTag::new(2)).unwrap();
            assert_eq!(v, vec![0, 10, 20]);
        });
        for h in handles {
            h.join().unwrap();
        }
    }

    #[test]
    fn all_to_all_v_asymmetric() {
        let handles = on_universe(2, |comm| {
            let me = comm.rank();
            let sends = if me == 0 {
                vec![vec![], vec![1u8, 2, 3]]
            } else {
                vec![vec![9u8], vec![]]
            };
            let recv = all_to_all_v(&comm, &sends, ExchangeTags::from_base(CommTag::new(4))).unwrap();
            if me == 0 {
                assert_eq!(recv[1], vec![9]);
            } else {
                assert_eq!(recv[0], vec![1, 2, 3]);
            }
        });
        for h in handles {
            h.join().unwrap();
        }
    }

    #[test]
    fn reduce_and_broadcast() {
        let handles = on_universe(4, |comm| {
            let me = comm.rank() as i32;
            assert_eq!(all_reduce_sum(&comm, me, CommTag::new(8)).unwrap(), 6);
            assert_eq!(all_reduce_min(&comm, me, CommTag::new(9)).unwrap(), 0);
            assert_eq!(all_reduce_max(&comm, me, CommTag::new(10)).unwrap(), 3);
            let mut v = if comm.rank() == 2 { 77i32 } else { 0 };
            broadcast(&comm, 2, &mut v, CommTag::new(11)).unwrap();
            assert_eq!(v, 77);
        });
        for h in handles {
            h.join().unwrap();
        }
    }
}
