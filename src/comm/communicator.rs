//! Thin façade over in-process or inter-process (MPI) message passing.
//!
//! Messages are contiguous byte slices. All handles are waitable but
//! non-blocking — the collectives in [`crate::comm::collectives`] call
//! `.wait()` before they trust that data has arrived. The backends:
//!
//! - [`NoComm`]: single-rank no-op for serial runs and unit tests.
//! - [`LocalComm`]: multi-rank inside one OS process via a shared mailbox,
//!   one thread per simulated rank; used by the integration tests.
//! - [`MpiComm`] (feature `mpi-support`): one OS process per rank.
//!
//! Matching is FIFO per `(source, destination, tag)` triple, the same
//! guarantee MPI gives, so sequential exchanges may reuse a tag while two
//! *concurrent* exchanges between the same pair must not.

use bytes::Bytes;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::JoinHandle;

/// Message tag. Operations that run several exchanges derive sub-tags via
/// [`CommTag::offset`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct CommTag(u16);

impl CommTag {
    #[inline]
    pub const fn new(tag: u16) -> Self {
        CommTag(tag)
    }
    #[inline]
    pub const fn as_u16(self) -> u16 {
        self.0
    }
    #[inline]
    pub const fn offset(self, d: u16) -> Self {
        CommTag(self.0.wrapping_add(d))
    }
}

/// Tag pair for a size-then-data exchange.
#[derive(Copy, Clone, Debug)]
pub struct ExchangeTags {
    pub sizes: CommTag,
    pub data: CommTag,
}

impl ExchangeTags {
    pub const fn from_base(base: CommTag) -> Self {
        ExchangeTags {
            sizes: base,
            data: base.offset(1),
        }
    }
}

/// Non-blocking communication interface (minimal by design).
pub trait Communicator: Send + Sync {
    /// Handle returned by `isend`.
    type SendHandle: Wait;
    /// Handle returned by `irecv`.
    type RecvHandle: Wait;

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle;
    fn irecv(&self, peer: usize, tag: u16, buf: &mut [u8]) -> Self::RecvHandle;

    /// This process's rank in `0..size()`.
    fn rank(&self) -> usize;
    /// Number of participating processes.
    fn size(&self) -> usize;
}

/// Anything that can be waited on.
pub trait Wait {
    /// Wait for completion and return the received data (if any).
    fn wait(self) -> Option<Vec<u8>>;
}

impl Wait for () {
    fn wait(self) -> Option<Vec<u8>> {
        None
    }
}

/// Compile-time no-op comm for pure serial runs.
#[derive(Clone, Debug, Default)]
pub struct NoComm;

impl Communicator for NoComm {
    type SendHandle = ();
    type RecvHandle = ();

    fn isend(&self, _peer: usize, _tag: u16, _buf: &[u8]) {}
    fn irecv(&self, _peer: usize, _tag: u16, _buf: &mut [u8]) {}
    fn rank(&self) -> usize {
        0
    }
    fn size(&self) -> usize {
        1
    }
}

// --- LocalComm: multi-rank within one process ------------------------------

type MailKey = (usize, usize, u16); // (src, dst, tag)
type Mailbox = DashMap<MailKey, VecDeque<Bytes>>;

/// One rank of an in-process universe sharing a mailbox.
///
/// Each message queue is FIFO per `(src, dst, tag)`, so back-to-back
/// exchanges that reuse a tag cannot clobber each other even when ranks run
/// ahead of their peers.
#[derive(Clone)]
pub struct LocalComm {
    rank: usize,
    nranks: usize,
    mailbox: Arc<Mailbox>,
}

impl LocalComm {
    /// Create an `n`-rank universe; element `r` of the result is rank `r`.
    pub fn universe(n: usize) -> Vec<LocalComm> {
        assert!(n > 0, "universe needs at least one rank");
        let mailbox = Arc::new(Mailbox::new());
        (0..n)
            .map(|rank| LocalComm {
                rank,
                nranks: n,
                mailbox: Arc::clone(&mailbox),
            })
            .collect()
    }
}

pub struct LocalHandle {
    slot: Arc<parking_lot::Mutex<Option<Vec<u8>>>>,
    thread: Option<JoinHandle<()>>,
}

impl Wait for LocalHandle {
    fn wait(mut self) -> Option<Vec<u8>> {
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
        let mut guard = self.slot.lock();
        guard.take()
    }
}

impl Communicator for LocalComm {
    type SendHandle = ();
    type RecvHandle = LocalHandle;

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) {
        let key = (self.rank, peer, tag);
        self.mailbox
            .entry(key)
            .or_default()
            .push_back(Bytes::copy_from_slice(buf));
    }

    fn irecv(&self, peer: usize, tag: u16, _buf: &mut [u8]) -> LocalHandle {
        let key = (peer, self.rank, tag);
        let slot = Arc::new(parking_lot::Mutex::new(None));
        let slot_clone = Arc::clone(&slot);
        let mailbox = Arc::clone(&self.mailbox);
        let thread = std::thread::spawn(move || {
            loop {
                let msg = mailbox.get_mut(&key).and_then(|mut q| q.pop_front());
                if let Some(bytes) = msg {
                    *slot_clone.lock() = Some(bytes.to_vec());
                    break;
                }
                std::thread::yield_now();
            }
        });
        LocalHandle {
            slot,
            thread: Some(thread),
        }
    }

    fn rank(&self) -> usize {
        self.rank
    }
    fn size(&self) -> usize {
        self.nranks
    }
}

// --- MPI backend (feature = "mpi-support") ---------------------------------

#[cfg(feature = "mpi-support")]
mod mpi_backend {
    use super::{Communicator, Wait};
    use mpi::request::StaticScope;
    use mpi::topology::SimpleCommunicator;
    use mpi::traits::*;

    /// One MPI rank. Construct once at program start.
    pub struct MpiComm {
        // Kept alive for MPI_Finalize at drop; the handle itself is only
        // touched from this rank's single thread.
        _universe: mpi::environment::Universe,
        world: SimpleCommunicator,
        rank: usize,
        nranks: usize,
    }

    // SPMD use is single-threaded per rank; the raw MPI handle is never
    // shared across threads.
    unsafe impl Send for MpiComm {}
    unsafe impl Sync for MpiComm {}

    impl MpiComm {
        /// Initialize MPI and wrap the world communicator.
        ///
        /// # Panics
        /// Panics if MPI was already initialized.
        pub fn new() -> Self {
            let universe = mpi::initialize().expect("MPI initialization failed");
            let world = universe.world();
            let rank = world.rank() as usize;
            let nranks = world.size() as usize;
            MpiComm {
                _universe: universe,
                world,
                rank,
                nranks,
            }
        }
    }

    pub struct MpiHandle {
        req: Option<mpi::request::Request<'static, [u8], StaticScope>>,
        buf: *mut [u8],
        deliver: bool,
    }

    unsafe impl Send for MpiHandle {}

    impl Wait for MpiHandle {
        fn wait(mut self) -> Option<Vec<u8>> {
            if let Some(req) = self.req.take() {
                req.wait();
            }
            // Reclaim the buffer leaked at post time.
            let boxed = unsafe { Box::from_raw(self.buf) };
            if self.deliver {
                Some(boxed.into_vec())
            } else {
                None
            }
        }
    }

    impl Communicator for MpiComm {
        type SendHandle = MpiHandle;
        type RecvHandle = MpiHandle;

        fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> MpiHandle {
            // The request must outlive this call, so the staging buffer is
            // leaked here and reclaimed in `wait`.
            let ptr = Box::into_raw(buf.to_vec().into_boxed_slice());
            let leaked: &'static [u8] = unsafe { &*ptr };
            let req = self
                .world
                .process_at_rank(peer as i32)
                .immediate_send_with_tag(StaticScope, leaked, tag as i32);
            MpiHandle {
                req: Some(req),
                buf: ptr,
                deliver: false,
            }
        }

        fn irecv(&self, peer: usize, tag: u16, buf: &mut [u8]) -> MpiHandle {
            let ptr = Box::into_raw(vec![0u8; buf.len()].into_boxed_slice());
            let leaked: &'static mut [u8] = unsafe { &mut *ptr };
            let req = self
                .world
                .process_at_rank(peer as i32)
                .immediate_receive_into_with_tag(StaticScope, leaked, tag as i32);
            MpiHandle {
                req: Some(req),
                buf: ptr,
                deliver: true,
            }
        }

        fn rank(&self) -> usize {
            self.rank
        }
        fn size(&self) -> usize {
            self.nranks
        }
    }
}

#[cfg(feature = "mpi-support")]
pub use mpi_backend::MpiComm;
