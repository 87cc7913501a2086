//! Message passing: the `Communicator` façade, collective exchanges built on
//! it, and the fixed wire records that travel between ranks.

pub mod collectives;
pub mod communicator;
pub mod wire;

pub use communicator::{CommTag, Communicator, ExchangeTags, LocalComm, NoComm, Wait};
#[cfg(feature = "mpi-support")]
pub use communicator::MpiComm;
