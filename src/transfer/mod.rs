//! Retrieve side of a transfer: block production under backpressure and the
//! runner reconciling the local outcome with the peer

mod backpressure;
mod file;
mod runner;

pub use backpressure::{to_data_block, write_when_possible};
pub use file::{DEFAULT_BLOCK_SIZE, LocalFile};
pub use runner::TransferRunner;
