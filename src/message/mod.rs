//! This module exports a minimal message-passing API, which is encapsulated
//! by a `Communicator` trait. Implementors only need to write `send`, `recv`
//! and `abort` operations for a given transport layer (an in-process
//! transport over crossbeam channels is included, one thread per rank). The
//! trait then provides default implementations for broadcast, reduce, and
//! reduce-all operations.
//!
//! Every message carries a tag. Tags are drawn from a per-communicator
//! counter, so ranks that execute the same sequence of exchanges (SPMD
//! discipline) agree on the tag of each exchange without negotiating it.
//!

pub mod channel;
pub mod comm;
pub mod exchange;
pub mod util;

pub use channel::ChannelCommunicator;
pub use comm::{Communicator, ReduceOp, SerialCommunicator, Tag};
