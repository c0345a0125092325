use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use super::util;
use crate::error::{Error, Result};

/// Message tag. Tags increase monotonically on each communicator.
pub type Tag = u64;

/// Commutative binary operators for the typed reductions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReduceOp {
    Sum,
    Max,
    Min,
}

impl ReduceOp {
    fn apply(self, a: f64, b: f64) -> f64 {
        match self {
            ReduceOp::Sum => a + b,
            ReduceOp::Max => a.max(b),
            ReduceOp::Min => a.min(b),
        }
    }
}

/// Interface for a group of processes that can exchange messages over a
/// network. The underlying transport can in principle be TCP, UDP, or a
/// higher level abstraction like MPI.
///
pub trait Communicator: Send + Sync {
    /// Must be implemented to return the rank of this process within the
    /// communicator.
    fn rank(&self) -> usize;

    /// Must be implemented to return the number of peers processes in this
    /// communicator.
    fn size(&self) -> usize;

    /// Must be implemented to send a message to a peer. This method must
    /// return immediately, in other words it is not allowed to block until a
    /// matching receive is posted.
    fn send(&self, rank: usize, tag: Tag, message: Vec<u8>);

    /// Must be implemented to receive the message with the given tag from the
    /// given peer. This method is allowed to block until the message arrives.
    /// Messages with other tags that arrive in the meantime are buffered.
    /// Returns an error if a peer has aborted.
    fn recv(&self, rank: usize, tag: Tag) -> Result<Vec<u8>>;

    /// Must be implemented to return a fresh tag.
    fn next_tag(&self) -> Tag;

    /// Must be implemented to notify every peer that this rank is going
    /// down, so that peers blocked in `recv` fail instead of hanging.
    fn abort(&self, reason: &str);

    fn is_parallel(&self) -> bool {
        self.size() > 1
    }

    fn is_master(&self) -> bool {
        self.rank() == 0
    }

    /// Implements a binomial tree broadcast from the root node. The message
    /// buffer must be `Some` if this is the root node, and it must be `None`
    /// otherwise.
    ///
    fn broadcast(&self, value: Option<Vec<u8>>) -> Result<Vec<u8>> {
        let r = self.rank();
        let p = self.size();
        let tag = self.next_tag();

        let value = match value {
            Some(value) => {
                assert!(r == 0, "broadcast value supplied on non-root rank {}", r);
                value
            }
            None => {
                let parent = r - (1 << r.trailing_zeros());
                self.recv(parent, tag)?
            }
        };
        for level in (0..util::ceil_log2(p)).rev() {
            let one = 1 << level;
            let two = 1 << (level + 1);

            if r % two == 0 && r + one < p {
                self.send(r + one, tag, value.clone())
            }
        }
        Ok(value)
    }

    /// Implements a binomial tree reduce. All ranks return `None` except for
    /// the root.
    ///
    fn reduce(
        &self,
        f: &dyn Fn(Vec<u8>, Vec<u8>) -> Vec<u8>,
        mut value: Vec<u8>,
    ) -> Result<Option<Vec<u8>>> {
        let r = self.rank();
        let p = self.size();
        let tag = self.next_tag();

        for level in 0..util::ceil_log2(p) {
            let one = 1 << level;
            let two = 1 << (level + 1);

            if r % two == 0 {
                if r + one < p {
                    value = f(value, self.recv(r + one, tag)?)
                }
            } else {
                self.send(r - one, tag, value);
                return Ok(None);
            }
        }
        Ok(Some(value))
    }

    /// Implements an all-reduce (symmetric fold) operation over a commutative
    /// binary operator.
    ///
    fn all_reduce(
        &self,
        f: &dyn Fn(Vec<u8>, Vec<u8>) -> Vec<u8>,
        value: Vec<u8>,
    ) -> Result<Vec<u8>> {
        let reduced = self.reduce(f, value)?;
        self.broadcast(reduced)
    }

    /// All-reduce of a single float. This is the collective behind global
    /// sums and norms in the linear solvers, so every rank must call it the
    /// same number of times.
    ///
    fn all_reduce_f64(&self, op: ReduceOp, value: f64) -> Result<f64> {
        if !self.is_parallel() {
            return Ok(value);
        }
        let fold = move |a: Vec<u8>, b: Vec<u8>| {
            op.apply(util::f64_from_bytes(&a), util::f64_from_bytes(&b))
                .to_le_bytes()
                .to_vec()
        };
        let bytes = self.all_reduce(&fold, value.to_le_bytes().to_vec())?;
        Ok(util::f64_from_bytes(&bytes))
    }

    fn sum(&self, value: f64) -> Result<f64> {
        self.all_reduce_f64(ReduceOp::Sum, value)
    }

    fn max(&self, value: f64) -> Result<f64> {
        self.all_reduce_f64(ReduceOp::Max, value)
    }
}

/// The communicator of a serial run: one rank, messages to self are queued
/// in a local mailbox.
///
#[derive(Default)]
pub struct SerialCommunicator {
    mailbox: Mutex<HashMap<Tag, VecDeque<Vec<u8>>>>,
    tag: AtomicU64,
}

impl SerialCommunicator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Communicator for SerialCommunicator {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn send(&self, rank: usize, tag: Tag, message: Vec<u8>) {
        assert!(rank == 0, "serial communicator has no rank {}", rank);
        if let Ok(mut mailbox) = self.mailbox.lock() {
            mailbox.entry(tag).or_default().push_back(message)
        }
    }

    fn recv(&self, rank: usize, tag: Tag) -> Result<Vec<u8>> {
        assert!(rank == 0, "serial communicator has no rank {}", rank);
        self.mailbox
            .lock()
            .ok()
            .and_then(|mut mailbox| mailbox.get_mut(&tag).and_then(|q| q.pop_front()))
            .ok_or_else(|| Error::Transport(format!("no message with tag {} was sent to self", tag)))
    }

    fn next_tag(&self) -> Tag {
        self.tag.fetch_add(1, Ordering::SeqCst)
    }

    fn abort(&self, reason: &str) {
        log::error!("aborting serial run: {}", reason);
    }
}

// ============================================================================
#[cfg(test)]
mod test {

    use super::*;

    #[test]
    fn serial_reductions_are_identity() {
        let comm = SerialCommunicator::new();
        assert_eq!(comm.sum(3.5).unwrap(), 3.5);
        assert_eq!(comm.max(-1.0).unwrap(), -1.0);
    }

    #[test]
    fn serial_send_to_self_is_received() {
        let comm = SerialCommunicator::new();
        let tag = comm.next_tag();
        comm.send(0, tag, vec![1, 2, 3]);
        assert_eq!(comm.recv(0, tag).unwrap(), vec![1, 2, 3]);
        assert!(comm.recv(0, tag).is_err());
    }

    #[test]
    fn tags_increase_monotonically() {
        let comm = SerialCommunicator::new();
        let a = comm.next_tag();
        let b = comm.next_tag();
        assert!(b > a);
    }
}
