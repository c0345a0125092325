use std::collections::{HashMap, VecDeque};
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex,
};
use std::thread;

use crossbeam_channel::{Receiver, Sender};
use log::{debug, error};

use super::comm::{Communicator, Tag};
use crate::error::{Error, Result};

enum Packet {
    Data {
        source: usize,
        tag: Tag,
        data: Vec<u8>,
    },
    Abort {
        source: usize,
        reason: String,
    },
}

/// A communicator whose ranks are threads of one process, connected by
/// unbounded crossbeam channels. Incoming messages that do not match the
/// (source, tag) pair currently being waited for are kept in a buffer until
/// a matching `recv` is posted, so exchanges of several fields can be in
/// flight at once without cross-talk.
///
pub struct ChannelCommunicator {
    rank: usize,
    num_peers: usize,
    peers: Vec<Sender<Packet>>,
    inbound: Receiver<Packet>,
    buffer: Mutex<HashMap<(usize, Tag), VecDeque<Vec<u8>>>>,
    tag: AtomicU64,
}

impl ChannelCommunicator {
    /// Create a fully connected group of `size` communicators, one per rank.
    ///
    pub fn world(size: usize) -> Vec<ChannelCommunicator> {
        let (sinks, sources): (Vec<_>, Vec<_>) = (0..size).map(|_| crossbeam_channel::unbounded()).unzip();

        sources
            .into_iter()
            .enumerate()
            .map(|(rank, inbound)| ChannelCommunicator {
                rank,
                num_peers: size,
                peers: sinks.clone(),
                inbound,
                buffer: Mutex::new(HashMap::new()),
                tag: AtomicU64::new(0),
            })
            .collect()
    }

    /// Run `f` on `size` ranks, each on its own thread, and return the
    /// per-rank results in rank order. If a rank panics, its peers are sent
    /// an abort notice so they fail rather than block forever, and the panic
    /// is propagated.
    ///
    pub fn run<F, R>(size: usize, f: F) -> Vec<R>
    where
        F: Fn(Arc<dyn Communicator>) -> R + Sync,
        R: Send,
    {
        let comms: Vec<Arc<ChannelCommunicator>> = Self::world(size).into_iter().map(Arc::new).collect();
        let f = &f;

        thread::scope(|scope| {
            let handles: Vec<_> = comms
                .into_iter()
                .map(|comm| {
                    scope.spawn(move || {
                        let _guard = AbortOnPanic(Arc::clone(&comm));
                        f(comm)
                    })
                })
                .collect();

            handles
                .into_iter()
                .map(|h| match h.join() {
                    Ok(r) => r,
                    Err(panic) => std::panic::resume_unwind(panic),
                })
                .collect()
        })
    }

    fn take_buffered(&self, rank: usize, tag: Tag) -> Option<Vec<u8>> {
        let mut buffer = self.buffer.lock().ok()?;
        let queue = buffer.get_mut(&(rank, tag))?;
        let message = queue.pop_front();
        if queue.is_empty() {
            buffer.remove(&(rank, tag));
        }
        message
    }
}

struct AbortOnPanic(Arc<ChannelCommunicator>);

impl Drop for AbortOnPanic {
    fn drop(&mut self) {
        if thread::panicking() {
            self.0.abort("rank panicked")
        }
    }
}

impl Communicator for ChannelCommunicator {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.num_peers
    }

    fn send(&self, rank: usize, tag: Tag, message: Vec<u8>) {
        let packet = Packet::Data {
            source: self.rank,
            tag,
            data: message,
        };
        if self.peers[rank].send(packet).is_err() {
            error!("[{}] rank {} has hung up; dropping message {}", self.rank, rank, tag)
        }
    }

    fn recv(&self, rank: usize, tag: Tag) -> Result<Vec<u8>> {
        if let Some(message) = self.take_buffered(rank, tag) {
            return Ok(message);
        }
        loop {
            match self.inbound.recv() {
                Ok(Packet::Data { source, tag: t, data }) => {
                    if source == rank && t == tag {
                        return Ok(data);
                    }
                    debug!(
                        "[{}] message ({}, {}) arrived while waiting for ({}, {}), buffering",
                        self.rank, source, t, rank, tag
                    );
                    if let Ok(mut buffer) = self.buffer.lock() {
                        buffer.entry((source, t)).or_default().push_back(data)
                    }
                }
                Ok(Packet::Abort { source, reason }) => {
                    return Err(Error::Transport(format!("rank {} aborted: {}", source, reason)))
                }
                Err(_) => return Err(Error::Transport("all peers have disconnected".to_string())),
            }
        }
    }

    fn next_tag(&self) -> Tag {
        self.tag.fetch_add(1, Ordering::SeqCst)
    }

    fn abort(&self, reason: &str) {
        error!("[{}] aborting: {}", self.rank, reason);
        for (rank, peer) in self.peers.iter().enumerate() {
            if rank != self.rank {
                let _ = peer.send(Packet::Abort {
                    source: self.rank,
                    reason: reason.to_string(),
                });
            }
        }
    }
}

// ============================================================================
#[cfg(test)]
mod test {

    use super::*;
    use crate::message::comm::ReduceOp;

    #[test]
    fn ring_messages_are_delivered() {
        let received = ChannelCommunicator::run(4, |comm| {
            let tag = comm.next_tag();
            let dest = (comm.rank() + 1) % comm.size();
            let source = (comm.rank() + comm.size() - 1) % comm.size();
            comm.send(dest, tag, vec![comm.rank() as u8]);
            comm.recv(source, tag).unwrap()[0] as usize
        });
        assert_eq!(received, vec![3, 0, 1, 2]);
    }

    #[test]
    fn out_of_order_tags_are_buffered() {
        let received = ChannelCommunicator::run(2, |comm| {
            let first = comm.next_tag();
            let second = comm.next_tag();
            let other = 1 - comm.rank();
            comm.send(other, second, vec![2]);
            comm.send(other, first, vec![1]);
            let a = comm.recv(other, first).unwrap();
            let b = comm.recv(other, second).unwrap();
            (a[0], b[0])
        });
        assert_eq!(received, vec![(1, 2), (1, 2)]);
    }

    #[test]
    fn all_reduce_agrees_on_every_rank() {
        for size in 1..7 {
            let sums = ChannelCommunicator::run(size, |comm| comm.sum(comm.rank() as f64 + 1.0).unwrap());
            let expected = (size * (size + 1) / 2) as f64;
            assert!(sums.iter().all(|s| *s == expected));

            let maxes = ChannelCommunicator::run(size, |comm| {
                comm.all_reduce_f64(ReduceOp::Max, comm.rank() as f64).unwrap()
            });
            assert!(maxes.iter().all(|m| *m == (size - 1) as f64));
        }
    }

    #[test]
    fn broadcast_reaches_every_rank() {
        let values = ChannelCommunicator::run(5, |comm| {
            let value = if comm.is_master() { Some(vec![42]) } else { None };
            comm.broadcast(value).unwrap()
        });
        assert!(values.iter().all(|v| v == &vec![42]));
    }

    #[test]
    fn abort_unblocks_waiting_peers() {
        let results = ChannelCommunicator::run(2, |comm| {
            if comm.rank() == 0 {
                comm.abort("test");
                true
            } else {
                let tag = comm.next_tag();
                comm.recv(0, tag).is_err()
            }
        });
        assert_eq!(results, vec![true, true]);
    }
}
