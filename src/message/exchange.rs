//! The processor-patch wire contract: each exchange is one flat buffer of
//! per-face values for one field, MessagePack-encoded together with the tag
//! it was sent under. The receiver checks both the tag and the length.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::comm::{Communicator, Tag};
use crate::error::{Error, Result};

#[derive(Serialize)]
struct Outgoing<'a, T> {
    tag: Tag,
    values: &'a [T],
}

#[derive(Deserialize)]
struct Incoming<T> {
    tag: Tag,
    values: Vec<T>,
}

/// Start sending `values` to `rank`. Returns immediately.
///
pub fn send_values<T: Serialize>(comm: &dyn Communicator, rank: usize, tag: Tag, values: &[T]) -> Result<()> {
    let bytes = rmp_serde::encode::to_vec(&Outgoing { tag, values })
        .map_err(|e| Error::Transport(format!("encoding buffer for rank {}: {}", rank, e)))?;
    comm.send(rank, tag, bytes);
    Ok(())
}

/// Block until the buffer with the given tag arrives from `rank`, and decode
/// it. A buffer of the wrong length means the two sides disagree about the
/// patch they share, which is a fatal addressing error.
///
pub fn recv_values<T: DeserializeOwned>(
    comm: &dyn Communicator,
    rank: usize,
    tag: Tag,
    expected_len: usize,
) -> Result<Vec<T>> {
    let bytes = comm.recv(rank, tag)?;
    let incoming: Incoming<T> = rmp_serde::decode::from_slice(&bytes)
        .map_err(|e| Error::Transport(format!("decoding buffer from rank {}: {}", rank, e)))?;

    if incoming.tag != tag {
        return Err(Error::Transport(format!(
            "buffer from rank {} carries tag {}, expected {}",
            rank, incoming.tag, tag
        )));
    }
    if incoming.values.len() != expected_len {
        return Err(Error::Transport(format!(
            "buffer from rank {} has {} values, patch has {} faces",
            rank,
            incoming.values.len(),
            expected_len
        )));
    }
    Ok(incoming.values)
}

// ============================================================================
#[cfg(test)]
mod test {

    use super::*;
    use crate::message::{ChannelCommunicator, SerialCommunicator};
    use crate::num_vec::Vector3;

    #[test]
    fn values_cross_between_ranks() {
        let got = ChannelCommunicator::run(2, |comm| {
            let tag = comm.next_tag();
            let other = 1 - comm.rank();
            let mine = vec![Vector3::xyz(comm.rank() as f64, 0.0, 1.0); 3];
            send_values(comm.as_ref(), other, tag, &mine).unwrap();
            let theirs: Vec<Vector3> = recv_values(comm.as_ref(), other, tag, 3).unwrap();
            theirs[0][0]
        });
        assert_eq!(got, vec![1.0, 0.0]);
    }

    #[test]
    fn length_mismatch_is_an_error() {
        let comm = SerialCommunicator::new();
        let tag = comm.next_tag();
        send_values(&comm, 0, tag, &[1.0, 2.0]).unwrap();
        assert!(recv_values::<f64>(&comm, 0, tag, 3).is_err());
    }
}
