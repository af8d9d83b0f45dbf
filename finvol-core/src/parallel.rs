//! Inter-subdomain communication.
//!
//! Every mesh carries a [`Communicator`]. Serial runs use [`SerialComm`]; decomposed runs
//! use one [`ThreadComm`] per subdomain thread, connected pairwise by crossbeam channels.
//!
//! Two kinds of traffic are carried on separate channels:
//!
//! - halo data for processor patches (`send` / `recv`), exchanged once per matrix-vector
//!   product and once per boundary-condition evaluation,
//! - global reductions (`sum`, `max`, `min`, `all`) used by solver convergence checks.
//!
//! Reductions gather every rank's contribution and combine them in rank order, so all ranks
//! see bit-identical results and take identical convergence decisions.

use crate::error::{Error, Result};
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::fmt;

/// Communication interface between the subdomains of a decomposed case.
pub trait Communicator: Send + Sync + fmt::Debug {
    /// Rank of this subdomain (0-based).
    fn rank(&self) -> usize;

    /// Number of subdomains.
    fn n_ranks(&self) -> usize;

    /// Rank 0 is the master.
    fn is_master(&self) -> bool {
        self.rank() == 0
    }

    /// True when more than one subdomain takes part.
    fn is_parallel(&self) -> bool {
        self.n_ranks() > 1
    }

    /// Send halo data to another rank. Never blocks.
    fn send(&self, to: usize, data: Vec<f64>) -> Result<()>;

    /// Receive halo data from another rank, blocking until it arrives.
    fn recv(&self, from: usize) -> Result<Vec<f64>>;

    /// Gather one value from every rank, ordered by rank.
    fn all_gather(&self, value: f64) -> Result<Vec<f64>>;

    /// Global sum.
    fn sum(&self, value: f64) -> Result<f64> {
        Ok(self.all_gather(value)?.iter().sum())
    }

    /// Global maximum.
    fn max(&self, value: f64) -> Result<f64> {
        Ok(self
            .all_gather(value)?
            .into_iter()
            .fold(f64::NEG_INFINITY, f64::max))
    }

    /// Global minimum.
    fn min(&self, value: f64) -> Result<f64> {
        Ok(self.all_gather(value)?.into_iter().fold(f64::INFINITY, f64::min))
    }

    /// Logical AND over all ranks.
    fn all(&self, value: bool) -> Result<bool> {
        let flags = self.all_gather(if value { 1.0 } else { 0.0 })?;
        Ok(flags.iter().all(|&f| f > 0.5))
    }
}

/// Communicator for an undecomposed run.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialComm;

impl SerialComm {
    pub fn new() -> Self {
        Self
    }
}

impl Communicator for SerialComm {
    fn rank(&self) -> usize {
        0
    }

    fn n_ranks(&self) -> usize {
        1
    }

    fn send(&self, to: usize, _data: Vec<f64>) -> Result<()> {
        Err(Error::Communication(format!(
            "cannot send to rank {} from a serial run",
            to
        )))
    }

    fn recv(&self, from: usize) -> Result<Vec<f64>> {
        Err(Error::Communication(format!(
            "cannot receive from rank {} in a serial run",
            from
        )))
    }

    fn all_gather(&self, value: f64) -> Result<Vec<f64>> {
        Ok(vec![value])
    }
}

/// Channel-backed communicator for subdomains running on threads of one process.
pub struct ThreadComm {
    rank: usize,
    n_ranks: usize,
    /// Halo senders indexed by destination rank.
    halo_tx: Vec<Option<Sender<Vec<f64>>>>,
    /// Halo receivers indexed by source rank.
    halo_rx: Vec<Option<Receiver<Vec<f64>>>>,
    /// Reduction senders indexed by destination rank.
    reduce_tx: Vec<Option<Sender<f64>>>,
    /// Reduction receivers indexed by source rank.
    reduce_rx: Vec<Option<Receiver<f64>>>,
}

impl ThreadComm {
    /// Create `n_ranks` fully connected communicators, one per subdomain.
    pub fn universe(n_ranks: usize) -> Vec<ThreadComm> {
        let mut comms: Vec<ThreadComm> = (0..n_ranks)
            .map(|rank| ThreadComm {
                rank,
                n_ranks,
                halo_tx: (0..n_ranks).map(|_| None).collect(),
                halo_rx: (0..n_ranks).map(|_| None).collect(),
                reduce_tx: (0..n_ranks).map(|_| None).collect(),
                reduce_rx: (0..n_ranks).map(|_| None).collect(),
            })
            .collect();

        for from in 0..n_ranks {
            for to in 0..n_ranks {
                if from == to {
                    continue;
                }
                let (tx, rx) = unbounded();
                comms[from].halo_tx[to] = Some(tx);
                comms[to].halo_rx[from] = Some(rx);

                let (tx, rx) = unbounded();
                comms[from].reduce_tx[to] = Some(tx);
                comms[to].reduce_rx[from] = Some(rx);
            }
        }

        comms
    }

    fn peer_check(&self, peer: usize) -> Result<()> {
        if peer >= self.n_ranks || peer == self.rank {
            return Err(Error::Communication(format!(
                "rank {} has no channel to rank {} ({} ranks)",
                self.rank, peer, self.n_ranks
            )));
        }
        Ok(())
    }
}

impl fmt::Debug for ThreadComm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadComm")
            .field("rank", &self.rank)
            .field("n_ranks", &self.n_ranks)
            .finish()
    }
}

impl Communicator for ThreadComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn n_ranks(&self) -> usize {
        self.n_ranks
    }

    fn send(&self, to: usize, data: Vec<f64>) -> Result<()> {
        self.peer_check(to)?;
        let tx = self.halo_tx[to].as_ref().ok_or_else(|| {
            Error::Communication(format!("missing halo channel {} -> {}", self.rank, to))
        })?;
        tx.send(data).map_err(|_| {
            Error::Communication(format!("rank {} disconnected from rank {}", to, self.rank))
        })
    }

    fn recv(&self, from: usize) -> Result<Vec<f64>> {
        self.peer_check(from)?;
        let rx = self.halo_rx[from].as_ref().ok_or_else(|| {
            Error::Communication(format!("missing halo channel {} -> {}", from, self.rank))
        })?;
        rx.recv().map_err(|_| {
            Error::Communication(format!("rank {} disconnected from rank {}", from, self.rank))
        })
    }

    fn all_gather(&self, value: f64) -> Result<Vec<f64>> {
        for (to, tx) in self.reduce_tx.iter().enumerate() {
            if let Some(tx) = tx {
                tx.send(value).map_err(|_| {
                    Error::Communication(format!(
                        "rank {} left before a reduction on rank {}",
                        to, self.rank
                    ))
                })?;
            }
        }

        let mut gathered = Vec::with_capacity(self.n_ranks);
        for (from, rx) in self.reduce_rx.iter().enumerate() {
            match rx {
                Some(rx) => gathered.push(rx.recv().map_err(|_| {
                    Error::Communication(format!(
                        "rank {} left before a reduction on rank {}",
                        from, self.rank
                    ))
                })?),
                None => gathered.push(value),
            }
        }
        Ok(gathered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_serial_reductions() {
        let comm = SerialComm::new();
        assert!(comm.is_master());
        assert!(!comm.is_parallel());
        assert_relative_eq!(comm.sum(2.5).unwrap(), 2.5);
        assert!(comm.all(true).unwrap());
        assert!(comm.send(1, vec![1.0]).is_err());
        assert!(comm.recv(1).is_err());
    }

    #[test]
    fn test_thread_comm_reductions_agree() {
        let comms = ThreadComm::universe(3);
        let results: Vec<(f64, f64, f64, bool)> = std::thread::scope(|s| {
            let handles: Vec<_> = comms
                .into_iter()
                .map(|comm| {
                    s.spawn(move || {
                        let v = (comm.rank() + 1) as f64 * 0.1;
                        (
                            comm.sum(v).unwrap(),
                            comm.max(v).unwrap(),
                            comm.min(v).unwrap(),
                            comm.all(comm.rank() != 1).unwrap(),
                        )
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        for r in &results {
            // Bit-identical on all ranks
            assert_eq!(r.0.to_bits(), results[0].0.to_bits());
            assert_relative_eq!(r.0, 0.6, epsilon = 1e-14);
            assert_relative_eq!(r.1, 0.3);
            assert_relative_eq!(r.2, 0.1);
            assert!(!r.3);
        }
    }

    #[test]
    fn test_thread_comm_halo_exchange() {
        let comms = ThreadComm::universe(2);
        let received: Vec<Vec<f64>> = std::thread::scope(|s| {
            let handles: Vec<_> = comms
                .into_iter()
                .map(|comm| {
                    s.spawn(move || {
                        let other = 1 - comm.rank();
                        comm.send(other, vec![comm.rank() as f64; 3]).unwrap();
                        comm.recv(other).unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(received[0], vec![1.0; 3]);
        assert_eq!(received[1], vec![0.0; 3]);
    }

    #[test]
    fn test_disconnected_peer_is_an_error() {
        let mut comms = ThreadComm::universe(2);
        let second = comms.pop().unwrap();
        drop(second);
        let first = &comms[0];
        assert!(first.recv(1).is_err());
        assert!(first.sum(1.0).is_err());
        assert!(first.recv(0).is_err());
    }
}
