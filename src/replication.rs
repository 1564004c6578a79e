//! Master-side replica registry, write propagation, and the offset
//! bookkeeping WAIT depends on.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, Notify};

struct Replica {
    id: u64,
    addr: SocketAddr,
    sender: mpsc::UnboundedSender<Bytes>,
    acked_offset: u64,
}

/// Everything the master side of replication needs, guarded by the `Db`'s
/// single exclusive lock alongside the store and stream store.
pub struct ReplicationState {
    pub master_replid: String,
    pub master_repl_offset: u64,
    replicas: Vec<Replica>,
    next_id: u64,
    /// Fired whenever a REPLCONF ACK updates any replica's offset, so a
    /// pending WAIT can re-check its target. `Arc`-wrapped so a waiter can
    /// hold its own handle and create a `notified()` future without keeping
    /// this struct's mutex locked across an `.await`.
    pub ack_notify: Arc<Notify>,
}

impl ReplicationState {
    pub fn new(master_replid: String) -> Self {
        ReplicationState {
            master_replid,
            master_repl_offset: 0,
            replicas: Vec::new(),
            next_id: 0,
            ack_notify: Arc::new(Notify::new()),
        }
    }

    /// Registers a freshly PSYNC'd connection as a replica, returning the
    /// id used to identify it again on disconnect.
    pub fn register(&mut self, addr: SocketAddr, sender: mpsc::UnboundedSender<Bytes>) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.replicas.push(Replica {
            id,
            addr,
            sender,
            acked_offset: 0,
        });
        tracing::info!(replica_id = id, %addr, "replica registered");
        id
    }

    pub fn remove(&mut self, id: u64) {
        if let Some(r) = self.replicas.iter().find(|r| r.id == id) {
            tracing::info!(replica_id = id, addr = %r.addr, "replica disconnected");
        }
        self.replicas.retain(|r| r.id != id);
    }

    pub fn replica_count(&self) -> usize {
        self.replicas.len()
    }

    /// Sends `frame` to every live replica, dropping any whose channel has
    /// closed, and bumps `master_repl_offset` by its length regardless of
    /// how many replicas actually received it.
    pub fn propagate(&mut self, frame: Bytes) {
        self.master_repl_offset += frame.len() as u64;
        self.replicas.retain(|r| r.sender.send(frame.clone()).is_ok());
    }

    /// REPLCONF ACK handling: records the replica's offset and wakes any
    /// WAIT loop blocked on `ack_notify` to re-check its target.
    pub fn update_ack(&mut self, id: u64, offset: u64) {
        if let Some(r) = self.replicas.iter_mut().find(|r| r.id == id) {
            r.acked_offset = offset;
        }
        self.ack_notify.notify_waiters();
    }

    pub fn count_acked_at_least(&self, offset: u64) -> usize {
        self.replicas.iter().filter(|r| r.acked_offset >= offset).count()
    }
}
