//! Master-only control plane: REPLCONF/PSYNC/WAIT and the per-replica
//! fan-out connection a PSYNC upgrades into. Grounded on the reference
//! `MasterConnection`/`master_replica_connection` split, redone against
//! `tokio` so a replica's ACKs can arrive independently of any GETACK
//! round-trip instead of the reference's synchronous request/response hack.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use bytes::{Bytes, BytesMut};
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::db::Db;
use crate::protocol::command::{self, Command, CommandRequest};
use crate::protocol::rdb::empty_rdb;
use crate::protocol::resp::{self, Connection, Frame, RespValue};
use crate::trigger;

/// What the generic connection loop should do next after dispatching a
/// master-only verb.
pub enum Outcome {
    /// Reply already written; keep running the ordinary client loop.
    Replied,
    /// PSYNC fired: this connection is now a replica fan-out connection for
    /// the rest of its lifetime and has already run to completion.
    BecameReplica,
}

pub async fn handle(
    db: &Arc<Db>,
    conn: &mut Connection,
    peer_addr: SocketAddr,
    replica_listening_port: &mut Option<u16>,
    req: &CommandRequest,
) -> Result<Outcome> {
    match req.command {
        Command::ReplConf => handle_replconf(conn, replica_listening_port, req).await,
        Command::Psync => {
            handle_psync(db, conn, peer_addr, *replica_listening_port).await?;
            Ok(Outcome::BecameReplica)
        }
        Command::Wait => handle_wait(db, conn, req).await,
        _ => unreachable!("master::handle only dispatches REPLCONF/PSYNC/WAIT"),
    }
}

async fn handle_replconf(
    conn: &mut Connection,
    replica_listening_port: &mut Option<u16>,
    req: &CommandRequest,
) -> Result<Outcome> {
    if let [sub, value] = req.args.as_slice() {
        if sub.eq_ignore_ascii_case("listening-port") {
            *replica_listening_port = value.parse().ok();
        }
    }
    conn.write_value(&RespValue::ok()).await?;
    Ok(Outcome::Replied)
}

async fn handle_psync(db: &Arc<Db>, conn: &mut Connection, peer_addr: SocketAddr, _replica_port: Option<u16>) -> Result<()> {
    let (replid, offset) = {
        let repl = db.repl.lock().unwrap();
        (repl.master_replid.clone(), repl.master_repl_offset)
    };
    conn.write_value(&RespValue::Simple(format!("FULLRESYNC {replid} {offset}")))
        .await?;

    let mut rdb_frame = BytesMut::new();
    resp::encode_rdb_blob(&empty_rdb(), &mut rdb_frame);
    conn.write_raw(&rdb_frame).await?;

    let (tx, mut rx) = mpsc::unbounded_channel::<Bytes>();
    let replica_id = db.repl.lock().unwrap().register(peer_addr, tx);
    tracing::info!(replica_id, %peer_addr, "full resync complete, entering fan-out mode");

    let result = run_replica_fanout(db, conn, replica_id, &mut rx).await;
    db.repl.lock().unwrap().remove(replica_id);
    if let Err(e) = &result {
        tracing::warn!(replica_id, error = %e, "replica connection lost");
    }
    result
}

/// Drains `rx` for frames to propagate while simultaneously reading
/// `REPLCONF ACK` frames the replica sends back unprompted — the two
/// directions of this socket are otherwise independent.
async fn run_replica_fanout(
    db: &Arc<Db>,
    conn: &mut Connection,
    replica_id: u64,
    rx: &mut mpsc::UnboundedReceiver<Bytes>,
) -> Result<()> {
    loop {
        tokio::select! {
            frame = rx.recv() => {
                match frame {
                    Some(bytes) => { conn.write_raw(&bytes).await?; }
                    None => return Ok(()),
                }
            }
            read = conn.read_frame() => {
                match read? {
                    None => return Ok(()),
                    Some((Frame::Command(items), _raw)) => {
                        if let Ok(req) = command::parse(&items) {
                            if req.command == Command::ReplConf
                                && req.args.first().is_some_and(|s| s.eq_ignore_ascii_case("ACK"))
                            {
                                if let Some(offset) = req.args.get(1).and_then(|s| s.parse::<u64>().ok()) {
                                    db.repl.lock().unwrap().update_ack(replica_id, offset);
                                }
                            }
                        }
                    }
                    Some(_) => {}
                }
            }
        }
    }
}

/// Implements WAIT's fast path (nothing written yet, or already enough acks)
/// and its GETACK-then-wait path.
async fn handle_wait(db: &Arc<Db>, conn: &mut Connection, req: &CommandRequest) -> Result<Outcome> {
    let num_required: i64 = req
        .args
        .first()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| anyhow!("invalid WAIT arguments: {:?}", req.args))?;
    let timeout_ms: i64 = req
        .args
        .get(1)
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| anyhow!("invalid WAIT arguments: {:?}", req.args))?;

    let target_offset = db.repl.lock().unwrap().master_repl_offset;

    if target_offset == 0 {
        let count = db.repl.lock().unwrap().replica_count();
        conn.write_value(&RespValue::Int(count as i64)).await?;
        return Ok(Outcome::Replied);
    }

    let already = db.repl.lock().unwrap().count_acked_at_least(target_offset);
    if already as i64 >= num_required {
        conn.write_value(&RespValue::Int(already as i64)).await?;
        return Ok(Outcome::Replied);
    }

    let mut getack = BytesMut::new();
    resp::encode(&RespValue::array_of_bulk(["REPLCONF", "GETACK", "*"]), &mut getack);
    db.propagate(getack.freeze());

    let ack_notify = db.repl.lock().unwrap().ack_notify.clone();
    let deadline = (timeout_ms != 0).then(|| Duration::from_millis(timeout_ms as u64));
    let start = Instant::now();

    let acked = loop {
        let notified = ack_notify.notified();
        let acked = db.repl.lock().unwrap().count_acked_at_least(target_offset);
        if acked as i64 >= num_required {
            break acked;
        }
        let remaining = match deadline {
            Some(d) => match d.checked_sub(start.elapsed()) {
                Some(r) if !r.is_zero() => Some(r),
                _ => break acked,
            },
            None => None,
        };
        if !trigger::wait_or_timeout(notified, remaining).await {
            break db.repl.lock().unwrap().count_acked_at_least(target_offset);
        }
    };

    conn.write_value(&RespValue::Int(acked as i64)).await?;
    Ok(Outcome::Replied)
}
