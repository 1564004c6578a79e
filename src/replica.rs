//! Replica role: the handshake with a configured master and the inbound
//! loop that silently applies propagated frames, grounded on the reference
//! `ReplicaClient`/`ReplicaConnection` pair, redone against
//! `tokio::net::TcpStream`.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use tokio::net::TcpStream;

use crate::config::Binding;
use crate::db::Db;
use crate::protocol::command::{self, Command};
use crate::protocol::resp::{Connection, Frame, RespValue};

fn cmd(parts: &[&str]) -> RespValue {
    RespValue::array_of_bulk(parts.iter().map(|s| s.to_string()))
}

/// Connects to `master`, performs the handshake, then runs the inbound
/// apply loop until the connection drops, retrying with a fixed backoff —
/// the reference's restart-on-failure behavior. Full resynchronization
/// after a drop is out of scope: each retry starts a fresh PSYNC from
/// scratch.
pub async fn run(db: Arc<Db>, master: Binding, this_port: u16) {
    loop {
        if let Err(e) = connect_and_serve(&db, &master, this_port).await {
            tracing::warn!(master = %master, error = %e, "replication connection lost, retrying");
        }
        tokio::time::sleep(Duration::from_secs(2)).await;
    }
}

async fn connect_and_serve(db: &Arc<Db>, master: &Binding, this_port: u16) -> Result<()> {
    let stream = TcpStream::connect(master.to_string()).await?;
    let mut conn = Connection::new(stream);

    handshake(&mut conn, this_port).await?;
    tracing::info!(%master, "replica handshake complete, serving propagated writes");

    let mut offset: u64 = 0;
    loop {
        let (frame, raw) = match conn.read_frame().await? {
            Some(v) => v,
            None => bail!("master closed the replication connection"),
        };
        let Frame::Command(items) = frame else {
            offset += raw.len() as u64;
            continue;
        };
        let req = command::parse(&items).map_err(|e| anyhow!("bad command from master: {e}"))?;

        if req.command == Command::ReplConf
            && req.args.first().is_some_and(|s| s.eq_ignore_ascii_case("GETACK"))
        {
            // Reply carries the offset *before* this GETACK frame is counted.
            conn.write_value(&cmd(&["REPLCONF", "ACK", &offset.to_string()])).await?;
        } else {
            db.apply_propagated(&req);
        }
        offset += raw.len() as u64;
    }
}

async fn handshake(conn: &mut Connection, this_port: u16) -> Result<()> {
    conn.write_value(&cmd(&["PING"])).await?;
    expect_line(conn, "PONG").await?;

    conn.write_value(&cmd(&["REPLCONF", "listening-port", &this_port.to_string()]))
        .await?;
    expect_line(conn, "OK").await?;

    conn.write_value(&cmd(&["REPLCONF", "capa", "psync2"])).await?;
    expect_line(conn, "OK").await?;

    conn.write_value(&cmd(&["PSYNC", "?", "-1"])).await?;
    match conn.read_frame().await? {
        Some((Frame::Line(line), _)) if line.to_uppercase().starts_with("FULLRESYNC") => {}
        other => bail!("unexpected PSYNC reply: {:?}", other.map(|(f, _)| f)),
    }
    match conn.read_frame().await? {
        Some((Frame::Rdb(_), _)) => Ok(()),
        other => bail!("expected rdb payload after FULLRESYNC, got {:?}", other.map(|(f, _)| f)),
    }
}

async fn expect_line(conn: &mut Connection, expected: &str) -> Result<()> {
    match conn.read_frame().await? {
        Some((Frame::Line(line), _)) if line.eq_ignore_ascii_case(expected) => Ok(()),
        other => bail!("expected {:?} reply, got {:?}", expected, other.map(|(f, _)| f)),
    }
}
