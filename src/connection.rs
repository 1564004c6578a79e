//! Per-connection accept loop for ordinary client connections, on either a
//! master or a replica's listening port. Grounded on the reference
//! `ClientConnectionHandler`/`MasterConnection::handle_message`, collapsed
//! into one function since role dispatch now lives in `Db`/`master` rather
//! than in two parallel trait impls.

use std::sync::Arc;

use anyhow::Result;
use bytes::Bytes;

use crate::db::Db;
use crate::master;
use crate::protocol::command::{self, Command};
use crate::protocol::resp::{Connection, Frame, RespValue};

pub async fn handle(db: Arc<Db>, stream: tokio::net::TcpStream) {
    let peer_addr = match stream.peer_addr() {
        Ok(a) => a,
        Err(e) => {
            tracing::warn!(error = %e, "failed to read peer address");
            return;
        }
    };
    let mut conn = Connection::new(stream);
    if let Err(e) = serve(&db, &mut conn, peer_addr).await {
        tracing::debug!(%peer_addr, error = %e, "client connection closed");
    }
}

async fn serve(db: &Arc<Db>, conn: &mut Connection, peer_addr: std::net::SocketAddr) -> Result<()> {
    let mut replica_listening_port: Option<u16> = None;

    loop {
        let (frame, raw) = match conn.read_frame().await? {
            Some(v) => v,
            None => return Ok(()),
        };
        let Frame::Command(items) = frame else {
            continue;
        };

        let req = match command::parse(&items) {
            Ok(req) => req,
            Err(_) => {
                let unknown = unknown_command_reply(&items);
                conn.write_value(&unknown).await?;
                continue;
            }
        };

        if db.is_master() && matches!(req.command, Command::ReplConf | Command::Psync | Command::Wait) {
            match master::handle(db, conn, peer_addr, &mut replica_listening_port, &req).await? {
                master::Outcome::Replied => {}
                master::Outcome::BecameReplica => return Ok(()),
            }
            continue;
        }

        match db.execute_client(&req).await {
            Ok(Some(reply)) => {
                conn.write_value(&reply).await?;
            }
            Ok(None) => {}
            Err(e) => {
                conn.write_value(&RespValue::Error(format!("ERR {e}"))).await?;
            }
        }

        if db.is_master() && req.command.is_mutating() {
            db.propagate(Bytes::copy_from_slice(&raw));
        }
    }
}

fn unknown_command_reply(items: &[Bytes]) -> RespValue {
    let tokens: Vec<String> = items.iter().map(|b| String::from_utf8_lossy(b).to_string()).collect();
    RespValue::Error(format!(
        "ERR unknown command '{}', with args beginning with: {}",
        tokens.first().cloned().unwrap_or_default(),
        tokens.get(1).cloned().unwrap_or_default()
    ))
}
