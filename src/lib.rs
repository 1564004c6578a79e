pub mod args;
pub mod config;
pub mod connection;
pub mod db;
pub mod error;
pub mod master;
pub mod protocol;
pub mod replica;
pub mod replication;
pub mod store;
pub mod stream;
pub mod trigger;

use std::sync::Arc;

use anyhow::Result;
use tokio::net::TcpListener;
use uuid::Uuid;

use config::Config;
use db::{Db, Role};

pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
}

/// A 40 hex-char run id, the width real Redis uses, built from two v4
/// UUIDs' hex digits since a single UUID is only 32.
pub fn generate_replid() -> String {
    format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple())
        .chars()
        .take(40)
        .collect()
}

pub fn build_db(config: Config) -> Arc<Db> {
    let role = if config.replicaof.is_some() { Role::Replica } else { Role::Master };
    let db = Arc::new(Db::new(config, role, generate_replid()));
    db.load_rdb_at_startup();
    db
}

/// Accepts client connections on `listener` forever, spawning one task per
/// connection. Also kicks off the replica handshake task if configured.
pub async fn serve(db: Arc<Db>, listener: TcpListener) -> Result<()> {
    if let Some(master_addr) = db.config.replicaof.clone() {
        let replica_db = db.clone();
        let this_port = db.config.port;
        tokio::spawn(replica::run(replica_db, master_addr, this_port));
    }

    loop {
        let (stream, peer_addr) = listener.accept().await?;
        tracing::debug!(%peer_addr, "accepted connection");
        let db = db.clone();
        tokio::spawn(connection::handle(db, stream));
    }
}

pub async fn run(config: Config) -> Result<()> {
    let port = config.port;
    let db = build_db(config);
    tracing::info!(port, role = ?db.role, "listening for connections");
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    serve(db, listener).await
}
