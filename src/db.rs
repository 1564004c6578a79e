//! The shared command surface every client-facing connection dispatches
//! through, whether the server is acting as master or replica. Role-specific
//! control-plane verbs (REPLCONF/PSYNC/WAIT) and the master's
//! inbound-from-replica ACK handling live in `master.rs`; the replica's
//! silent execution of frames arriving from its own master lives in
//! `replica.rs` and calls back into the same `Store`/`StreamStore` this
//! module owns.

use std::sync::Mutex;
use std::time::Duration;

use bytes::Bytes;

use crate::args::{named_option, named_option_list};
use crate::config::Config;
use crate::error::CommandError;
use crate::protocol::command::{Command, CommandRequest};
use crate::protocol::resp::RespValue;
use crate::replication::ReplicationState;
use crate::store::{now_ms, Store};
use crate::stream::{Fields, StreamId, StreamStore};
use crate::trigger;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Master,
    Replica,
}

/// Everything a connection handler needs: the data itself plus enough
/// replication state to answer INFO and WAIT. Guarded by one lock per
/// concern rather than a single giant lock, since no two of them are ever
/// held at once across an `.await` point.
pub struct Db {
    pub config: Config,
    pub role: Role,
    store: Mutex<Store>,
    streams: Mutex<StreamStore>,
    pub repl: Mutex<ReplicationState>,
}

impl Db {
    pub fn new(config: Config, role: Role, master_replid: String) -> Self {
        Db {
            config,
            role,
            store: Mutex::new(Store::new()),
            streams: Mutex::new(StreamStore::new()),
            repl: Mutex::new(ReplicationState::new(master_replid)),
        }
    }

    pub fn is_master(&self) -> bool {
        self.role == Role::Master
    }

    /// Hydrates the store from `--dir`/`--dbfilename` if that file exists.
    /// A missing file is normal (fresh server); a parse failure is logged
    /// and otherwise ignored.
    pub fn load_rdb_at_startup(&self) {
        let path = self.config.rdb_path();
        if !path.exists() {
            return;
        }
        let mut store = self.store.lock().unwrap();
        match store.load_rdb(&path) {
            Ok(()) => tracing::info!(path = %path.display(), "loaded rdb snapshot"),
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "rdb load aborted"),
        }
    }

    /// Shared table-driven dispatch for PING/ECHO/SET/GET/CONFIG/KEYS/INFO/
    /// TYPE/XADD/XRANGE/XREAD. REPLCONF/PSYNC/WAIT are master-only control
    /// plane and are dispatched by the caller before reaching here. Returns
    /// `Ok(None)` for a command whose role-specific reply rule is "no reply"
    /// (PING and SET under the replica role).
    pub async fn execute_client(&self, req: &CommandRequest) -> Result<Option<RespValue>, CommandError> {
        match req.command {
            Command::Ping => Ok(self.is_master().then(|| RespValue::Simple("PONG".to_string()))),
            Command::Echo => {
                let arg = req.args.first().cloned().unwrap_or_default();
                Ok(Some(RespValue::bulk(arg)))
            }
            Command::Set => self.exec_set(req),
            Command::Get => {
                let key = req.args.first().ok_or_else(missing_args)?;
                let mut store = self.store.lock().unwrap();
                Ok(Some(match store.get(key) {
                    Some(v) => RespValue::bulk(v),
                    None => RespValue::nil(),
                }))
            }
            Command::Config => self.exec_config(req),
            Command::Keys => {
                // Spec permits ignoring the pattern and returning every key.
                let store = self.store.lock().unwrap();
                Ok(Some(RespValue::array_of_bulk(store.keys())))
            }
            Command::Info => Ok(Some(self.exec_info())),
            Command::Type => {
                let key = req.args.first().ok_or_else(missing_args)?;
                let store = self.store.lock().unwrap();
                let streams = self.streams.lock().unwrap();
                let ty = if store.contains_key(key) {
                    "string"
                } else if streams.contains(key) {
                    "stream"
                } else {
                    "none"
                };
                Ok(Some(RespValue::Simple(ty.to_string())))
            }
            Command::XAdd => self.exec_xadd(req),
            Command::XRange => self.exec_xrange(req),
            Command::XRead => self.exec_xread(req).await,
            Command::ReplConf | Command::Psync | Command::Wait => {
                Err(CommandError::reply("unsupported on this connection"))
            }
        }
    }

    fn exec_set(&self, req: &CommandRequest) -> Result<Option<RespValue>, CommandError> {
        let key = req.args.first().ok_or_else(missing_args)?;
        let value = req.args.get(1).ok_or_else(missing_args)?;
        let px: Option<u64> = named_option(&req.args, "PX")
            .map_err(|_| CommandError::reply("value is not an integer or out of range"))?;
        let expires_at_ms = px.map(|ms| now_ms() + ms);
        self.store.lock().unwrap().set(key, value, expires_at_ms);
        // SET always mutates regardless of role; only a master replies,
        // matching the reference's role-conditional `_respond`.
        Ok(self.is_master().then(RespValue::ok))
    }

    fn exec_config(&self, req: &CommandRequest) -> Result<Option<RespValue>, CommandError> {
        let sub = req.args.first().ok_or_else(missing_args)?;
        if !sub.eq_ignore_ascii_case("GET") {
            return Err(CommandError::reply(format!("unsupported CONFIG subcommand '{sub}'")));
        }
        let key = req.args.get(1).ok_or_else(missing_args)?;
        Ok(Some(match self.config.get(key) {
            Some(value) => RespValue::Array(vec![RespValue::bulk(key.clone()), RespValue::bulk(value)]),
            None => RespValue::Array(vec![]),
        }))
    }

    fn exec_info(&self) -> RespValue {
        let mut body = format!(
            "# Replication\r\nrole:{}\r\n",
            if self.is_master() { "master" } else { "slave" }
        );
        if self.is_master() {
            let repl = self.repl.lock().unwrap();
            body += &format!(
                "master_replid:{}\r\nmaster_repl_offset:{}\r\n",
                repl.master_replid, repl.master_repl_offset
            );
        }
        RespValue::bulk(body)
    }

    fn exec_xadd(&self, req: &CommandRequest) -> Result<Option<RespValue>, CommandError> {
        let key = req.args.first().ok_or_else(missing_args)?;
        let id_spec = req.args.get(1).ok_or_else(missing_args)?;
        let rest = &req.args[2.min(req.args.len())..];
        if rest.is_empty() || !rest.len().is_multiple_of(2) {
            return Err(CommandError::reply("wrong number of arguments for 'xadd' command"));
        }
        let fields: Fields = rest.chunks(2).map(|c| (c[0].clone(), c[1].clone())).collect();
        let id = self.streams.lock().unwrap().add(key, id_spec, fields)?;
        // XADD's reply is "same" for both roles — unlike SET/PING it is not
        // suppressed on a replica.
        Ok(Some(RespValue::bulk(id.to_string())))
    }

    fn exec_xrange(&self, req: &CommandRequest) -> Result<Option<RespValue>, CommandError> {
        let key = req.args.first().ok_or_else(missing_args)?;
        let start = req.args.get(1).ok_or_else(missing_args)?;
        let end = req.args.get(2).ok_or_else(missing_args)?;
        let entries = self
            .streams
            .lock()
            .unwrap()
            .range(key, start, end)
            .map_err(|e| CommandError::reply(format!("{e}")))?;
        Ok(Some(encode_stream_entries(&entries)))
    }

    async fn exec_xread(&self, req: &CommandRequest) -> Result<Option<RespValue>, CommandError> {
        let block_ms: Option<u64> = named_option(&req.args, "BLOCK")
            .map_err(|_| CommandError::reply("timeout is not an integer or out of range"))?;
        let stream_args = named_option_list(&req.args, "STREAMS")
            .ok_or_else(|| CommandError::reply("wrong number of arguments for 'xread' command"))?;
        if stream_args.is_empty() || stream_args.len() % 2 != 0 {
            return Err(CommandError::reply("Unbalanced XREAD list of streams: for each stream key an ID or '$' must be specified."));
        }
        let n = stream_args.len() / 2;
        let keys = &stream_args[..n];
        let raw_ids = &stream_args[n..];

        let notify = self.streams.lock().unwrap().notify_handle();

        // "$" resolves to each key's current last id exactly once, at call
        // time, before any blocking wait.
        let mut ids = Vec::with_capacity(n);
        {
            let streams = self.streams.lock().unwrap();
            for (key, raw) in keys.iter().zip(raw_ids) {
                let id = if raw == "$" {
                    streams.last_id(key)
                } else {
                    raw.parse::<StreamId>()
                        .map_err(|_| CommandError::reply("Invalid stream ID specified as stream command argument"))?
                };
                ids.push(id);
            }
        }

        loop {
            let notified = notify.notified();
            let mut results = Vec::new();
            {
                let streams = self.streams.lock().unwrap();
                for (key, id) in keys.iter().zip(&ids) {
                    let entries = streams.read_after(key, *id);
                    if !entries.is_empty() {
                        results.push((key.clone(), entries));
                    }
                }
            }
            if !results.is_empty() {
                return Ok(Some(encode_xread_result(results)));
            }
            match block_ms {
                None => return Ok(Some(RespValue::nil())),
                Some(ms) => {
                    let timeout = if ms == 0 { None } else { Some(Duration::from_millis(ms)) };
                    if !trigger::wait_or_timeout(notified, timeout).await {
                        return Ok(Some(RespValue::nil()));
                    }
                    // Woken: loop back and re-check for real data.
                }
            }
        }
    }

    /// Bumps the replication offset and fans `frame` out to every connected
    /// replica. A no-op on a replica (it never accumulates downstream
    /// replicas of its own — chained replication is out of scope).
    pub fn propagate(&self, frame: Bytes) {
        if self.is_master() {
            self.repl.lock().unwrap().propagate(frame);
        }
    }

    /// Applies a frame that arrived over a replica's inbound link from its
    /// master. Only SET and XADD are ever propagated; both mutate
    /// unconditionally here regardless of the reply each would normally
    /// produce — that link suppresses every reply except REPLCONF GETACK,
    /// which the caller handles separately.
    pub fn apply_propagated(&self, req: &CommandRequest) {
        let result = match req.command {
            Command::Set => self.exec_set(req),
            Command::XAdd => self.exec_xadd(req),
            _ => return,
        };
        if let Err(e) = result {
            tracing::warn!(command = %req.command, error = %e, "propagated command failed to apply");
        }
    }
}

fn missing_args() -> CommandError {
    CommandError::reply("wrong number of arguments")
}

fn encode_stream_entries(entries: &[(StreamId, Fields)]) -> RespValue {
    RespValue::Array(
        entries
            .iter()
            .map(|(id, fields)| {
                let flat: Vec<Bytes> = fields
                    .iter()
                    .flat_map(|(k, v)| [Bytes::from(k.clone()), Bytes::from(v.clone())])
                    .collect();
                RespValue::Array(vec![RespValue::bulk(id.to_string()), RespValue::array_of_bulk(flat)])
            })
            .collect(),
    )
}

fn encode_xread_result(results: Vec<(String, Vec<(StreamId, Fields)>)>) -> RespValue {
    RespValue::Array(
        results
            .into_iter()
            .map(|(key, entries)| RespValue::Array(vec![RespValue::bulk(key), encode_stream_entries(&entries)]))
            .collect(),
    )
}
