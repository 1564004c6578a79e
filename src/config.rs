use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;

use clap::Parser;

pub const DEFAULT_PORT: u16 = 6379;

/// `host port`, as used both for `--replicaof` and for the peer address we
/// hand a freshly spawned replica-handshake task.
#[derive(Debug, Clone)]
pub struct Binding(pub String, pub u16);

impl Display for Binding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.0, self.1)
    }
}

impl FromStr for Binding {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        let mut parts = s.split(' ');
        let host = parts
            .next()
            .ok_or_else(|| anyhow::format_err!("invalid replicaof value: {:?}", s))?;
        let port = parts
            .next()
            .ok_or_else(|| anyhow::format_err!("invalid replicaof value: {:?}", s))?
            .parse::<u16>()?;
        Ok(Binding(host.to_string(), port))
    }
}

/// Launch-time configuration, parsed once from argv. `CONFIG GET` reads
/// `dir`/`dbfilename` back out of this struct rather than a separate map.
#[derive(Parser, Debug, Clone)]
#[command(name = "redis-lite", about = "A small Redis-compatible data server")]
pub struct Config {
    /// Directory containing the RDB snapshot, if any.
    #[arg(long, default_value = "")]
    pub dir: String,

    /// RDB snapshot filename within `--dir`.
    #[arg(long, default_value = "")]
    pub dbfilename: String,

    /// Listening port.
    #[arg(long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// "<host> <port>" of a master to replicate from. Presence selects the
    /// replica role.
    #[arg(long)]
    pub replicaof: Option<Binding>,
}

impl Config {
    pub fn rdb_path(&self) -> PathBuf {
        PathBuf::from(&self.dir).join(&self.dbfilename)
    }

    pub fn get(&self, key: &str) -> Option<String> {
        match key.to_ascii_lowercase().as_str() {
            "dir" => Some(self.dir.clone()),
            "dbfilename" => Some(self.dbfilename.clone()),
            _ => None,
        }
    }
}

impl clap::builder::ValueParserFactory for Binding {
    type Parser = BindingParser;
    fn value_parser() -> Self::Parser {
        BindingParser
    }
}

#[derive(Clone)]
pub struct BindingParser;

impl clap::builder::TypedValueParser for BindingParser {
    type Value = Binding;

    fn parse_ref(
        &self,
        _cmd: &clap::Command,
        _arg: Option<&clap::Arg>,
        value: &std::ffi::OsStr,
    ) -> Result<Self::Value, clap::Error> {
        let s = value.to_string_lossy();
        s.parse::<Binding>()
            .map_err(|e| clap::Error::raw(clap::error::ErrorKind::InvalidValue, e.to_string()))
    }
}
