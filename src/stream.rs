//! Per-key append-only log with a partially wildcarded identifier grammar,
//! range scans, and a wake-up signal for blocking reads.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt::Display;
use std::str::FromStr;
use std::sync::Arc;

use tokio::sync::Notify;

use crate::error::CommandError;
use crate::store::now_ms;

/// `ms-seq`, totally ordered numerically component-wise — string comparison
/// is only valid for equal-width components, so ordering is implemented by
/// hand rather than derived.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct StreamId(pub u64, pub u64);

impl StreamId {
    pub const MIN: StreamId = StreamId(0, 0);
    pub const MAX: StreamId = StreamId(u64::MAX, u64::MAX);
}

impl PartialOrd for StreamId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for StreamId {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.0, self.1).cmp(&(other.0, other.1))
    }
}

impl Display for StreamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.0, self.1)
    }
}

impl FromStr for StreamId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.split_once('-') {
            Some((ms, seq)) => Ok(StreamId(ms.parse()?, seq.parse()?)),
            None => Ok(StreamId(s.parse()?, 0)),
        }
    }
}

/// Parses a `-`/`+` range sentinel or an explicit id, defaulting a bare
/// `<ms>` (no `-seq`) to the bound's widest matching sequence component.
fn parse_bound(s: &str, is_start: bool) -> anyhow::Result<StreamId> {
    match s {
        "-" => Ok(StreamId::MIN),
        "+" => Ok(StreamId::MAX),
        _ if !s.contains('-') => {
            let ms: u64 = s.parse()?;
            Ok(if is_start {
                StreamId(ms, 0)
            } else {
                StreamId(ms, u64::MAX)
            })
        }
        _ => s.parse(),
    }
}

pub type Fields = Vec<(String, String)>;

struct Entry {
    id: StreamId,
    fields: Fields,
}

#[derive(Default)]
struct Log {
    entries: Vec<Entry>,
}

pub struct StreamStore {
    logs: HashMap<String, Log>,
    notify: Arc<Notify>,
}

impl Default for StreamStore {
    fn default() -> Self {
        StreamStore {
            logs: HashMap::new(),
            notify: Arc::new(Notify::new()),
        }
    }
}

impl StreamStore {
    pub fn new() -> Self {
        StreamStore::default()
    }

    /// A handle a blocking XREAD can wait on; woken by every XADD on any key.
    pub fn notify_handle(&self) -> Arc<Notify> {
        self.notify.clone()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.logs.contains_key(key)
    }

    pub fn last_id(&self, key: &str) -> StreamId {
        self.logs
            .get(key)
            .and_then(|log| log.entries.last())
            .map(|e| e.id)
            .unwrap_or(StreamId::MIN)
    }

    /// Implements the `*` / `<ms>-*` / explicit-id forms of `id_spec`.
    fn resolve_id(&self, key: &str, id_spec: &str) -> Result<StreamId, CommandError> {
        let last = self.logs.get(key).and_then(|log| log.entries.last());

        let id = if id_spec == "*" {
            match last {
                None => StreamId(now_ms(), 0),
                Some(e) => StreamId(e.id.0, e.id.1 + 1),
            }
        } else if let Some(ms_part) = id_spec.strip_suffix("-*") {
            let ms: u64 = ms_part
                .parse()
                .map_err(|_| CommandError::reply("Invalid stream ID specified as stream command argument"))?;
            match last {
                None => StreamId(ms, if ms == 0 { 1 } else { 0 }),
                Some(e) if ms > e.id.0 => StreamId(ms, 0),
                Some(e) => StreamId(ms, e.id.1 + 1),
            }
        } else {
            id_spec
                .parse()
                .map_err(|_| CommandError::reply("Invalid stream ID specified as stream command argument"))?
        };

        if id <= StreamId::MIN {
            return Err(CommandError::reply(
                "The ID specified in XADD must be greater than 0-0",
            ));
        }
        if let Some(e) = last {
            if id <= e.id {
                return Err(CommandError::reply(
                    "The ID specified in XADD is equal or smaller than the target stream top item",
                ));
            }
        }
        Ok(id)
    }

    pub fn add(&mut self, key: &str, id_spec: &str, fields: Fields) -> Result<StreamId, CommandError> {
        let id = self.resolve_id(key, id_spec)?;
        self.logs
            .entry(key.to_string())
            .or_default()
            .entries
            .push(Entry { id, fields });
        self.notify.notify_waiters();
        Ok(id)
    }

    /// Entries with id in `[start, end]`, inclusive on both ends.
    pub fn range(&self, key: &str, start: &str, end: &str) -> anyhow::Result<Vec<(StreamId, Fields)>> {
        let start = parse_bound(start, true)?;
        let end = parse_bound(end, false)?;
        Ok(self
            .logs
            .get(key)
            .map(|log| {
                log.entries
                    .iter()
                    .filter(|e| e.id >= start && e.id <= end)
                    .map(|e| (e.id, e.fields.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    /// Entries strictly greater than `after`, used by XREAD (exclusive start).
    pub fn read_after(&self, key: &str, after: StreamId) -> Vec<(StreamId, Fields)> {
        self.logs
            .get(key)
            .map(|log| {
                log.entries
                    .iter()
                    .filter(|e| e.id > after)
                    .map(|e| (e.id, e.fields.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_zero_zero() {
        let mut s = StreamStore::new();
        let err = s.add("s", "0-0", vec![]).unwrap_err();
        assert!(matches!(err, CommandError::Reply(m) if m.contains("greater than 0-0")));
    }

    #[test]
    fn auto_seq_increments_within_same_ms() {
        let mut s = StreamStore::new();
        let id1 = s.add("s", "5-*", vec![]).unwrap();
        let id2 = s.add("s", "5-*", vec![]).unwrap();
        assert_eq!(id1, StreamId(5, 0));
        assert_eq!(id2, StreamId(5, 1));
    }

    #[test]
    fn zero_ms_wildcard_starts_at_one() {
        let mut s = StreamStore::new();
        let id = s.add("s", "0-*", vec![]).unwrap();
        assert_eq!(id, StreamId(0, 1));
    }

    #[test]
    fn rejects_stale_explicit_id() {
        let mut s = StreamStore::new();
        s.add("s", "5-5", vec![]).unwrap();
        let err = s.add("s", "5-5", vec![]).unwrap_err();
        assert!(matches!(err, CommandError::Reply(m) if m.contains("equal or smaller")));
    }

    #[test]
    fn ids_strictly_increase_under_numeric_comparison() {
        let mut s = StreamStore::new();
        let a = s.add("s", "9-*", vec![]).unwrap();
        let b = s.add("s", "10-*", vec![]).unwrap();
        assert!(b > a, "10-0 must sort after 9-x numerically, not lexically");
    }

    #[test]
    fn range_is_inclusive_on_both_ends() {
        let mut s = StreamStore::new();
        s.add("s", "1-0", vec![]).unwrap();
        s.add("s", "2-0", vec![]).unwrap();
        s.add("s", "3-0", vec![]).unwrap();
        let got = s.range("s", "1-0", "2-0").unwrap();
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].0, StreamId(1, 0));
        assert_eq!(got[1].0, StreamId(2, 0));
    }

    #[test]
    fn read_after_excludes_the_boundary_id() {
        let mut s = StreamStore::new();
        let first = s.add("s", "1-0", vec![]).unwrap();
        s.add("s", "1-1", vec![]).unwrap();
        let got = s.read_after("s", first);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].0, StreamId(1, 1));
    }
}
