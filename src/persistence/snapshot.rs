//! Snapshot File Format
//!
//! A snapshot is one JSON object mapping each key to a record:
//!
//! ```json
//! {
//!   "greeting": { "type": "string", "string_value": "hello" },
//!   "queue":    { "type": "list",   "list_value": ["a", "b"], "expires_at": 1760000000000 },
//!   "tags":     { "type": "set",    "set_value": ["x", "y"] },
//!   "user:1":   { "type": "hash",   "hash_value": { "name": "kvd" } }
//! }
//! ```
//!
//! `expires_at` is Unix time in milliseconds. Absent, null or zero means the
//! key never expires. Exactly one value field matching `type` must be present.
//!
//! Saves write `<path>.tmp`, sync it, then rename it over `<path>`, so a crash
//! mid-save leaves the previous snapshot intact.

use crate::persistence::PersistenceError;
use crate::storage::{Entry, Kind, StorageEngine, Value};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::debug;

/// On-disk form of one entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Record {
    #[serde(rename = "type")]
    kind: Kind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    string_value: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    list_value: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    set_value: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    hash_value: Option<BTreeMap<String, String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    expires_at: Option<u64>,
}

impl Record {
    fn from_entry(entry: &Entry) -> Self {
        let mut record = Record {
            kind: entry.value.kind(),
            string_value: None,
            list_value: None,
            set_value: None,
            hash_value: None,
            expires_at: entry.expires_at.map(to_unix_millis),
        };

        match &entry.value {
            Value::String(s) => record.string_value = Some(s.clone()),
            Value::List(list) => record.list_value = Some(list.iter().cloned().collect()),
            Value::Set(set) => {
                let mut members: Vec<String> = set.iter().cloned().collect();
                members.sort();
                record.set_value = Some(members);
            }
            Value::Hash(hash) => {
                record.hash_value = Some(hash.iter().map(|(f, v)| (f.clone(), v.clone())).collect())
            }
        }

        record
    }

    fn into_entry(self, key: &str) -> Result<Entry, PersistenceError> {
        let populated = [
            self.string_value.is_some(),
            self.list_value.is_some(),
            self.set_value.is_some(),
            self.hash_value.is_some(),
        ]
        .iter()
        .filter(|&&present| present)
        .count();

        if populated != 1 {
            return Err(PersistenceError::Malformed {
                key: key.to_string(),
                reason: format!("expected exactly one value field, found {}", populated),
            });
        }

        let value = match (self.kind, self) {
            (Kind::String, Record { string_value: Some(s), .. }) => Value::String(s),
            (Kind::List, Record { list_value: Some(l), .. }) => Value::List(l.into()),
            (Kind::Set, Record { set_value: Some(s), .. }) => Value::Set(s.into_iter().collect()),
            (Kind::Hash, Record { hash_value: Some(h), .. }) => Value::Hash(h.into_iter().collect()),
            (kind, _) => {
                return Err(PersistenceError::Malformed {
                    key: key.to_string(),
                    reason: format!("value field does not match type {}", kind),
                })
            }
        };

        Ok(Entry {
            value,
            expires_at: None,
        })
    }
}

fn to_unix_millis(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn from_unix_millis(ms: u64) -> Option<SystemTime> {
    if ms == 0 {
        return None;
    }
    UNIX_EPOCH.checked_add(Duration::from_millis(ms))
}

/// Temporary file a save writes before renaming it into place.
pub fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

/// Encodes entries as snapshot JSON. Keys are written in sorted order.
pub fn encode(entries: &HashMap<String, Entry>) -> Result<Vec<u8>, PersistenceError> {
    let records: BTreeMap<&str, Record> = entries
        .iter()
        .map(|(key, entry)| (key.as_str(), Record::from_entry(entry)))
        .collect();
    Ok(serde_json::to_vec_pretty(&records)?)
}

/// Decodes snapshot JSON, dropping entries that expired before `now`.
pub fn decode(bytes: &[u8], now: SystemTime) -> Result<HashMap<String, Entry>, PersistenceError> {
    let records: HashMap<String, Record> = serde_json::from_slice(bytes)?;
    let mut entries = HashMap::with_capacity(records.len());

    for (key, record) in records {
        let expires_at = record.expires_at.and_then(from_unix_millis);
        let mut entry = record.into_entry(&key)?;
        entry.expires_at = expires_at;

        if entry.is_expired_at(now) {
            debug!(key = %key, "Dropping expired key from snapshot");
            continue;
        }
        entries.insert(key, entry);
    }

    Ok(entries)
}

/// Writes a snapshot of `engine` to `path`.
///
/// # Returns
/// The number of keys written.
pub fn save(engine: &StorageEngine, path: &Path) -> Result<usize, PersistenceError> {
    let entries = engine.snapshot();
    let bytes = encode(&entries)?;

    let tmp = temp_path(path);
    write_synced(&tmp, &bytes).map_err(|source| PersistenceError::Io {
        path: tmp.clone(),
        source,
    })?;
    fs::rename(&tmp, path).map_err(|source| PersistenceError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    Ok(entries.len())
}

fn write_synced(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    writer.write_all(bytes)?;
    writer.flush()?;
    writer.get_ref().sync_all()
}

/// Restores `engine` from the snapshot at `path`.
///
/// A missing file is the first-run case and leaves the store untouched.
///
/// # Returns
/// The number of keys installed.
pub fn load(engine: &StorageEngine, path: &Path) -> Result<usize, PersistenceError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(source) => {
            return Err(PersistenceError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    let entries = decode(&bytes, SystemTime::now())?;
    let count = entries.len();
    engine.replace_all(entries);
    Ok(count)
}
