//! Persistence of flows and agent profiles.
//!
//! Records are grouped by kind, one JSON document per line in
//! `<data_dir>/<kind>.jsonl`. Saving upserts by id.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::debug;

use crate::agent::AgentProfile;
use crate::flow::Flow;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("storage lock poisoned: {0}")]
    Poisoned(String),

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// A value that can be persisted under a record kind.
pub trait Record: Serialize + DeserializeOwned {
    const KIND: &'static str;

    fn id(&self) -> &str;
    fn owner_id(&self) -> &str;
}

impl Record for Flow {
    const KIND: &'static str = "flows";

    fn id(&self) -> &str {
        &self.id
    }

    fn owner_id(&self) -> &str {
        &self.owner_id
    }
}

impl Record for AgentProfile {
    const KIND: &'static str = "agents";

    fn id(&self) -> &str {
        &self.id
    }

    fn owner_id(&self) -> &str {
        &self.owner_id
    }
}

pub trait Storage {
    /// Inserts `record`, replacing any stored record of the same kind and id.
    fn save<R: Record>(&self, record: &R) -> Result<(), StorageError>;

    /// All records of kind `R` belonging to `owner_id`, in insertion order.
    fn load<R: Record>(&self, owner_id: &str) -> Result<Vec<R>, StorageError>;
}

fn record_id(value: &serde_json::Value) -> Option<&str> {
    value.get("id").and_then(|v| v.as_str())
}

fn upsert(records: &mut Vec<serde_json::Value>, id: &str, value: serde_json::Value) {
    match records.iter_mut().find(|r| record_id(r) == Some(id)) {
        Some(slot) => *slot = value,
        None => records.push(value),
    }
}

fn decode_owned<R: Record>(
    records: &[serde_json::Value],
    owner_id: &str,
) -> Result<Vec<R>, StorageError> {
    let mut out = Vec::new();
    for value in records {
        let record: R = serde_json::from_value(value.clone())?;
        if record.owner_id() == owner_id {
            out.push(record);
        }
    }
    Ok(out)
}

/// JSONL files, re-read on every access.
///
/// Several processes may share a data dir (a running loop and an `approve`
/// from another terminal), so nothing read from disk is kept between calls.
pub struct JsonlStorage {
    base_path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlStorage {
    pub fn new(base_path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let base_path = base_path.as_ref().to_path_buf();
        fs::create_dir_all(&base_path)?;
        Ok(Self {
            base_path,
            write_lock: Mutex::new(()),
        })
    }

    fn kind_path(&self, kind: &str) -> PathBuf {
        self.base_path.join(format!("{kind}.jsonl"))
    }

    fn read_kind(&self, kind: &str) -> Result<Vec<serde_json::Value>, StorageError> {
        let path = self.kind_path(kind);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let reader = BufReader::new(File::open(&path)?);
        let mut records = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if !line.trim().is_empty() {
                records.push(serde_json::from_str(&line)?);
            }
        }
        Ok(records)
    }

    // Replaces the kind file atomically via a temp file.
    fn rewrite(&self, kind: &str, records: &[serde_json::Value]) -> Result<(), StorageError> {
        let path = self.kind_path(kind);
        let tmp = path.with_extension("jsonl.tmp");
        {
            let mut file = File::create(&tmp)?;
            for record in records {
                writeln!(file, "{}", serde_json::to_string(record)?)?;
            }
            file.sync_all()?;
        }
        fs::rename(&tmp, &path)?;
        Ok(())
    }
}

impl Storage for JsonlStorage {
    fn save<R: Record>(&self, record: &R) -> Result<(), StorageError> {
        let value = serde_json::to_value(record)?;
        let _guard = self
            .write_lock
            .lock()
            .map_err(|e| StorageError::Poisoned(e.to_string()))?;
        let mut records = self.read_kind(R::KIND)?;
        upsert(&mut records, record.id(), value);
        self.rewrite(R::KIND, &records)?;
        debug!(kind = R::KIND, id = record.id(), "record saved");
        Ok(())
    }

    fn load<R: Record>(&self, owner_id: &str) -> Result<Vec<R>, StorageError> {
        decode_owned(&self.read_kind(R::KIND)?, owner_id)
    }
}

/// Volatile storage for demos and tests.
#[derive(Default)]
pub struct MemoryStorage {
    records: Mutex<HashMap<&'static str, Vec<serde_json::Value>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemoryStorage {
    fn save<R: Record>(&self, record: &R) -> Result<(), StorageError> {
        let value = serde_json::to_value(record)?;
        let mut records = self
            .records
            .lock()
            .map_err(|e| StorageError::Poisoned(e.to_string()))?;
        upsert(records.entry(R::KIND).or_default(), record.id(), value);
        Ok(())
    }

    fn load<R: Record>(&self, owner_id: &str) -> Result<Vec<R>, StorageError> {
        let records = self
            .records
            .lock()
            .map_err(|e| StorageError::Poisoned(e.to_string()))?;
        match records.get(R::KIND) {
            Some(values) => decode_owned(values, owner_id),
            None => Ok(Vec::new()),
        }
    }
}
