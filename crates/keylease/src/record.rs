// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The credential record and the stores that distribute it.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// String-keyed, string-valued slot handed from the coordinator to workers.
#[derive(Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CredentialRecord {
    entries: BTreeMap<String, String>,
}

impl CredentialRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Replace the value under `key` in one step.
    pub fn put(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), value.into());
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for CredentialRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialRecord").field("keys", &self.entries.keys()).finish()
    }
}

/// Distribution channel for a [`CredentialRecord`].
pub trait RecordStore: Send + Sync {
    fn load(&self) -> anyhow::Result<CredentialRecord>;
    fn save(&self, record: &CredentialRecord) -> anyhow::Result<()>;
}

/// JSON object on disk, replaced atomically on every save.
#[derive(Debug, Clone)]
pub struct FileRecordStore {
    path: PathBuf,
}

impl FileRecordStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RecordStore for FileRecordStore {
    fn load(&self) -> anyhow::Result<CredentialRecord> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(CredentialRecord::default())
            }
            Err(e) => return Err(e.into()),
        };
        if contents.trim().is_empty() {
            return Ok(CredentialRecord::default());
        }
        let record = serde_json::from_str(&contents).map_err(|e| {
            anyhow::anyhow!("credential record {} is not valid JSON: {e}", self.path.display())
        })?;
        Ok(record)
    }

    /// Write a uniquely named temp file beside the target, then rename it over.
    fn save(&self, record: &CredentialRecord) -> anyhow::Result<()> {
        static COUNTER: AtomicU32 = AtomicU32::new(0);

        let json = serde_json::to_string_pretty(record)?;
        let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
        let tmp_name = format!(
            "{}.{}.{}.tmp",
            self.path.file_name().unwrap_or_default().to_string_lossy(),
            std::process::id(),
            seq,
        );
        let tmp_path = self.path.with_file_name(tmp_name);
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        let written =
            std::fs::write(&tmp_path, json).and_then(|()| std::fs::rename(&tmp_path, &self.path));
        if let Err(e) = written {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(e.into());
        }
        Ok(())
    }
}

/// In-process store.
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    record: Mutex<CredentialRecord>,
}

impl MemoryRecordStore {
    pub fn new(record: CredentialRecord) -> Self {
        Self { record: Mutex::new(record) }
    }

    pub fn snapshot(&self) -> CredentialRecord {
        self.record.lock().clone()
    }
}

impl RecordStore for MemoryRecordStore {
    fn load(&self) -> anyhow::Result<CredentialRecord> {
        Ok(self.snapshot())
    }

    fn save(&self, record: &CredentialRecord) -> anyhow::Result<()> {
        *self.record.lock() = record.clone();
        Ok(())
    }
}

#[cfg(test)]
#[path = "record_tests.rs"]
mod tests;
