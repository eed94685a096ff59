//! Append-only, hash-chained ledger of backup events.
//!
//! Persisted as a single JSON array of entries:
//!
//! ```text
//! entry_hash = SHA256(prev_hash || canonical(payload) || ts)
//! entry[0].prev_hash = "000…0" (64 zeros)
//! entry[i].prev_hash = entry[i-1].entry_hash
//! ```
//!
//! `canonical(payload)` is compact JSON with object keys sorted recursively, so
//! the hash does not depend on how the payload was built or which serde_json
//! map backend is compiled in.
//!
//! The whole file is rewritten on every append via temp file + fsync +
//! rename. An entry whose fields are missing or of the wrong JSON type is kept
//! (fields in their JSON text form) and counts as a broken link. A file that is
//! not a JSON array at all is loaded as empty and reported through
//! [`LoadStatus::Recovered`]; the unreadable bytes are moved aside to
//! `<file>.corrupt` (or `<file>.corrupt.N` if that name is taken) before the
//! first write replaces them.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use sbak_chunks::sha256_hex;
use sbak_core::{SbakError, SbakResult};

use crate::manifest::format_timestamp;

/// `prev_hash` of the first entry
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub prev_hash: String,
    pub payload: Value,
    pub ts: String,
    pub entry_hash: String,
}

impl LedgerEntry {
    pub fn compute_hash(prev_hash: &str, payload: &Value, ts: &str) -> String {
        let canonical = canonical_json(payload);
        let mut preimage = String::with_capacity(prev_hash.len() + canonical.len() + ts.len());
        preimage.push_str(prev_hash);
        preimage.push_str(&canonical);
        preimage.push_str(ts);
        sha256_hex(preimage.as_bytes())
    }

    /// Whether `entry_hash` matches the entry's own fields.
    pub fn hash_is_valid(&self) -> bool {
        Self::compute_hash(&self.prev_hash, &self.payload, &self.ts) == self.entry_hash
    }

    /// Read one stored entry. The flag is `false` when the stored value did not
    /// have the entry shape; such entries keep non-string fields as JSON text.
    fn from_stored(value: Value) -> (Self, bool) {
        let text = |field: &str| match value.get(field) {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => String::new(),
        };
        let lenient = Self {
            prev_hash: text("prev_hash"),
            payload: value.get("payload").cloned().unwrap_or(Value::Null),
            ts: text("ts"),
            entry_hash: text("entry_hash"),
        };
        match serde_json::from_value::<LedgerEntry>(value) {
            Ok(entry) => (entry, true),
            Err(_) => (lenient, false),
        }
    }
}

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = Map::new();
            for key in keys {
                sorted.insert(key.clone(), canonicalize(&map[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// Compact JSON with recursively sorted object keys.
pub fn canonical_json(value: &Value) -> String {
    canonicalize(value).to_string()
}

/// How the ledger file looked when it was opened
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadStatus {
    /// No file yet (or an empty one)
    Fresh,
    Loaded,
    /// The file could not be parsed; history starts over
    Recovered { reason: String },
}

#[derive(Debug)]
pub struct Ledger {
    path: PathBuf,
    entries: Vec<LedgerEntry>,
    status: LoadStatus,
    /// First entry that was not well-formed on disk
    malformed: Option<usize>,
    /// Set while a recovered file still sits at `path`
    corrupt_on_disk: bool,
}

impl Ledger {
    /// Load the ledger at `path`, or start an empty one if the file is absent.
    pub fn open(path: &Path) -> SbakResult<Self> {
        let content = match std::fs::read(path) {
            Ok(content) => Some(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(SbakError::Io(e)),
        };

        let (values, status) = match content {
            None => (Vec::new(), LoadStatus::Fresh),
            Some(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => {
                (Vec::new(), LoadStatus::Fresh)
            }
            Some(bytes) => match serde_json::from_slice::<Vec<Value>>(&bytes) {
                Ok(values) => (values, LoadStatus::Loaded),
                Err(e) => {
                    let reason = format!("unparsable ledger {}: {e}", path.display());
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "ledger is corrupt; starting with empty history"
                    );
                    (Vec::new(), LoadStatus::Recovered { reason })
                }
            },
        };

        let mut entries = Vec::with_capacity(values.len());
        let mut malformed = None;
        for (i, value) in values.into_iter().enumerate() {
            let (entry, well_formed) = LedgerEntry::from_stored(value);
            if !well_formed && malformed.is_none() {
                tracing::warn!(path = %path.display(), index = i, "malformed ledger entry");
                malformed = Some(i);
            }
            entries.push(entry);
        }

        let corrupt_on_disk = matches!(status, LoadStatus::Recovered { .. });
        tracing::debug!(path = %path.display(), entries = entries.len(), "ledger opened");

        Ok(Self {
            path: path.to_path_buf(),
            entries,
            status,
            malformed,
            corrupt_on_disk,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load_status(&self) -> &LoadStatus {
        &self.status
    }

    /// Reason the on-disk history was discarded, if it was.
    pub fn load_warning(&self) -> Option<&str> {
        match &self.status {
            LoadStatus::Recovered { reason } => Some(reason),
            _ => None,
        }
    }

    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Hash of the newest entry, or the genesis sentinel.
    pub fn head_hash(&self) -> &str {
        self.entries
            .last()
            .map_or(GENESIS_HASH, |e| e.entry_hash.as_str())
    }

    /// Append an event stamped with the current time and persist immediately.
    /// Returns the new entry's hash.
    pub fn append_event(&mut self, payload: Value) -> SbakResult<String> {
        self.append_event_at(payload, Utc::now())
    }

    pub fn append_event_at(&mut self, payload: Value, at: DateTime<Utc>) -> SbakResult<String> {
        let prev_hash = self.head_hash().to_string();
        let ts = format_timestamp(&at);
        let entry_hash = LedgerEntry::compute_hash(&prev_hash, &payload, &ts);

        self.entries.push(LedgerEntry {
            prev_hash,
            payload,
            ts,
            entry_hash: entry_hash.clone(),
        });

        if let Err(e) = self.persist() {
            // Keep memory in step with what is on disk
            self.entries.pop();
            return Err(e);
        }

        tracing::info!(
            index = self.entries.len() - 1,
            entry_hash = %entry_hash,
            "ledger entry appended"
        );
        Ok(entry_hash)
    }

    /// Index of the first entry whose link or hash does not check out.
    pub fn first_broken_entry(&self) -> Option<usize> {
        let mut expected_prev = GENESIS_HASH;
        for (i, entry) in self.entries.iter().enumerate() {
            if self.malformed == Some(i)
                || entry.prev_hash != expected_prev
                || !entry.hash_is_valid()
            {
                return Some(i);
            }
            expected_prev = entry.entry_hash.as_str();
        }
        None
    }

    /// Walk the chain from genesis. `false` at the first mismatch.
    pub fn verify_chain(&self) -> bool {
        self.first_broken_entry().is_none()
    }

    /// Like [`Ledger::verify_chain`], but names the broken entry.
    pub fn check_chain(&self) -> SbakResult<()> {
        match self.first_broken_entry() {
            None => Ok(()),
            Some(index) => Err(SbakError::ChainBroken(format!(
                "entry {index} of {} does not match its hash chain",
                self.entries.len()
            ))),
        }
    }

    /// Merkle root of the newest event that carries one, or `""`.
    pub fn get_latest_root(&self) -> String {
        self.entries
            .iter()
            .rev()
            .find_map(|e| e.payload.get("merkle_root").and_then(Value::as_str))
            .unwrap_or_default()
            .to_string()
    }

    /// Whether any event recorded this Merkle root.
    pub fn contains_root(&self, root: &str) -> bool {
        self.entries
            .iter()
            .any(|e| e.payload.get("merkle_root").and_then(Value::as_str) == Some(root))
    }

    /// Rewrite the whole ledger atomically (write temp, then rename).
    fn persist(&mut self) -> SbakResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        if self.corrupt_on_disk {
            let aside = self.corrupt_aside_path();
            std::fs::rename(&self.path, &aside)?;
            tracing::warn!(path = %aside.display(), "preserved unreadable ledger");
            self.corrupt_on_disk = false;
        }

        let json = serde_json::to_string_pretty(&self.entries)?;
        let tmp_path = self.path.with_extension("tmp");
        let mut file = std::fs::File::create(&tmp_path)?;
        file.write_all(json.as_bytes())?;
        file.sync_all()?;
        drop(file);
        std::fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }

    /// `<file>.corrupt`, or the first free `<file>.corrupt.N`; earlier
    /// preserved copies are never overwritten.
    fn corrupt_aside_path(&self) -> PathBuf {
        let mut base = self.path.as_os_str().to_owned();
        base.push(".corrupt");
        let base = PathBuf::from(base);
        if !base.exists() {
            return base;
        }
        let mut n = 1u32;
        loop {
            let mut candidate = base.as_os_str().to_owned();
            candidate.push(format!(".{n}"));
            let candidate = PathBuf::from(candidate);
            if !candidate.exists() {
                return candidate;
            }
            n += 1;
        }
    }
}
