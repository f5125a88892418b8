use crate::domain::ledger::{EntryId, LedgerEntry, NewLedgerEntry, Target};
use crate::domain::ports::{ClockRef, LedgerStore};
use crate::error::{Result, UnlockError};
use crate::infrastructure::clock::SystemClock;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, Direction, IteratorMode, Options, WriteBatch};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Column Family for ledger entries, keyed by big-endian entry id.
pub const CF_ENTRIES: &str = "entries";
/// Column Family mapping payment references to entry ids.
pub const CF_REFERENCES: &str = "references";
/// Column Family mapping `(subject, target)` grant keys to entry ids.
pub const CF_GRANTS: &str = "grants";
/// Column Family for bookkeeping such as the next entry id.
pub const CF_META: &str = "meta";
/// Column Family indexing entry ids by creation time, for windowed reads.
pub const CF_BY_TIME: &str = "by_time";

const NEXT_ID_KEY: &[u8] = b"next_id";

/// A persistent ledger using RocksDB.
///
/// Every insert writes the entry, its reference index and (for unlocks) its
/// grant index in a single `WriteBatch`, so a crash never leaves a payment
/// half-recorded. Inserts are serialized by `next_id`'s mutex, which makes the
/// reference check and the write one atomic step within the process.
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc<DB>`).
#[derive(Clone)]
pub struct RocksDbLedgerStore {
    db: Arc<DB>,
    next_id: Arc<Mutex<u64>>,
    clock: ClockRef,
}

impl RocksDbLedgerStore {
    /// Opens or creates a ledger at `path`, stamping entries with wall-clock time.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_clock(path, Arc::new(SystemClock))
    }

    pub fn open_with_clock<P: AsRef<Path>>(path: P, clock: ClockRef) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cfs = [CF_ENTRIES, CF_REFERENCES, CF_GRANTS, CF_META, CF_BY_TIME]
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()));
        let db = DB::open_cf_descriptors(&opts, path, cfs)?;

        let meta = db
            .cf_handle(CF_META)
            .ok_or_else(|| missing_cf(CF_META))?;
        let next_id = match db.get_cf(meta, NEXT_ID_KEY)? {
            Some(bytes) => decode_id(&bytes)?,
            None => 1,
        };

        Ok(Self {
            db: Arc::new(db),
            next_id: Arc::new(Mutex::new(next_id)),
            clock,
        })
    }

    fn cf(&self, name: &'static str) -> Result<&ColumnFamily> {
        self.db.cf_handle(name).ok_or_else(|| missing_cf(name))
    }

    fn entry_by_id(&self, id: &[u8]) -> Result<Option<LedgerEntry>> {
        match self.db.get_cf(self.cf(CF_ENTRIES)?, id)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }
}

fn missing_cf(name: &str) -> UnlockError {
    UnlockError::store(format!("{name} column family not found"))
}

fn decode_id(bytes: &[u8]) -> Result<u64> {
    let raw: [u8; 8] = bytes
        .try_into()
        .map_err(|_| UnlockError::store(format!("corrupt entry id of {} bytes", bytes.len())))?;
    Ok(u64::from_be_bytes(raw))
}

/// Big-endian microseconds with the sign bit flipped, so byte order is time
/// order, followed by the entry id.
fn time_key(at: DateTime<Utc>, id: u64) -> [u8; 16] {
    let micros = (at.timestamp_micros() as u64) ^ (1 << 63);
    let mut key = [0u8; 16];
    key[..8].copy_from_slice(&micros.to_be_bytes());
    key[8..].copy_from_slice(&id.to_be_bytes());
    key
}

fn grant_key(subject_id: &str, target: &Target) -> Vec<u8> {
    let mut key = Vec::with_capacity(subject_id.len() + target.id.len() + 32);
    key.extend_from_slice(subject_id.as_bytes());
    key.push(0);
    key.extend_from_slice(target.kind.as_str().as_bytes());
    key.push(0);
    key.extend_from_slice(target.id.as_bytes());
    key
}

#[async_trait]
impl LedgerStore for RocksDbLedgerStore {
    async fn insert(&self, entry: NewLedgerEntry) -> Result<LedgerEntry> {
        let mut next_id = self.next_id.lock().await;

        let references = self.cf(CF_REFERENCES)?;
        if self
            .db
            .get_pinned_cf(references, entry.payment_reference.as_bytes())?
            .is_some()
        {
            return Err(UnlockError::LedgerConflict(entry.payment_reference));
        }

        let entry = entry.into_entry(EntryId(*next_id), self.clock.now());
        let id_key = entry.id.0.to_be_bytes();

        let mut batch = WriteBatch::default();
        batch.put_cf(self.cf(CF_ENTRIES)?, id_key, serde_json::to_vec(&entry)?);
        batch.put_cf(references, entry.payment_reference.as_bytes(), id_key);
        if entry.is_unlock() {
            batch.put_cf(
                self.cf(CF_GRANTS)?,
                grant_key(&entry.subject_id, &entry.target),
                id_key,
            );
        }
        batch.put_cf(self.cf(CF_BY_TIME)?, time_key(entry.created_at, entry.id.0), id_key);
        batch.put_cf(self.cf(CF_META)?, NEXT_ID_KEY, (entry.id.0 + 1).to_be_bytes());
        self.db.write(batch)?;

        *next_id = entry.id.0 + 1;
        Ok(entry)
    }

    async fn get_by_reference(&self, payment_reference: &str) -> Result<Option<LedgerEntry>> {
        match self
            .db
            .get_cf(self.cf(CF_REFERENCES)?, payment_reference.as_bytes())?
        {
            Some(id) => self.entry_by_id(&id),
            None => Ok(None),
        }
    }

    async fn has_unlock(&self, subject_id: &str, target: &Target) -> Result<bool> {
        let key = grant_key(subject_id, target);
        // Existence only; the value is not needed
        Ok(self
            .db
            .get_pinned_cf(self.cf(CF_GRANTS)?, key)?
            .is_some())
    }

    async fn entries_since(&self, since: DateTime<Utc>) -> Result<Vec<LedgerEntry>> {
        let start = time_key(since, 0);
        let mut entries = Vec::new();
        for item in self
            .db
            .iterator_cf(self.cf(CF_BY_TIME)?, IteratorMode::From(&start, Direction::Forward))
        {
            let (_key, id) = item?;
            let entry = self
                .entry_by_id(&id)?
                .ok_or_else(|| UnlockError::store("time index points at a missing entry"))?;
            entries.push(entry);
        }
        // The clock may step backwards between inserts
        entries.sort_by_key(|entry| entry.id);
        Ok(entries)
    }

    async fn count(&self) -> Result<usize> {
        Ok((*self.next_id.lock().await - 1) as usize)
    }
}
