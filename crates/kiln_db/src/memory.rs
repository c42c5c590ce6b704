//! Thread-safe in-memory database.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use kiln_common::Guid;

use crate::database::{Database, Transaction};
use crate::error::DbError;
use crate::instance::{InstanceInfo, PendingInstance, StoredObject};

#[derive(Debug, Clone)]
struct Record {
    path: String,
    object: StoredObject,
    object_stamp: u64,
    data: BTreeMap<String, (Vec<u8>, u64)>,
}

impl Record {
    fn last_modified(&self) -> u64 {
        self.data
            .values()
            .map(|(_, stamp)| *stamp)
            .fold(self.object_stamp, u64::max)
    }
}

/// An in-memory [`Database`].
///
/// Modification stamps come from a shared monotonic clock that ticks on every
/// write, so any rewrite of an object or blob yields a strictly newer stamp.
pub struct MemoryDatabase {
    records: Mutex<HashMap<Guid, Record>>,
    clock: AtomicU64,
}

impl MemoryDatabase {
    /// Creates an empty database.
    pub fn new() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            clock: AtomicU64::new(1),
        }
    }

    /// Writes an instance with an object and no blobs in one transaction.
    pub fn put(
        &self,
        guid: Guid,
        path: &str,
        type_name: &str,
        bytes: Vec<u8>,
    ) -> Result<(), DbError> {
        let mut tx = Transaction::open(self, guid, path)?;
        tx.write_object(type_name, bytes);
        tx.commit()
    }

    /// Replaces one data blob of an existing instance.
    pub fn put_data(&self, guid: Guid, name: &str, bytes: Vec<u8>) -> Result<(), DbError> {
        let stamp = self.tick();
        let mut records = self.lock();
        let record = records.get_mut(&guid).ok_or(DbError::NotFound { guid })?;
        record.data.insert(name.to_string(), (bytes, stamp));
        Ok(())
    }

    /// Returns every stored instance identifier, sorted.
    pub fn guids(&self) -> Vec<Guid> {
        let mut guids: Vec<Guid> = self.lock().keys().copied().collect();
        guids.sort();
        guids
    }

    /// Returns the number of stored instances.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns `true` if no instances are stored.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Guid, Record>> {
        // A panic while holding the lock cannot leave a record half-written:
        // every mutation is a single insert or remove.
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for MemoryDatabase {
    fn default() -> Self {
        Self::new()
    }
}

impl Database for MemoryDatabase {
    fn instance(&self, guid: Guid) -> Option<InstanceInfo> {
        let records = self.lock();
        let record = records.get(&guid)?;
        Some(InstanceInfo {
            guid,
            path: record.path.clone(),
            type_name: record.object.type_name.clone(),
            last_modified: record.last_modified(),
        })
    }

    fn read_object(&self, guid: Guid) -> Result<StoredObject, DbError> {
        let records = self.lock();
        records
            .get(&guid)
            .map(|r| r.object.clone())
            .ok_or(DbError::NotFound { guid })
    }

    fn data_names(&self, guid: Guid) -> Result<Vec<String>, DbError> {
        let records = self.lock();
        let record = records.get(&guid).ok_or(DbError::NotFound { guid })?;
        Ok(record.data.keys().cloned().collect())
    }

    fn read_data(&self, guid: Guid, name: &str) -> Result<Vec<u8>, DbError> {
        let records = self.lock();
        let record = records.get(&guid).ok_or(DbError::NotFound { guid })?;
        record
            .data
            .get(name)
            .map(|(bytes, _)| bytes.clone())
            .ok_or_else(|| DbError::DataNotFound {
                guid,
                name: name.to_string(),
            })
    }

    fn data_last_write(&self, guid: Guid, name: &str) -> Option<u64> {
        let records = self.lock();
        records.get(&guid)?.data.get(name).map(|(_, stamp)| *stamp)
    }

    fn apply(&self, pending: PendingInstance) -> Result<(), DbError> {
        let object = pending.object.ok_or(DbError::EmptyTransaction {
            guid: pending.guid,
        })?;
        let stamp = self.tick();
        let record = Record {
            path: pending.path,
            object,
            object_stamp: stamp,
            data: pending
                .data
                .into_iter()
                .map(|(name, bytes)| (name, (bytes, stamp)))
                .collect(),
        };
        self.lock().insert(pending.guid, record);
        Ok(())
    }

    fn remove(&self, guid: Guid) -> Result<(), DbError> {
        self.lock().remove(&guid);
        Ok(())
    }
}
