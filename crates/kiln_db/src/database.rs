//! The database interface shared by source and output stores.

use kiln_common::Guid;

use crate::error::DbError;
use crate::instance::{InstanceInfo, OutputInstance, PendingInstance, StoredObject};

/// A key-value object store addressed by [`Guid`].
///
/// Implementations must be safe to share between build worker threads. Each
/// committed [`PendingInstance`] must become visible atomically: readers see
/// either all of its writes or none.
pub trait Database: Send + Sync {
    /// Returns metadata for an instance, or `None` if it does not exist.
    fn instance(&self, guid: Guid) -> Option<InstanceInfo>;

    /// Reads the object stored in an instance.
    fn read_object(&self, guid: Guid) -> Result<StoredObject, DbError>;

    /// Lists the names of an instance's data blobs, sorted.
    fn data_names(&self, guid: Guid) -> Result<Vec<String>, DbError>;

    /// Reads one data blob.
    fn read_data(&self, guid: Guid, name: &str) -> Result<Vec<u8>, DbError>;

    /// Returns the modification stamp of one data blob.
    fn data_last_write(&self, guid: Guid, name: &str) -> Option<u64>;

    /// Applies staged writes atomically.
    ///
    /// The instance is replaced as a whole: its object, its path and its full
    /// set of data blobs become exactly those staged.
    fn apply(&self, pending: PendingInstance) -> Result<(), DbError>;

    /// Removes an instance and all of its blobs. Removing a missing instance
    /// is not an error.
    fn remove(&self, guid: Guid) -> Result<(), DbError>;

    /// Opens a transaction writing the instance `guid` at `path`.
    fn open_transaction(&self, guid: Guid, path: &str) -> Result<Transaction<'_>, DbError>
    where
        Self: Sized,
    {
        Transaction::open(self, guid, path)
    }
}

/// Staged writes to a single instance.
///
/// Nothing is visible to readers until [`commit`](Self::commit). Dropping the
/// transaction or calling [`close`](Self::close) discards the staged writes.
pub struct Transaction<'db> {
    db: &'db dyn Database,
    pending: PendingInstance,
}

impl<'db> Transaction<'db> {
    /// Opens a transaction on any database, including trait objects.
    pub fn open(db: &'db dyn Database, guid: Guid, path: &str) -> Result<Self, DbError> {
        if guid.is_nil() {
            return Err(DbError::NilGuid {
                path: path.to_string(),
            });
        }
        Ok(Self {
            db,
            pending: PendingInstance {
                guid,
                path: path.to_string(),
                object: None,
                data: Default::default(),
            },
        })
    }

    /// Stages the instance object.
    pub fn write_object(&mut self, type_name: impl Into<String>, bytes: Vec<u8>) {
        self.pending.object = Some(StoredObject {
            type_name: type_name.into(),
            bytes,
        });
    }

    /// Stages a data blob.
    pub fn write_data(&mut self, name: impl Into<String>, bytes: Vec<u8>) {
        self.pending.data.insert(name.into(), bytes);
    }

    /// Makes all staged writes visible.
    pub fn commit(self) -> Result<(), DbError> {
        if self.pending.object.is_none() {
            return Err(DbError::EmptyTransaction {
                guid: self.pending.guid,
            });
        }
        self.db.apply(self.pending)
    }

    /// Discards all staged writes.
    pub fn close(self) {}
}

/// Reads an instance and all of its blobs into a self-contained copy.
pub fn isolate(db: &dyn Database, guid: Guid) -> Result<OutputInstance, DbError> {
    let info = db.instance(guid).ok_or(DbError::NotFound { guid })?;
    let object = db.read_object(guid)?;
    let mut instance = OutputInstance::new(guid, info.path, object.type_name, object.bytes);
    for name in db.data_names(guid)? {
        let bytes = db.read_data(guid, &name)?;
        instance.data.insert(name, bytes);
    }
    Ok(instance)
}

/// Writes an isolated copy into a database in one transaction.
///
/// An existing instance with the same identifier is replaced, including when
/// it lives at a different path, and blobs it had that the copy lacks are
/// dropped.
pub fn restore(db: &dyn Database, instance: &OutputInstance) -> Result<(), DbError> {
    if let Some(existing) = db.instance(instance.guid) {
        if existing.path != instance.path {
            tracing::debug!(
                guid = %instance.guid,
                old = %existing.path,
                new = %instance.path,
                "replacing output instance moved to a new path"
            );
        }
    }
    let mut tx = Transaction::open(db, instance.guid, &instance.path)?;
    tx.write_object(instance.type_name.clone(), instance.object.clone());
    for (name, bytes) in &instance.data {
        tx.write_data(name.clone(), bytes.clone());
    }
    tx.commit()
}
