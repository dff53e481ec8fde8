use super::kv::{KvBackend, Table, WriteOp};
use crate::error::{LogisticsError, Result};
use async_trait::async_trait;
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, DB, Direction, IteratorMode, Options, WriteBatch,
};
use std::path::Path;
use std::sync::Arc;

/// A persistent storage engine using RocksDB.
///
/// Every [`Table`] gets its own column family. Batches are written through a
/// single `WriteBatch`, so a unit of work lands completely or not at all.
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc<DB>`).
#[derive(Clone)]
pub struct RocksDBBackend {
    db: Arc<DB>,
}

impl RocksDBBackend {
    /// Opens or creates a RocksDB instance at the specified path, creating any
    /// missing column families.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let descriptors = Table::ALL
            .iter()
            .map(|table| ColumnFamilyDescriptor::new(table.name(), Options::default()))
            .collect::<Vec<_>>();

        let db = DB::open_cf_descriptors(&opts, path, descriptors)?;

        Ok(Self { db: Arc::new(db) })
    }

    fn cf(&self, table: Table) -> Result<&ColumnFamily> {
        self.db.cf_handle(table.name()).ok_or_else(|| {
            LogisticsError::internal(format!("{} column family not found", table.name()))
        })
    }
}

#[async_trait]
impl KvBackend for RocksDBBackend {
    async fn get(&self, table: Table, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let cf = self.cf(table)?;
        Ok(self.db.get_cf(cf, key)?)
    }

    async fn scan(&self, table: Table, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let cf = self.cf(table)?;
        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(prefix, Direction::Forward));

        let mut rows = Vec::new();
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            rows.push((key.into_vec(), value.into_vec()));
        }
        Ok(rows)
    }

    async fn apply(&self, batch: Vec<WriteOp>) -> Result<()> {
        let mut write_batch = WriteBatch::default();
        for op in batch {
            let cf = self.cf(op.table)?;
            match op.value {
                Some(value) => write_batch.put_cf(cf, op.key, value),
                None => write_batch.delete_cf(cf, op.key),
            }
        }
        self.db.write(write_batch)?;
        Ok(())
    }
}
