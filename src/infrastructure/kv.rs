use crate::domain::account::{Account, AccountId, Role};
use crate::domain::cylinder::{Cylinder, CylinderFilter, CylinderId, CylinderLog, NewCylinderLog};
use crate::domain::order::{NewOrderLog, Order, OrderFilter, OrderId, OrderLog};
use crate::domain::ports::{Sequence, Store, StoreRead, UnitOfWork};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Logical tables. Each backend maps them to its own namespace
/// (a column family in RocksDB, a map in memory).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Table {
    Accounts,
    Cylinders,
    CylinderSerials,
    CylinderLogs,
    Orders,
    OrderLogs,
    Meta,
}

impl Table {
    pub const ALL: [Table; 7] = [
        Table::Accounts,
        Table::Cylinders,
        Table::CylinderSerials,
        Table::CylinderLogs,
        Table::Orders,
        Table::OrderLogs,
        Table::Meta,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Table::Accounts => "accounts",
            Table::Cylinders => "cylinders",
            Table::CylinderSerials => "cylinder_serials",
            Table::CylinderLogs => "cylinder_logs",
            Table::Orders => "orders",
            Table::OrderLogs => "order_logs",
            Table::Meta => "meta",
        }
    }
}

/// A single staged write. `value: None` deletes the key.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteOp {
    pub table: Table,
    pub key: Vec<u8>,
    pub value: Option<Vec<u8>>,
}

/// Byte-level storage engine underneath [`KvStore`].
#[async_trait]
pub trait KvBackend: Send + Sync {
    async fn get(&self, table: Table, key: &[u8]) -> Result<Option<Vec<u8>>>;
    /// Entries whose key starts with `prefix`, in ascending key order.
    async fn scan(&self, table: Table, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>>;
    /// Applies every op or none of them.
    async fn apply(&self, batch: Vec<WriteOp>) -> Result<()>;
}

/// Raw reads shared by the store and its units of work; the typed
/// [`StoreRead`] API is derived from it.
#[async_trait]
pub trait KvRead: Send + Sync {
    async fn get_raw(&self, table: Table, key: &[u8]) -> Result<Option<Vec<u8>>>;
    async fn scan_raw(&self, table: Table, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>>;
}

fn id_key(id: u64) -> Vec<u8> {
    id.to_be_bytes().to_vec()
}

/// Log keys sort by owner first, then by the global log sequence.
fn log_key(owner: u64, seq: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(16);
    key.extend_from_slice(&owner.to_be_bytes());
    key.extend_from_slice(&seq.to_be_bytes());
    key
}

fn sequence_key(sequence: Sequence) -> &'static [u8] {
    match sequence {
        Sequence::Account => b"seq:account",
        Sequence::Cylinder => b"seq:cylinder",
        Sequence::Order => b"seq:order",
        Sequence::Log => b"seq:log",
    }
}

const CLOCK_KEY: &[u8] = b"clock";

async fn get_json<T, R>(reader: &R, table: Table, key: &[u8]) -> Result<Option<T>>
where
    T: DeserializeOwned,
    R: KvRead + ?Sized,
{
    match reader.get_raw(table, key).await? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

async fn scan_json<T, R>(reader: &R, table: Table, prefix: &[u8]) -> Result<Vec<T>>
where
    T: DeserializeOwned,
    R: KvRead + ?Sized,
{
    reader
        .scan_raw(table, prefix)
        .await?
        .into_iter()
        .map(|(_, value)| serde_json::from_slice(&value).map_err(Into::into))
        .collect()
}

/// Derives the typed [`StoreRead`] API from a [`KvRead`] implementation.
macro_rules! impl_store_read {
    ($ty:ty) => {
        #[async_trait]
        impl StoreRead for $ty {
            async fn account(&self, id: AccountId) -> Result<Option<Account>> {
                get_json(self, Table::Accounts, &id_key(id)).await
            }

            async fn accounts(&self, role: Option<Role>) -> Result<Vec<Account>> {
                let accounts: Vec<Account> = scan_json(self, Table::Accounts, &[]).await?;
                Ok(accounts
                    .into_iter()
                    .filter(|a| role.is_none_or(|r| a.role == r))
                    .collect())
            }

            async fn cylinder(&self, id: CylinderId) -> Result<Option<Cylinder>> {
                get_json(self, Table::Cylinders, &id_key(id)).await
            }

            async fn cylinder_by_serial(&self, serial_number: &str) -> Result<Option<Cylinder>> {
                let id: Option<CylinderId> =
                    get_json(self, Table::CylinderSerials, serial_number.as_bytes()).await?;
                match id {
                    Some(id) => self.cylinder(id).await,
                    None => Ok(None),
                }
            }

            async fn cylinders(&self, filter: &CylinderFilter) -> Result<Vec<Cylinder>> {
                let cylinders: Vec<Cylinder> = scan_json(self, Table::Cylinders, &[]).await?;
                Ok(cylinders.into_iter().filter(|c| filter.matches(c)).collect())
            }

            async fn cylinder_logs(&self, id: CylinderId) -> Result<Vec<CylinderLog>> {
                scan_json(self, Table::CylinderLogs, &id_key(id)).await
            }

            async fn order(&self, id: OrderId) -> Result<Option<Order>> {
                get_json(self, Table::Orders, &id_key(id)).await
            }

            async fn orders(&self, filter: &OrderFilter) -> Result<Vec<Order>> {
                let orders: Vec<Order> = scan_json(self, Table::Orders, &[]).await?;
                Ok(orders.into_iter().filter(|o| filter.matches(o)).collect())
            }

            async fn order_logs(&self, id: OrderId) -> Result<Vec<OrderLog>> {
                scan_json(self, Table::OrderLogs, &id_key(id)).await
            }
        }
    };
}

/// Transactional store over any [`KvBackend`].
///
/// Writers are serialized by a store-wide lock held for the lifetime of a
/// [`KvUnitOfWork`]. Plain reads go straight to the backend and only ever
/// observe committed batches.
#[derive(Clone)]
pub struct KvStore {
    backend: Arc<dyn KvBackend>,
    writer: Arc<Mutex<()>>,
}

impl KvStore {
    pub fn new(backend: impl KvBackend + 'static) -> Self {
        Self {
            backend: Arc::new(backend),
            writer: Arc::new(Mutex::new(())),
        }
    }

    /// Convenience constructor for a fresh in-memory store.
    pub fn in_memory() -> Self {
        Self::new(super::in_memory::InMemoryBackend::new())
    }
}

#[async_trait]
impl KvRead for KvStore {
    async fn get_raw(&self, table: Table, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.backend.get(table, key).await
    }

    async fn scan_raw(&self, table: Table, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        self.backend.scan(table, prefix).await
    }
}

impl_store_read!(KvStore);

#[async_trait]
impl Store for KvStore {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>> {
        let guard = self.writer.clone().lock_owned().await;
        Ok(Box::new(KvUnitOfWork {
            backend: self.backend.clone(),
            staged: BTreeMap::new(),
            clock: None,
            _guard: guard,
        }))
    }
}

/// Staged writes layered over the backend. Reads see staged values first.
pub struct KvUnitOfWork {
    backend: Arc<dyn KvBackend>,
    staged: BTreeMap<(Table, Vec<u8>), Option<Vec<u8>>>,
    clock: Option<DateTime<Utc>>,
    _guard: OwnedMutexGuard<()>,
}

impl KvUnitOfWork {
    fn stage<T: Serialize>(&mut self, table: Table, key: Vec<u8>, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec(value)?;
        self.staged.insert((table, key), Some(bytes));
        Ok(())
    }

    fn unstage(&mut self, table: Table, key: Vec<u8>) {
        self.staged.insert((table, key), None);
    }
}

#[async_trait]
impl KvRead for KvUnitOfWork {
    async fn get_raw(&self, table: Table, key: &[u8]) -> Result<Option<Vec<u8>>> {
        if let Some(staged) = self.staged.get(&(table, key.to_vec())) {
            return Ok(staged.clone());
        }
        self.backend.get(table, key).await
    }

    async fn scan_raw(&self, table: Table, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut merged: BTreeMap<Vec<u8>, Vec<u8>> =
            self.backend.scan(table, prefix).await?.into_iter().collect();

        for ((staged_table, key), value) in self.staged.range((table, prefix.to_vec())..) {
            if *staged_table != table || !key.starts_with(prefix) {
                break;
            }
            match value {
                Some(value) => merged.insert(key.clone(), value.clone()),
                None => merged.remove(key),
            };
        }

        Ok(merged.into_iter().collect())
    }
}

impl_store_read!(KvUnitOfWork);

#[async_trait]
impl UnitOfWork for KvUnitOfWork {
    async fn next_id(&mut self, sequence: Sequence) -> Result<u64> {
        let key = sequence_key(sequence);
        let current: u64 = get_json(&*self, Table::Meta, key).await?.unwrap_or(0);
        let next = current + 1;
        self.stage(Table::Meta, key.to_vec(), &next)?;
        Ok(next)
    }

    async fn now(&mut self) -> Result<DateTime<Utc>> {
        if let Some(at) = self.clock {
            return Ok(at);
        }
        let last: Option<DateTime<Utc>> = get_json(&*self, Table::Meta, CLOCK_KEY).await?;
        let now = match last {
            Some(last) if last > Utc::now() => last,
            _ => Utc::now(),
        };
        self.stage(Table::Meta, CLOCK_KEY.to_vec(), &now)?;
        self.clock = Some(now);
        Ok(now)
    }

    async fn put_account(&mut self, account: &Account) -> Result<()> {
        self.stage(Table::Accounts, id_key(account.id), account)
    }

    async fn put_cylinder(&mut self, cylinder: &Cylinder) -> Result<()> {
        self.stage(
            Table::CylinderSerials,
            cylinder.serial_number.as_bytes().to_vec(),
            &cylinder.id,
        )?;
        self.stage(Table::Cylinders, id_key(cylinder.id), cylinder)
    }

    async fn remove_cylinder(&mut self, cylinder: &Cylinder) -> Result<()> {
        self.unstage(
            Table::CylinderSerials,
            cylinder.serial_number.as_bytes().to_vec(),
        );
        self.unstage(Table::Cylinders, id_key(cylinder.id));
        Ok(())
    }

    async fn append_cylinder_log(&mut self, entry: NewCylinderLog) -> Result<CylinderLog> {
        let seq = self.next_id(Sequence::Log).await?;
        let at = self.now().await?;
        let log = entry.into_log(seq, at);
        self.stage(Table::CylinderLogs, log_key(log.cylinder_id, seq), &log)?;
        Ok(log)
    }

    async fn put_order(&mut self, order: &Order) -> Result<()> {
        self.stage(Table::Orders, id_key(order.id), order)
    }

    async fn append_order_log(&mut self, entry: NewOrderLog) -> Result<OrderLog> {
        let seq = self.next_id(Sequence::Log).await?;
        let at = self.now().await?;
        let log = entry.into_log(seq, at);
        self.stage(Table::OrderLogs, log_key(log.order_id, seq), &log)?;
        Ok(log)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let this = *self;
        let batch = this
            .staged
            .into_iter()
            .map(|((table, key), value)| WriteOp { table, key, value })
            .collect();
        this.backend.apply(batch).await
    }
}
