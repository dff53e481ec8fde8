//! Adapters for the domain ports: storage backends, cache and notifiers.

pub mod in_memory;
pub mod kv;
pub mod notifier;
#[cfg(feature = "storage-rocksdb")]
pub mod rocksdb;
