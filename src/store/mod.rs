//! Durable event storage behind a pluggable contract.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Error;
use crate::event::Event;
use crate::filter::Filter;

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

/// How a storage filter wants an incoming event handled.
pub enum StorageClass {
    /// Store the event as-is.
    Normal,
    /// Do not store the event at all (it may still be hub-delivered).
    Drop,
    /// Delete everything matching the filter first, so at most one event
    /// matches it at a time.
    Single(Filter),
}

/// A storage-class hook, run in registration order on every add.
pub type StorageFilter = Box<dyn Fn(&Event) -> StorageClass + Send + Sync>;

#[async_trait]
pub trait EventStore: Send + Sync {
    /// Persist one event. Idempotent on `(id, pubkey)`: a duplicate insert
    /// is a no-op success.
    async fn add(&self, event: Arc<Event>) -> Result<(), Error>;

    /// Matching events in chronological order, at most the largest `limit`
    /// across the filters (zero = unbounded). Empty filter list, empty
    /// result.
    async fn get(&self, filters: &[Filter]) -> Result<Vec<Arc<Event>>, Error>;

    /// Delete every matching event.
    async fn delete(&self, filter: &Filter) -> Result<(), Error>;
}

/// A store that lets callers hook into storage classification.
pub trait StoreFilterer: EventStore {
    fn add_storage_filter(&self, filter: StorageFilter);
}
