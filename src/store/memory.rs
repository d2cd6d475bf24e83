//! In-memory event store: a mutex-guarded list fed by a background
//! acceptor task, so `add` never waits on the list lock.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Error;
use crate::event::Event;
use crate::filter::Filter;
use crate::store::{EventStore, StorageClass, StorageFilter, StoreFilterer};

pub struct MemoryStore {
    inner: Arc<Inner>,
    tx: mpsc::UnboundedSender<Arc<Event>>,
}

struct Inner {
    events: Mutex<Vec<Arc<Event>>>,
    filters: Mutex<Vec<StorageFilter>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let inner = Arc::new(Inner {
            events: Mutex::new(Vec::new()),
            filters: Mutex::new(Vec::new()),
        });
        let (tx, mut rx) = mpsc::unbounded_channel::<Arc<Event>>();
        let acceptor = inner.clone();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                acceptor.accept(event);
            }
        });
        MemoryStore { inner, tx }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Inner {
    fn accept(&self, event: Arc<Event>) {
        let classes: Vec<StorageClass> = {
            let filters = self.filters.lock().expect("storage filter list poisoned");
            filters.iter().map(|f| f(&event)).collect()
        };
        for class in classes {
            match class {
                StorageClass::Normal => {}
                StorageClass::Drop => return,
                StorageClass::Single(filter) => self.delete_matching(&filter),
            }
        }
        let mut events = self.events.lock().expect("event list poisoned");
        if events
            .iter()
            .any(|e| e.id == event.id && e.pubkey == event.pubkey)
        {
            return;
        }
        events.push(event);
    }

    fn delete_matching(&self, filter: &Filter) {
        let mut events = self.events.lock().expect("event list poisoned");
        events.retain(|e| !filter.matches(e));
    }
}

#[async_trait]
impl EventStore for MemoryStore {
    async fn add(&self, event: Arc<Event>) -> Result<(), Error> {
        self.tx
            .send(event)
            .map_err(|_| Error::Store("memory store acceptor is gone".into()))
    }

    async fn get(&self, filters: &[Filter]) -> Result<Vec<Arc<Event>>, Error> {
        if filters.is_empty() {
            return Ok(Vec::new());
        }
        let mut matched: Vec<Arc<Event>> = {
            let events = self.inner.events.lock().expect("event list poisoned");
            events
                .iter()
                .filter(|e| Filter::match_any(filters, e))
                .cloned()
                .collect()
        };
        matched.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        let limit = Filter::max_limit(filters) as usize;
        if limit > 0 && matched.len() > limit {
            matched.drain(..matched.len() - limit);
        }
        Ok(matched)
    }

    async fn delete(&self, filter: &Filter) -> Result<(), Error> {
        self.inner.delete_matching(filter);
        Ok(())
    }
}

impl StoreFilterer for MemoryStore {
    fn add_storage_filter(&self, filter: StorageFilter) {
        self.inner
            .filters
            .lock()
            .expect("storage filter list poisoned")
            .push(filter);
    }
}
