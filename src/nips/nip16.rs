//! Event treatment: kinds in `[20000, 30000)` are ephemeral and never
//! stored; kinds in `[10000, 20000)` are replaceable, keeping only the
//! latest event per kind and author.

use crate::filter::Filter;
use crate::relay::Relay;
use crate::store::{StorageClass, StoreFilterer};

pub fn attach(relay: &mut Relay, store: &dyn StoreFilterer) {
    store.add_storage_filter(Box::new(|event| {
        if (20000..30000).contains(&event.kind) {
            return StorageClass::Drop;
        }
        if (10000..20000).contains(&event.kind) {
            return StorageClass::Single(Filter {
                kinds: vec![event.kind],
                authors: vec![event.pubkey.clone()],
                ..Default::default()
            });
        }
        StorageClass::Normal
    }));
    relay.add_nip(16);
}
