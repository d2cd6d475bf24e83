//! Parameterized replaceable events: kinds in `[30000, 40000)` keep one
//! event per kind, author, and `d` tag value (missing `d` counts as `""`).

use std::collections::HashMap;

use crate::filter::Filter;
use crate::relay::Relay;
use crate::store::{StorageClass, StoreFilterer};

pub fn attach(relay: &mut Relay, store: &dyn StoreFilterer) {
    store.add_storage_filter(Box::new(|event| {
        if (30000..40000).contains(&event.kind) {
            let d = event.first_tag_value("d").unwrap_or("").to_string();
            let mut tag_filters = HashMap::new();
            tag_filters.insert("d".to_string(), vec![d]);
            return StorageClass::Single(Filter {
                kinds: vec![event.kind],
                authors: vec![event.pubkey.clone()],
                tag_filters,
                ..Default::default()
            });
        }
        StorageClass::Normal
    }));
    relay.add_nip(33);
}
