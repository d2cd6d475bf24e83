//! Event deletion. A kind-5 event deletes the events referenced by its
//! `e` tags, but only those published by the same author.

use tracing::error;

use crate::filter::Filter;
use crate::relay::Relay;

pub fn attach(relay: &mut Relay) {
    let mut deletions = relay.hub().subscribe_with_capacity("nip09", 100);
    let store = relay.store();
    tokio::spawn(async move {
        while let Some(event) = deletions.recv().await {
            if event.kind != 5 {
                continue;
            }
            for tag in &event.tags {
                if tag.len() >= 2 && tag[0] == "e" {
                    let filter = Filter {
                        ids: vec![tag[1].clone()],
                        authors: vec![event.pubkey.clone()],
                        ..Default::default()
                    };
                    if let Err(e) = store.delete(&filter).await {
                        error!(event = %event.id, "deletion request failed: {e}");
                    }
                }
            }
        }
    });
    relay.add_nip(9);
}
