//! A Nostr relay: clients publish signed events over WebSocket, the relay
//! validates and persists them, and fans each accepted event out to every
//! subscription whose filters match. Retrospective queries are served from
//! the store and terminated with `EOSE` before live streaming begins.

pub mod client;
pub mod config;
pub mod error;
pub mod event;
pub mod filter;
pub mod hub;
pub mod keys;
pub mod message;
pub mod nips;
pub mod relay;
pub mod store;

pub use client::{Client, Subscription};
pub use config::{RelayConfig, RelayInfo};
pub use error::Error;
pub use event::Event;
pub use filter::Filter;
pub use hub::EventHub;
pub use message::{ClientMessage, RelayMessage};
pub use relay::{router, Relay};
pub use store::{EventStore, MemoryStore, PostgresStore, StorageClass, StoreFilterer};
