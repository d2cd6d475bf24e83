use std::collections::HashSet;
use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use nostr_relay::store::StoreFilterer;
use nostr_relay::{nips, router, MemoryStore, PostgresStore, Relay, RelayConfig};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = RelayConfig::from_env();

    let relay = match &config.persistent_store_dsn {
        Some(dsn) => {
            info!("using postgres event store");
            let store = Arc::new(
                PostgresStore::connect(dsn)
                    .await
                    .expect("failed to connect to database"),
            );
            build_relay(store, &config)
        }
        None => {
            info!("using in-memory event store");
            build_relay(Arc::new(MemoryStore::new()), &config)
        }
    };

    let app = router(relay);
    let listener = tokio::net::TcpListener::bind(config.listen_address)
        .await
        .expect("failed to bind listen address");
    info!("listening on {}", config.listen_address);
    axum::serve(listener, app).await.expect("server error");
}

fn build_relay<S>(store: Arc<S>, config: &RelayConfig) -> Arc<Relay>
where
    S: StoreFilterer + 'static,
{
    let mut relay = Relay::new(store.clone(), config.relay_metadata.clone());
    nips::nip09::attach(&mut relay);
    nips::nip16::attach(&mut relay, store.as_ref());
    nips::nip33::attach(&mut relay, store.as_ref());

    if !config.allowed_pubkeys.is_empty() {
        let allowed: HashSet<String> = config.allowed_pubkeys.iter().cloned().collect();
        relay.add_admission_filter(move |event| allowed.contains(&event.pubkey));
    }

    Arc::new(relay)
}
