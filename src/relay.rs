//! The relay core: HTTP/WebSocket surface, per-connection protocol loop,
//! admission pipeline, and the wiring between hub and store.

use std::borrow::Cow;
use std::collections::HashSet;
use std::sync::Arc;

use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use futures::{sink::SinkExt, stream::StreamExt};
use nanoid::nanoid;
use tokio::sync::mpsc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, error, info, warn};

use crate::config::RelayInfo;
use crate::error::Error;
use crate::event::Event;
use crate::filter::Filter;
use crate::hub::EventHub;
use crate::message::{ClientMessage, RelayMessage};
use crate::store::EventStore;

/// An admission predicate; any `false` vetoes the event before it reaches
/// the hub.
pub type AdmissionFilter = Box<dyn Fn(&Event) -> bool + Send + Sync>;

/// One logical relay: an event hub, a store fed from a resident hub
/// subscription, and the admission chain. Mutating methods are meant to be
/// called during construction, before the relay is shared with the router.
pub struct Relay {
    hub: EventHub,
    store: Arc<dyn EventStore>,
    admission: Vec<AdmissionFilter>,
    info: RelayInfo,
}

impl Relay {
    /// Build a relay around `store`. The resident `"store"` subscriber is
    /// part of the hub from the start, so storage-class hooks run on its
    /// consumer task and never delay `publish`.
    pub fn new(store: Arc<dyn EventStore>, info: RelayInfo) -> Relay {
        let hub = EventHub::new();
        let mut consumer = hub.subscribe_with_capacity("store", 100);
        let persist = store.clone();
        tokio::spawn(async move {
            while let Some(event) = consumer.recv().await {
                if let Err(e) = persist.add(event).await {
                    error!("error storing event: {e}");
                }
            }
        });
        Relay {
            hub,
            store,
            admission: Vec::new(),
            info,
        }
    }

    pub fn add_admission_filter(
        &mut self,
        filter: impl Fn(&Event) -> bool + Send + Sync + 'static,
    ) {
        self.admission.push(Box::new(filter));
    }

    /// Advertise a NIP in the metadata document.
    pub fn add_nip(&mut self, nip: u16) {
        if !self.info.supported_nips.contains(&nip) {
            self.info.supported_nips.push(nip);
            self.info.supported_nips.sort_unstable();
        }
    }

    pub fn hub(&self) -> &EventHub {
        &self.hub
    }

    pub fn store(&self) -> Arc<dyn EventStore> {
        self.store.clone()
    }

    pub fn info(&self) -> &RelayInfo {
        &self.info
    }

    fn admit(&self, event: &Event) -> bool {
        self.admission.iter().all(|f| f(event))
    }
}

/// The relay's single route: WebSocket upgrade, or the metadata document
/// for `application/nostr+json`, or 400.
pub fn router(relay: Arc<Relay>) -> Router {
    Router::new()
        .route("/", get(handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(relay)
}

async fn handler(
    ws: Option<WebSocketUpgrade>,
    headers: HeaderMap,
    State(relay): State<Arc<Relay>>,
) -> Response {
    if let Some(ws) = ws {
        return ws
            .on_upgrade(move |socket| handle_socket(socket, relay))
            .into_response();
    }

    if let Some(accept) = headers.get("accept") {
        if accept.to_str().unwrap_or("").contains("application/nostr+json") {
            return Json(relay.info().clone()).into_response();
        }
    }

    StatusCode::BAD_REQUEST.into_response()
}

async fn handle_socket(socket: WebSocket, relay: Arc<Relay>) {
    let (mut sink, mut stream) = socket.split();

    // single writer task; everything outbound goes through this channel
    let (out_tx, mut out_rx) = mpsc::channel::<Message>(64);
    let send_task = tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            if sink.send(msg).await.is_err() {
                break;
            }
        }
    });

    let conn_id = nanoid!();
    let mut subscriptions: HashSet<String> = HashSet::new();
    info!(connection = %conn_id, "websocket connection established");

    while let Some(frame) = stream.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                warn!(connection = %conn_id, "websocket error: {e}");
                break;
            }
        };
        match frame {
            Message::Text(text) => {
                let msg = match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(msg) => msg,
                    Err(e) => {
                        warn!(connection = %conn_id, "invalid frame: {e}");
                        let _ = out_tx
                            .send(close_frame(close_code::PROTOCOL, "invalid frame"))
                            .await;
                        break;
                    }
                };
                match msg {
                    ClientMessage::Event { event } => {
                        handle_event(&relay, &conn_id, &out_tx, event).await;
                    }
                    ClientMessage::Req { id, filters } => {
                        debug!(connection = %conn_id, subscription = %id, ?filters, "REQ");
                        let key = subscription_key(&conn_id, &id);
                        let live = relay.hub.subscribe(&key);
                        subscriptions.insert(id.clone());
                        spawn_subscription(relay.clone(), key, id, filters, live, out_tx.clone());
                    }
                    ClientMessage::Close { id } => {
                        debug!(connection = %conn_id, subscription = %id, "CLOSE");
                        relay.hub.unsubscribe(&subscription_key(&conn_id, &id));
                        subscriptions.remove(&id);
                    }
                }
            }
            Message::Binary(_) => {
                let _ = out_tx
                    .send(close_frame(
                        close_code::UNSUPPORTED,
                        "binary frames are not supported",
                    ))
                    .await;
                break;
            }
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }

    // teardown flows one way: connection close unsubscribes everything
    for id in &subscriptions {
        relay.hub.unsubscribe(&subscription_key(&conn_id, id));
    }
    drop(out_tx);
    send_task.abort();
    info!(connection = %conn_id, "connection closed");
}

async fn handle_event(
    relay: &Arc<Relay>,
    conn_id: &str,
    out: &mpsc::Sender<Message>,
    event: Event,
) {
    debug!(connection = %conn_id, event = %event.id, kind = event.kind, "EVENT");
    if !event.verify() {
        warn!(connection = %conn_id, event = %event.id, "invalid signature");
        notify(out, "invalid: bad signature").await;
        return;
    }
    if !relay.admit(&event) {
        info!(connection = %conn_id, event = %event.id, "denied by admission filter");
        notify(out, "blocked: event not accepted").await;
        return;
    }
    relay.hub.publish(Arc::new(event)).await;
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum SubscriptionState {
    Backfilling,
    Live,
    Closed,
}

/// Serve one subscription: stored events, `EOSE`, then the live stream.
/// Live events arriving during backfill are not buffered; they interleave
/// on the wire and clients deduplicate by id.
fn spawn_subscription(
    relay: Arc<Relay>,
    key: String,
    sub_id: String,
    filters: Vec<Filter>,
    mut live: mpsc::Receiver<Arc<Event>>,
    out: mpsc::Sender<Message>,
) {
    tokio::spawn(async move {
        let mut state = SubscriptionState::Backfilling;
        debug!(subscription = %key, state = ?state, "subscription opened");

        match relay.store.get(&filters).await {
            Ok(backfill) => {
                for event in backfill {
                    let frame = RelayMessage::Event {
                        subscription_id: sub_id.clone(),
                        event: (*event).clone(),
                    };
                    if send_frame(&out, &frame).await.is_err() {
                        return;
                    }
                }
            }
            Err(e) => error!(subscription = %key, "backfill query failed: {e}"),
        }

        let eose = RelayMessage::Eose {
            subscription_id: sub_id.clone(),
        };
        if send_frame(&out, &eose).await.is_err() {
            return;
        }
        state = SubscriptionState::Live;
        debug!(subscription = %key, state = ?state, "end of stored events");

        while let Some(event) = live.recv().await {
            if !Filter::match_any(&filters, &event) {
                continue;
            }
            let frame = RelayMessage::Event {
                subscription_id: sub_id.clone(),
                event: (*event).clone(),
            };
            if send_frame(&out, &frame).await.is_err() {
                break;
            }
        }

        state = SubscriptionState::Closed;
        debug!(subscription = %key, state = ?state, "subscription torn down");
    });
}

fn subscription_key(conn_id: &str, sub_id: &str) -> String {
    format!("{conn_id}-{sub_id}")
}

async fn send_frame(out: &mpsc::Sender<Message>, frame: &RelayMessage) -> Result<(), Error> {
    let text = serde_json::to_string(frame)?;
    out.send(Message::Text(text))
        .await
        .map_err(|_| Error::Transport("connection writer is gone".into()))
}

async fn notify(out: &mpsc::Sender<Message>, message: &str) {
    let _ = send_frame(out, &RelayMessage::notice(message)).await;
}

fn close_frame(code: u16, reason: &'static str) -> Message {
    Message::Close(Some(CloseFrame {
        code,
        reason: Cow::Borrowed(reason),
    }))
}
