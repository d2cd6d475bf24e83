//! The client side of the protocol, used by the companion CLI and the
//! integration tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use futures::{sink::SinkExt, stream::StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};
use tracing::{debug, warn};

use crate::error::Error;
use crate::event::Event;
use crate::filter::Filter;
use crate::keys::rand_id;
use crate::message::{ClientMessage, RelayMessage};

const SUBSCRIPTION_BUFFER: usize = 100;

struct SubscriptionEntry {
    events: mpsc::Sender<Event>,
    eose: Option<oneshot::Sender<()>>,
}

/// A connected relay client. Cheap to clone; all clones share the
/// connection and the subscription registry.
#[derive(Clone)]
pub struct Client {
    out: mpsc::Sender<WsMessage>,
    subscriptions: Arc<Mutex<HashMap<String, SubscriptionEntry>>>,
}

/// One open subscription: a stream of matching events plus the end-of-
/// stored-events marker separating backfill from live delivery.
pub struct Subscription {
    pub id: String,
    events: mpsc::Receiver<Event>,
    eose: Option<oneshot::Receiver<()>>,
}

impl Subscription {
    pub async fn recv(&mut self) -> Option<Event> {
        self.events.recv().await
    }

    /// Wait for the relay's `EOSE`. Returns immediately on the second and
    /// later calls.
    pub async fn end_of_stored_events(&mut self) {
        if let Some(eose) = self.eose.take() {
            let _ = eose.await;
        }
    }
}

impl Client {
    pub async fn connect(url: &str) -> Result<Client, Error> {
        let (socket, _) = connect_async(url)
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;
        let (mut write, mut read) = socket.split();

        let (out, mut out_rx) = mpsc::channel::<WsMessage>(64);
        tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                if write.send(msg).await.is_err() {
                    break;
                }
            }
        });

        let subscriptions: Arc<Mutex<HashMap<String, SubscriptionEntry>>> =
            Arc::new(Mutex::new(HashMap::new()));
        let registry = subscriptions.clone();
        tokio::spawn(async move {
            while let Some(frame) = read.next().await {
                let frame = match frame {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!("websocket error: {e}");
                        break;
                    }
                };
                match frame {
                    WsMessage::Text(text) => {
                        let msg = match serde_json::from_str::<RelayMessage>(&text) {
                            Ok(msg) => msg,
                            Err(e) => {
                                warn!("invalid frame from relay: {e}");
                                break;
                            }
                        };
                        dispatch(&registry, msg);
                    }
                    WsMessage::Close(_) | WsMessage::Binary(_) => break,
                    _ => {}
                }
            }
        });

        Ok(Client { out, subscriptions })
    }

    pub async fn publish(&self, event: &Event) -> Result<(), Error> {
        self.send(&ClientMessage::Event {
            event: event.clone(),
        })
        .await
    }

    /// Open a subscription under a fresh id.
    pub async fn subscribe(&self, filters: Vec<Filter>) -> Result<Subscription, Error> {
        let id = rand_id();
        let (events_tx, events_rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let (eose_tx, eose_rx) = oneshot::channel();
        self.subscriptions
            .lock()
            .expect("subscription registry poisoned")
            .insert(
                id.clone(),
                SubscriptionEntry {
                    events: events_tx,
                    eose: Some(eose_tx),
                },
            );

        let req = ClientMessage::Req {
            id: id.clone(),
            filters,
        };
        if let Err(e) = self.send(&req).await {
            self.subscriptions
                .lock()
                .expect("subscription registry poisoned")
                .remove(&id);
            return Err(e);
        }
        Ok(Subscription {
            id,
            events: events_rx,
            eose: Some(eose_rx),
        })
    }

    pub async fn close_subscription(&self, id: &str) -> Result<(), Error> {
        self.subscriptions
            .lock()
            .expect("subscription registry poisoned")
            .remove(id);
        self.send(&ClientMessage::Close { id: id.into() }).await
    }

    pub async fn close(&self) {
        let _ = self.out.send(WsMessage::Close(None)).await;
    }

    async fn send(&self, msg: &ClientMessage) -> Result<(), Error> {
        let text = serde_json::to_string(msg)?;
        self.out
            .send(WsMessage::Text(text))
            .await
            .map_err(|_| Error::Transport("connection writer is gone".into()))
    }
}

fn dispatch(
    registry: &Arc<Mutex<HashMap<String, SubscriptionEntry>>>,
    msg: RelayMessage,
) {
    match msg {
        RelayMessage::Event {
            subscription_id,
            event,
        } => {
            let mut subs = registry.lock().expect("subscription registry poisoned");
            if let Some(entry) = subs.get(&subscription_id) {
                match entry.events.try_send(event) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        warn!(subscription = %subscription_id, "subscription buffer full, dropping");
                        subs.remove(&subscription_id);
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        subs.remove(&subscription_id);
                    }
                }
            }
        }
        RelayMessage::Eose { subscription_id } => {
            let mut subs = registry.lock().expect("subscription registry poisoned");
            if let Some(entry) = subs.get_mut(&subscription_id) {
                if let Some(eose) = entry.eose.take() {
                    let _ = eose.send(());
                }
            }
        }
        RelayMessage::Notice { message } => {
            debug!("relay notice: {message}");
        }
    }
}
