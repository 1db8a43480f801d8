use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use lumen_core::{Event, EventId};

use crate::client::{PublishOutcome, RelayClient, Subscription};
use crate::message::{ClientMessage, RelayMessage};
use crate::{Filter, RelayError};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// How long a publish waits for an OK frame before reporting `Unconfirmed`.
const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(10);

enum SocketCmd {
    Subscribe {
        filter: Filter,
        reply: oneshot::Sender<Subscription>,
    },
    Publish {
        event: Event,
        reply: oneshot::Sender<PublishOutcome>,
    },
}

struct SubState {
    events_tx: mpsc::Sender<Event>,
    eose_tx: Option<oneshot::Sender<()>>,
}

/// Application-facing relay handle. Cheap to clone; all clones talk to the
/// same socket task, so publishes are concurrent-safe.
#[derive(Clone)]
pub struct WsRelay {
    cmd_tx: mpsc::Sender<SocketCmd>,
    ack_timeout: Duration,
}

/// Owns the websocket. Pass to `tokio::spawn(socket.run())`.
pub struct RelaySocket {
    stream: WsStream,
    cmd_rx: mpsc::Receiver<SocketCmd>,
    error_tx: watch::Sender<Option<String>>,
    error_rx: watch::Receiver<Option<String>>,
    subs: HashMap<String, SubState>,
    pending_acks: HashMap<EventId, oneshot::Sender<PublishOutcome>>,
    next_sub: u64,
}

impl WsRelay {
    /// Dial the relay and return `(RelaySocket, WsRelay)`. Dial failures
    /// surface to the caller, which owns retry and backoff.
    pub async fn connect(url: &str) -> Result<(RelaySocket, WsRelay), RelayError> {
        let (stream, _resp) = connect_async(url)
            .await
            .map_err(|e| RelayError::Connect(e.to_string()))?;

        let (cmd_tx, cmd_rx) = mpsc::channel(256);
        let (error_tx, error_rx) = watch::channel(None);

        let socket = RelaySocket {
            stream,
            cmd_rx,
            error_tx,
            error_rx,
            subs: HashMap::new(),
            pending_acks: HashMap::new(),
            next_sub: 0,
        };
        let handle = WsRelay {
            cmd_tx,
            ack_timeout: DEFAULT_ACK_TIMEOUT,
        };
        Ok((socket, handle))
    }

    pub fn with_ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }
}

#[async_trait]
impl RelayClient for WsRelay {
    async fn subscribe(&self, filter: Filter) -> Result<Subscription, RelayError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(SocketCmd::Subscribe {
                filter,
                reply: reply_tx,
            })
            .await
            .map_err(|_| RelayError::Closed("socket task gone".into()))?;
        reply_rx
            .await
            .map_err(|_| RelayError::Closed("socket task gone".into()))
    }

    async fn publish(&self, event: Event) -> PublishOutcome {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .cmd_tx
            .send(SocketCmd::Publish {
                event,
                reply: reply_tx,
            })
            .await
            .is_err()
        {
            return PublishOutcome::Failed("relay connection closed".into());
        }
        match tokio::time::timeout(self.ack_timeout, reply_rx).await {
            Ok(Ok(outcome)) => outcome,
            // Socket died after the frame may have left the wire.
            Ok(Err(_)) => PublishOutcome::Unconfirmed,
            Err(_) => PublishOutcome::Unconfirmed,
        }
    }
}

impl RelaySocket {
    /// Drive the socket. Run in a dedicated tokio task; returns when the
    /// connection closes or every handle is dropped.
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(SocketCmd::Subscribe { filter, reply }) => {
                        if let Err(e) = self.send_subscribe(filter, reply).await {
                            self.fail(&e);
                            break;
                        }
                    }
                    Some(SocketCmd::Publish { event, reply }) => {
                        self.send_publish(event, reply).await;
                    }
                    // Every handle dropped: nothing left to serve.
                    None => break,
                },

                frame = self.stream.next() => match frame {
                    Some(Ok(Message::Text(text))) => self.handle_frame(&text).await,
                    Some(Ok(Message::Ping(data))) => {
                        let _ = self.stream.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        self.fail("connection closed by relay");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        self.fail(&e.to_string());
                        break;
                    }
                },
            }
        }
    }

    async fn send_subscribe(
        &mut self,
        filter: Filter,
        reply: oneshot::Sender<Subscription>,
    ) -> Result<(), String> {
        self.next_sub += 1;
        let sub_id = format!("lumen-{}", self.next_sub);
        let frame = ClientMessage::Req {
            sub_id: sub_id.clone(),
            filter,
        }
        .to_json();
        self.stream
            .send(Message::Text(frame))
            .await
            .map_err(|e| e.to_string())?;

        let (events_tx, events_rx) = mpsc::channel(256);
        let (eose_tx, eose_rx) = oneshot::channel();
        self.subs.insert(
            sub_id,
            SubState {
                events_tx,
                eose_tx: Some(eose_tx),
            },
        );
        let _ = reply.send(Subscription {
            events: events_rx,
            eose: eose_rx,
            error: self.error_rx.clone(),
        });
        Ok(())
    }

    async fn send_publish(&mut self, event: Event, reply: oneshot::Sender<PublishOutcome>) {
        let event_id = event.id;
        let frame = ClientMessage::Event(event).to_json();
        match self.stream.send(Message::Text(frame)).await {
            // Ack arrives later as an OK frame.
            Ok(()) => {
                self.pending_acks.insert(event_id, reply);
            }
            Err(e) => {
                let _ = reply.send(PublishOutcome::Failed(e.to_string()));
            }
        }
    }

    async fn handle_frame(&mut self, text: &str) {
        let msg = match RelayMessage::from_json(text) {
            Ok(msg) => msg,
            Err(e) => {
                debug!(error = %e, "dropping unparseable relay frame");
                return;
            }
        };
        match msg {
            RelayMessage::Event { sub_id, event } => {
                if let Some(sub) = self.subs.get(&sub_id) {
                    let _ = sub.events_tx.send(event).await;
                }
            }
            RelayMessage::Eose { sub_id } => {
                if let Some(sub) = self.subs.get_mut(&sub_id) {
                    if let Some(tx) = sub.eose_tx.take() {
                        let _ = tx.send(());
                    }
                }
            }
            RelayMessage::Ok {
                event_id,
                accepted,
                message,
            } => {
                if let Some(reply) = self.pending_acks.remove(&event_id) {
                    let outcome = if accepted {
                        PublishOutcome::Succeeded
                    } else {
                        PublishOutcome::Failed(message)
                    };
                    let _ = reply.send(outcome);
                } else {
                    debug!(%event_id, "OK frame for unknown publish");
                }
            }
            RelayMessage::Notice(text) => debug!(%text, "relay notice"),
            RelayMessage::Closed { sub_id, message } => {
                warn!(%sub_id, %message, "relay closed subscription");
                self.subs.remove(&sub_id);
            }
        }
    }

    /// Record the close reason and drop all subscription channels so
    /// consumers observe the end of the stream.
    fn fail(&mut self, reason: &str) {
        warn!(%reason, "relay socket closing");
        let _ = self.error_tx.send(Some(reason.to_string()));
        self.subs.clear();
        // Dropped ack senders resolve in-flight publishes as unconfirmed.
        self.pending_acks.clear();
    }
}
