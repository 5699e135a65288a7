//! WebSocket transport for a host node.
//!
//! Peers connect to `/peer/{address}` where `address` is the room-derived
//! address the host is listening on. Each socket becomes one connection id;
//! frames are JSON-encoded [`NetworkMessage`]s.

use super::{Transport, TransportConfig, TransportError, TransportEvent};
use crate::protocol::NetworkMessage;
use crate::room::RoomCode;
use crate::types::ConnectionId;
use async_trait::async_trait;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use futures::{sink::SinkExt, stream::StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};

/// Accepts inbound WebSocket peers. Cannot dial out.
pub struct WsTransport {
    config: TransportConfig,
    address: RwLock<Option<String>>,
    connections: RwLock<HashMap<ConnectionId, mpsc::UnboundedSender<NetworkMessage>>>,
    events: mpsc::UnboundedSender<TransportEvent>,
}

impl WsTransport {
    pub fn new(config: TransportConfig) -> (Arc<Self>, mpsc::UnboundedReceiver<TransportEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            config,
            address: RwLock::new(None),
            connections: RwLock::new(HashMap::new()),
            events,
        });
        (transport, rx)
    }

    /// Routes serving the peer endpoint
    pub fn router(self: &Arc<Self>) -> Router {
        Router::new()
            .route("/peer/{address}", get(ws_handler))
            .with_state(Arc::clone(self))
    }

    /// Address currently being served, if hosting
    pub async fn address(&self) -> Option<String> {
        self.address.read().await.clone()
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    fn emit(&self, event: TransportEvent) {
        if self.events.send(event).is_err() {
            tracing::debug!("Transport event dropped, session is gone");
        }
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn host(&self, room: &RoomCode) -> Result<(), TransportError> {
        let address = room.peer_address(&self.config.namespace);
        let mut current = self.address.write().await;
        if let Some(existing) = current.as_ref() {
            if existing != &address {
                return Err(TransportError::AddressInUse(existing.clone()));
            }
        }
        tracing::info!("Accepting peers on /peer/{}", address);
        *current = Some(address);
        Ok(())
    }

    async fn join(&self, _room: &RoomCode) -> Result<ConnectionId, TransportError> {
        Err(TransportError::Unsupported("join"))
    }

    async fn broadcast(&self, msg: &NetworkMessage) {
        let connections = self.connections.read().await;
        for (id, tx) in connections.iter() {
            if tx.send(msg.clone()).is_err() {
                tracing::debug!("Skipping closed connection {} in broadcast", id);
            }
        }
    }

    async fn send_to(
        &self,
        peer: &ConnectionId,
        msg: &NetworkMessage,
    ) -> Result<(), TransportError> {
        let connections = self.connections.read().await;
        let tx = connections
            .get(peer)
            .ok_or_else(|| TransportError::UnknownPeer(peer.clone()))?;
        tx.send(msg.clone())
            .map_err(|_| TransportError::ConnectionClosed(peer.clone()))
    }

    async fn disconnect(&self, peer: &ConnectionId) {
        // Dropping the sender ends the socket task
        if self.connections.write().await.remove(peer).is_some() {
            tracing::info!("Closing connection {}", peer);
        }
    }
}

/// WebSocket upgrade handler
async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(address): Path<String>,
    State(transport): State<Arc<WsTransport>>,
) -> Response {
    if transport.address().await.as_deref() != Some(address.as_str()) {
        tracing::warn!("Peer asked for unknown address {}", address);
        return StatusCode::NOT_FOUND.into_response();
    }
    ws.on_upgrade(move |socket| handle_socket(socket, transport))
}

/// Pump one peer socket until either side closes it
async fn handle_socket(socket: WebSocket, transport: Arc<WsTransport>) {
    let (mut sender, mut receiver) = socket.split();
    let id = ulid::Ulid::new().to_string();
    let (tx, mut outbound) = mpsc::unbounded_channel::<NetworkMessage>();

    transport.connections.write().await.insert(id.clone(), tx);
    tracing::info!("Peer connected: {}", id);
    transport.emit(TransportEvent::ConnectionOpened(id.clone()));

    loop {
        tokio::select! {
            out = outbound.recv() => {
                let Some(msg) = out else {
                    // Closed from our side
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                };
                match serde_json::to_string(&msg) {
                    Ok(json) => {
                        if sender.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => tracing::error!("Failed to encode {}: {}", msg.kind(), e),
                }
            }

            ws_msg = receiver.next() => {
                match ws_msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<NetworkMessage>(&text) {
                            Ok(msg) => {
                                tracing::debug!("{} from {}", msg.kind(), id);
                                transport.emit(TransportEvent::Message {
                                    peer: id.clone(),
                                    msg,
                                });
                            }
                            Err(e) => {
                                tracing::warn!("Ignoring malformed message from {}: {}", id, e);
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        tracing::info!("Peer {} closed the socket", id);
                        break;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::error!("WebSocket error on {}: {}", id, e);
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    transport.connections.write().await.remove(&id);
    transport.emit(TransportEvent::PeerDisconnected(id.clone()));
    tracing::info!("Peer disconnected: {}", id);
}
