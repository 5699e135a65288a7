//! In-process transport.
//!
//! A [`MemoryNetwork`] plays the role of the signaling/discovery service: it
//! maps room addresses to listening endpoints. Once two endpoints are linked,
//! messages go straight into the remote endpoint's event channel, so a broken
//! signaling layer does not affect connections that are already open.

use super::{Transport, TransportConfig, TransportError, TransportEvent};
use crate::protocol::NetworkMessage;
use crate::room::RoomCode;
use crate::types::ConnectionId;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::mpsc;

/// How often `join` looks for the listener while waiting
const JOIN_POLL: Duration = Duration::from_millis(25);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Shared discovery layer for a set of in-process peers
#[derive(Debug)]
pub struct MemoryNetwork {
    config: TransportConfig,
    listeners: Mutex<HashMap<String, Weak<Endpoint>>>,
    signaling_up: AtomicBool,
}

#[derive(Debug)]
struct Link {
    remote: Weak<Endpoint>,
    /// Our connection id as the remote side knows it
    remote_id: ConnectionId,
}

#[derive(Debug)]
struct Endpoint {
    id: String,
    inbox: mpsc::UnboundedSender<TransportEvent>,
    links: Mutex<HashMap<ConnectionId, Link>>,
    address: Mutex<Option<String>>,
}

impl Endpoint {
    fn emit(&self, event: TransportEvent) -> bool {
        self.inbox.send(event).is_ok()
    }

    /// Tear down one link from this side and tell the remote
    fn unlink(&self, peer: &ConnectionId) {
        let link = lock(&self.links).remove(peer);
        if let Some(link) = link {
            if let Some(remote) = link.remote.upgrade() {
                lock(&remote.links).remove(&link.remote_id);
                remote.emit(TransportEvent::PeerDisconnected(link.remote_id));
            }
        }
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        let links = std::mem::take(
            self.links
                .get_mut()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for (_, link) in links {
            if let Some(remote) = link.remote.upgrade() {
                lock(&remote.links).remove(&link.remote_id);
                remote.emit(TransportEvent::PeerDisconnected(link.remote_id));
            }
        }
    }
}

impl MemoryNetwork {
    pub fn new(config: TransportConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            listeners: Mutex::new(HashMap::new()),
            signaling_up: AtomicBool::new(true),
        })
    }

    /// New unconnected peer on this network, plus the receiver for its events
    pub fn endpoint(
        self: &Arc<Self>,
    ) -> (MemoryTransport, mpsc::UnboundedReceiver<TransportEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let endpoint = Arc::new(Endpoint {
            id: ulid::Ulid::new().to_string(),
            inbox: tx,
            links: Mutex::new(HashMap::new()),
            address: Mutex::new(None),
        });
        (
            MemoryTransport {
                network: Arc::clone(self),
                endpoint,
            },
            rx,
        )
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    fn signaling_up(&self) -> bool {
        self.signaling_up.load(Ordering::SeqCst)
    }

    fn listener(&self, address: &str) -> Option<Arc<Endpoint>> {
        lock(&self.listeners).get(address).and_then(Weak::upgrade)
    }

    /// Simulate losing the signaling service. Listening endpoints are told
    /// and start trying to re-register; open links keep working.
    pub fn drop_signaling(self: &Arc<Self>) {
        if !self.signaling_up.swap(false, Ordering::SeqCst) {
            return;
        }
        tracing::warn!("Signaling service went away");

        let registered: Vec<(String, Weak<Endpoint>)> = lock(&self.listeners).drain().collect();
        for (address, endpoint) in registered {
            if let Some(live) = endpoint.upgrade() {
                live.emit(TransportEvent::SignalingLost);
                self.spawn_reregistration(address, endpoint);
            }
        }
    }

    pub fn restore_signaling(&self) {
        self.signaling_up.store(true, Ordering::SeqCst);
        tracing::info!("Signaling service is back");
    }

    fn spawn_reregistration(self: &Arc<Self>, address: String, endpoint: Weak<Endpoint>) {
        let network = Arc::downgrade(self);
        let retry = self.config.signaling_retry;
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(retry).await;
                let (Some(network), Some(live)) = (network.upgrade(), endpoint.upgrade()) else {
                    break;
                };
                if !network.signaling_up() {
                    tracing::debug!("Signaling still down, retrying {}", address);
                    continue;
                }
                lock(&network.listeners).insert(address.clone(), Arc::downgrade(&live));
                tracing::info!("Re-registered {} with signaling", address);
                live.emit(TransportEvent::SignalingRestored);
                break;
            }
        });
    }
}

/// One peer's handle on a [`MemoryNetwork`]
#[derive(Debug, Clone)]
pub struct MemoryTransport {
    network: Arc<MemoryNetwork>,
    endpoint: Arc<Endpoint>,
}

impl MemoryTransport {
    /// Stable id of this endpoint, handy in logs
    pub fn id(&self) -> &str {
        &self.endpoint.id
    }

    /// Open connection ids
    pub fn peers(&self) -> Vec<ConnectionId> {
        lock(&self.endpoint.links).keys().cloned().collect()
    }

    /// Drop every connection and stop listening, as if the process died
    pub fn close(&self) {
        let peers = self.peers();
        for peer in &peers {
            self.endpoint.unlink(peer);
        }
        if let Some(address) = lock(&self.endpoint.address).take() {
            lock(&self.network.listeners).remove(&address);
        }
        tracing::info!("Endpoint {} closed {} connections", self.endpoint.id, peers.len());
    }

    fn connect(&self, listener: &Arc<Endpoint>) -> ConnectionId {
        // Each side names the connection by its own id
        let at_host = ulid::Ulid::new().to_string();
        let at_joiner = ulid::Ulid::new().to_string();

        lock(&listener.links).insert(
            at_host.clone(),
            Link {
                remote: Arc::downgrade(&self.endpoint),
                remote_id: at_joiner.clone(),
            },
        );
        lock(&self.endpoint.links).insert(
            at_joiner.clone(),
            Link {
                remote: Arc::downgrade(listener),
                remote_id: at_host.clone(),
            },
        );
        listener.emit(TransportEvent::ConnectionOpened(at_host));
        at_joiner
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn host(&self, room: &RoomCode) -> Result<(), TransportError> {
        if !self.network.signaling_up() {
            return Err(TransportError::SignalingUnavailable);
        }
        let address = room.peer_address(&self.network.config.namespace);

        let mut listeners = lock(&self.network.listeners);
        if let Some(existing) = listeners.get(&address).and_then(Weak::upgrade) {
            if !Arc::ptr_eq(&existing, &self.endpoint) {
                return Err(TransportError::AddressInUse(address));
            }
        }
        listeners.insert(address.clone(), Arc::downgrade(&self.endpoint));
        drop(listeners);

        tracing::info!("Endpoint {} listening on {}", self.endpoint.id, address);
        *lock(&self.endpoint.address) = Some(address);
        Ok(())
    }

    async fn join(&self, room: &RoomCode) -> Result<ConnectionId, TransportError> {
        let address = room.peer_address(&self.network.config.namespace);
        let wait = self.network.config.join_timeout;

        let found = tokio::time::timeout(wait, async {
            loop {
                if self.network.signaling_up() {
                    if let Some(listener) = self.network.listener(&address) {
                        return listener;
                    }
                }
                tokio::time::sleep(JOIN_POLL).await;
            }
        })
        .await;

        match found {
            Ok(listener) => {
                let host = self.connect(&listener);
                tracing::info!("Endpoint {} joined {}", self.endpoint.id, address);
                Ok(host)
            }
            Err(_) => {
                tracing::warn!("Nobody answered on {} within {:?}", address, wait);
                Err(TransportError::ConnectionTimeout(address, wait))
            }
        }
    }

    async fn broadcast(&self, msg: &NetworkMessage) {
        for peer in self.peers() {
            if let Err(e) = self.send_to(&peer, msg).await {
                tracing::debug!("Skipping {} in broadcast: {}", peer, e);
            }
        }
    }

    async fn send_to(
        &self,
        peer: &ConnectionId,
        msg: &NetworkMessage,
    ) -> Result<(), TransportError> {
        let (remote, remote_id) = {
            let links = lock(&self.endpoint.links);
            let link = links
                .get(peer)
                .ok_or_else(|| TransportError::UnknownPeer(peer.clone()))?;
            (link.remote.upgrade(), link.remote_id.clone())
        };

        let delivered = remote
            .map(|r| {
                r.emit(TransportEvent::Message {
                    peer: remote_id,
                    msg: msg.clone(),
                })
            })
            .unwrap_or(false);
        if delivered {
            Ok(())
        } else {
            Err(TransportError::ConnectionClosed(peer.clone()))
        }
    }

    async fn disconnect(&self, peer: &ConnectionId) {
        self.endpoint.unlink(peer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn network() -> Arc<MemoryNetwork> {
        MemoryNetwork::new(TransportConfig {
            join_timeout: Duration::from_millis(200),
            signaling_retry: Duration::from_millis(20),
            ..TransportConfig::default()
        })
    }

    fn room() -> RoomCode {
        "AB23".parse().unwrap()
    }

    #[tokio::test]
    async fn test_join_and_exchange_messages() {
        let net = network();
        let (host, mut host_rx) = net.endpoint();
        let (guest, mut guest_rx) = net.endpoint();

        host.host(&room()).await.unwrap();
        let to_host = guest.join(&room()).await.unwrap();

        let from_guest = match host_rx.recv().await {
            Some(TransportEvent::ConnectionOpened(id)) => id,
            other => panic!("unexpected event {:?}", other),
        };

        guest
            .send_to(&to_host, &NetworkMessage::CancelGuess {})
            .await
            .unwrap();
        assert_eq!(
            host_rx.recv().await,
            Some(TransportEvent::Message {
                peer: from_guest.clone(),
                msg: NetworkMessage::CancelGuess {}
            })
        );

        host.broadcast(&NetworkMessage::ResetGame {}).await;
        assert_eq!(
            guest_rx.recv().await,
            Some(TransportEvent::Message {
                peer: to_host,
                msg: NetworkMessage::ResetGame {}
            })
        );
    }

    #[tokio::test]
    async fn test_join_times_out_without_host() {
        let net = network();
        let (guest, _rx) = net.endpoint();
        let result = guest.join(&room()).await;
        assert!(matches!(result, Err(TransportError::ConnectionTimeout(_, _))));
    }

    #[tokio::test]
    async fn test_address_collision() {
        let net = network();
        let (first, _a) = net.endpoint();
        let (second, _b) = net.endpoint();
        first.host(&room()).await.unwrap();
        assert!(matches!(
            second.host(&room()).await,
            Err(TransportError::AddressInUse(_))
        ));
    }

    #[tokio::test]
    async fn test_dropped_peer_reports_disconnect() {
        let net = network();
        let (host, mut host_rx) = net.endpoint();
        host.host(&room()).await.unwrap();

        let (guest, guest_rx) = net.endpoint();
        guest.join(&room()).await.unwrap();
        let conn = match host_rx.recv().await {
            Some(TransportEvent::ConnectionOpened(id)) => id,
            other => panic!("unexpected event {:?}", other),
        };

        drop(guest);
        drop(guest_rx);
        assert_eq!(
            host_rx.recv().await,
            Some(TransportEvent::PeerDisconnected(conn.clone()))
        );
        assert_eq!(
            host.send_to(&conn, &NetworkMessage::ResetGame {}).await,
            Err(TransportError::UnknownPeer(conn))
        );
        // Broadcasting to nobody is fine
        host.broadcast(&NetworkMessage::ResetGame {}).await;
    }

    #[tokio::test]
    async fn test_signaling_loss_and_reregistration() {
        let net = network();
        let (host, mut host_rx) = net.endpoint();
        host.host(&room()).await.unwrap();

        net.drop_signaling();
        assert_eq!(host_rx.recv().await, Some(TransportEvent::SignalingLost));

        let (guest, _guest_rx) = net.endpoint();
        assert!(guest.join(&room()).await.is_err());

        net.restore_signaling();
        assert_eq!(host_rx.recv().await, Some(TransportEvent::SignalingRestored));
        assert!(guest.join(&room()).await.is_ok());
    }
}
