//! The mirroring side of a game session.
//!
//! A client never runs game logic. It sends intents to the host and replaces
//! its local copy with every newer snapshot the host broadcasts. When the host
//! connection breaks, the session ends and hands back everything needed to
//! either take over hosting or rejoin whoever did.

use crate::error::SessionError;
use crate::host::{Collaborators, HostHandle, HostSession};
use crate::protocol::NetworkMessage;
use crate::replica::{ApplyOutcome, Replica};
use crate::room::RoomCode;
use crate::state::{elect_successor, OutcomeTracker};
use crate::transport::{Transport, TransportError, TransportEvent};
use crate::types::*;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

enum ClientCommand {
    Send(NetworkMessage),
    Leave,
}

/// Why a client session stopped
#[derive(Debug, Clone, PartialEq)]
pub enum ClientExit {
    /// The host refused or removed us
    Rejected,
    /// The host connection broke while we were in the game
    HostLost {
        last_state: GameState,
        successor: Option<PlayerId>,
    },
    /// We left on our own
    Left,
}

/// Handle for the UI side of a client: send intents, watch the mirror
#[derive(Clone)]
pub struct ClientHandle {
    player_id: PlayerId,
    commands: mpsc::Sender<ClientCommand>,
    state: watch::Receiver<Option<GameState>>,
}

impl ClientHandle {
    pub fn player_id(&self) -> &PlayerId {
        &self.player_id
    }

    /// Latest applied snapshot
    pub fn state(&self) -> Option<GameState> {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<GameState>> {
        self.state.clone()
    }

    /// Forward an intent to the host. Whether it took effect shows up in the
    /// next snapshot.
    pub async fn send(&self, intent: NetworkMessage) -> Result<(), SessionError> {
        self.commands
            .send(ClientCommand::Send(intent))
            .await
            .map_err(|_| closed())
    }

    pub async fn leave(&self) {
        let _ = self.commands.send(ClientCommand::Leave).await;
    }
}

fn closed() -> SessionError {
    SessionError::Connection(TransportError::ConnectionClosed("client session".to_string()))
}

pub struct ClientSession {
    player_id: PlayerId,
    name: String,
    room: RoomCode,
    transport: Arc<dyn Transport>,
    events: mpsc::UnboundedReceiver<TransportEvent>,
    host: ConnectionId,
    replica: Replica,
    outcomes: OutcomeTracker,
    commands: mpsc::Receiver<ClientCommand>,
    publish: watch::Sender<Option<GameState>>,
    /// Set once a snapshot listed us on the roster
    admitted: bool,
    /// The host announced it is closing our connection
    dismissed: bool,
}

/// What is left of a client session after it stopped
pub struct Disconnected {
    pub exit: ClientExit,
    pub player_id: PlayerId,
    pub name: String,
    pub room: RoomCode,
    pub outcomes: OutcomeTracker,
    pub transport: Arc<dyn Transport>,
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
}

impl ClientSession {
    /// Dial the host of `room` and ask to join as `player_id`
    pub async fn connect(
        transport: Arc<dyn Transport>,
        events: mpsc::UnboundedReceiver<TransportEvent>,
        room: RoomCode,
        player_id: PlayerId,
        name: String,
    ) -> Result<(Self, ClientHandle), SessionError> {
        Self::connect_with(
            transport,
            events,
            room,
            player_id,
            name,
            Replica::new(SessionRole::Client),
            OutcomeTracker::new(),
        )
        .await
    }

    async fn connect_with(
        transport: Arc<dyn Transport>,
        events: mpsc::UnboundedReceiver<TransportEvent>,
        room: RoomCode,
        player_id: PlayerId,
        name: String,
        replica: Replica,
        outcomes: OutcomeTracker,
    ) -> Result<(Self, ClientHandle), SessionError> {
        let host = transport.join(&room).await?;
        transport
            .send_to(
                &host,
                &NetworkMessage::JoinRequest {
                    name: name.clone(),
                    player_id: player_id.clone(),
                },
            )
            .await?;
        tracing::info!("Joined room {} as {}", room, player_id);

        let (commands_tx, commands) = mpsc::channel(32);
        let (publish, state_rx) = watch::channel(replica.state().cloned());
        let handle = ClientHandle {
            player_id: player_id.clone(),
            commands: commands_tx,
            state: state_rx,
        };
        let session = Self {
            player_id,
            name,
            room,
            transport,
            events,
            host,
            replica,
            outcomes,
            commands,
            publish,
            admitted: false,
            dismissed: false,
        };
        Ok((session, handle))
    }

    /// Mirror the host until the connection ends
    pub async fn run(mut self) -> Disconnected {
        let exit = loop {
            tokio::select! {
                event = self.events.recv() => match event {
                    Some(event) => {
                        if let Some(exit) = self.on_event(event) {
                            break exit;
                        }
                    }
                    None => break self.host_gone(),
                },
                Some(command) = self.commands.recv() => match command {
                    ClientCommand::Send(intent) => {
                        if let Err(e) = self.transport.send_to(&self.host, &intent).await {
                            tracing::warn!("Could not send {}: {}", intent.kind(), e);
                        }
                    }
                    ClientCommand::Leave => {
                        self.transport.disconnect(&self.host).await;
                        break ClientExit::Left;
                    }
                },
            }
        };

        tracing::info!("Client {} left room {}: {:?}", self.player_id, self.room, exit_kind(&exit));
        Disconnected {
            exit,
            player_id: self.player_id,
            name: self.name,
            room: self.room,
            outcomes: self.outcomes,
            transport: self.transport,
            events: self.events,
        }
    }

    fn on_event(&mut self, event: TransportEvent) -> Option<ClientExit> {
        match event {
            TransportEvent::Message { peer, msg } if peer == self.host => match msg {
                NetworkMessage::StateUpdate { state } => {
                    self.on_snapshot(*state);
                    None
                }
                NetworkMessage::SessionClosed { reason } => {
                    tracing::info!("Host is closing our connection: {}", reason);
                    self.dismissed = true;
                    None
                }
                other => {
                    tracing::debug!("Ignoring {} from host", other.kind());
                    None
                }
            },
            TransportEvent::Message { peer, msg } => {
                tracing::debug!("Ignoring {} from non-host {}", msg.kind(), peer);
                None
            }
            TransportEvent::PeerDisconnected(peer) if peer == self.host => Some(self.host_gone()),
            TransportEvent::PeerDisconnected(_) | TransportEvent::ConnectionOpened(_) => None,
            TransportEvent::SignalingLost => {
                tracing::warn!("Lost signaling; the host link stays up");
                None
            }
            TransportEvent::SignalingRestored => None,
        }
    }

    fn on_snapshot(&mut self, state: GameState) {
        match self.replica.apply(state) {
            Ok(ApplyOutcome::Applied) => {}
            Ok(ApplyOutcome::IgnoredByHost) => return,
            Err(stale) => {
                tracing::debug!("{}", stale);
                return;
            }
        }
        let Some(state) = self.replica.state() else {
            return;
        };

        if state.player(&self.player_id).is_some() {
            self.admitted = true;
        }
        if let Some(won) = self.outcomes.observe(state, &self.player_id) {
            tracing::info!(
                "Game over for {}: {} ({}W/{}L)",
                self.player_id,
                if won { "won" } else { "lost" },
                self.outcomes.wins,
                self.outcomes.losses
            );
        }
        self.publish.send_replace(Some(state.clone()));
    }

    fn host_gone(&self) -> ClientExit {
        let last_state = self.replica.state().cloned();
        match last_state {
            // Still on the roster when the host vanished: the game goes on
            Some(last_state)
                if self.admitted
                    && !self.dismissed
                    && last_state.player(&self.player_id).is_some() =>
            {
                let successor = last_state
                    .host_id()
                    .and_then(|host| elect_successor(&last_state, host));
                ClientExit::HostLost {
                    last_state,
                    successor,
                }
            }
            _ => ClientExit::Rejected,
        }
    }
}

fn exit_kind(exit: &ClientExit) -> &'static str {
    match exit {
        ClientExit::Rejected => "rejected",
        ClientExit::HostLost { .. } => "host lost",
        ClientExit::Left => "left",
    }
}

impl Disconnected {
    /// Whether this peer was elected to host after the old host vanished
    pub fn should_host(&self) -> bool {
        matches!(&self.exit, ClientExit::HostLost { successor: Some(id), .. } if *id == self.player_id)
    }

    /// Take over the session from the last mirrored state.
    ///
    /// The returned session still has to be `run`; it reclaims the room
    /// address, so rejoining peers find it.
    pub fn promote(self, collaborators: Collaborators) -> Result<(HostSession, HostHandle), SessionError> {
        let ClientExit::HostLost { mut last_state, .. } = self.exit else {
            return Err(SessionError::Connection(TransportError::Unsupported(
                "promotion without a lost host",
            )));
        };

        let mut rng = StdRng::from_rng(&mut rand::rng());
        let effects = last_state.promote(&self.player_id, &mut rng)?;
        let (session, handle) =
            HostSession::new(last_state, self.transport, self.events, collaborators)?;
        Ok((
            session
                .with_startup_effects(effects)
                .with_outcomes(self.outcomes),
            handle,
        ))
    }

    /// Reconnect to whoever hosts the room now. The mirror keeps its last
    /// version, so snapshots from before the handover are still rejected.
    pub async fn rejoin(self) -> Result<(ClientSession, ClientHandle), SessionError> {
        let replica = match self.exit {
            ClientExit::HostLost { last_state, .. } => {
                Replica::with_state(SessionRole::Client, last_state)
            }
            _ => Replica::new(SessionRole::Client),
        };
        ClientSession::connect_with(
            self.transport,
            self.events,
            self.room,
            self.player_id,
            self.name,
            replica,
            self.outcomes,
        )
        .await
    }
}
