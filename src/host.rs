//! The host session actor.
//!
//! One task owns the authoritative [`GameState`] and processes its inputs one
//! at a time: transport events, intents issued locally through a
//! [`HostHandle`], and results of background jobs (scenario generation, topic
//! checks, awards). Jobs run as separate tasks so a slow content call never
//! stops the host from handling other messages; each job carries an id and a
//! result for a job that is no longer wanted is dropped.

use crate::error::{IntentError, SessionError};
use crate::llm::ContentGenerator;
use crate::protocol::NetworkMessage;
use crate::state::{Effect, OutcomeTracker};
use crate::store::{HistoryStore, StatsStore};
use crate::transport::{Transport, TransportError, TransportEvent};
use crate::types::*;
use rand::{rngs::StdRng, SeedableRng};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};

/// External services the host calls out to
#[derive(Clone)]
pub struct Collaborators {
    pub content: Arc<dyn ContentGenerator>,
    pub history: Arc<dyn HistoryStore>,
    pub stats: Arc<dyn StatsStore>,
}

enum HostCommand {
    Intent {
        actor: PlayerId,
        intent: NetworkMessage,
        reply: oneshot::Sender<Result<(u32, u64), IntentError>>,
    },
    Shutdown,
}

type JobId = u64;

#[derive(Debug)]
enum JobOutcome {
    Scenarios(Result<Scenarios, String>),
    Verdict(Result<bool, String>),
    Awards {
        history_id: HistoryId,
        result: Result<HashMap<PlayerId, Award>, String>,
    },
}

#[derive(Debug)]
struct JobDone {
    id: JobId,
    outcome: JobOutcome,
}

/// Jobs whose results the state machine is still waiting for
#[derive(Debug, Default)]
struct PendingJobs {
    generation: Option<JobId>,
    verification: Option<JobId>,
    awards: Option<JobId>,
}

/// Cheap handle for issuing intents to a running host and watching its state
#[derive(Clone)]
pub struct HostHandle {
    host_id: PlayerId,
    commands: mpsc::Sender<HostCommand>,
    state: watch::Receiver<GameState>,
    outcomes: watch::Receiver<OutcomeTracker>,
}

impl HostHandle {
    /// The hosting player's id
    pub fn host_id(&self) -> &PlayerId {
        &self.host_id
    }

    /// Latest committed state
    pub fn state(&self) -> GameState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<GameState> {
        self.state.clone()
    }

    /// The hosting player's own win/loss record
    pub fn outcomes(&self) -> OutcomeTracker {
        self.outcomes.borrow().clone()
    }

    /// Run an intent as the hosting player
    pub async fn dispatch(&self, intent: NetworkMessage) -> Result<(u32, u64), SessionError> {
        self.dispatch_as(self.host_id.clone(), intent).await
    }

    /// Run an intent on behalf of `actor`. Returns the committed version.
    pub async fn dispatch_as(
        &self,
        actor: PlayerId,
        intent: NetworkMessage,
    ) -> Result<(u32, u64), SessionError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(HostCommand::Intent {
                actor,
                intent,
                reply,
            })
            .await
            .map_err(|_| closed())?;
        let version = rx.await.map_err(|_| closed())??;
        Ok(version)
    }

    /// Stop the session. The host's connections close with it.
    pub async fn shutdown(&self) {
        let _ = self.commands.send(HostCommand::Shutdown).await;
    }
}

fn closed() -> SessionError {
    SessionError::Connection(TransportError::ConnectionClosed("host session".to_string()))
}

/// The authoritative side of a game session
pub struct HostSession {
    state: GameState,
    transport: Arc<dyn Transport>,
    events: mpsc::UnboundedReceiver<TransportEvent>,
    commands: mpsc::Receiver<HostCommand>,
    publish: watch::Sender<GameState>,
    jobs_tx: mpsc::UnboundedSender<JobDone>,
    jobs_rx: mpsc::UnboundedReceiver<JobDone>,
    next_job: JobId,
    pending: PendingJobs,
    /// Which player each open connection speaks for
    connections: HashMap<ConnectionId, PlayerId>,
    collaborators: Collaborators,
    startup: Vec<Effect>,
    rng: StdRng,
    outcomes: OutcomeTracker,
    publish_outcomes: watch::Sender<OutcomeTracker>,
}

impl HostSession {
    /// Wrap `state` in a host actor. The state must name a host player.
    pub fn new(
        state: GameState,
        transport: Arc<dyn Transport>,
        events: mpsc::UnboundedReceiver<TransportEvent>,
        collaborators: Collaborators,
    ) -> Result<(Self, HostHandle), SessionError> {
        let host_id = state
            .host_id()
            .cloned()
            .ok_or(SessionError::Validation(IntentError::NotHost("host a session")))?;

        let (commands_tx, commands) = mpsc::channel(64);
        let (publish, state_rx) = watch::channel(state.clone());
        let (jobs_tx, jobs_rx) = mpsc::unbounded_channel();
        let (publish_outcomes, outcomes_rx) = watch::channel(OutcomeTracker::new());

        let session = Self {
            state,
            transport,
            events,
            commands,
            publish,
            jobs_tx,
            jobs_rx,
            next_job: 0,
            pending: PendingJobs::default(),
            connections: HashMap::new(),
            collaborators,
            startup: Vec::new(),
            rng: StdRng::from_rng(&mut rand::rng()),
            outcomes: OutcomeTracker::new(),
            publish_outcomes,
        };
        let handle = HostHandle {
            host_id,
            commands: commands_tx,
            state: state_rx,
            outcomes: outcomes_rx,
        };
        Ok((session, handle))
    }

    /// Effects to run as soon as the session starts, e.g. from a promotion
    pub fn with_startup_effects(mut self, effects: Vec<Effect>) -> Self {
        self.startup = effects;
        self
    }

    /// Carry over a win/loss record, e.g. the one a promoted client kept
    pub fn with_outcomes(mut self, outcomes: OutcomeTracker) -> Self {
        self.publish_outcomes.send_replace(outcomes.clone());
        self.outcomes = outcomes;
        self
    }

    /// Deterministic randomness for tests
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Listen on the room address and serve until shut down.
    /// Returns the final state.
    pub async fn run(mut self) -> Result<GameState, SessionError> {
        self.transport.host(&self.state.room_code).await?;
        tracing::info!(
            "Hosting room {} as {} (epoch {})",
            self.state.room_code,
            self.host_id(),
            self.state.epoch
        );

        // Publish the starting point and pick up anything a previous host left
        let before = self.state.clone();
        let startup = std::mem::take(&mut self.startup);
        self.finish(before, startup, true).await;

        loop {
            tokio::select! {
                Some(event) = self.events.recv() => self.on_event(event).await,
                Some(done) = self.jobs_rx.recv() => self.on_job(done).await,
                Some(command) = self.commands.recv() => match command {
                    HostCommand::Intent { actor, intent, reply } => {
                        let result = self.on_intent(&actor, intent).await;
                        let _ = reply.send(result);
                    }
                    HostCommand::Shutdown => break,
                },
                else => break,
            }
        }

        tracing::info!("Host session for room {} ended", self.state.room_code);
        Ok(self.state)
    }

    fn host_id(&self) -> PlayerId {
        self.state.host_id().cloned().unwrap_or_default()
    }

    async fn on_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::ConnectionOpened(conn) => {
                // Seed the newcomer before anything else
                let seed = NetworkMessage::state_update(&self.state);
                if let Err(e) = self.transport.send_to(&conn, &seed).await {
                    tracing::warn!("Could not seed {}: {}", conn, e);
                }
            }
            TransportEvent::Message { peer, msg } => self.on_message(peer, msg).await,
            TransportEvent::PeerDisconnected(conn) => self.on_disconnect(conn).await,
            TransportEvent::SignalingLost => {
                tracing::warn!("Lost signaling; open connections stay up, new joins will wait")
            }
            TransportEvent::SignalingRestored => tracing::info!("Signaling restored"),
        }
    }

    async fn on_message(&mut self, peer: ConnectionId, msg: NetworkMessage) {
        match msg {
            NetworkMessage::JoinRequest { name, player_id } => {
                self.on_join(peer, player_id, name).await
            }
            NetworkMessage::StateUpdate { state } => {
                tracing::debug!(
                    "Ignoring snapshot {:?} from {}; this peer is the host",
                    state.version(),
                    peer
                );
            }
            intent => {
                let Some(actor) = self.connections.get(&peer).cloned() else {
                    tracing::warn!("{} from {} rejected: {}", intent.kind(), peer, IntentError::NotJoined);
                    return;
                };
                let kind = intent.kind();
                if let Err(e) = self.on_intent(&actor, intent).await {
                    tracing::warn!("{} from {} rejected: {}", kind, actor, e);
                }
            }
        }
    }

    async fn on_join(&mut self, peer: ConnectionId, player_id: PlayerId, name: String) {
        if let Some(bound) = self.connections.get(&peer) {
            if bound != &player_id {
                tracing::warn!(
                    "{}",
                    IntentError::Impersonation {
                        bound: bound.clone(),
                        claimed: player_id
                    }
                );
            }
            return;
        }
        if player_id == self.host_id() {
            tracing::warn!("Connection {} claimed the host's id", peer);
            self.dismiss(&peer, "That player id belongs to the host.").await;
            return;
        }

        let before = self.state.clone();
        match self.state.add_player(player_id.clone(), name) {
            Ok(outcome) => {
                // A player has one live connection; an older one is stale
                let stale: Vec<ConnectionId> = self
                    .connections
                    .iter()
                    .filter(|(_, id)| **id == player_id)
                    .map(|(conn, _)| conn.clone())
                    .collect();
                for conn in stale {
                    self.connections.remove(&conn);
                    self.dismiss(&conn, "Signed in from another connection.").await;
                }
                self.connections.insert(peer.clone(), player_id.clone());
                tracing::info!("Connection {} is {} ({:?})", peer, player_id, outcome);

                let force = outcome == crate::state::JoinOutcome::Joined;
                self.finish(before, Vec::new(), force).await;
                if !force {
                    let snapshot = NetworkMessage::state_update(&self.state);
                    if let Err(e) = self.transport.send_to(&peer, &snapshot).await {
                        tracing::warn!("Could not resync {}: {}", player_id, e);
                    }
                }
            }
            Err(e) => {
                tracing::warn!("Join from {} ({}) refused: {}", peer, player_id, e);
                self.dismiss(&peer, &e.to_string()).await;
            }
        }
    }

    async fn on_disconnect(&mut self, conn: ConnectionId) {
        let Some(player_id) = self.connections.remove(&conn) else {
            tracing::debug!("Unjoined connection {} closed", conn);
            return;
        };
        if self.connections.values().any(|id| *id == player_id) {
            // Already reconnected on another connection
            return;
        }

        let before = self.state.clone();
        if let Some(effects) = self.state.remove_player(&player_id, &mut self.rng) {
            self.finish(before, effects, false).await;
        }
    }

    /// Validate and run one intent. On error the state is left untouched and
    /// nothing is broadcast.
    async fn on_intent(
        &mut self,
        actor: &PlayerId,
        intent: NetworkMessage,
    ) -> Result<(u32, u64), IntentError> {
        let kicked = match &intent {
            NetworkMessage::KickPlayer { player_id } => Some(player_id.clone()),
            _ => None,
        };

        let before = self.state.clone();
        let effects = match self.state.apply_intent(actor, intent, &mut self.rng) {
            Ok(effects) => effects,
            Err(e) => {
                self.state = before;
                return Err(e);
            }
        };

        // Closed only after the snapshot without them went out
        let kicked_conns: Vec<ConnectionId> = match &kicked {
            Some(kicked) => self
                .connections
                .iter()
                .filter(|(_, id)| *id == kicked)
                .map(|(conn, _)| conn.clone())
                .collect(),
            None => Vec::new(),
        };
        for conn in &kicked_conns {
            self.connections.remove(conn);
        }

        self.finish(before, effects, true).await;

        for conn in &kicked_conns {
            self.dismiss(conn, "Removed by the host.").await;
        }
        Ok(self.state.version())
    }

    /// Tell a peer why the host is dropping it, then drop it
    async fn dismiss(&self, conn: &ConnectionId, reason: &str) {
        let notice = NetworkMessage::SessionClosed {
            reason: reason.to_string(),
        };
        if let Err(e) = self.transport.send_to(conn, &notice).await {
            tracing::debug!("Could not notify {} before closing: {}", conn, e);
        }
        self.transport.disconnect(conn).await;
    }

    async fn on_job(&mut self, done: JobDone) {
        let before = self.state.clone();
        let mut effects = Vec::new();

        match done.outcome {
            JobOutcome::Scenarios(result) => {
                if self.pending.generation != Some(done.id) {
                    tracing::debug!("Dropping scenarios from superseded job {}", done.id);
                    return;
                }
                self.pending.generation = None;
                self.state.complete_generation(result, &mut self.rng);
            }
            JobOutcome::Verdict(result) => {
                if self.pending.verification != Some(done.id) {
                    tracing::debug!("Dropping verdict from superseded job {}", done.id);
                    return;
                }
                self.pending.verification = None;
                effects.extend(self.state.complete_verification(result));
            }
            JobOutcome::Awards { history_id, result } => {
                if self.pending.awards == Some(done.id) {
                    self.pending.awards = None;
                }
                let awards = match result {
                    Ok(awards) => awards,
                    Err(e) => {
                        tracing::warn!("Award generation failed, showing none: {}", e);
                        HashMap::new()
                    }
                };
                if self.state.attach_awards(&history_id, awards.clone()) {
                    self.persist_awards(awards);
                } else {
                    tracing::debug!("Awards for {} arrived after the result moved on", history_id);
                }
            }
        }

        self.finish(before, effects, false).await;
    }

    /// Re-drive stalled transitions, start jobs, and broadcast if anything
    /// changed (or unconditionally when `force` is set).
    async fn finish(&mut self, before: GameState, mut effects: Vec<Effect>, force: bool) {
        effects.extend(self.state.drive_stuck(&mut self.rng));
        self.run_effects(effects);

        if let Some(work) = self.unclaimed_work() {
            tracing::info!("Restarting interrupted work during {:?}", self.state.phase);
            self.run_effects(vec![work]);
        }

        if force || self.state != before {
            self.commit().await;
        }
    }

    /// Background work the phase needs but that no job is running for
    fn unclaimed_work(&mut self) -> Option<Effect> {
        match self.state.pending_work(&mut self.rng)? {
            work @ Effect::GenerateScenarios { .. } if self.pending.generation.is_none() => {
                Some(work)
            }
            work @ Effect::VerifyTopic { .. } if self.pending.verification.is_none() => Some(work),
            _ => None,
        }
    }

    /// Bump the sequence number, publish locally and broadcast the snapshot
    async fn commit(&mut self) {
        self.state.seq += 1;
        self.publish.send_replace(self.state.clone());
        self.transport
            .broadcast(&NetworkMessage::state_update(&self.state))
            .await;

        let host_id = self.host_id();
        if let Some(won) = self.outcomes.observe(&self.state, &host_id) {
            tracing::info!(
                "Game over for host {}: {} ({}W/{}L)",
                host_id,
                if won { "won" } else { "lost" },
                self.outcomes.wins,
                self.outcomes.losses
            );
            self.publish_outcomes.send_replace(self.outcomes.clone());
        }
        tracing::debug!(
            "Committed {:?} in {:?}",
            self.state.version(),
            self.state.phase
        );
    }

    fn job_id(&mut self) -> JobId {
        self.next_job += 1;
        self.next_job
    }

    fn run_effects(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::GenerateScenarios { topic_hint } => {
                    let id = self.job_id();
                    self.pending.generation = Some(id);
                    let content = Arc::clone(&self.collaborators.content);
                    let jobs = self.jobs_tx.clone();
                    tokio::spawn(async move {
                        let result = content
                            .generate_scenarios(topic_hint.as_deref())
                            .await
                            .map_err(|e| SessionError::Generation(e).to_string());
                        let _ = jobs.send(JobDone {
                            id,
                            outcome: JobOutcome::Scenarios(result),
                        });
                    });
                }
                Effect::VerifyTopic { topic, guess } => {
                    let id = self.job_id();
                    self.pending.verification = Some(id);
                    let content = Arc::clone(&self.collaborators.content);
                    let jobs = self.jobs_tx.clone();
                    tokio::spawn(async move {
                        let result = content
                            .verify_topic_guess(&topic, &guess)
                            .await
                            .map_err(|e| SessionError::Verification(e).to_string());
                        let _ = jobs.send(JobDone {
                            id,
                            outcome: JobOutcome::Verdict(result),
                        });
                    });
                }
                Effect::RoundFinished { entry } => {
                    self.persist_round(entry.clone());
                    self.request_awards(entry);
                }
            }
        }
    }

    fn persist_round(&self, entry: RoundHistory) {
        let history = Arc::clone(&self.collaborators.history);
        tokio::spawn(async move {
            if let Err(e) = history.save(&entry).await {
                tracing::error!("Failed to save round {}: {}", entry.id, e);
            }
        });
    }

    fn request_awards(&mut self, entry: RoundHistory) {
        let Some(scenarios) = self.state.scenarios.clone() else {
            return;
        };
        let id = self.job_id();
        self.pending.awards = Some(id);
        let players = self.state.players.clone();
        let content = Arc::clone(&self.collaborators.content);
        let jobs = self.jobs_tx.clone();
        tokio::spawn(async move {
            let winner = entry.winner.to_string();
            let result = content
                .generate_awards(&players, &scenarios, &winner)
                .await
                .map_err(|e| e.to_string());
            let _ = jobs.send(JobDone {
                id,
                outcome: JobOutcome::Awards {
                    history_id: entry.id,
                    result,
                },
            });
        });
    }

    fn persist_awards(&self, awards: HashMap<PlayerId, Award>) {
        if awards.is_empty() {
            return;
        }
        let context = self
            .state
            .scenarios
            .as_ref()
            .map(|s| s.topic.clone())
            .unwrap_or_default();
        let stats = Arc::clone(&self.collaborators.stats);
        tokio::spawn(async move {
            for (user_id, award) in awards {
                if let Err(e) = stats.save_award(&user_id, &award, &context).await {
                    tracing::error!("Failed to save award for {}: {}", user_id, e);
                }
            }
        });
    }
}
