//! HTTP API served by a host node.
//!
//! Read-only views of the session for dashboards and join screens, plus one
//! authenticated endpoint through which the host's own UI issues intents.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::auth::{host_auth_middleware, AuthConfig};
use crate::error::SessionError;
use crate::host::HostHandle;
use crate::protocol::NetworkMessage;
use crate::store::{HistoryStore, StatsRecord, StatsStore};
use crate::types::{GameState, RoundHistory};

/// Rounds returned by `/api/history` when no limit is given
const DEFAULT_HISTORY_LIMIT: usize = 20;
const MAX_HISTORY_LIMIT: usize = 200;

/// Shared state behind the HTTP routes
pub struct ApiState {
    pub host: HostHandle,
    pub history: Arc<dyn HistoryStore>,
    pub stats: Arc<dyn StatsStore>,
    /// Base URL players open to join; join links are built from it
    pub public_url: Option<String>,
}

/// Build the API router. `POST /api/intent` sits behind the bearer check.
pub fn router(state: Arc<ApiState>, auth: Arc<AuthConfig>) -> Router {
    let host_routes = Router::new()
        .route("/api/intent", post(post_intent))
        .layer(middleware::from_fn_with_state(auth, host_auth_middleware));

    Router::new()
        .route("/api/state", get(get_state))
        .route("/api/history", get(get_history))
        .route("/api/stats/{user_id}", get(get_stats))
        .route("/api/join", get(get_join))
        .merge(host_routes)
        .with_state(state)
}

/// Latest committed snapshot.
///
/// GET /api/state
pub async fn get_state(State(state): State<Arc<ApiState>>) -> Json<GameState> {
    Json(state.host.state())
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

/// Most recent rounds across all sessions, newest first.
///
/// GET /api/history?limit=n
pub async fn get_history(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<RoundHistory>>, ApiError> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .min(MAX_HISTORY_LIMIT);
    let rounds = state
        .history
        .query_recent(limit)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(rounds))
}

/// Every award a user has collected.
///
/// GET /api/stats/{user_id}
pub async fn get_stats(
    State(state): State<Arc<ApiState>>,
    Path(user_id): Path<String>,
) -> Result<Json<Vec<StatsRecord>>, ApiError> {
    let records = state
        .stats
        .query_all(&user_id)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(records))
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JoinInfo {
    pub room_code: String,
    pub join_url: Option<String>,
    pub players: usize,
    pub open: bool,
}

/// What a join screen needs: the room code, a shareable link, and whether
/// new players are still let in.
///
/// GET /api/join
pub async fn get_join(State(state): State<Arc<ApiState>>) -> Json<JoinInfo> {
    let snapshot = state.host.state();
    let join_url = state
        .public_url
        .as_deref()
        .and_then(|base| snapshot.room_code.join_url(base));
    Json(JoinInfo {
        room_code: snapshot.room_code.to_string(),
        join_url,
        players: snapshot.players.len(),
        open: snapshot.phase == crate::types::GamePhase::Lobby,
    })
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IntentAccepted {
    pub epoch: u32,
    pub seq: u64,
}

/// Run an intent as the hosting player.
///
/// POST /api/intent
pub async fn post_intent(
    State(state): State<Arc<ApiState>>,
    Json(intent): Json<NetworkMessage>,
) -> Result<Json<IntentAccepted>, ApiError> {
    let kind = intent.kind();
    match state.host.dispatch(intent).await {
        Ok((epoch, seq)) => Ok(Json(IntentAccepted { epoch, seq })),
        Err(SessionError::Validation(e)) => {
            tracing::warn!("Host UI sent {} that was rejected: {}", kind, e);
            Err(ApiError::Rejected(e.to_string()))
        }
        Err(e) => Err(ApiError::Unavailable(e.to_string())),
    }
}

/// Error responses for the API
#[derive(Debug)]
pub enum ApiError {
    Rejected(String),
    Unavailable(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Rejected(m) => (StatusCode::UNPROCESSABLE_ENTITY, m),
            ApiError::Unavailable(m) => (StatusCode::SERVICE_UNAVAILABLE, m),
            ApiError::Internal(m) => {
                tracing::error!("API failure: {}", m);
                (StatusCode::INTERNAL_SERVER_ERROR, m)
            }
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{Collaborators, HostSession};
    use crate::llm::OfflineDeck;
    use crate::store::MemoryStore;
    use crate::transport::{MemoryNetwork, Transport, TransportConfig};
    use crate::types::{Award, GameConfig, GamePhase, Player, Role, Winner};

    fn api() -> Arc<ApiState> {
        let network = MemoryNetwork::new(TransportConfig::default());
        let (transport, events) = network.endpoint();
        let store = Arc::new(MemoryStore::new());
        let host = Player::new("h".into(), "Host".into(), true);
        let state = GameState::new("AB23".parse().unwrap(), GameConfig::default(), host);
        let (session, handle) = HostSession::new(
            state,
            Arc::new(transport) as Arc<dyn Transport>,
            events,
            Collaborators {
                content: Arc::new(OfflineDeck::new()),
                history: store.clone(),
                stats: store.clone(),
            },
        )
        .unwrap();
        tokio::spawn(session.run());

        Arc::new(ApiState {
            host: handle,
            history: store.clone(),
            stats: store,
            public_url: Some("https://party.example/".into()),
        })
    }

    #[tokio::test]
    async fn test_join_info() {
        let state = api();
        let Json(info) = get_join(State(state)).await;
        assert_eq!(info.room_code, "AB23");
        assert_eq!(
            info.join_url.as_deref(),
            Some("https://party.example/?code=AB23")
        );
        assert_eq!(info.players, 1);
        assert!(info.open);
    }

    #[tokio::test]
    async fn test_intent_accepted_and_rejected() {
        let state = api();
        let accepted = post_intent(
            State(state.clone()),
            Json(NetworkMessage::SubmitTopic {
                player_id: "h".into(),
                topic: "Road trips".into(),
            }),
        )
        .await
        .unwrap();
        assert!(accepted.seq >= 1);

        let Json(snapshot) = get_state(State(state.clone())).await;
        assert_eq!(snapshot.phase, GamePhase::Lobby);
        assert_eq!(snapshot.player("h").unwrap().topic_suggestion, "Road trips");

        let rejected = post_intent(State(state), Json(NetworkMessage::StartGame {})).await;
        assert!(matches!(rejected, Err(ApiError::Rejected(_))));
    }

    #[tokio::test]
    async fn test_history_and_stats() {
        let state = api();
        state
            .history
            .save(&RoundHistory {
                id: "r1".into(),
                topic: "Road trips".into(),
                winner: Winner::Team(Role::ToneDeaf),
                timestamp: chrono::Utc::now().to_rfc3339(),
            })
            .await
            .unwrap();
        state
            .stats
            .save_award("p2", &Award::participation(), "Road trips")
            .await
            .unwrap();

        let Json(rounds) = get_history(State(state.clone()), Query(HistoryQuery { limit: None }))
            .await
            .unwrap();
        assert_eq!(rounds.len(), 1);

        let Json(records) = get_stats(State(state), Path("p2".to_string()))
            .await
            .unwrap();
        assert_eq!(records[0].context, "Road trips");
    }
}
