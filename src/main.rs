use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tonedeaf::{
    api::{self, ApiState},
    auth::AuthConfig,
    host::{Collaborators, HostSession},
    llm::{ContentGenerator, LlmConfig, LlmContent, OfflineDeck},
    room::RoomCode,
    store::{HistoryStore, JsonFileStore, MemoryStore, StatsStore},
    transport::{TransportConfig, WsTransport},
    types::{GameConfig, GameState, Player},
};

/// Settings for the host node process
#[derive(Debug, Clone)]
struct ServerConfig {
    bind_addr: SocketAddr,
    /// Base URL players open to join, used for share links
    public_url: Option<String>,
    host_name: String,
    room_code: Option<RoomCode>,
    history_path: Option<String>,
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

impl ServerConfig {
    fn from_env() -> Self {
        let default_addr = SocketAddr::from(([0, 0, 0, 0], 6574));
        let bind_addr = match env_value("BIND_ADDR").map(|s| s.parse::<SocketAddr>()) {
            Some(Ok(addr)) => addr,
            Some(Err(e)) => {
                tracing::warn!("Invalid BIND_ADDR ({}), using {}", e, default_addr);
                default_addr
            }
            None => default_addr,
        };

        let room_code = match env_value("ROOM_CODE").map(|s| s.parse::<RoomCode>()) {
            Some(Ok(code)) => Some(code),
            Some(Err(e)) => {
                tracing::warn!("Ignoring ROOM_CODE: {}", e);
                None
            }
            None => None,
        };

        Self {
            bind_addr,
            public_url: env_value("PUBLIC_URL"),
            host_name: env_value("HOST_NAME").unwrap_or_else(|| "Host".to_string()),
            room_code,
            history_path: env_value("HISTORY_PATH"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env file if present (before any env var reads)
    if let Err(e) = dotenvy::dotenv() {
        // Not an error if .env doesn't exist, only log if it's a different issue
        if !matches!(e, dotenvy::Error::Io(_)) {
            eprintln!("Warning: Failed to load .env file: {}", e);
        }
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tonedeaf=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting tonedeaf host node...");

    let server = ServerConfig::from_env();
    let auth_config = Arc::new(AuthConfig::from_env());
    let game_config = GameConfig::from_env();

    let llm_config = LlmConfig::from_env();
    let content: Arc<dyn ContentGenerator> = match llm_config.build_manager() {
        Ok(manager) => {
            tracing::info!("LLM providers: {:?}", manager.provider_names());
            Arc::new(LlmContent::new(
                manager,
                llm_config.default_timeout,
                llm_config.default_max_tokens,
            ))
        }
        Err(e) => {
            tracing::warn!(
                "Failed to initialize LLM providers: {}. Using the offline scenario deck.",
                e
            );
            Arc::new(OfflineDeck::new())
        }
    };

    let (history, stats): (Arc<dyn HistoryStore>, Arc<dyn StatsStore>) =
        match &server.history_path {
            Some(path) => match JsonFileStore::open(path).await {
                Ok(store) => {
                    let store = Arc::new(store);
                    (store.clone(), store)
                }
                Err(e) => {
                    tracing::error!("Cannot open {}: {}. History will not persist.", path, e);
                    let store = Arc::new(MemoryStore::new());
                    (store.clone(), store)
                }
            },
            None => {
                let store = Arc::new(MemoryStore::new());
                (store.clone(), store)
            }
        };

    let room_code = server
        .room_code
        .clone()
        .unwrap_or_else(|| RoomCode::generate(&mut rand::rng()));
    let host_player = Player::new(
        ulid::Ulid::new().to_string(),
        server.host_name.clone(),
        true,
    );
    let state = GameState::new(room_code.clone(), game_config, host_player);

    let (transport, events) = WsTransport::new(TransportConfig::from_env());
    let (session, handle) = HostSession::new(
        state,
        transport.clone(),
        events,
        Collaborators {
            content,
            history: history.clone(),
            stats: stats.clone(),
        },
    )?;
    let host_task = tokio::spawn(session.run());

    let api_state = Arc::new(ApiState {
        host: handle.clone(),
        history,
        stats,
        public_url: server.public_url.clone(),
    });

    let app = Router::new()
        .merge(transport.router())
        .merge(api::router(api_state, auth_config))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    tracing::info!("Room code: {}", room_code);
    if let Some(url) = server
        .public_url
        .as_deref()
        .and_then(|base| room_code.join_url(base))
    {
        tracing::info!("Join link: {}", url);
    }
    tracing::info!("Listening on http://{}", server.bind_addr);

    let listener = tokio::net::TcpListener::bind(server.bind_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutting down");
            handle.shutdown().await;
        })
        .await?;

    match host_task.await? {
        Ok(last) => tracing::info!(
            "Session ended after {} rounds at {:?}",
            last.history.len(),
            last.version()
        ),
        Err(e) => tracing::error!("Host session failed: {}", e),
    }
    Ok(())
}
