mod config;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    extract::{Query, State, WebSocketUpgrade},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
};
use serde::Deserialize;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use guildhall_api::middleware::{decode_token, require_auth};
use guildhall_api::state::{AppState, AppStateInner, Policy};
use guildhall_api::{alliances, content, feed, guilds, membership, notifications};
use guildhall_gateway::{SessionRegistry, connection};
use guildhall_types::api::Claims;

use crate::config::Config;

#[derive(Clone)]
struct ServerState {
    registry: SessionRegistry,
    jwt_secret: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "guildhall=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;

    // Init database
    let db = Arc::new(guildhall_db::Database::open_with_timeout(
        &config.db_path,
        config.db_busy_timeout,
    )?);

    // Shared state
    let registry = SessionRegistry::new();
    let app_state: AppState = Arc::new(AppStateInner::new(
        db,
        Arc::new(registry.clone()),
        config.jwt_secret.clone(),
        Policy {
            max_allies: config.max_allies,
            feed_max_limit: config.feed_max_limit,
        },
    ));

    let state = ServerState {
        registry,
        jwt_secret: config.jwt_secret.clone(),
    };

    // Routes
    let protected_routes = Router::new()
        .route("/guilds", post(guilds::register_guild))
        .route("/guilds/{guild_id}", get(guilds::get_guild))
        .route("/me/privacy", put(guilds::set_feed_privacy))
        .route(
            "/guilds/{guild_id}/alliances",
            post(alliances::request_alliance).get(alliances::list_alliance_requests),
        )
        .route("/alliances/{alliance_id}/accept", post(alliances::accept_alliance))
        .route("/alliances/{alliance_id}/reject", post(alliances::reject_alliance))
        .route("/guilds/{guild_id}/allies/{ally_id}", delete(alliances::dissolve_alliance))
        .route("/feed", get(feed::get_feed))
        .route("/posts", post(content::create_post))
        .route("/posts/{post_id}", delete(content::delete_post))
        .route("/posts/{post_id}/likes", post(content::like_post).delete(content::unlike_post))
        .route(
            "/posts/{post_id}/comments",
            get(content::list_comments).post(content::create_comment),
        )
        .route("/comments/{comment_id}", delete(content::delete_comment))
        .route("/events", post(content::create_event))
        .route("/events/{event_id}", delete(content::delete_event))
        .route(
            "/events/{event_id}/participants",
            post(content::join_event).delete(content::leave_event),
        )
        .route("/guilds/{guild_id}/membership-requests", post(membership::request_membership))
        .route("/membership-requests/{request_id}", delete(membership::withdraw_membership_request))
        .route("/membership-requests/{request_id}/accept", post(membership::accept_membership_request))
        .route("/notifications", get(notifications::list_notifications))
        .route("/notifications/read", post(notifications::mark_read))
        .layer(middleware::from_fn_with_state(app_state.clone(), require_auth))
        .with_state(app_state);

    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(state);

    let app = Router::new()
        .route("/health", get(health))
        .merge(protected_routes)
        .merge(ws_route)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .layer(TimeoutLayer::new(config.request_timeout));

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("Guildhall server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn health() -> &'static str {
    "ok"
}

#[derive(Debug, Deserialize)]
struct GatewayQuery {
    token: String,
}

/// Validate the token before upgrading; the socket only ever carries pushes
/// for the authenticated user.
async fn ws_upgrade(
    State(state): State<ServerState>,
    Query(query): Query<GatewayQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let claims: Claims = match decode_token(&state.jwt_secret, &query.token) {
        Some(claims) => claims,
        None => {
            warn!("Rejected gateway connection with invalid token");
            return StatusCode::UNAUTHORIZED.into_response();
        }
    };

    ws.on_upgrade(move |socket| {
        connection::handle_connection_authenticated(socket, state.registry, claims.sub, claims.username)
    })
}
