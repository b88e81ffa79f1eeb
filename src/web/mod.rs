use axum::{
    Router,
    routing::{any, get, post},
};
use http::HeaderValue;
use std::{net::SocketAddr, sync::Arc};
use tokio::time::Duration as TokioDuration;
use tower_governor::{GovernorLayer, governor::GovernorConfigBuilder};
use tower_http::compression::CompressionLevel;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};

use crate::config::ServerConfig;
use crate::error::Result as AppResult;
use crate::state::AppState;

pub mod error;
pub mod handlers;
pub mod ws;

pub use self::error::WebError;

const RATE_LIMIT_PER_MS: u64 = 500;
const RATE_LIMIT_BURST: u32 = 30;

/// HTTP and WebSocket routes without the transport layers.
pub fn api_routes(app_state: AppState) -> Router {
    Router::new()
        .route("/api/rooms", post(handlers::create_room_handler))
        .route("/api/rooms/{code}", get(handlers::get_room_handler))
        .route("/api/words", get(handlers::words_handler))
        .route("/api/health", get(handlers::health_handler))
        .route("/ws", any(ws::ws_handler))
        .with_state(app_state)
}

fn cors_layer(server_config: &ServerConfig) -> CorsLayer {
    let cors_origins: Vec<HeaderValue> = server_config
        .cors_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::error!(cors.origin = %origin, error = %e, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    if cors_origins.is_empty() {
        tracing::info!("Restrictive CORS policy applied (no origins configured)");
        return CorsLayer::new();
    }

    tracing::info!(
        cors.origins.count = cors_origins.len(),
        "CORS configured with allowed origins"
    );
    CorsLayer::new()
        .allow_methods(vec![http::Method::GET, http::Method::POST])
        .allow_origin(cors_origins)
        .allow_headers(vec![http::header::CONTENT_TYPE, http::header::ACCEPT])
}

#[tracing::instrument(skip(app_state, server_config), fields(
    server.port = server_config.port,
    cors.origins.count = server_config.cors_origins.len()
))]
pub async fn run_server(app_state: AppState, server_config: ServerConfig) -> AppResult<()> {
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_millisecond(RATE_LIMIT_PER_MS)
            .burst_size(RATE_LIMIT_BURST)
            .finish()
            .ok_or_else(|| WebError::RateLimiterConfig("invalid rate limit settings".to_string()))?,
    );
    tracing::info!(
        rate_limit.per_ms = RATE_LIMIT_PER_MS,
        rate_limit.burst_size = RATE_LIMIT_BURST,
        "Rate limiter configured"
    );

    let governor_limiter = governor_conf.limiter().clone();
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(TokioDuration::from_secs(60)).await;
            let limiter_size = governor_limiter.len();
            if limiter_size > 1_000_000 {
                tracing::warn!(
                    rate_limiter.storage_size = limiter_size,
                    "Rate limiting storage size is large"
                );
            }
            governor_limiter.retain_recent();
        }
    });

    let app = api_routes(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CompressionLayer::new()
                .quality(CompressionLevel::Default)
                .gzip(true),
        )
        .layer(GovernorLayer {
            config: governor_conf,
        })
        .layer(cors_layer(&server_config));

    let addr = SocketAddr::from(([0, 0, 0, 0], server_config.port));
    tracing::info!(server.address = %addr, "HTTP server starting");

    axum::serve(
        tokio::net::TcpListener::bind(addr).await?,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GameConfig;
    use crate::registry::RoomRegistryHandle;
    use axum::body::Body;
    use axum::http::{Method, Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn test_app() -> Router {
        let game_config = Arc::new(GameConfig::default());
        api_routes(AppState {
            room_registry: RoomRegistryHandle::spawn(8, Arc::clone(&game_config)),
            game_config,
        })
    }

    async fn json_body(res: axum::response::Response) -> serde_json::Value {
        let bytes = res.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_created_room_can_be_fetched() {
        let app = test_app();
        let res = app
            .clone()
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/api/rooms")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let code = json_body(res).await["roomCode"].as_str().unwrap().to_string();

        let res = app
            .oneshot(get(&format!("/api/rooms/{}", code.to_lowercase())))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let body = json_body(res).await;
        assert_eq!(body["code"], code);
        assert_eq!(body["state"], "lobby");
        assert!(body.get("word").is_none());
    }

    #[tokio::test]
    async fn test_unknown_room_is_404() {
        let res = test_app().oneshot(get("/api/rooms/NOPE42")).await.unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
        assert_eq!(json_body(res).await["error"], "room_not_found");
    }

    #[tokio::test]
    async fn test_words_samples_custom_list() {
        let res = test_app()
            .oneshot(get("/api/words?count=2&custom=alpha,beta,gamma"))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let words = json_body(res).await["words"].as_array().unwrap().clone();
        assert_eq!(words.len(), 2);
        assert!(
            words
                .iter()
                .all(|w| ["alpha", "beta", "gamma"].contains(&w.as_str().unwrap()))
        );
    }

    #[tokio::test]
    async fn test_words_falls_back_on_bad_count() {
        let res = test_app().oneshot(get("/api/words?count=lots")).await.unwrap();
        assert_eq!(json_body(res).await["words"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_health() {
        let res = test_app().oneshot(get("/api/health")).await.unwrap();
        assert_eq!(json_body(res).await, serde_json::json!({"ok": true}));
    }
}
