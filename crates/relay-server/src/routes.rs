//! Route table and middleware stack.

use axum::http::HeaderName;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use crate::{admin, handlers, state::AppState};

const REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Build the full router with middleware applied.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        .nest("/v1", relay_routes())
        .nest("/admin", admin_routes())
        .layer(PropagateRequestIdLayer::new(REQUEST_ID))
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::new(REQUEST_ID, MakeRequestUuid))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// OpenAI-compatible relay routes.
fn relay_routes() -> Router<AppState> {
    Router::new()
        .route("/chat/completions", post(handlers::chat_completions))
        .route("/embeddings", post(handlers::embeddings))
        .route("/models", get(handlers::list_models))
}

/// Channel administration routes.
fn admin_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/channels",
            get(admin::list_channels).post(admin::create_channel),
        )
        .route(
            "/channels/:id",
            get(admin::get_channel)
                .put(admin::update_channel)
                .delete(admin::delete_channel),
        )
        .route("/channels/:id/status", post(admin::set_channel_status))
        .route("/channels/:id/balance", post(admin::probe_channel_balance))
        .route("/channels/balance", post(admin::sweep_balances))
        .route("/abilities/fix", post(admin::fix_abilities))
        .route("/abilities/tag", post(admin::retune_by_tag))
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use relay_adapters::{AdapterRegistry, BalanceSweeper, ClientSettings, ExchangeRate, UpstreamClient};
    use relay_config::HubConfig;
    use relay_routing::{ChannelSelector, PenaltyLedger};
    use relay_store::{MemoryStore, RelayStore};
    use relay_telemetry::{RelayMetrics, RequestTracker};

    fn test_state() -> AppState {
        let store: Arc<dyn RelayStore> = Arc::new(MemoryStore::new());
        let ledger = Arc::new(PenaltyLedger::with_defaults());
        let selector = Arc::new(ChannelSelector::new(store.clone(), ledger));
        let registry = Arc::new(AdapterRegistry::new());
        let client = UpstreamClient::new(registry, ClientSettings::default()).expect("client");
        let rate = Arc::new(ExchangeRate::new(7.3, None).expect("rate"));
        let sweeper = Arc::new(
            BalanceSweeper::new(store.clone(), rate, std::time::Duration::ZERO).expect("sweeper"),
        );
        AppState::new(
            Arc::new(HubConfig::default()),
            store,
            selector,
            client,
            sweeper,
            Arc::new(RelayMetrics::new().expect("metrics")),
            Arc::new(RequestTracker::new()),
        )
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("body")
            .to_bytes();
        serde_json::from_slice(&bytes).expect("json body")
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let app = create_router(test_state());
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).expect("request"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn metrics_render_prometheus_text() {
        let app = create_router(test_state());
        let response = app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).expect("request"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.expect("body").to_bytes();
        let text = String::from_utf8(bytes.to_vec()).expect("utf8");
        assert!(text.contains("relay_in_flight_requests"));
    }

    #[tokio::test]
    async fn request_id_is_propagated() {
        let app = create_router(test_state());
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .header("x-request-id", "req-propagated")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(
            response.headers().get("x-request-id").map(|v| v.to_str().ok()),
            Some(Some("req-propagated"))
        );
    }

    #[tokio::test]
    async fn missing_request_id_gets_generated() {
        let app = create_router(test_state());
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).expect("request"))
            .await
            .expect("response");
        assert!(response.headers().contains_key("x-request-id"));
    }

    #[tokio::test]
    async fn models_listing_starts_empty() {
        let app = create_router(test_state());
        let response = app
            .oneshot(Request::builder().uri("/v1/models").body(Body::empty()).expect("request"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["object"], "list");
        assert_eq!(body["data"], json!([]));
    }

    #[tokio::test]
    async fn malformed_chat_body_is_a_client_error() {
        let app = create_router(test_state());
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/v1/chat/completions")
                    .header("content-type", "application/json")
                    .body(Body::from("not json"))
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["error"]["type"], "invalid_request_error");
    }

    #[tokio::test]
    async fn chat_without_channels_is_service_unavailable() {
        let app = create_router(test_state());
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/v1/chat/completions")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        json!({
                            "model": "gpt-4o",
                            "messages": [{"role": "user", "content": "hi"}]
                        })
                        .to_string(),
                    ))
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], "no_available_channel");
    }

    #[tokio::test]
    async fn admin_channel_crud_round_trip() {
        let app = create_router(test_state());

        let draft = json!({
            "name": "openai-main",
            "kind": "openai",
            "base_url": "https://api.openai.com",
            "api_key": "sk-test",
            "models": ["gpt-4o"],
            "priority": 5,
            "weight": 10
        });
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/admin/channels")
                    .header("content-type", "application/json")
                    .body(Body::from(draft.to_string()))
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::CREATED);
        let created = body_json(response).await;
        let id = created["id"].as_i64().expect("id");
        assert_eq!(created["status"], "enabled");
        assert!(created.get("api_key").is_none());

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri(format!("/admin/channels/{id}"))
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);

        // The channel's models become visible through /v1/models.
        let response = app
            .clone()
            .oneshot(Request::builder().uri("/v1/models").body(Body::empty()).expect("request"))
            .await
            .expect("response");
        let body = body_json(response).await;
        assert_eq!(body["data"][0]["id"], "gpt-4o");

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri(format!("/admin/channels/{id}"))
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = app
            .oneshot(
                Request::builder()
                    .uri(format!("/admin/channels/{id}"))
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn invalid_draft_is_rejected() {
        let app = create_router(test_state());
        let draft = json!({
            "name": "bad",
            "kind": "openai",
            "base_url": "ftp://nope",
            "api_key": "sk-test",
            "models": ["gpt-4o"]
        });
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/admin/channels")
                    .header("content-type", "application/json")
                    .body(Body::from(draft.to_string()))
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn tag_retune_requires_a_change() {
        let app = create_router(test_state());
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/admin/abilities/tag")
                    .header("content-type", "application/json")
                    .body(Body::from(json!({"tag": "cheap"}).to_string()))
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
