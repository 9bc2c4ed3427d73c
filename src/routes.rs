use axum::{
    body::Bytes,
    extract::{rejection::BytesRejection, DefaultBodyLimit, State},
    http::{
        header::{ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_ORIGIN, CONTENT_TYPE},
        HeaderValue, Method, StatusCode,
    },
    response::{IntoResponse, Response},
    routing::{any, get},
    Json, Router,
};
use serde_json::json;
use tower_http::{set_header::SetResponseHeaderLayer, trace::TraceLayer};

use crate::proxy::{NutritionProxy, ProxyError};

const ALLOWED_HEADERS: &str = "authorization, x-client-info, apikey, content-type";

#[derive(Debug, Clone)]
pub struct AppState {
    pub proxy: NutritionProxy,
}

/// Builds the service router. The CORS and content-type headers are attached by
/// layers, so every exit (preflight, success, error) carries them.
pub fn router(proxy: NutritionProxy, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/", any(analyze_endpoint))
        .route("/analyze-nutrition", any(analyze_endpoint))
        .with_state(AppState { proxy })
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(SetResponseHeaderLayer::overriding(
            ACCESS_CONTROL_ALLOW_ORIGIN,
            HeaderValue::from_static("*"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static(ALLOWED_HEADERS),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        ))
        .layer(TraceLayer::new_for_http())
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "webhook_configured": state.proxy.webhook_configured(),
    }))
}

async fn analyze_endpoint(
    State(state): State<AppState>,
    method: Method,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    // Preflight never touches the body or the webhook.
    if method == Method::OPTIONS {
        return StatusCode::OK.into_response();
    }

    let body = match body {
        Ok(body) => body,
        Err(rejection) => {
            let err = if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
                ProxyError::PayloadTooLarge
            } else {
                ProxyError::UnreadableBody
            };
            tracing::warn!(rejection = %rejection.body_text(), "could not buffer request body");
            return err.into_response();
        }
    };

    match state.proxy.analyze(&body).await {
        Ok(result) => (StatusCode::OK, Json(result)).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "analyze-nutrition failed");
            e.into_response()
        }
    }
}
