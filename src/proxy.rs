use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::Value;

use crate::models::{AnalyzeRequest, ErrorBody, NutritionReport, WebhookRequest};

// ── Constants ────────────────────────────────────────────────────────────────

const USER_AGENT: &str = "calorie-ai-proxy/1.0";
const PREVIEW_CHARS: usize = 500;

// ── Error type ───────────────────────────────────────────────────────────────

/// Every failure the proxy can hit. `Display` is what the caller sees, so no
/// variant carries upstream bodies or transport detail.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("Webhook URL is not configured")]
    MissingWebhookUrl,
    #[error("Invalid request body")]
    InvalidRequestBody,
    #[error("No image data provided")]
    MissingImage,
    #[error("Request body too large")]
    PayloadTooLarge,
    #[error("Failed to read request body")]
    UnreadableBody,
    #[error("Failed to build webhook request")]
    InvalidRelayRequest,
    #[error("Failed to reach webhook")]
    Transport,
    #[error("Webhook responded with status {0}")]
    UpstreamStatus(u16),
    #[error("Webhook returned empty response")]
    EmptyResponse,
    #[error("Invalid JSON response from webhook")]
    InvalidJson,
    #[error("Invalid response format from webhook")]
    UnrecognizedShape,
    #[error("Failed to initialise HTTP client")]
    Client,
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.to_string(),
            status: "error".to_string(),
        };
        (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
    }
}

// ── Proxy ────────────────────────────────────────────────────────────────────

/// Relays a meal photo to the nutrition webhook and hands back its answer in
/// one canonical shape. Holds no per-request state.
#[derive(Debug, Clone)]
pub struct NutritionProxy {
    client: reqwest::Client,
    webhook_url: Option<String>,
}

impl NutritionProxy {
    pub fn new(webhook_url: Option<String>) -> Result<Self, ProxyError> {
        // No request timeout: the webhook runs a model and the caller owns retries.
        let client = reqwest::ClientBuilder::new()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| {
                tracing::error!(error = %e, "failed to build HTTP client");
                ProxyError::Client
            })?;

        Ok(Self {
            client,
            webhook_url,
        })
    }

    pub fn webhook_configured(&self) -> bool {
        self.webhook_url.is_some()
    }

    pub async fn analyze(&self, body: &[u8]) -> Result<Value, ProxyError> {
        let Some(webhook_url) = self.webhook_url.as_deref() else {
            tracing::error!("NUTRITION_WEBHOOK_URL is not configured");
            return Err(ProxyError::MissingWebhookUrl);
        };

        let request = parse_request(body)?;

        let image = match request.image.as_deref() {
            Some(image) if !image.is_empty() => image,
            _ => {
                tracing::warn!("request has no image data");
                return Err(ProxyError::MissingImage);
            }
        };

        tracing::info!(
            filename = request.filename.as_deref().unwrap_or("-"),
            mime_type = request.mime_type.as_deref().unwrap_or("-"),
            image_len = image.len(),
            "analyzing image"
        );

        let payload = WebhookRequest {
            image,
            filename: request.filename.as_deref(),
            mime_type: request.mime_type.as_deref(),
        };

        let (status, text) = self.relay(webhook_url, &payload).await?;
        let value = parse_upstream(status, &text)?;
        let result = normalize_response(value)?;
        log_report_summary(&result);
        Ok(result)
    }

    async fn relay(
        &self,
        webhook_url: &str,
        payload: &WebhookRequest<'_>,
    ) -> Result<(reqwest::StatusCode, String), ProxyError> {
        let response = self
            .client
            .post(webhook_url)
            .json(payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_builder() {
                    tracing::error!(error = %e, "could not build webhook request");
                    return ProxyError::InvalidRelayRequest;
                }
                if e.is_timeout() {
                    tracing::error!(error = %e, "webhook request timed out");
                } else if e.is_connect() {
                    tracing::error!(error = %e, "could not connect to webhook");
                } else {
                    tracing::error!(error = %e, "webhook request failed");
                }
                ProxyError::Transport
            })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| {
            tracing::error!(error = %e, status = status.as_u16(), "failed to read webhook response");
            ProxyError::Transport
        })?;

        tracing::info!(
            status = status.as_u16(),
            body_len = text.len(),
            "webhook responded"
        );

        Ok((status, text))
    }
}

// ── Request parsing ──────────────────────────────────────────────────────────

/// Only a JSON object can carry the image; arrays and scalars are treated as
/// having no fields at all.
fn parse_request(body: &[u8]) -> Result<AnalyzeRequest, ProxyError> {
    let value: Value = serde_json::from_slice(body).map_err(|e| {
        tracing::warn!(error = %e, body_len = body.len(), "request body is not valid JSON");
        ProxyError::InvalidRequestBody
    })?;

    if !value.is_object() {
        tracing::warn!(body_len = body.len(), "request body is not a JSON object");
        return Err(ProxyError::MissingImage);
    }

    AnalyzeRequest::deserialize(&value).map_err(|e| {
        tracing::warn!(error = %e, "request fields have unexpected types");
        ProxyError::InvalidRequestBody
    })
}

// ── Upstream body handling ───────────────────────────────────────────────────

/// Checks status, emptiness and JSON validity, in that order. The raw body only
/// ever reaches the logs.
fn parse_upstream(status: reqwest::StatusCode, text: &str) -> Result<Value, ProxyError> {
    if !status.is_success() {
        tracing::error!(status = status.as_u16(), body = %text, "webhook returned an error status");
        return Err(ProxyError::UpstreamStatus(status.as_u16()));
    }

    if text.trim().is_empty() {
        tracing::error!("webhook returned empty response");
        return Err(ProxyError::EmptyResponse);
    }

    serde_json::from_str(text).map_err(|e| {
        tracing::error!(
            error = %e,
            preview = %preview(text, PREVIEW_CHARS),
            "failed to parse webhook response"
        );
        ProxyError::InvalidJson
    })
}

/// Collapses the accepted upstream encodings into the canonical result.
///
/// Tried in order:
/// 1. `[{"output": X}, ...]` yields `X`
/// 2. `{"output": X}` yields `X`
/// 3. `{"status": .., "food": .., "total": ..}` yields itself
///
/// Fields count as present only when truthy (not null, false, 0 or ""). The
/// selected value is returned untouched; `total` is never recomputed.
pub fn normalize_response(value: Value) -> Result<Value, ProxyError> {
    if let Value::Array(mut items) = value {
        if items.first().and_then(|first| truthy_field(first, "output")).is_some() {
            if let Value::Object(mut first) = items.swap_remove(0) {
                if let Some(output) = first.remove("output") {
                    return Ok(output);
                }
            }
        }
        tracing::error!(len = items.len(), "unexpected array response format");
        return Err(ProxyError::UnrecognizedShape);
    }

    if truthy_field(&value, "output").is_some() {
        if let Value::Object(mut map) = value {
            if let Some(output) = map.remove("output") {
                return Ok(output);
            }
        }
        return Err(ProxyError::UnrecognizedShape);
    }

    let canonical = ["status", "food", "total"]
        .iter()
        .all(|key| truthy_field(&value, key).is_some());
    if canonical {
        return Ok(value);
    }

    tracing::error!(body = %value, "unexpected response format");
    Err(ProxyError::UnrecognizedShape)
}

fn truthy_field<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
    value.get(key).filter(|v| is_truthy(v))
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(true, |f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn log_report_summary(result: &Value) {
    match NutritionReport::deserialize(result) {
        Ok(report) => tracing::debug!(
            status = %report.status,
            items = report.food.len(),
            total_calories = report.total.calories,
            "nutrition report relayed"
        ),
        Err(e) => tracing::debug!(error = %e, "relayed result is not a canonical report"),
    }
}

/// First `max_chars` characters of `text`, cut on a char boundary.
pub fn preview(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn report() -> Value {
        json!({
            "status": "ok",
            "food": [{
                "name": "Apple",
                "quantity": "1 medium",
                "calories": 95,
                "protein": 0,
                "carbs": 25,
                "fat": 0
            }],
            "total": {"calories": 95, "protein": 0, "carbs": 25, "fat": 0}
        })
    }

    #[test]
    fn unwraps_output_of_first_array_element() {
        let upstream = json!([{"output": report()}, {"output": {"ignored": true}}]);
        assert_eq!(normalize_response(upstream).unwrap(), report());
    }

    #[test]
    fn unwraps_output_of_object() {
        let upstream = json!({"output": report(), "executionId": "42"});
        assert_eq!(normalize_response(upstream).unwrap(), report());
    }

    #[test]
    fn passes_canonical_shape_through() {
        assert_eq!(normalize_response(report()).unwrap(), report());
    }

    #[test]
    fn output_wins_over_canonical_fields() {
        let mut upstream = report();
        upstream["output"] = json!({"status": "wrapped"});
        assert_eq!(
            normalize_response(upstream).unwrap(),
            json!({"status": "wrapped"})
        );
    }

    #[test]
    fn keeps_mismatched_totals() {
        let mut upstream = report();
        upstream["total"]["calories"] = json!(1000);
        assert_eq!(normalize_response(upstream.clone()).unwrap(), upstream);
    }

    #[test]
    fn rejects_unrecognized_shapes() {
        for upstream in [
            json!({"foo": 1}),
            json!([]),
            json!([{"foo": 1}]),
            json!([report()]),
            json!({"output": null}),
            json!({"output": ""}),
            json!([{"output": false}]),
            json!({"status": "ok", "food": []}),
            json!({"status": "", "food": [], "total": {}}),
            json!("just a string"),
            json!(42),
        ] {
            assert!(
                matches!(normalize_response(upstream.clone()), Err(ProxyError::UnrecognizedShape)),
                "expected rejection for {}",
                upstream
            );
        }
    }

    #[test]
    fn empty_collections_are_truthy() {
        let upstream = json!({"status": "ok", "food": [], "total": {}});
        assert_eq!(normalize_response(upstream.clone()).unwrap(), upstream);
    }

    #[test]
    fn upstream_status_is_checked_before_body() {
        let err = parse_upstream(reqwest::StatusCode::SERVICE_UNAVAILABLE, "Service Unavailable")
            .unwrap_err();
        assert!(matches!(err, ProxyError::UpstreamStatus(503)));
        assert_eq!(err.to_string(), "Webhook responded with status 503");
    }

    #[test]
    fn empty_and_invalid_bodies() {
        assert!(matches!(
            parse_upstream(reqwest::StatusCode::OK, "  \n\t"),
            Err(ProxyError::EmptyResponse)
        ));
        assert!(matches!(
            parse_upstream(reqwest::StatusCode::OK, "<html>oops</html>"),
            Err(ProxyError::InvalidJson)
        ));
        assert_eq!(
            parse_upstream(reqwest::StatusCode::OK, "{\"a\":1}").unwrap(),
            json!({"a": 1})
        );
    }

    #[test]
    fn request_must_be_an_object() {
        let array = br#"["data:image/png;base64,AAAA","a.jpg","image/jpeg"]"#;
        assert!(matches!(parse_request(array), Err(ProxyError::MissingImage)));
        assert!(matches!(parse_request(b"\"img\""), Err(ProxyError::MissingImage)));
        assert!(matches!(parse_request(b"{"), Err(ProxyError::InvalidRequestBody)));
        assert!(matches!(
            parse_request(br#"{"image": 42}"#),
            Err(ProxyError::InvalidRequestBody)
        ));

        let request = parse_request(br#"{"image":"x","mimeType":"image/png"}"#).unwrap();
        assert_eq!(request.image.as_deref(), Some("x"));
        assert_eq!(request.mime_type.as_deref(), Some("image/png"));
        assert!(request.filename.is_none());
    }

    #[test]
    fn report_summary_reads_borrowed_value() {
        let value = report();
        let summary = NutritionReport::deserialize(&value).unwrap();
        assert_eq!(summary.food.len(), 1);
        assert_eq!(summary.total.calories, 95.0);
        assert!(NutritionReport::deserialize(&json!({"foo": 1})).is_err());
    }

    #[test]
    fn preview_respects_char_boundaries() {
        assert_eq!(preview("abc", 10), "abc");
        assert_eq!(preview("abcdef", 3), "abc");
        assert_eq!(preview("ééé", 2), "éé");
    }
}
