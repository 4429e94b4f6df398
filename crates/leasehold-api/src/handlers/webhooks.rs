//! Provider Webhook Handler
//!
//! No session: the body is authenticated by the provider's HMAC in
//! `x-provider-signature`. A confirmation that matches no payment yet is
//! answered with 503 so the provider delivers it again.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use std::sync::Arc;

use leasehold_escrow::IngestOutcome;

use crate::dto::WebhookAck;
use crate::error::ApiResult;
use crate::state::AppState;

pub const SIGNATURE_HEADER: &str = "x-provider-signature";

pub async fn provider_webhook(
    State(state): State<Arc<AppState>>,
    Path(method): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<WebhookAck>)> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());

    let outcome = state
        .escrow
        .ingest_webhook(&method, &body, signature)
        .await?;
    let status = match outcome {
        IngestOutcome::Unmatched => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::OK,
    };
    Ok((status, Json(WebhookAck { outcome })))
}
