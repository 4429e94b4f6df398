//! Signing Link Handlers
//!
//! Used by a tenant who follows the link sent at creation, without a session.
//! Every failure of the link itself reads "invalid or expired signing link".

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;

use leasehold_contracts::{OtpDispatch, SigningView};

use crate::dto::{ContractView, SignRequest};
use crate::error::ApiResult;
use crate::extractors::{ApiJson, ClientContext};
use crate::state::AppState;

pub async fn resolve(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
) -> ApiResult<Json<SigningView>> {
    Ok(Json(state.signatures.resolve_token(&token).await?))
}

pub async fn request_otp(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
) -> ApiResult<(StatusCode, Json<OtpDispatch>)> {
    let dispatch = state.signatures.request_otp_with_token(&token).await?;
    Ok((StatusCode::ACCEPTED, Json(dispatch)))
}

pub async fn sign(
    State(state): State<Arc<AppState>>,
    client: ClientContext,
    Path(token): Path<String>,
    ApiJson(req): ApiJson<SignRequest>,
) -> ApiResult<Json<ContractView>> {
    let contract = state
        .signatures
        .verify_and_sign_with_token(&token, &req.code, client.ip, client.device)
        .await?;
    Ok(Json(contract.into()))
}
