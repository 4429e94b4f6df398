//! Contract Handlers
//!
//! Creation, amendment, session signing, retraction, disputes and
//! termination of rental contracts.

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use std::sync::Arc;

use leasehold_contracts::{NewContract, OtpDispatch, TerminationStatus};
use leasehold_signature::SignatureCertificate;
use leasehold_types::TermsInput;

use crate::dto::{
    AssignTenantRequest, ContractView, CreateContractRequest, CreatedContractResponse,
    ReasonRequest, SignRequest, TerminationRequest,
};
use crate::error::ApiResult;
use crate::extractors::{ApiJson, ClientContext, CurrentParty};
use crate::handlers::contract_id;
use crate::state::AppState;

pub async fn create_contract(
    State(state): State<Arc<AppState>>,
    CurrentParty(actor): CurrentParty,
    ApiJson(req): ApiJson<CreateContractRequest>,
) -> ApiResult<(StatusCode, Json<CreatedContractResponse>)> {
    let request = NewContract {
        landlord_id: req.landlord_id.unwrap_or_else(|| actor.user_id.clone()),
        tenant_id: req.tenant_id,
        listing_id: req.listing_id,
        terms: req.terms,
    };
    let created = state.lifecycle.create(&actor, request).await?;
    Ok((StatusCode::CREATED, Json(created.into())))
}

/// Contracts the caller is a party to
pub async fn list_contracts(
    State(state): State<Arc<AppState>>,
    CurrentParty(actor): CurrentParty,
) -> ApiResult<Json<Vec<ContractView>>> {
    let contracts = state.lifecycle.list_for(&actor).await?;
    Ok(Json(contracts.into_iter().map(ContractView::from).collect()))
}

pub async fn get_contract(
    State(state): State<Arc<AppState>>,
    CurrentParty(actor): CurrentParty,
    Path(id): Path<String>,
) -> ApiResult<Json<ContractView>> {
    let contract = state.lifecycle.get(&actor, &contract_id(&id)?).await?;
    Ok(Json(contract.into()))
}

pub async fn update_terms(
    State(state): State<Arc<AppState>>,
    CurrentParty(actor): CurrentParty,
    Path(id): Path<String>,
    ApiJson(terms): ApiJson<TermsInput>,
) -> ApiResult<Json<ContractView>> {
    let contract = state
        .lifecycle
        .update_terms(&actor, &contract_id(&id)?, terms)
        .await?;
    Ok(Json(contract.into()))
}

pub async fn assign_tenant(
    State(state): State<Arc<AppState>>,
    CurrentParty(actor): CurrentParty,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<AssignTenantRequest>,
) -> ApiResult<Json<CreatedContractResponse>> {
    let assigned = state
        .lifecycle
        .assign_tenant(&actor, &contract_id(&id)?, req.tenant_id)
        .await?;
    Ok(Json(assigned.into()))
}

/// Hard delete; allowed only before any signature
pub async fn cancel_contract(
    State(state): State<Arc<AppState>>,
    CurrentParty(actor): CurrentParty,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state.lifecycle.cancel(&actor, &contract_id(&id)?).await?;
    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// Session signing
// =============================================================================

pub async fn request_otp(
    State(state): State<Arc<AppState>>,
    CurrentParty(actor): CurrentParty,
    Path(id): Path<String>,
) -> ApiResult<(StatusCode, Json<OtpDispatch>)> {
    let dispatch = state.signatures.request_otp(&actor, &contract_id(&id)?).await?;
    Ok((StatusCode::ACCEPTED, Json(dispatch)))
}

pub async fn sign(
    State(state): State<Arc<AppState>>,
    CurrentParty(actor): CurrentParty,
    client: ClientContext,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<SignRequest>,
) -> ApiResult<Json<ContractView>> {
    let contract = state
        .signatures
        .verify_and_sign(&actor, &contract_id(&id)?, &req.code, client.ip, client.device)
        .await?;
    Ok(Json(contract.into()))
}

pub async fn get_certificate(
    State(state): State<Arc<AppState>>,
    CurrentParty(actor): CurrentParty,
    Path(id): Path<String>,
) -> ApiResult<Json<SignatureCertificate>> {
    let certificate = state.signatures.certificate(&actor, &contract_id(&id)?).await?;
    Ok(Json(certificate))
}

/// Rendered contract document, once sealed
pub async fn get_document(
    State(state): State<Arc<AppState>>,
    CurrentParty(actor): CurrentParty,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let bytes = state
        .lifecycle
        .document_bytes(&actor, &contract_id(&id)?)
        .await?;
    Ok(([(header::CONTENT_TYPE, "application/octet-stream")], bytes))
}

// =============================================================================
// After activation
// =============================================================================

pub async fn retract(
    State(state): State<Arc<AppState>>,
    CurrentParty(actor): CurrentParty,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<ReasonRequest>,
) -> ApiResult<Json<ContractView>> {
    let contract = state
        .lifecycle
        .retract(&actor, &contract_id(&id)?, req.reason)
        .await?;
    Ok(Json(contract.into()))
}

pub async fn escalate_dispute(
    State(state): State<Arc<AppState>>,
    CurrentParty(actor): CurrentParty,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<ReasonRequest>,
) -> ApiResult<Json<ContractView>> {
    let contract = state
        .lifecycle
        .escalate_dispute(&actor, &contract_id(&id)?, req.reason)
        .await?;
    Ok(Json(contract.into()))
}

pub async fn request_termination(
    State(state): State<Arc<AppState>>,
    CurrentParty(actor): CurrentParty,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<TerminationRequest>,
) -> ApiResult<Json<ContractView>> {
    let contract = state
        .termination
        .request(&actor, &contract_id(&id)?, req.motive, req.notice_months)
        .await?;
    Ok(Json(contract.into()))
}

pub async fn confirm_termination(
    State(state): State<Arc<AppState>>,
    CurrentParty(actor): CurrentParty,
    Path(id): Path<String>,
) -> ApiResult<Json<ContractView>> {
    let contract = state.termination.confirm(&actor, &contract_id(&id)?).await?;
    Ok(Json(contract.into()))
}

pub async fn termination_status(
    State(state): State<Arc<AppState>>,
    CurrentParty(actor): CurrentParty,
    Path(id): Path<String>,
) -> ApiResult<Json<TerminationStatus>> {
    let status = state.termination.status(&actor, &contract_id(&id)?).await?;
    Ok(Json(status))
}
