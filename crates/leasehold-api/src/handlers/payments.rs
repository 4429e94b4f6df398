//! Payment Handlers
//!
//! Initiation, cash settlements, landlord validation and refunds.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;

use leasehold_escrow::{CashSettlement, PaymentRequest};
use leasehold_types::Payment;

use crate::dto::{CashSettlementResponse, RefundRequest, ValidatePaymentRequest};
use crate::error::ApiResult;
use crate::extractors::{ApiJson, CurrentParty};
use crate::handlers::{contract_id, payment_id};
use crate::state::AppState;

pub async fn list_for_contract(
    State(state): State<Arc<AppState>>,
    CurrentParty(actor): CurrentParty,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<Payment>>> {
    let payments = state
        .escrow
        .list_for_contract(&actor, &contract_id(&id)?)
        .await?;
    Ok(Json(payments))
}

/// Tenant starts a provider-backed payment; the response carries the
/// provider redirect
pub async fn initiate(
    State(state): State<Arc<AppState>>,
    CurrentParty(actor): CurrentParty,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<PaymentRequest>,
) -> ApiResult<(StatusCode, Json<Payment>)> {
    let payment = state.escrow.initiate(&actor, &contract_id(&id)?, req).await?;
    Ok((StatusCode::CREATED, Json(payment)))
}

pub async fn record_cash_settlement(
    State(state): State<Arc<AppState>>,
    CurrentParty(actor): CurrentParty,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<CashSettlement>,
) -> ApiResult<(StatusCode, Json<CashSettlementResponse>)> {
    let (payment, receipt) = state
        .escrow
        .record_cash_settlement(&actor, &contract_id(&id)?, req)
        .await?;
    Ok((StatusCode::CREATED, Json(CashSettlementResponse { payment, receipt })))
}

pub async fn get_payment(
    State(state): State<Arc<AppState>>,
    CurrentParty(actor): CurrentParty,
    Path(id): Path<String>,
) -> ApiResult<Json<Payment>> {
    Ok(Json(state.escrow.get(&actor, &payment_id(&id)?).await?))
}

pub async fn validate(
    State(state): State<Arc<AppState>>,
    CurrentParty(actor): CurrentParty,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<ValidatePaymentRequest>,
) -> ApiResult<Json<Payment>> {
    let payment = state
        .escrow
        .validate_by_landlord(&actor, &payment_id(&id)?, req.approve, req.note)
        .await?;
    Ok(Json(payment))
}

pub async fn refund(
    State(state): State<Arc<AppState>>,
    CurrentParty(actor): CurrentParty,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<RefundRequest>,
) -> ApiResult<Json<Payment>> {
    let payment = state
        .escrow
        .refund(&actor, &payment_id(&id)?, req.reason, req.amount)
        .await?;
    Ok(Json(payment))
}

pub async fn redispatch(
    State(state): State<Arc<AppState>>,
    CurrentParty(actor): CurrentParty,
    Path(id): Path<String>,
) -> ApiResult<Json<Payment>> {
    Ok(Json(state.escrow.redispatch(&actor, &payment_id(&id)?).await?))
}

pub async fn poll(
    State(state): State<Arc<AppState>>,
    CurrentParty(actor): CurrentParty,
    Path(id): Path<String>,
) -> ApiResult<Json<Payment>> {
    Ok(Json(
        state
            .escrow
            .poll_provider_status(&actor, &payment_id(&id)?)
            .await?,
    ))
}
