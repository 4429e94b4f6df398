//! API Routes

use axum::{
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;

use crate::handlers;
use crate::state::AppState;

/// Create API v1 routes
pub fn api_v1_routes() -> Router<Arc<AppState>> {
    Router::new()
        .nest("/contracts", contract_routes())
        .nest("/signing", signing_routes())
        .nest("/payments", payment_routes())
        // Provider callbacks (HMAC, no session)
        .route("/webhooks/:method", post(handlers::webhooks::provider_webhook))
        // Public fee quote
        .route("/fees/breakdown", get(handlers::fees::breakdown))
}

/// Contract routes (session required)
fn contract_routes() -> Router<Arc<AppState>> {
    use handlers::contracts::*;

    Router::new()
        .route("/", post(create_contract).get(list_contracts))
        .route("/:id", get(get_contract).delete(cancel_contract))
        .route("/:id/terms", put(update_terms))
        .route("/:id/tenant", post(assign_tenant))
        // Consent
        .route("/:id/otp", post(request_otp))
        .route("/:id/sign", post(sign))
        .route("/:id/certificate", get(get_certificate))
        .route("/:id/document", get(get_document))
        // After activation
        .route("/:id/retract", post(retract))
        .route("/:id/dispute", post(escalate_dispute))
        .route(
            "/:id/termination",
            post(request_termination).get(termination_status),
        )
        .route("/:id/termination/confirm", post(confirm_termination))
        // Payments of a contract
        .route(
            "/:id/payments",
            get(handlers::payments::list_for_contract).post(handlers::payments::initiate),
        )
        .route(
            "/:id/cash-settlements",
            post(handlers::payments::record_cash_settlement),
        )
}

/// Signing-link routes (token in the path, no session)
fn signing_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/:token", get(handlers::signing::resolve))
        .route("/:token/otp", post(handlers::signing::request_otp))
        .route("/:token/sign", post(handlers::signing::sign))
}

/// Payment routes (session required)
fn payment_routes() -> Router<Arc<AppState>> {
    use handlers::payments::*;

    Router::new()
        .route("/:id", get(get_payment))
        .route("/:id/validate", post(validate))
        .route("/:id/refund", post(refund))
        .route("/:id/redispatch", post(redispatch))
        .route("/:id/poll", post(poll))
}
