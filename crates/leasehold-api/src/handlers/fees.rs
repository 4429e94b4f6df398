//! Fee quote handler

use axum::{
    extract::{Query, State},
    Json,
};
use std::sync::Arc;

use leasehold_types::{FeeBreakdown, LeaseholdError, MAX_MONTHLY_RENT};

use crate::dto::FeeQuery;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Public quote of what a contract would cost at activation
pub async fn breakdown(
    State(state): State<Arc<AppState>>,
    Query(query): Query<FeeQuery>,
) -> ApiResult<Json<FeeBreakdown>> {
    if query.rent > MAX_MONTHLY_RENT {
        return Err(LeaseholdError::invalid_input(
            "rent",
            format!("must not exceed {}", MAX_MONTHLY_RENT),
        )
        .into());
    }
    let version = match query.rate_version {
        Some(v) if state.fees.rate_table(v).is_none() => {
            return Err(ApiError::InvalidParameter(format!("unknown rate version {}", v)));
        }
        Some(v) => v,
        None => state.fees.current_version(),
    };
    let breakdown = state
        .fees
        .breakdown_for_version(query.transaction_type, query.rent, version)
        .map_err(LeaseholdError::from)?;
    Ok(Json(breakdown))
}
