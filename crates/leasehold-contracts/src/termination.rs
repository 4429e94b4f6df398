//! Termination workflow
//!
//! Wraps the lifecycle's request/confirm transitions with the counter-party
//! hand-off and a human-readable countdown. Holds no state of its own.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;

use leasehold_types::{Actor, Contract, ContractId, ContractStatus, Party, Result};

use crate::lifecycle::{authorize, ContractLifecycle, SweepReport};
use crate::notifier::NoticeKind;

/// Read view of a contract's termination record
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TerminationStatus {
    pub contract_id: ContractId,
    pub status: ContractStatus,
    pub requested: bool,
    pub requested_by: Option<Party>,
    pub requested_at: Option<DateTime<Utc>>,
    pub motive: Option<String>,
    pub notice_months: Option<u32>,
    pub effective_date: Option<DateTime<Utc>>,
    pub confirmed_at: Option<DateTime<Utc>>,
    /// Whole days until the effective date, rounded up, never negative
    pub days_remaining: Option<i64>,
}

pub struct TerminationWorkflow {
    lifecycle: Arc<ContractLifecycle>,
}

impl TerminationWorkflow {
    pub fn new(lifecycle: Arc<ContractLifecycle>) -> Self {
        Self { lifecycle }
    }

    /// Start the notice period and tell the other party
    pub async fn request(
        &self,
        actor: &Actor,
        id: &ContractId,
        motive: String,
        notice_months: Option<u32>,
    ) -> Result<Contract> {
        let contract = self
            .lifecycle
            .request_termination(actor, id, motive, notice_months)
            .await?;

        if let Some(record) = &contract.termination {
            let payload = json!({
                "reference": contract.reference,
                "motive": record.motive,
                "notice_months": record.notice_months,
                "effective_date": record.effective_date,
            });
            self.lifecycle.notify_parties(
                &contract,
                Some(record.requested_by),
                NoticeKind::TerminationRequested,
                payload,
            );
        }
        Ok(contract)
    }

    /// Counter-party acknowledgement; tells the requester
    pub async fn confirm(&self, actor: &Actor, id: &ContractId) -> Result<Contract> {
        let contract = self.lifecycle.confirm_termination(actor, id).await?;

        if let Some(record) = &contract.termination {
            let payload = json!({
                "reference": contract.reference,
                "effective_date": record.effective_date,
            });
            self.lifecycle.notify_parties(
                &contract,
                record.confirmed_by,
                NoticeKind::TerminationConfirmed,
                payload,
            );
        }
        Ok(contract)
    }

    pub async fn status(&self, actor: &Actor, id: &ContractId) -> Result<TerminationStatus> {
        let contract = self.lifecycle.load(id).await?;
        authorize(&contract, actor)?;
        let now = self.lifecycle.clock().now();

        let record = contract.termination.as_ref();
        Ok(TerminationStatus {
            contract_id: contract.id.clone(),
            status: contract.status,
            requested: record.is_some(),
            requested_by: record.map(|r| r.requested_by),
            requested_at: record.map(|r| r.requested_at),
            motive: record.map(|r| r.motive.clone()),
            notice_months: record.map(|r| r.notice_months),
            effective_date: record.map(|r| r.effective_date),
            confirmed_at: record.and_then(|r| r.confirmed_at),
            days_remaining: record.map(|r| days_until(now, r.effective_date)),
        })
    }

    /// Periodic sweep entry point
    pub async fn sweep(&self) -> Result<SweepReport> {
        self.lifecycle.expire_notice_periods().await
    }
}

/// Whole days from `now` to `target`, rounded up, clamped at zero
pub fn days_until(now: DateTime<Utc>, target: DateTime<Utc>) -> i64 {
    let seconds = (target - now).num_seconds();
    if seconds <= 0 {
        0
    } else {
        (seconds + 86_399) / 86_400
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn test_days_until_rounds_up() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
        assert_eq!(days_until(now, now + Duration::days(90)), 90);
        assert_eq!(days_until(now, now + Duration::hours(1)), 1);
        assert_eq!(days_until(now, now + Duration::days(2) + Duration::seconds(1)), 3);
    }

    #[test]
    fn test_days_until_never_negative() {
        let now = Utc.with_ymd_and_hms(2026, 4, 2, 0, 0, 0).unwrap();
        assert_eq!(days_until(now, now), 0);
        assert_eq!(days_until(now, now - Duration::days(3)), 0);
    }
}
