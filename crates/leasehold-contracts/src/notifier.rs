//! Deferred notification queue
//!
//! Transitions enqueue messages and return immediately; a worker drains the
//! queue into a [`NotificationDispatcher`]. Delivery failures are logged and
//! never reach the caller of the transition.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use leasehold_types::UserId;

use crate::ports::NotificationDispatcher;

/// Template selector for party notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    SigningInvitation,
    ContractSigned,
    ContractActivated,
    ContractCancelled,
    ContractRetracted,
    ContractDisputed,
    TerminationRequested,
    TerminationConfirmed,
    ContractTerminated,
    PaymentEscrowed,
    PaymentReleased,
    PaymentDisputed,
    PaymentRefunded,
    PaymentFailed,
}

impl NoticeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SigningInvitation => "signing_invitation",
            Self::ContractSigned => "contract_signed",
            Self::ContractActivated => "contract_activated",
            Self::ContractCancelled => "contract_cancelled",
            Self::ContractRetracted => "contract_retracted",
            Self::ContractDisputed => "contract_disputed",
            Self::TerminationRequested => "termination_requested",
            Self::TerminationConfirmed => "termination_confirmed",
            Self::ContractTerminated => "contract_terminated",
            Self::PaymentEscrowed => "payment_escrowed",
            Self::PaymentReleased => "payment_released",
            Self::PaymentDisputed => "payment_disputed",
            Self::PaymentRefunded => "payment_refunded",
            Self::PaymentFailed => "payment_failed",
        }
    }
}

/// A queued message
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Otp {
        phone: String,
        code: String,
    },
    Notice {
        user: UserId,
        kind: NoticeKind,
        payload: Value,
    },
}

/// Producer half of the queue; cheap to clone
#[derive(Debug, Clone)]
pub struct Notifier {
    tx: mpsc::UnboundedSender<Outbound>,
}

impl Notifier {
    /// Create the queue. Hand the receiver to [`spawn_dispatch_worker`].
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn send_otp(&self, phone: impl Into<String>, code: impl Into<String>) {
        self.enqueue(Outbound::Otp {
            phone: phone.into(),
            code: code.into(),
        });
    }

    pub fn notify(&self, user: &UserId, kind: NoticeKind, payload: Value) {
        self.enqueue(Outbound::Notice {
            user: user.clone(),
            kind,
            payload,
        });
    }

    fn enqueue(&self, message: Outbound) {
        if self.tx.send(message).is_err() {
            warn!("Notification queue closed, message dropped");
        }
    }
}

/// Drain `rx` into `dispatcher` until every [`Notifier`] is dropped
pub fn spawn_dispatch_worker(
    mut rx: mpsc::UnboundedReceiver<Outbound>,
    dispatcher: Arc<dyn NotificationDispatcher>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Notification dispatch worker started");
        while let Some(message) = rx.recv().await {
            let result = match &message {
                Outbound::Otp { phone, code } => dispatcher.send_otp(phone, code).await,
                Outbound::Notice {
                    user,
                    kind,
                    payload,
                } => dispatcher.notify(user, *kind, payload).await,
            };
            match result {
                Ok(()) => debug!("Notification delivered"),
                Err(e) => warn!(error = %e, "Notification delivery failed"),
            }
        }
        info!("Notification dispatch worker stopped");
    })
}

/// Keep the last two digits of a phone number
pub fn mask_phone(phone: &str) -> String {
    let digits = phone.chars().count();
    if digits <= 2 {
        return "*".repeat(digits);
    }
    let visible: String = phone.chars().skip(digits - 2).collect();
    format!("{}{}", "*".repeat(digits - 2), visible)
}
