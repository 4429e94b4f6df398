//! Error types for Leasehold
//!
//! Every rejection carries a stable machine-readable code (`error_code`) and a
//! human message. Integrity failures deliberately share one message per kind
//! so callers cannot tell "expired" from "never issued".

use thiserror::Error;

/// Result type for Leasehold operations
pub type Result<T> = std::result::Result<T, LeaseholdError>;

/// Coarse classification used by surfaces to pick a status code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    StateConflict,
    Authorization,
    NotFound,
    External,
    Integrity,
    Invariant,
}

/// Leasehold error types
#[derive(Debug, Clone, Error)]
pub enum LeaseholdError {
    // ========================================================================
    // Validation Errors
    // ========================================================================

    /// Malformed or out-of-range input
    #[error("Invalid input: {field} - {reason}")]
    InvalidInput { field: String, reason: String },

    /// Out-of-band payment smaller than what is owed
    #[error("Amount received {received} is below the expected total {expected}")]
    InsufficientAmount { expected: String, received: String },

    // ========================================================================
    // State Conflict Errors
    // ========================================================================

    /// Operation not allowed from the current status
    #[error("Cannot {action} a {entity} in status {status}")]
    InvalidTransition {
        entity: String,
        status: String,
        action: String,
    },

    /// The party already signed this contract
    #[error("Contract already signed by the {party}")]
    AlreadySigned { party: String },

    /// Terms cannot change once a signature exists
    #[error("Contract terms are locked")]
    TermsLocked,

    /// A termination request is already pending
    #[error("A termination request is already pending")]
    TerminationPending,

    /// Counter-party confirmation already recorded
    #[error("Termination already confirmed")]
    TerminationAlreadyConfirmed,

    /// The 48h retraction window has closed
    #[error("Retraction window has closed")]
    RetractionWindowClosed,

    /// Same actor submitted the same create operation concurrently
    #[error("Duplicate submission in progress")]
    DuplicateSubmission,

    /// An unresolved payment for the same contract and payer exists
    #[error("An unresolved payment {payment_reference} already exists for this contract")]
    DuplicatePayment { payment_reference: String },

    /// Optimistic version check failed
    #[error("Concurrent modification of {entity} {id}")]
    ConcurrentModification { entity: String, id: String },

    // ========================================================================
    // Authorization Errors
    // ========================================================================

    /// Wrong party for a party-scoped action. Carries no detail.
    #[error("not authorized")]
    Unauthorized,

    // ========================================================================
    // Not Found Errors
    // ========================================================================

    #[error("Contract {contract_id} not found")]
    ContractNotFound { contract_id: String },

    #[error("Payment {payment_id} not found")]
    PaymentNotFound { payment_id: String },

    // ========================================================================
    // External Dependency Errors (retryable)
    // ========================================================================

    /// Provider rejected or could not be reached
    #[error("Payment provider {method} unavailable: {reason}")]
    ProviderUnavailable { method: String, reason: String },

    /// Provider call exceeded its timeout
    #[error("Payment provider {method} timed out")]
    ProviderTimeout { method: String },

    /// Document rendering or storage failed
    #[error("Document store error: {reason}")]
    DocumentStore { reason: String },

    /// Persistence or lock backend failed
    #[error("Storage error: {reason}")]
    Storage { reason: String },

    // ========================================================================
    // Integrity Errors
    // ========================================================================

    #[error("invalid or expired code")]
    InvalidOtp,

    #[error("invalid or expired signing link")]
    InvalidSigningLink,

    #[error("invalid webhook")]
    InvalidWebhook,

    // ========================================================================
    // Invariant Violations
    // ========================================================================

    /// A defect: stored data contradicts an invariant
    #[error("Invariant violation: {reason}")]
    InvariantViolation { reason: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl LeaseholdError {
    /// Create an invalid input error
    pub fn invalid_input(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create a state conflict for a disallowed transition
    pub fn invalid_transition(
        entity: impl Into<String>,
        status: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self::InvalidTransition {
            entity: entity.into(),
            status: status.into(),
            action: action.into(),
        }
    }

    /// Create an invariant violation
    pub fn invariant(reason: impl Into<String>) -> Self {
        Self::InvariantViolation {
            reason: reason.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Taxonomy bucket
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidInput { .. } | Self::InsufficientAmount { .. } => ErrorKind::Validation,
            Self::InvalidTransition { .. }
            | Self::AlreadySigned { .. }
            | Self::TermsLocked
            | Self::TerminationPending
            | Self::TerminationAlreadyConfirmed
            | Self::RetractionWindowClosed
            | Self::DuplicateSubmission
            | Self::DuplicatePayment { .. }
            | Self::ConcurrentModification { .. } => ErrorKind::StateConflict,
            Self::Unauthorized => ErrorKind::Authorization,
            Self::ContractNotFound { .. } | Self::PaymentNotFound { .. } => ErrorKind::NotFound,
            Self::ProviderUnavailable { .. }
            | Self::ProviderTimeout { .. }
            | Self::DocumentStore { .. }
            | Self::Storage { .. } => ErrorKind::External,
            Self::InvalidOtp | Self::InvalidSigningLink | Self::InvalidWebhook => {
                ErrorKind::Integrity
            }
            Self::InvariantViolation { .. } | Self::Internal { .. } => ErrorKind::Invariant,
        }
    }

    /// Check if this is a retriable error
    pub fn is_retriable(&self) -> bool {
        matches!(self.kind(), ErrorKind::External)
            || matches!(self, Self::ConcurrentModification { .. })
    }

    /// Get an error code for API responses
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidInput { .. } => "INVALID_INPUT",
            Self::InsufficientAmount { .. } => "INSUFFICIENT_AMOUNT",
            Self::InvalidTransition { .. } => "INVALID_TRANSITION",
            Self::AlreadySigned { .. } => "ALREADY_SIGNED",
            Self::TermsLocked => "TERMS_LOCKED",
            Self::TerminationPending => "TERMINATION_ALREADY_PENDING",
            Self::TerminationAlreadyConfirmed => "TERMINATION_ALREADY_CONFIRMED",
            Self::RetractionWindowClosed => "RETRACTION_WINDOW_CLOSED",
            Self::DuplicateSubmission => "DUPLICATE_SUBMISSION",
            Self::DuplicatePayment { .. } => "DUPLICATE_PAYMENT",
            Self::ConcurrentModification { .. } => "CONCURRENT_MODIFICATION",
            Self::Unauthorized => "NOT_AUTHORIZED",
            Self::ContractNotFound { .. } => "CONTRACT_NOT_FOUND",
            Self::PaymentNotFound { .. } => "PAYMENT_NOT_FOUND",
            Self::ProviderUnavailable { .. } => "PROVIDER_UNAVAILABLE",
            Self::ProviderTimeout { .. } => "PROVIDER_TIMEOUT",
            Self::DocumentStore { .. } => "DOCUMENT_STORE_ERROR",
            Self::Storage { .. } => "STORAGE_ERROR",
            Self::InvalidOtp => "INVALID_OTP",
            Self::InvalidSigningLink => "INVALID_SIGNING_LINK",
            Self::InvalidWebhook => "INVALID_WEBHOOK",
            Self::InvariantViolation { .. } => "INVARIANT_VIOLATION",
            Self::Internal { .. } => "INTERNAL_ERROR",
        }
    }
}
