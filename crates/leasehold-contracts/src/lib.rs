//! Leasehold Contract Lifecycle
//!
//! The state machine a rental agreement moves through from draft to
//! termination, and the consent protocol that drives it.
//!
//! ```text
//! DRAFT -> PENDING_TENANT_SIGNATURE <-> PENDING_LANDLORD_SIGNATURE -> ACTIVE
//!                                                                      |
//!             CANCELLED (no signature yet)       IN_NOTICE_PERIOD <----+
//!                                                       |              |
//!                                                  TERMINATED      DISPUTED
//! ```
//!
//! - [`ContractLifecycle`]: transitions, locking at activation, retraction,
//!   notice-period sweep, sealing
//! - [`SignatureService`]: OTP request and verify-and-sign, session and
//!   public-link paths, signature certificates
//! - [`TerminationWorkflow`]: notice requests, counter-party confirmation,
//!   days remaining
//!
//! Side effects leave through ports: notifications are queued on a
//! [`Notifier`] and drained by [`spawn_dispatch_worker`]; sealing is
//! scheduled through a [`SealScheduler`] and executed by
//! [`spawn_seal_worker`].

pub mod clauses;
pub mod clock;
pub mod config;
pub mod lifecycle;
pub mod notifier;
pub mod ports;
pub mod seal;
pub mod signature;
pub mod termination;
pub mod transitions;

pub use clauses::generate_clauses;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::LifecycleConfig;
pub use lifecycle::{
    ContractLifecycle, CreatedContract, LifecycleParts, NewContract, SignatureEvidence, SweepReport,
};
pub use notifier::{mask_phone, spawn_dispatch_worker, NoticeKind, Notifier, Outbound};
pub use ports::{
    DocumentStore, InMemoryDirectory, InMemoryDocumentStore, LogDispatcher, NotificationDispatcher,
    PartyDirectory, RecordingDispatcher, RenderedDocument,
};
pub use seal::{spawn_seal_worker, ManualSealScheduler, SealScheduler, TokioSealScheduler};
pub use signature::{OtpDispatch, SignatureService, SigningView};
pub use termination::{days_until, TerminationStatus, TerminationWorkflow};
pub use transitions::{after_signature, allowed_from, can_sign, ensure_allowed};
