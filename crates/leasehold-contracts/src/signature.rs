//! OTP-gated consent
//!
//! Two entry paths lead to the same verify-and-sign step:
//!
//! - session: the caller is a logged-in party of the contract
//! - token: the tenant follows the public signing link minted at creation
//!
//! Every rejection of a submitted code surfaces as `INVALID_OTP`, whatever
//! the underlying reason (no code requested, expired, wrong, exhausted).

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use leasehold_signature::{hash_token, CertificateSigner, OtpCheck, OtpService, SignatureCertificate};
use leasehold_types::{
    Actor, Contract, ContractId, ContractStatus, ContractTerms, LeaseholdError, Party, Result,
    SigningChannel,
};

use crate::lifecycle::{require_party, ContractLifecycle, SignatureEvidence};
use crate::ports::PartyDirectory;
use crate::transitions::can_sign;

/// Acknowledgement of an OTP request. The code itself only leaves through the
/// notification channel.
#[derive(Debug, Clone, Serialize)]
pub struct OtpDispatch {
    pub contract_id: ContractId,
    pub party: Party,
    pub expires_at: DateTime<Utc>,
}

/// What the holder of a signing link may see
#[derive(Debug, Clone, Serialize)]
pub struct SigningView {
    pub contract_id: ContractId,
    pub reference: String,
    pub status: ContractStatus,
    pub terms: ContractTerms,
    pub landlord_signed: bool,
    pub tenant_signed: bool,
    pub link_expires_at: Option<DateTime<Utc>>,
}

impl From<&Contract> for SigningView {
    fn from(contract: &Contract) -> Self {
        Self {
            contract_id: contract.id.clone(),
            reference: contract.reference.clone(),
            status: contract.status,
            terms: contract.terms.clone(),
            landlord_signed: contract.is_signed_by(Party::Landlord),
            tenant_signed: contract.is_signed_by(Party::Tenant),
            link_expires_at: contract.signing_token.as_ref().map(|t| t.expires_at),
        }
    }
}

enum Verification {
    Signed,
    Rejected(&'static str),
}

pub struct SignatureService {
    lifecycle: Arc<ContractLifecycle>,
    otp: OtpService,
    certificates: CertificateSigner,
    directory: Arc<dyn PartyDirectory>,
}

impl SignatureService {
    pub fn new(
        lifecycle: Arc<ContractLifecycle>,
        otp: OtpService,
        certificates: CertificateSigner,
        directory: Arc<dyn PartyDirectory>,
    ) -> Self {
        Self {
            lifecycle,
            otp,
            certificates,
            directory,
        }
    }

    /// Hex public key that verifies issued certificates
    pub fn certificate_public_key(&self) -> String {
        self.certificates.public_key_hex()
    }

    // =========================================================================
    // Session path
    // =========================================================================

    pub async fn request_otp(&self, actor: &Actor, id: &ContractId) -> Result<OtpDispatch> {
        let contract = self.lifecycle.load(id).await?;
        let party = require_party(&contract, actor)?;
        self.issue_otp(&contract, party, |_, _| Ok(())).await
    }

    pub async fn verify_and_sign(
        &self,
        actor: &Actor,
        id: &ContractId,
        code: &str,
        ip: String,
        device: String,
    ) -> Result<Contract> {
        let contract = self.lifecycle.load(id).await?;
        let party = require_party(&contract, actor)?;
        let evidence = SignatureEvidence {
            ip,
            device,
            channel: SigningChannel::Session,
        };
        self.verify(id, party, code, evidence, |_, _| Ok(())).await
    }

    // =========================================================================
    // Token path
    // =========================================================================

    pub async fn resolve_token(&self, token: &str) -> Result<SigningView> {
        let contract = self.contract_for_token(token).await?;
        Ok(SigningView::from(&contract))
    }

    pub async fn request_otp_with_token(&self, token: &str) -> Result<OtpDispatch> {
        let contract = self.contract_for_token(token).await?;
        self.issue_otp(&contract, Party::Tenant, |c, now| self.check_token(c, token, now))
            .await
    }

    pub async fn verify_and_sign_with_token(
        &self,
        token: &str,
        code: &str,
        ip: String,
        device: String,
    ) -> Result<Contract> {
        let contract = self.contract_for_token(token).await?;
        let evidence = SignatureEvidence {
            ip,
            device,
            channel: SigningChannel::Token,
        };
        self.verify(&contract.id, Party::Tenant, code, evidence, |c, now| {
            self.check_token(c, token, now)
        })
        .await
    }

    // =========================================================================
    // Certificate
    // =========================================================================

    /// Signed audit summary of a locked contract
    pub async fn certificate(&self, actor: &Actor, id: &ContractId) -> Result<SignatureCertificate> {
        let contract = self.lifecycle.get(actor, id).await?;
        if !contract.is_locked() {
            return Err(LeaseholdError::invalid_transition(
                "contract",
                contract.status.as_str(),
                "certify",
            ));
        }
        Ok(self
            .certificates
            .issue(&contract, self.lifecycle.clock().now())?)
    }

    // =========================================================================
    // Internals
    // =========================================================================

    async fn issue_otp<G>(&self, contract: &Contract, party: Party, guard: G) -> Result<OtpDispatch>
    where
        G: Fn(&Contract, DateTime<Utc>) -> Result<()> + Send,
    {
        let user = contract
            .party_user(party)
            .cloned()
            .ok_or(LeaseholdError::Unauthorized)?;
        let phone = self
            .directory
            .phone_for(&user)
            .await
            .ok_or_else(|| LeaseholdError::invalid_input("phone", "no phone number on file"))?;

        let (contract, issued) = self
            .lifecycle
            .mutate(&contract.id, |c, now| {
                guard(c, now)?;
                check_signable(c, party)?;
                let issued = self.otp.issue(&c.id, party, now)?;
                *c.otp.get_mut(party) = Some(issued.challenge.clone());
                Ok(issued)
            })
            .await?;

        self.lifecycle.notifier().send_otp(phone, issued.code);
        info!(contract_id = %contract.id, party = %party, "Signing code issued");

        Ok(OtpDispatch {
            contract_id: contract.id,
            party,
            expires_at: issued.challenge.expires_at,
        })
    }

    async fn verify<G>(
        &self,
        id: &ContractId,
        party: Party,
        code: &str,
        evidence: SignatureEvidence,
        guard: G,
    ) -> Result<Contract>
    where
        G: Fn(&Contract, DateTime<Utc>) -> Result<()> + Send,
    {
        let max_attempts = self.otp.max_attempts();

        let (contract, verification) = self
            .lifecycle
            .mutate(id, |c, now| {
                guard(c, now)?;
                check_signable(c, party)?;

                // nothing to persist when no code was ever requested
                let Some(challenge) = c.otp.get(party).clone() else {
                    warn!(contract_id = %c.id, party = %party, "Signing code submitted without challenge");
                    return Err(LeaseholdError::InvalidOtp);
                };

                match self.otp.verify(&challenge, &c.id, party, code, now)? {
                    OtpCheck::Valid => {
                        self.lifecycle.apply_signature(c, party, &evidence, now)?;
                        Ok(Verification::Signed)
                    }
                    OtpCheck::Mismatch => {
                        let attempts = challenge.attempts + 1;
                        let slot = c.otp.get_mut(party);
                        if attempts >= max_attempts {
                            *slot = None;
                        } else if let Some(stored) = slot.as_mut() {
                            stored.attempts = attempts;
                        }
                        Ok(Verification::Rejected("mismatch"))
                    }
                    OtpCheck::Expired => {
                        *c.otp.get_mut(party) = None;
                        Ok(Verification::Rejected("expired"))
                    }
                    OtpCheck::Exhausted => {
                        *c.otp.get_mut(party) = None;
                        Ok(Verification::Rejected("exhausted"))
                    }
                }
            })
            .await?;

        match verification {
            Verification::Signed => {
                self.lifecycle.after_signature(&contract, party);
                Ok(contract)
            }
            Verification::Rejected(reason) => {
                warn!(contract_id = %id, party = %party, reason, "Signing code rejected");
                Err(LeaseholdError::InvalidOtp)
            }
        }
    }

    async fn contract_for_token(&self, token: &str) -> Result<Contract> {
        let now = self.lifecycle.clock().now();
        let contract = self
            .lifecycle
            .find_by_token_hash(&hash_token(token))
            .await?
            .ok_or(LeaseholdError::InvalidSigningLink)?;
        self.check_token(&contract, token, now)?;
        Ok(contract)
    }

    fn check_token(&self, contract: &Contract, token: &str, now: DateTime<Utc>) -> Result<()> {
        let valid = contract.tenant_id.is_some()
            && contract
                .signing_token
                .as_ref()
                .map_or(false, |record| self.lifecycle.tokens().is_valid(record, token, now));
        if valid {
            Ok(())
        } else {
            Err(LeaseholdError::InvalidSigningLink)
        }
    }
}

fn check_signable(contract: &Contract, party: Party) -> Result<()> {
    if contract.is_signed_by(party) {
        return Err(LeaseholdError::AlreadySigned {
            party: party.to_string(),
        });
    }
    if !can_sign(contract.status, party) {
        return Err(LeaseholdError::invalid_transition(
            "contract",
            contract.status.as_str(),
            "sign",
        ));
    }
    Ok(())
}
