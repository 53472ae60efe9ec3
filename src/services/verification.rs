use crate::database::connection::DbPool;
use crate::models::audit::{AuditEvent, AuditEventType, NewAuditEvent};
use crate::models::payment::{CreateManualPayment, Payment, PaymentError, PaymentStatus};
use crate::models::submission::{ReceiptSubmission, SubmissionError};
use crate::services::mpesa::{ReceiptLookup, ReceiptRecord};
use rust_decimal::Decimal;
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, warn};

#[derive(Error, Debug)]
pub enum VerificationError {
    #[error(transparent)]
    Payment(#[from] PaymentError),
    #[error(transparent)]
    Submission(#[from] SubmissionError),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Where the verifier found proof that money actually moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvidenceSource {
    ExistingPayment,
    AuditTrail,
    ExternalLookup,
}

impl EvidenceSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvidenceSource::ExistingPayment => "existing_payment",
            EvidenceSource::AuditTrail => "audit_trail",
            EvidenceSource::ExternalLookup => "external_lookup",
        }
    }
}

#[derive(Debug)]
pub enum VerificationOutcome {
    Verified {
        payment: Payment,
        source: EvidenceSource,
        submission: ReceiptSubmission,
    },
    Rejected {
        submission: ReceiptSubmission,
    },
}

/// Amounts that differ only by minor-unit rounding still match.
pub fn amounts_match(claimed: &Decimal, recorded: &Decimal) -> bool {
    (claimed - recorded).abs() <= Decimal::new(1, 2)
}

/// The amount a logged gateway payload carried, whether it was stored as a
/// number or a string.
pub fn payload_amount(payload: &serde_json::Value) -> Option<Decimal> {
    match payload.get("amount")? {
        serde_json::Value::String(s) => s.parse().ok(),
        serde_json::Value::Number(n) => n.to_string().parse().ok(),
        _ => None,
    }
}

pub fn payload_phone(payload: &serde_json::Value) -> Option<String> {
    match payload.get("phone_number")? {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Runs the evidence cascade for member-reported till receipts. Evidence
/// admits the claim to the ledger as `awaiting_approval`; a treasurer still
/// has to sign off before the money counts.
pub struct ReceiptVerifier {
    lookup: Option<Arc<dyn ReceiptLookup>>,
}

impl ReceiptVerifier {
    pub fn new(lookup: Option<Arc<dyn ReceiptLookup>>) -> Self {
        Self { lookup }
    }

    /// First match wins: completed ledger row, then the audit trail, then the
    /// external probe. No evidence anywhere rejects the submission; rejection
    /// is retryable once evidence appears.
    pub async fn verify(
        &self,
        pool: &DbPool,
        submission: ReceiptSubmission,
    ) -> Result<VerificationOutcome, VerificationError> {
        if let Some(existing) = Payment::find_by_receipt(pool, &submission.receipt_number).await? {
            if existing.status == PaymentStatus::Completed {
                let updated =
                    ReceiptSubmission::mark_verified(pool, submission.id, existing.id).await?;
                self.record_attempt(pool, &updated, Some(EvidenceSource::ExistingPayment))
                    .await;
                return Ok(VerificationOutcome::Verified {
                    payment: existing,
                    source: EvidenceSource::ExistingPayment,
                    submission: updated,
                });
            }
        }

        if let Some(event) = self.audit_evidence(pool, &submission).await? {
            let payment = self
                .admit_to_ledger(pool, &submission, event.checkout_request_id.clone())
                .await?;
            let updated = ReceiptSubmission::mark_verified(pool, submission.id, payment.id).await?;
            self.record_attempt(pool, &updated, Some(EvidenceSource::AuditTrail))
                .await;
            return Ok(VerificationOutcome::Verified {
                payment,
                source: EvidenceSource::AuditTrail,
                submission: updated,
            });
        }

        if let Some(record) = self.external_evidence(pool, &submission).await {
            let payment = self
                .admit_to_ledger(pool, &submission, record.checkout_request_id.clone())
                .await?;
            let updated = ReceiptSubmission::mark_verified(pool, submission.id, payment.id).await?;
            self.record_attempt(pool, &updated, Some(EvidenceSource::ExternalLookup))
                .await;
            return Ok(VerificationOutcome::Verified {
                payment,
                source: EvidenceSource::ExternalLookup,
                submission: updated,
            });
        }

        let updated = ReceiptSubmission::mark_rejected(pool, submission.id).await?;
        self.record_attempt(pool, &updated, None).await;
        Ok(VerificationOutcome::Rejected { submission: updated })
    }

    async fn admit_to_ledger(
        &self,
        pool: &DbPool,
        submission: &ReceiptSubmission,
        checkout_request_id: Option<String>,
    ) -> Result<Payment, PaymentError> {
        Payment::create_awaiting_approval(
            pool,
            CreateManualPayment {
                member_id: submission.member_id,
                contribution_id: None,
                phone_number: submission.phone_number.clone(),
                amount: submission.amount,
                receipt_number: submission.receipt_number.clone(),
                checkout_request_id,
            },
        )
        .await
    }

    async fn audit_evidence(
        &self,
        pool: &DbPool,
        submission: &ReceiptSubmission,
    ) -> Result<Option<AuditEvent>, VerificationError> {
        let events = AuditEvent::find_success_by_receipt(pool, &submission.receipt_number).await?;
        Ok(events
            .into_iter()
            .find(|event| event_matches_claim(event, &submission.amount, &submission.phone_number)))
    }

    async fn external_evidence(
        &self,
        pool: &DbPool,
        submission: &ReceiptSubmission,
    ) -> Option<ReceiptRecord> {
        let lookup = self.lookup.as_ref()?;

        match lookup
            .lookup(
                &submission.receipt_number,
                &submission.amount,
                &submission.phone_number,
            )
            .await
        {
            Ok(Some(record)) => {
                let matched = record_matches_claim(
                    &record,
                    &submission.amount,
                    &submission.phone_number,
                );
                self.record_probe(pool, submission, json!({ "matched": matched }))
                    .await;
                matched.then_some(record)
            }
            Ok(None) => {
                self.record_probe(pool, submission, json!({ "matched": false }))
                    .await;
                None
            }
            Err(e) => {
                // A transport failure is indistinguishable from a non-match to
                // the member, but the probe event keeps them apart for
                // forensics; the member can resubmit once the gateway recovers.
                warn!(
                    "External receipt probe failed for {}: {}",
                    submission.receipt_number, e
                );
                self.record_probe(pool, submission, json!({ "error": e.to_string() }))
                    .await;
                None
            }
        }
    }

    async fn record_probe(
        &self,
        pool: &DbPool,
        submission: &ReceiptSubmission,
        detail: serde_json::Value,
    ) {
        let mut event = NewAuditEvent::new(AuditEventType::ManualValidationProbe);
        event.receipt_number = Some(submission.receipt_number.clone());
        event.payload = detail;
        if let Err(e) = AuditEvent::record(pool, event).await {
            error!("Failed to record validation probe event: {}", e);
        }
    }

    async fn record_attempt(
        &self,
        pool: &DbPool,
        submission: &ReceiptSubmission,
        source: Option<EvidenceSource>,
    ) {
        let mut event = NewAuditEvent::new(AuditEventType::VerificationAttempt);
        event.receipt_number = Some(submission.receipt_number.clone());
        event.payload = json!({
            "submission_id": submission.id,
            "amount": submission.amount.to_string(),
            "phone_number": submission.phone_number,
            "evidence": source.map(|s| s.as_str()),
            "outcome": submission.status,
        });
        if let Err(e) = AuditEvent::record(pool, event).await {
            error!("Failed to record verification attempt event: {}", e);
        }
    }
}

/// Evidence fields are only disqualifying when present: an audit event that
/// never recorded an amount can still vouch for the receipt.
fn event_matches_claim(event: &AuditEvent, amount: &Decimal, phone_number: &str) -> bool {
    let amount_ok = payload_amount(&event.payload)
        .map(|recorded| amounts_match(amount, &recorded))
        .unwrap_or(true);
    let phone_ok = payload_phone(&event.payload)
        .map(|recorded| recorded == phone_number)
        .unwrap_or(true);
    amount_ok && phone_ok
}

fn record_matches_claim(record: &ReceiptRecord, amount: &Decimal, phone_number: &str) -> bool {
    let amount_ok = record
        .amount
        .as_ref()
        .map(|recorded| amounts_match(amount, recorded))
        .unwrap_or(true);
    let phone_ok = record
        .phone_number
        .as_ref()
        .map(|recorded| recorded == phone_number)
        .unwrap_or(true);
    amount_ok && phone_ok
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::str::FromStr;
    use uuid::Uuid;

    #[test]
    fn amounts_within_a_cent_match() {
        let a = Decimal::from_str("500.00").unwrap();
        assert!(amounts_match(&a, &Decimal::from_str("500.01").unwrap()));
        assert!(amounts_match(&a, &Decimal::from_str("499.99").unwrap()));
        assert!(!amounts_match(&a, &Decimal::from_str("500.02").unwrap()));
        assert!(!amounts_match(&a, &Decimal::from_str("501").unwrap()));
    }

    #[test]
    fn payload_amount_reads_numbers_and_strings() {
        assert_eq!(
            payload_amount(&json!({ "amount": "500.00" })),
            Some(Decimal::from_str("500.00").unwrap())
        );
        assert_eq!(
            payload_amount(&json!({ "amount": 500 })),
            Some(Decimal::from(500))
        );
        assert_eq!(payload_amount(&json!({})), None);
        assert_eq!(payload_amount(&json!({ "amount": null })), None);
    }

    #[test]
    fn payload_phone_reads_numbers_and_strings() {
        assert_eq!(
            payload_phone(&json!({ "phone_number": "254712345678" })),
            Some("254712345678".to_string())
        );
        assert_eq!(
            payload_phone(&json!({ "phone_number": 254712345678u64 })),
            Some("254712345678".to_string())
        );
        assert_eq!(payload_phone(&json!({})), None);
    }

    fn audit_event_with(payload: serde_json::Value) -> AuditEvent {
        AuditEvent {
            id: Uuid::new_v4(),
            event_type: AuditEventType::PushCallback,
            checkout_request_id: None,
            receipt_number: Some("QWE123ABC".to_string()),
            result_code: Some(0),
            result_desc: None,
            signature_valid: None,
            payload,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn event_with_matching_fields_is_evidence() {
        let event = audit_event_with(json!({
            "amount": "500.00",
            "phone_number": "254712345678",
        }));
        assert!(event_matches_claim(
            &event,
            &Decimal::from(500),
            "254712345678"
        ));
    }

    #[test]
    fn event_with_wrong_amount_is_not_evidence() {
        let event = audit_event_with(json!({
            "amount": "600.00",
            "phone_number": "254712345678",
        }));
        assert!(!event_matches_claim(
            &event,
            &Decimal::from(500),
            "254712345678"
        ));
    }

    #[test]
    fn event_with_wrong_phone_is_not_evidence() {
        let event = audit_event_with(json!({
            "amount": "500.00",
            "phone_number": "254799999999",
        }));
        assert!(!event_matches_claim(
            &event,
            &Decimal::from(500),
            "254712345678"
        ));
    }

    #[test]
    fn event_without_metadata_still_vouches_for_the_receipt() {
        let event = audit_event_with(json!({}));
        assert!(event_matches_claim(
            &event,
            &Decimal::from(500),
            "254712345678"
        ));
    }

    #[test]
    fn lookup_record_matching_mirrors_event_matching() {
        let record = ReceiptRecord {
            receipt_number: "QWE123ABC".to_string(),
            amount: Some(Decimal::from_str("499.99").unwrap()),
            phone_number: None,
            checkout_request_id: None,
        };
        assert!(record_matches_claim(
            &record,
            &Decimal::from(500),
            "254712345678"
        ));

        let record = ReceiptRecord {
            amount: Some(Decimal::from(450)),
            ..record
        };
        assert!(!record_matches_claim(
            &record,
            &Decimal::from(500),
            "254712345678"
        ));
    }
}
