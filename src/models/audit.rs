use crate::database::connection::DbPool;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Type, PartialEq, Eq)]
#[sqlx(type_name = "audit_event_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    PushRequest,
    PushCallback,
    ManualConfirmation,
    ManualValidationProbe,
    VerificationAttempt,
}

/// Append-only record of a gateway interaction or verification decision.
/// Rows are never updated or deleted; they are the only way prior decisions
/// get reconstructed.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AuditEvent {
    pub id: Uuid,
    pub event_type: AuditEventType,
    pub checkout_request_id: Option<String>,
    pub receipt_number: Option<String>,
    pub result_code: Option<i32>,
    pub result_desc: Option<String>,
    pub signature_valid: Option<bool>,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewAuditEvent {
    pub event_type: AuditEventType,
    pub checkout_request_id: Option<String>,
    pub receipt_number: Option<String>,
    pub result_code: Option<i32>,
    pub result_desc: Option<String>,
    pub signature_valid: Option<bool>,
    pub payload: serde_json::Value,
}

impl NewAuditEvent {
    pub fn new(event_type: AuditEventType) -> Self {
        Self {
            event_type,
            checkout_request_id: None,
            receipt_number: None,
            result_code: None,
            result_desc: None,
            signature_valid: None,
            payload: serde_json::json!({}),
        }
    }
}

impl AuditEvent {
    pub async fn record(pool: &DbPool, event: NewAuditEvent) -> Result<Self, sqlx::Error> {
        let recorded = sqlx::query_as::<_, AuditEvent>(
            "INSERT INTO audit_events (id, event_type, checkout_request_id, receipt_number, result_code, result_desc, signature_valid, payload, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
             RETURNING *",
        )
            .bind(Uuid::new_v4())
            .bind(event.event_type)
            .bind(event.checkout_request_id)
            .bind(event.receipt_number)
            .bind(event.result_code)
            .bind(event.result_desc)
            .bind(event.signature_valid)
            .bind(event.payload)
            .bind(Utc::now())
            .fetch_one(pool)
            .await?;

        Ok(recorded)
    }

    /// Recent events that recorded a successful gateway result for this
    /// receipt. Used as local evidence by the manual receipt verifier.
    pub async fn find_success_by_receipt(
        pool: &DbPool,
        receipt_number: &str,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let events = sqlx::query_as::<_, AuditEvent>(
            "SELECT * FROM audit_events
             WHERE receipt_number = $1 AND result_code = 0
             ORDER BY created_at DESC
             LIMIT 20",
        )
        .bind(receipt_number)
        .fetch_all(pool)
        .await?;

        Ok(events)
    }
}
