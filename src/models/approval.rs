use crate::database::connection::DbPool;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Type, PartialEq, Eq)]
#[sqlx(type_name = "approval_outcome", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ApprovalOutcome {
    Approved,
    Rejected,
}

/// One-shot sign-off on a manually verified payment. The unique constraint on
/// `payment_id` is the whole mechanism: approval is not re-votable.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ApprovalDecision {
    pub id: Uuid,
    pub payment_id: Uuid,
    pub decided_by: Uuid,
    pub decision: ApprovalOutcome,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ApprovalDecision {
    /// Returns `None` when a decision already exists for this payment.
    pub async fn create(
        pool: &DbPool,
        payment_id: Uuid,
        decided_by: Uuid,
        decision: ApprovalOutcome,
        notes: Option<String>,
    ) -> Result<Option<Self>, sqlx::Error> {
        let inserted = sqlx::query_as::<_, ApprovalDecision>(
            "INSERT INTO approval_decisions (id, payment_id, decided_by, decision, notes, created_at)
             VALUES ($1, $2, $3, $4, $5, $6)
             ON CONFLICT (payment_id) DO NOTHING
             RETURNING *",
        )
            .bind(Uuid::new_v4())
            .bind(payment_id)
            .bind(decided_by)
            .bind(decision)
            .bind(notes)
            .bind(Utc::now())
            .fetch_optional(pool)
            .await?;

        Ok(inserted)
    }

    pub async fn find_by_payment(
        pool: &DbPool,
        payment_id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        let decision =
            sqlx::query_as::<_, ApprovalDecision>(
                "SELECT * FROM approval_decisions WHERE payment_id = $1",
            )
            .bind(payment_id)
            .fetch_optional(pool)
            .await?;

        Ok(decision)
    }
}
