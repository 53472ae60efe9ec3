use crate::database::connection::DbPool;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type};
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum SubmissionError {
    #[error("Submission with ID {id} not found")]
    NotFound { id: Uuid },
    #[error("Receipt {receipt_number} has already been submitted")]
    DuplicateReceipt { receipt_number: String },
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Type, PartialEq, Eq)]
#[sqlx(type_name = "submission_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SubmissionStatus {
    Pending,
    Verified,
    Rejected,
}

/// A member-asserted claim that a till payment happened. The claim becomes a
/// ledger row only after the verification cascade finds evidence for it.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ReceiptSubmission {
    pub id: Uuid,
    pub submitted_by: Uuid,
    pub member_id: Option<Uuid>,
    pub phone_number: String,
    pub amount: Decimal,
    pub receipt_number: String,
    pub payment_id: Option<Uuid>,
    pub status: SubmissionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateSubmission {
    pub submitted_by: Uuid,
    pub member_id: Option<Uuid>,
    pub phone_number: String,
    pub amount: Decimal,
    pub receipt_number: String,
}

impl ReceiptSubmission {
    /// Intake gate: one live submission per receipt code. A rejected
    /// submission does not hold the slot, so the same receipt can come back
    /// once evidence exists.
    pub async fn create(
        pool: &DbPool,
        submission: CreateSubmission,
    ) -> Result<Self, SubmissionError> {
        let now = Utc::now();

        let inserted = sqlx::query_as::<_, ReceiptSubmission>(
            "INSERT INTO receipt_submissions (id, submitted_by, member_id, phone_number, amount, receipt_number, status, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, 'pending', $7, $8)
             ON CONFLICT (receipt_number) WHERE status <> 'rejected' DO NOTHING
             RETURNING *",
        )
            .bind(Uuid::new_v4())
            .bind(submission.submitted_by)
            .bind(submission.member_id)
            .bind(&submission.phone_number)
            .bind(submission.amount)
            .bind(&submission.receipt_number)
            .bind(now)
            .bind(now)
            .fetch_optional(pool)
            .await?;

        inserted.ok_or(SubmissionError::DuplicateReceipt {
            receipt_number: submission.receipt_number,
        })
    }

    pub async fn find_live_by_receipt(
        pool: &DbPool,
        receipt_number: &str,
    ) -> Result<Option<Self>, SubmissionError> {
        let submission = sqlx::query_as::<_, ReceiptSubmission>(
            "SELECT * FROM receipt_submissions
             WHERE receipt_number = $1 AND status <> 'rejected'",
        )
        .bind(receipt_number)
        .fetch_optional(pool)
        .await?;

        Ok(submission)
    }

    pub async fn mark_verified(
        pool: &DbPool,
        id: Uuid,
        payment_id: Uuid,
    ) -> Result<Self, SubmissionError> {
        let updated = sqlx::query_as::<_, ReceiptSubmission>(
            "UPDATE receipt_submissions
             SET status = 'verified', payment_id = $2, updated_at = $3
             WHERE id = $1
             RETURNING *",
        )
        .bind(id)
        .bind(payment_id)
        .bind(Utc::now())
        .fetch_optional(pool)
        .await?;

        updated.ok_or(SubmissionError::NotFound { id })
    }

    pub async fn mark_rejected(pool: &DbPool, id: Uuid) -> Result<Self, SubmissionError> {
        let updated = sqlx::query_as::<_, ReceiptSubmission>(
            "UPDATE receipt_submissions
             SET status = 'rejected', updated_at = $2
             WHERE id = $1
             RETURNING *",
        )
        .bind(id)
        .bind(Utc::now())
        .fetch_optional(pool)
        .await?;

        updated.ok_or(SubmissionError::NotFound { id })
    }
}
