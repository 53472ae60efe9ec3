use crate::database::connection::DbPool;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type};
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum PaymentError {
    #[error("Ledger row missing for gateway key {key}")]
    Missing { key: String },
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Type, PartialEq, Eq)]
#[sqlx(type_name = "payment_method", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    Push,
    Till,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Type, PartialEq, Eq)]
#[sqlx(type_name = "payment_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    AwaitingApproval,
    Completed,
    Failed,
}

impl PaymentStatus {
    /// Completed and failed rows are never mutated again; later callbacks for
    /// the same checkout are audit-only.
    pub fn is_terminal(&self) -> bool {
        matches!(self, PaymentStatus::Completed | PaymentStatus::Failed)
    }
}

/// One row in the money ledger. Created by the push initiator or the manual
/// receipt verifier, finalized exactly once by the callback handler or the
/// approval workflow, never deleted.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Payment {
    pub id: Uuid,
    pub member_id: Option<Uuid>,
    pub contribution_id: Option<Uuid>,
    pub phone_number: String,
    pub amount: Decimal,
    pub method: PaymentMethod,
    pub merchant_request_id: Option<String>,
    pub checkout_request_id: Option<String>,
    pub receipt_number: Option<String>,
    pub status: PaymentStatus,
    pub result_desc: Option<String>,
    pub verified_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreatePushPayment {
    pub member_id: Option<Uuid>,
    pub contribution_id: Option<Uuid>,
    pub phone_number: String,
    pub amount: Decimal,
    pub merchant_request_id: String,
    pub checkout_request_id: String,
}

#[derive(Debug, Clone)]
pub struct CreateManualPayment {
    pub member_id: Option<Uuid>,
    pub contribution_id: Option<Uuid>,
    pub phone_number: String,
    pub amount: Decimal,
    pub receipt_number: String,
    pub checkout_request_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CreateOutOfBandPayment {
    pub phone_number: String,
    pub amount: Decimal,
    pub checkout_request_id: String,
    pub merchant_request_id: Option<String>,
    pub receipt_number: String,
    pub result_desc: Option<String>,
    pub verified_at: DateTime<Utc>,
}

impl Payment {
    /// Records a gateway-accepted push as `pending`. Replaying the same
    /// checkout-request id returns the row that already exists instead of
    /// erroring.
    pub async fn create_pending(
        pool: &DbPool,
        payment: CreatePushPayment,
    ) -> Result<Self, PaymentError> {
        let inserted = sqlx::query_as::<_, Payment>(
            "INSERT INTO payments (id, member_id, contribution_id, phone_number, amount, method, merchant_request_id, checkout_request_id, status, created_at)
             VALUES ($1, $2, $3, $4, $5, 'push', $6, $7, 'pending', $8)
             ON CONFLICT (checkout_request_id) DO NOTHING
             RETURNING *",
        )
            .bind(Uuid::new_v4())
            .bind(payment.member_id)
            .bind(payment.contribution_id)
            .bind(&payment.phone_number)
            .bind(payment.amount)
            .bind(&payment.merchant_request_id)
            .bind(&payment.checkout_request_id)
            .bind(Utc::now())
            .fetch_optional(pool)
            .await?;

        match inserted {
            Some(payment) => Ok(payment),
            None => Self::find_by_checkout_id(pool, &payment.checkout_request_id)
                .await?
                .ok_or(PaymentError::Missing {
                    key: payment.checkout_request_id,
                }),
        }
    }

    /// Records manually verified evidence as `awaiting_approval`. If another
    /// path already ledgered this receipt, the pre-existing row wins.
    pub async fn create_awaiting_approval(
        pool: &DbPool,
        payment: CreateManualPayment,
    ) -> Result<Self, PaymentError> {
        let inserted = sqlx::query_as::<_, Payment>(
            "INSERT INTO payments (id, member_id, contribution_id, phone_number, amount, method, checkout_request_id, receipt_number, status, created_at)
             VALUES ($1, $2, $3, $4, $5, 'till', $6, $7, 'awaiting_approval', $8)
             ON CONFLICT (receipt_number) DO NOTHING
             RETURNING *",
        )
            .bind(Uuid::new_v4())
            .bind(payment.member_id)
            .bind(payment.contribution_id)
            .bind(&payment.phone_number)
            .bind(payment.amount)
            .bind(&payment.checkout_request_id)
            .bind(&payment.receipt_number)
            .bind(Utc::now())
            .fetch_optional(pool)
            .await?;

        match inserted {
            Some(payment) => Ok(payment),
            None => Self::find_by_receipt(pool, &payment.receipt_number)
                .await?
                .ok_or(PaymentError::Missing {
                    key: payment.receipt_number,
                }),
        }
    }

    /// Safety net for callbacks whose original `pending` insert never landed.
    /// Inserts a terminal row directly; a collision on either gateway key
    /// means the ledger already knows this payment, and `None` is returned.
    pub async fn insert_completed_out_of_band(
        pool: &DbPool,
        payment: CreateOutOfBandPayment,
    ) -> Result<Option<Self>, PaymentError> {
        let inserted = sqlx::query_as::<_, Payment>(
            "INSERT INTO payments (id, phone_number, amount, method, merchant_request_id, checkout_request_id, receipt_number, status, result_desc, verified_at, created_at)
             VALUES ($1, $2, $3, 'push', $4, $5, $6, 'completed', $7, $8, $9)
             ON CONFLICT DO NOTHING
             RETURNING *",
        )
            .bind(Uuid::new_v4())
            .bind(&payment.phone_number)
            .bind(payment.amount)
            .bind(&payment.merchant_request_id)
            .bind(&payment.checkout_request_id)
            .bind(&payment.receipt_number)
            .bind(&payment.result_desc)
            .bind(payment.verified_at)
            .bind(Utc::now())
            .fetch_optional(pool)
            .await?;

        Ok(inserted)
    }

    pub async fn find_by_id(pool: &DbPool, id: Uuid) -> Result<Option<Self>, PaymentError> {
        let payment = sqlx::query_as::<_, Payment>("SELECT * FROM payments WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await?;

        Ok(payment)
    }

    pub async fn find_by_member(pool: &DbPool, member_id: Uuid) -> Result<Vec<Self>, PaymentError> {
        let payments = sqlx::query_as::<_, Payment>(
            "SELECT * FROM payments WHERE member_id = $1 ORDER BY created_at DESC",
        )
        .bind(member_id)
        .fetch_all(pool)
        .await?;

        Ok(payments)
    }

    pub async fn find_by_checkout_id(
        pool: &DbPool,
        checkout_request_id: &str,
    ) -> Result<Option<Self>, PaymentError> {
        let payment =
            sqlx::query_as::<_, Payment>("SELECT * FROM payments WHERE checkout_request_id = $1")
                .bind(checkout_request_id)
                .fetch_optional(pool)
                .await?;

        Ok(payment)
    }

    pub async fn find_by_receipt(
        pool: &DbPool,
        receipt_number: &str,
    ) -> Result<Option<Self>, PaymentError> {
        let payment =
            sqlx::query_as::<_, Payment>("SELECT * FROM payments WHERE receipt_number = $1")
                .bind(receipt_number)
                .fetch_optional(pool)
                .await?;

        Ok(payment)
    }

    /// The settled payment a member made against a contribution, if any.
    pub async fn find_completed_for_contribution(
        pool: &DbPool,
        member_id: Uuid,
        contribution_id: Uuid,
    ) -> Result<Option<Self>, PaymentError> {
        let payment = sqlx::query_as::<_, Payment>(
            "SELECT * FROM payments
             WHERE member_id = $1 AND contribution_id = $2 AND status = 'completed'
             ORDER BY created_at DESC
             LIMIT 1",
        )
        .bind(member_id)
        .bind(contribution_id)
        .fetch_optional(pool)
        .await?;

        Ok(payment)
    }

    /// pending -> completed. The status guard makes concurrent deliveries of
    /// the same callback resolve to a single transition; `None` means the row
    /// was not in `pending` anymore.
    pub async fn complete(
        pool: &DbPool,
        id: Uuid,
        receipt_number: &str,
        result_desc: Option<&str>,
        verified_at: DateTime<Utc>,
    ) -> Result<Option<Self>, PaymentError> {
        let updated = sqlx::query_as::<_, Payment>(
            "UPDATE payments
             SET status = 'completed', receipt_number = $2, result_desc = $3, verified_at = $4
             WHERE id = $1 AND status = 'pending'
             RETURNING *",
        )
        .bind(id)
        .bind(receipt_number)
        .bind(result_desc)
        .bind(verified_at)
        .fetch_optional(pool)
        .await?;

        Ok(updated)
    }

    /// pending -> failed, same guard as [`Payment::complete`].
    pub async fn fail(
        pool: &DbPool,
        id: Uuid,
        result_desc: Option<&str>,
    ) -> Result<Option<Self>, PaymentError> {
        let updated = sqlx::query_as::<_, Payment>(
            "UPDATE payments
             SET status = 'failed', result_desc = $2
             WHERE id = $1 AND status = 'pending'
             RETURNING *",
        )
        .bind(id)
        .bind(result_desc)
        .fetch_optional(pool)
        .await?;

        Ok(updated)
    }

    /// awaiting_approval -> completed/failed. The status guard is what stops
    /// two concurrent approvers from both succeeding; `None` reports the
    /// conflict.
    pub async fn finalize_approval(
        pool: &DbPool,
        id: Uuid,
        approved: bool,
    ) -> Result<Option<Self>, PaymentError> {
        let updated = sqlx::query_as::<_, Payment>(
            "UPDATE payments
             SET status = CASE WHEN $2 THEN 'completed'::payment_status ELSE 'failed'::payment_status END,
                 verified_at = CASE WHEN $2 THEN $3 ELSE verified_at END
             WHERE id = $1 AND status = 'awaiting_approval'
             RETURNING *",
        )
        .bind(id)
        .bind(approved)
        .bind(Utc::now())
        .fetch_optional(pool)
        .await?;

        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(PaymentStatus::Completed.is_terminal());
        assert!(PaymentStatus::Failed.is_terminal());
        assert!(!PaymentStatus::Pending.is_terminal());
        assert!(!PaymentStatus::AwaitingApproval.is_terminal());
    }

    #[test]
    fn status_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&PaymentStatus::AwaitingApproval).unwrap(),
            "\"awaiting_approval\""
        );
        assert_eq!(serde_json::to_string(&PaymentMethod::Till).unwrap(), "\"till\"");
    }
}
