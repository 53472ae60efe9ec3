use crate::database::connection::DbPool;
use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Type, PartialEq, Eq)]
#[sqlx(type_name = "refund_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RefundStatus {
    PendingApproval,
    Approved,
    Rejected,
    Paid,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RefundRequest {
    pub id: Uuid,
    pub payment_id: Uuid,
    pub contribution_id: Uuid,
    pub member_id: Uuid,
    pub original_amount: Decimal,
    pub requested_amount: Decimal,
    pub payout_amount: Decimal,
    pub status: RefundStatus,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateRefundRequest {
    pub payment_id: Uuid,
    pub contribution_id: Uuid,
    pub member_id: Uuid,
    pub original_amount: Decimal,
    pub requested_amount: Decimal,
    pub payout_amount: Decimal,
    pub reason: Option<String>,
}

impl RefundRequest {
    /// Payout owed for a requested amount under the configured percentage,
    /// rounded to two decimals.
    pub fn compute_payout(requested: Decimal, payout_percent: u32) -> Decimal {
        (requested * Decimal::from(payout_percent) / Decimal::from(100))
            .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
    }

    /// Returns `None` when another active request for the same
    /// (member, contribution) pair won the race.
    pub async fn create(
        pool: &DbPool,
        request: CreateRefundRequest,
    ) -> Result<Option<Self>, sqlx::Error> {
        let now = Utc::now();

        let inserted = sqlx::query_as::<_, RefundRequest>(
            "INSERT INTO refund_requests (id, payment_id, contribution_id, member_id, original_amount, requested_amount, payout_amount, status, reason, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, 'pending_approval', $8, $9, $10)
             ON CONFLICT (member_id, contribution_id) WHERE status IN ('pending_approval', 'approved') DO NOTHING
             RETURNING *",
        )
            .bind(Uuid::new_v4())
            .bind(request.payment_id)
            .bind(request.contribution_id)
            .bind(request.member_id)
            .bind(request.original_amount)
            .bind(request.requested_amount)
            .bind(request.payout_amount)
            .bind(request.reason)
            .bind(now)
            .bind(now)
            .fetch_optional(pool)
            .await?;

        Ok(inserted)
    }

    /// The pending or approved request holding the (member, contribution)
    /// slot, if any.
    pub async fn find_active(
        pool: &DbPool,
        member_id: Uuid,
        contribution_id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        let request = sqlx::query_as::<_, RefundRequest>(
            "SELECT * FROM refund_requests
             WHERE member_id = $1 AND contribution_id = $2
               AND status IN ('pending_approval', 'approved')",
        )
        .bind(member_id)
        .bind(contribution_id)
        .fetch_optional(pool)
        .await?;

        Ok(request)
    }

    pub async fn find_by_member(pool: &DbPool, member_id: Uuid) -> Result<Vec<Self>, sqlx::Error> {
        let requests = sqlx::query_as::<_, RefundRequest>(
            "SELECT * FROM refund_requests WHERE member_id = $1 ORDER BY created_at DESC",
        )
        .bind(member_id)
        .fetch_all(pool)
        .await?;

        Ok(requests)
    }

    pub async fn find_pending(pool: &DbPool) -> Result<Vec<Self>, sqlx::Error> {
        let requests = sqlx::query_as::<_, RefundRequest>(
            "SELECT * FROM refund_requests WHERE status = 'pending_approval' ORDER BY created_at ASC",
        )
        .fetch_all(pool)
        .await?;

        Ok(requests)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn payout_is_eighty_percent_of_requested() {
        let payout = RefundRequest::compute_payout(Decimal::from(300), 80);
        assert_eq!(payout, Decimal::from_str("240.00").unwrap());
    }

    #[test]
    fn payout_rounds_to_two_decimals() {
        // 80% of 33.33 = 26.664 -> 26.66
        let payout = RefundRequest::compute_payout(Decimal::from_str("33.33").unwrap(), 80);
        assert_eq!(payout, Decimal::from_str("26.66").unwrap());

        // 75% of 0.1 = 0.075 -> 0.08 (midpoint rounds away from zero)
        let payout = RefundRequest::compute_payout(Decimal::from_str("0.1").unwrap(), 75);
        assert_eq!(payout, Decimal::from_str("0.08").unwrap());
    }

    #[test]
    fn full_payout_percentage_is_identity() {
        let payout = RefundRequest::compute_payout(Decimal::from_str("512.50").unwrap(), 100);
        assert_eq!(payout, Decimal::from_str("512.50").unwrap());
    }
}
