use crate::database::connection::DbPool;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Type, PartialEq, Eq)]
#[sqlx(type_name = "contribution_category", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ContributionCategory {
    Welfare,
    Registration,
    MembershipFee,
    Project,
    Fundraiser,
}

impl ContributionCategory {
    /// Welfare, registration and membership-fee contributions can never be
    /// refunded once paid.
    pub fn is_refundable(&self) -> bool {
        !matches!(
            self,
            ContributionCategory::Welfare
                | ContributionCategory::Registration
                | ContributionCategory::MembershipFee
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Contribution {
    pub id: Uuid,
    pub created_by: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub category: ContributionCategory,
    pub amount: Option<Decimal>,
    pub due_date: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateContribution {
    pub created_by: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub category: ContributionCategory,
    pub amount: Option<Decimal>,
    pub due_date: DateTime<Utc>,
}

impl Contribution {
    pub async fn create(
        pool: &DbPool,
        contribution: CreateContribution,
    ) -> Result<Self, sqlx::Error> {
        let now = Utc::now();

        let contribution = sqlx::query_as::<_, Contribution>(
            "INSERT INTO contributions (id, created_by, title, description, category, amount, due_date, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
             RETURNING *",
        )
            .bind(Uuid::new_v4())
            .bind(contribution.created_by)
            .bind(contribution.title)
            .bind(contribution.description)
            .bind(contribution.category)
            .bind(contribution.amount)
            .bind(contribution.due_date)
            .bind(now)
            .bind(now)
            .fetch_one(pool)
            .await?;

        Ok(contribution)
    }

    pub async fn find_by_id(pool: &DbPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        let contribution =
            sqlx::query_as::<_, Contribution>("SELECT * FROM contributions WHERE id = $1")
                .bind(id)
                .fetch_optional(pool)
                .await?;

        Ok(contribution)
    }

    pub async fn find_all(pool: &DbPool) -> Result<Vec<Self>, sqlx::Error> {
        let contributions = sqlx::query_as::<_, Contribution>(
            "SELECT * FROM contributions ORDER BY created_at DESC",
        )
        .fetch_all(pool)
        .await?;

        Ok(contributions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn welfare_and_fees_are_never_refundable() {
        assert!(!ContributionCategory::Welfare.is_refundable());
        assert!(!ContributionCategory::Registration.is_refundable());
        assert!(!ContributionCategory::MembershipFee.is_refundable());
    }

    #[test]
    fn project_and_fundraiser_are_refundable() {
        assert!(ContributionCategory::Project.is_refundable());
        assert!(ContributionCategory::Fundraiser.is_refundable());
    }
}
