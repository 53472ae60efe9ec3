use crate::models::contribution::ContributionCategory;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct ContributionRequest {
    pub title: String,
    pub description: Option<String>,
    pub category: ContributionCategory,
    pub amount: Option<Decimal>,
    pub due_date: DateTime<Utc>,
}
