use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct RefundRequestBody {
    pub contribution_id: Uuid,
    pub amount: Decimal,
    pub reason: Option<String>,
}
