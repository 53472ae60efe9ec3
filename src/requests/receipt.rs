use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct SubmitReceiptRequest {
    pub phone: String,
    pub amount: Decimal,
    pub receipt_number: String,
    pub on_behalf_of: Option<Uuid>,
}
