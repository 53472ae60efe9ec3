use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct StkPushRequest {
    pub phone: String,
    pub amount: Decimal,
    pub contribution_id: Option<Uuid>,
    pub description: Option<String>,
    /// Officials may initiate a push for another member's contribution.
    pub on_behalf_of: Option<Uuid>,
}
