use crate::models::approval::ApprovalOutcome;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct ApprovalRequest {
    pub decision: ApprovalOutcome,
    pub notes: Option<String>,
}
