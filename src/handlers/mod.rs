pub mod approvals;
pub mod auth;
pub mod callbacks;
pub mod contributions;
pub mod payments;
pub mod receipts;
pub mod refunds;
