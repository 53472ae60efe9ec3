pub mod approval;
pub mod contribution;
pub mod payment;
pub mod receipt;
pub mod refund;
pub mod register;
