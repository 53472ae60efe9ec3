pub mod approval;
pub mod audit;
pub mod auth;
pub mod contribution;
pub mod payment;
pub mod refund;
pub mod submission;
pub mod user;
