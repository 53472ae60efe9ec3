pub mod access;
pub mod auth;
pub mod email;
pub mod mpesa;
pub mod verification;
