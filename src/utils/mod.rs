pub mod helpers;
pub mod phone;
