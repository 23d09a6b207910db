pub mod auth;
pub mod invoicing;
pub mod lifecycle;
pub mod notify;
pub mod reporting;
