pub mod clients;
pub mod reports;
