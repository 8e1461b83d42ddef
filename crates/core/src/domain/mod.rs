pub mod account;
pub mod mission;
pub mod seller;
