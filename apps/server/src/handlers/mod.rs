pub mod account;
pub mod admin;
pub mod client;
pub mod health;
