pub mod config;
pub mod errors;
pub mod handlers;
pub mod ledger;
pub mod models;
pub mod services;
pub mod storage;
pub mod store;
