pub mod clock;
pub mod config;
pub mod epoch;
pub mod token;
pub mod eth;
pub mod proof;
pub mod challenge;
pub mod receipt;
pub mod signing;
pub mod store;
pub mod metrics;
pub mod error;
pub mod types;
pub mod coordinator;
pub mod server;
pub mod client;
