pub mod adapters;
pub mod block;
pub mod config;
pub mod errors;
pub mod http_client;
pub mod indexer_client;
pub mod runner;
pub mod worker;
