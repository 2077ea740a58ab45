pub mod admission;
pub mod analytics;
pub mod config;
pub mod error;
pub mod http;
pub mod processor;
pub mod tools;
pub mod transport;
pub mod twitter;
pub mod utils;
