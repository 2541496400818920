pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod aws;
pub mod config;
pub mod counters;
pub mod errors;
pub mod model;
pub mod output;
pub mod registry;
pub mod scraper;
