pub mod config;
pub mod types;

pub use config::QueryGridConfig;
pub use types::*;
