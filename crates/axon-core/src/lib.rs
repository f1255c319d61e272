pub mod config;
pub mod error;
pub mod types;

pub use config::AxonConfig;
pub use error::{AxonError, Result};
