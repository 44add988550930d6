pub mod config;
pub mod images;
pub mod matcher;
pub mod models;
pub mod pipeline;
pub mod plugins;
pub mod store;
pub mod utils;

// Re-export commonly used types
pub use crate::config::AppConfig;
pub use pipeline::{Pipeline, PipelineContext, RunSummary};
pub use store::ListingStore;
pub use utils::error::AppError;

pub type Result<T> = std::result::Result<T, AppError>;
