// crates/climate-core/src/error.rs

use climate_parser::ParserError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Polars operation failed: {0}")]
    Polars(#[from] polars::error::PolarsError),

    #[error("Input parsing error: {0}")]
    Parser(#[from] ParserError),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid configuration file: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{stage} failed: {message}")]
    Stage { stage: String, message: String },
}

pub type Result<T> = std::result::Result<T, PipelineError>;
