use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum GridError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("input not found: {0:?}")]
    InputNotFound(PathBuf),
    #[error("unsupported input format: {0:?}")]
    UnsupportedInput(PathBuf),
    #[error("sheet not found: {0}")]
    SheetNotFound(String),
    #[error("empty or unreadable source: {0}")]
    EmptySource(String),
    #[error("invalid grid: {0}")]
    InvalidGrid(String),
    #[error("workbook error: {0}")]
    Workbook(String),
    #[error("tokenizer error: {0}")]
    Tokenizer(String),
    #[error("other: {0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, GridError>;

impl From<anyhow::Error> for GridError {
    fn from(value: anyhow::Error) -> Self {
        Self::Other(format!("{value:#}"))
    }
}

impl From<calamine::Error> for GridError {
    fn from(value: calamine::Error) -> Self {
        Self::Workbook(value.to_string())
    }
}
