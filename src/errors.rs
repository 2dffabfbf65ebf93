use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("{tool} exited with {status}: {stderr}")]
    Tool {
        tool: String,
        status: String,
        stderr: String,
    },

    #[error("Cannot overwrite existing backup: {}", .0.display())]
    WouldOverwrite(PathBuf),

    #[error("No backups found in {}", .0.display())]
    NoBackups(PathBuf),
}

pub type Result<T> = std::result::Result<T, AppError>;
