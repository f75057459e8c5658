use thiserror::Error;

#[derive(Debug, Error)]
pub enum KeelError {
    #[error("Configuration error: {0}")]
    Config(String),
}

impl KeelError {
    /// Short machine-readable code, used as a structured log field.
    pub fn code(&self) -> &'static str {
        match self {
            KeelError::Config(_) => "CONFIG_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, KeelError>;
