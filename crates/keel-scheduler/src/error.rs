use keel_store::StoreError;
use thiserror::Error;

/// Errors that can occur while scheduling automatic backups.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Looking up the settings due in the current bucket failed.
    #[error("failed to resolve due backup settings: {0}")]
    Store(#[from] StoreError),

    /// One step of the backup → pipeline → stage → task chain failed.
    /// Earlier steps are not rolled back.
    #[error("failed to create {step}: {source}")]
    Create {
        step: &'static str,
        #[source]
        source: StoreError,
    },

    #[error("failed to create task payload: {0}")]
    Payload(#[from] serde_json::Error),
}

impl SchedulerError {
    pub(crate) fn create(step: &'static str) -> impl FnOnce(StoreError) -> Self {
        move |source| SchedulerError::Create { step, source }
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
