use nanny_core::NannyError;
use nanny_store::StoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MonitorError {
    #[error(transparent)]
    Invalid(#[from] NannyError),

    #[error("persistence failure: {0}")]
    Store(#[from] StoreError),

    #[error("process inspection failed: {0}")]
    Inspect(String),
}

impl MonitorError {
    /// Whether the error comes from shared infrastructure rather than the
    /// caller's request.
    pub fn is_infrastructure(&self) -> bool {
        match self {
            Self::Store(StoreError::Invalid(_)) | Self::Invalid(_) => false,
            Self::Store(_) | Self::Inspect(_) => true,
        }
    }
}
