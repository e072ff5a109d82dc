use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum NannyError {
    #[error("invalid whitelist request: {0}")]
    Validation(String),
}
