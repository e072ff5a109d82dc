//! Notifier and resolver traits and shared error types.

/// Errors that can occur while preparing or delivering an alert.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("SMTP delivery failed: {0}")]
    Smtp(String),

    #[error("Template rendering failed: {0}")]
    Template(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid address '{address}': {reason}")]
    Address { address: String, reason: String },
}

/// A rendered alert ready for delivery.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct AlertMessage {
    pub subject: String,
    pub body: String,
}

/// Trait for delivery channel implementations.
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver an alert to a single destination.
    async fn deliver(&self, address: &str, message: &AlertMessage) -> Result<(), NotifyError>;

    /// Human-readable name for this channel (e.g., "email").
    fn channel_name(&self) -> &str;
}

/// Maps a user name to a delivery address.
///
/// `None` means the user has no known address; callers must surface that
/// rather than invent a destination.
pub trait AddressResolver: Send + Sync {
    fn resolve(&self, user: &str) -> Option<String>;
}
