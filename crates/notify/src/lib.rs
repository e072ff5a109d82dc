//! User alerting for memory-limit violations.
//!
//! This crate provides:
//! - `Notifier` trait for pluggable delivery channels
//! - `AddressResolver` trait mapping user names to destinations
//! - SMTP email delivery via `lettre`
//! - Minijinja rendering of alert subjects and bodies

pub mod email;
pub mod resolver;
pub mod templating;
pub mod traits;

pub use email::EmailNotifier;
pub use resolver::DomainResolver;
pub use templating::{TemplateRenderer, ViolationContext};
pub use traits::{AddressResolver, AlertMessage, Notifier, NotifyError};
