//! Address lookup by appending a fixed mail domain to the user name.

use crate::traits::AddressResolver;

/// Resolves `alice` to `alice@{domain}`.
///
/// Without a domain every lookup yields no address. User names that could
/// not form a valid local part (empty, containing `@` or whitespace) also
/// resolve to nothing.
#[derive(Debug, Clone, Default)]
pub struct DomainResolver {
    domain: Option<String>,
}

impl DomainResolver {
    pub fn new(domain: Option<String>) -> Self {
        let domain = domain
            .map(|d| d.trim().trim_start_matches('@').to_string())
            .filter(|d| !d.is_empty());
        Self { domain }
    }
}

impl AddressResolver for DomainResolver {
    fn resolve(&self, user: &str) -> Option<String> {
        let domain = self.domain.as_deref()?;
        if user.is_empty() || user.contains('@') || user.chars().any(char::is_whitespace) {
            return None;
        }
        Some(format!("{user}@{domain}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_domain() {
        let resolver = DomainResolver::new(Some("pitt.edu".into()));
        assert_eq!(resolver.resolve("alice").as_deref(), Some("alice@pitt.edu"));
    }

    #[test]
    fn leading_at_sign_is_tolerated() {
        let resolver = DomainResolver::new(Some(" @example.org ".into()));
        assert_eq!(resolver.resolve("bob").as_deref(), Some("bob@example.org"));
    }

    #[test]
    fn no_domain_means_no_address() {
        assert!(DomainResolver::new(None).resolve("alice").is_none());
        assert!(DomainResolver::new(Some("  ".into())).resolve("alice").is_none());
    }

    #[test]
    fn rejects_unusable_user_names() {
        let resolver = DomainResolver::new(Some("pitt.edu".into()));
        assert!(resolver.resolve("").is_none());
        assert!(resolver.resolve("a@b").is_none());
        assert!(resolver.resolve("two words").is_none());
    }
}
