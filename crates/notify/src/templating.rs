//! Minijinja template rendering for alert messages.
//!
//! Subject and body templates are plain strings (built-in defaults or
//! operator overrides), so a fresh [`minijinja::Environment`] is created
//! per render call.

use crate::traits::{AlertMessage, NotifyError};

const DEFAULT_SUBJECT: &str =
    "Memory limit exceeded on {{ node }}: {{ percentage | round(1) }}% (limit {{ limit | round(1) }}%)";

const DEFAULT_BODY: &str = "Hello {{ user }},

At {{ time }} your processes on {{ node }} were using {{ memory_gib | round(2) }} GiB \
({{ percentage | round(1) }}% of system memory), which exceeds the per-user limit of \
{{ limit | round(1) }}%.
{% if terminated %}
The following processes were terminated: {{ terminated | join(\", \") }}.
{% endif %}
Shared login nodes are not meant for memory intensive work. Please submit such jobs \
to the cluster scheduler instead.
";

/// Facts about one violation, exposed to templates.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ViolationContext {
    pub user: String,
    pub node: String,
    pub memory_bytes: u64,
    pub memory_gib: f64,
    pub percentage: f64,
    pub limit: f64,
    /// Timestamp in RFC 3339 format.
    pub time: String,
    /// Pids that received a termination signal.
    pub terminated: Vec<u32>,
}

impl ViolationContext {
    pub fn new(
        user: &str,
        node: &str,
        memory_bytes: u64,
        percentage: f64,
        limit: f64,
        time: String,
        terminated: Vec<u32>,
    ) -> Self {
        Self {
            user: user.to_string(),
            node: node.to_string(),
            memory_bytes,
            memory_gib: memory_bytes as f64 / (1024.0 * 1024.0 * 1024.0),
            percentage,
            limit,
            time,
            terminated,
        }
    }
}

/// Renders alert subjects and bodies.
#[derive(Debug, Clone)]
pub struct TemplateRenderer {
    subject: String,
    body: String,
}

impl TemplateRenderer {
    /// Renderer using the built-in templates.
    pub fn new() -> Self {
        Self {
            subject: DEFAULT_SUBJECT.to_string(),
            body: DEFAULT_BODY.to_string(),
        }
    }

    /// Renderer with optional overrides; missing ones keep the defaults.
    ///
    /// # Errors
    ///
    /// Returns [`NotifyError::Config`] if an override has syntax errors.
    pub fn with_overrides(subject: Option<&str>, body: Option<&str>) -> Result<Self, NotifyError> {
        let mut renderer = Self::new();
        if let Some(subject) = subject {
            Self::validate(subject)
                .map_err(|e| NotifyError::Config(format!("invalid subject template: {e}")))?;
            renderer.subject = subject.to_string();
        }
        if let Some(body) = body {
            Self::validate(body)
                .map_err(|e| NotifyError::Config(format!("invalid body template: {e}")))?;
            renderer.body = body.to_string();
        }
        Ok(renderer)
    }

    fn build_env() -> minijinja::Environment<'static> {
        let mut env = minijinja::Environment::new();
        env.add_filter("round", round_filter);
        env
    }

    /// Render the subject and body for a violation.
    ///
    /// # Errors
    ///
    /// Returns [`NotifyError::Template`] if rendering fails.
    pub fn render(&self, ctx: &ViolationContext) -> Result<AlertMessage, NotifyError> {
        let env = Self::build_env();
        let subject = env
            .render_str(&self.subject, ctx)
            .map_err(|e| NotifyError::Template(e.to_string()))?;
        let body = env
            .render_str(&self.body, ctx)
            .map_err(|e| NotifyError::Template(e.to_string()))?;
        Ok(AlertMessage {
            subject: subject.trim().to_string(),
            body,
        })
    }

    /// Check that a template string parses, without evaluating it.
    pub fn validate(template_str: &str) -> Result<(), NotifyError> {
        let env = Self::build_env();
        env.template_from_str(template_str)
            .map_err(|e| NotifyError::Template(e.to_string()))?;
        Ok(())
    }
}

impl Default for TemplateRenderer {
    fn default() -> Self {
        Self::new()
    }
}

/// Custom filter: round a float to N decimal places.
fn round_filter(value: f64, decimals: Option<u32>) -> String {
    let n = decimals.unwrap_or(0);
    format!("{:.prec$}", value, prec = n as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_context() -> ViolationContext {
        ViolationContext::new(
            "alice",
            "login1.crc.pitt.edu",
            3 * 1024 * 1024 * 1024,
            55.04,
            50.0,
            "2024-03-01T12:00:00+00:00".to_string(),
            vec![101, 102],
        )
    }

    #[test]
    fn default_subject_mentions_node_and_usage() {
        let msg = TemplateRenderer::new().render(&sample_context()).unwrap();
        assert_eq!(
            msg.subject,
            "Memory limit exceeded on login1.crc.pitt.edu: 55.0% (limit 50.0%)"
        );
    }

    #[test]
    fn default_body_lists_terminated_pids() {
        let msg = TemplateRenderer::new().render(&sample_context()).unwrap();
        assert!(msg.body.starts_with("Hello alice,"), "got: {}", msg.body);
        assert!(msg.body.contains("3.00 GiB"), "got: {}", msg.body);
        assert!(msg.body.contains("terminated: 101, 102."), "got: {}", msg.body);
    }

    #[test]
    fn default_body_without_terminations() {
        let mut ctx = sample_context();
        ctx.terminated.clear();
        let msg = TemplateRenderer::new().render(&ctx).unwrap();
        assert!(!msg.body.contains("were terminated"), "got: {}", msg.body);
    }

    #[test]
    fn overrides_replace_defaults() {
        let renderer =
            TemplateRenderer::with_overrides(Some("[nanny] {{ user }}@{{ node }}"), None).unwrap();
        let msg = renderer.render(&sample_context()).unwrap();
        assert_eq!(msg.subject, "[nanny] alice@login1.crc.pitt.edu");
        assert!(msg.body.starts_with("Hello alice,"));
    }

    #[test]
    fn invalid_override_is_config_error() {
        let err = TemplateRenderer::with_overrides(None, Some("{{ unclosed")).unwrap_err();
        match err {
            NotifyError::Config(msg) => assert!(msg.contains("body template"), "got: {msg}"),
            other => panic!("Expected Config error, got: {:?}", other),
        }
    }

    #[test]
    fn round_filter_formats_decimals() {
        assert_eq!(round_filter(0.987654, Some(2)), "0.99");
        assert_eq!(round_filter(0.987654, None), "1");
    }
}
