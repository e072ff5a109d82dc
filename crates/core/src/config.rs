use std::env;

use serde::{Deserialize, Serialize};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_env_parse<T: std::str::FromStr>(profile: &str, key: &str, default: T) -> T {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_bool(profile: &str, key: &str, default: bool) -> bool {
    match profiled_env_opt(profile, key) {
        Some(v) => matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        None => default,
    }
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub postgres: PostgresConfig,
    pub smtp: SmtpConfig,
    pub notify: NotifyConfig,
    pub monitor: MonitorConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `NANNY_PROFILE` env var. When set (e.g. `PROD`),
    /// every key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("NANNY_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            postgres: PostgresConfig::from_env_profiled(p),
            smtp: SmtpConfig::from_env_profiled(p),
            notify: NotifyConfig::from_env_profiled(p),
            monitor: MonitorConfig::from_env_profiled(p),
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a redacted summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!("  postgres:    host={}, db={}", self.postgres.host, self.postgres.database);
        tracing::info!("  smtp:        host={}:{}, tls={}", self.smtp.host, self.smtp.port, self.smtp.tls);
        tracing::info!(
            "  notify:      domain={}, cooldown={}s",
            self.notify.email_domain.as_deref().unwrap_or("(none)"),
            self.notify.cooldown_secs
        );
        tracing::info!(
            "  monitor:     node={}, limit={}%, min_process={}%, grace={}s, protected={}",
            self.monitor.node.as_deref().unwrap_or("(hostname)"),
            self.monitor.memory_limit,
            self.monitor.min_process_percent,
            self.monitor.grace_secs,
            self.monitor.protected_users.join(",")
        );
    }

    /// Return a redacted view safe for printing (no secrets).
    pub fn redacted_summary(&self) -> serde_json::Value {
        serde_json::json!({
            "profile": self.profile_label(),
            "postgres": {
                "host": self.postgres.host,
                "port": self.postgres.port,
                "database": self.postgres.database,
                "configured": self.postgres.is_configured(),
            },
            "smtp": {
                "host": self.smtp.host,
                "port": self.smtp.port,
                "tls": self.smtp.tls,
                "from": self.smtp.from,
            },
            "notify": {
                "email_domain": self.notify.email_domain,
                "cooldown_secs": self.notify.cooldown_secs,
                "custom_subject": self.notify.subject_template.is_some(),
                "custom_body": self.notify.body_template.is_some(),
            },
            "monitor": {
                "node": self.monitor.node,
                "memory_limit": self.monitor.memory_limit,
                "min_process_percent": self.monitor.min_process_percent,
                "grace_secs": self.monitor.grace_secs,
                "protected_users": self.monitor.protected_users,
            },
        })
    }
}

// ── PostgreSQL ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresConfig {
    /// Full connection URL; takes precedence over the individual fields.
    pub url: Option<String>,
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub ssl_mode: String,
    pub max_connections: u32,
}

impl PostgresConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            url: profiled_env_opt(p, "PG_URL"),
            host: profiled_env_or(p, "PG_HOST", "localhost"),
            port: profiled_env_parse(p, "PG_PORT", 5432),
            database: profiled_env_or(p, "PG_DATABASE", "node_nanny"),
            username: profiled_env_opt(p, "PG_USERNAME"),
            password: profiled_env_opt(p, "PG_PASSWORD"),
            ssl_mode: profiled_env_or(p, "PG_SSL_MODE", "prefer"),
            max_connections: profiled_env_parse(p, "PG_MAX_CONNECTIONS", 4),
        }
    }

    pub fn connection_string(&self) -> String {
        let user = self.username.as_deref().unwrap_or("postgres");
        let pass = self.password.as_deref().unwrap_or("");
        format!(
            "postgres://{}:{}@{}:{}/{}?sslmode={}",
            user, pass, self.host, self.port, self.database, self.ssl_mode
        )
    }

    /// `PG_URL` when set, otherwise the URL assembled from the parts.
    pub fn database_url(&self) -> String {
        self.url.clone().unwrap_or_else(|| self.connection_string())
    }

    pub fn is_configured(&self) -> bool {
        self.url.is_some() || self.username.is_some()
    }
}

// ── SMTP ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub tls: bool,
    pub from: String,
}

impl SmtpConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            host: profiled_env_or(p, "SMTP_HOST", "localhost"),
            port: profiled_env_parse(p, "SMTP_PORT", 25),
            tls: profiled_env_bool(p, "SMTP_TLS", false),
            from: profiled_env_or(p, "SMTP_FROM", "node-nanny@localhost"),
        }
    }
}

// ── Notifications ─────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    /// Mail domain appended to user names; `None` disables address lookup.
    pub email_domain: Option<String>,
    /// 0 records and alerts on every violation.
    pub cooldown_secs: u64,
    pub subject_template: Option<String>,
    pub body_template: Option<String>,
}

impl NotifyConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            email_domain: profiled_env_opt(p, "NANNY_EMAIL_DOMAIN"),
            cooldown_secs: profiled_env_parse(p, "NANNY_NOTIFY_COOLDOWN_SECS", 0),
            subject_template: profiled_env_opt(p, "NANNY_EMAIL_SUBJECT"),
            body_template: profiled_env_opt(p, "NANNY_EMAIL_BODY"),
        }
    }
}

// ── Monitor ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Node name override; the host name is used when unset.
    pub node: Option<String>,
    /// Default per-user memory limit, in percent of host memory.
    pub memory_limit: f64,
    /// Processes using less than this share are never signalled.
    pub min_process_percent: f64,
    /// Seconds a scan waits before enforcing on users found over the limit.
    pub grace_secs: u64,
    /// Accounts that are never signalled, whatever their usage.
    pub protected_users: Vec<String>,
}

impl MonitorConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            node: profiled_env_opt(p, "NANNY_NODE"),
            memory_limit: profiled_env_parse(p, "NANNY_MEMORY_LIMIT", 20.0),
            min_process_percent: profiled_env_parse(p, "NANNY_MIN_PROCESS_PERCENT", 0.0),
            grace_secs: profiled_env_parse(p, "NANNY_GRACE_SECS", 5),
            protected_users: parse_list(&profiled_env_or(p, "NANNY_PROTECTED_USERS", "root")),
        }
    }
}
