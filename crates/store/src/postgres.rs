//! PostgreSQL-backed [`Store`].
//!
//! [`PgStore`] owns a connection pool that is built once at startup and
//! shared by reference with every component that needs persistence. Writes
//! that touch more than one table run inside a transaction.

use chrono::{DateTime, Utc};
use nanny_core::config::PostgresConfig;
use nanny_core::{NewNotification, NewWhitelist, Notification, User, Whitelist};
use sqlx::postgres::{PgConnection, PgPoolOptions};
use sqlx::PgPool;
use tracing::{debug, info};

use crate::error::StoreError;
use crate::traits::{NotificationQuery, Store, WhitelistQuery, WhitelistSelector};

// ── Row mapping ──────────────────────────────────────────────────────

#[derive(Debug, sqlx::FromRow)]
struct UserRow {
    id: i64,
    name: String,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct WhitelistRow {
    id: i64,
    user_name: Option<String>,
    node: Option<String>,
    start_time: DateTime<Utc>,
    end_time: Option<DateTime<Utc>>,
    global_whitelist: bool,
}

impl From<WhitelistRow> for Whitelist {
    fn from(row: WhitelistRow) -> Self {
        Self {
            id: row.id,
            user: row.user_name,
            node: row.node,
            start_time: row.start_time,
            end_time: row.end_time,
            global: row.global_whitelist,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct NotificationRow {
    id: i64,
    user_name: String,
    node: String,
    time: DateTime<Utc>,
    memory: i64,
    percentage: f64,
    limit_pct: f64,
}

impl From<NotificationRow> for Notification {
    fn from(row: NotificationRow) -> Self {
        Self {
            id: row.id,
            user: row.user_name,
            node: row.node,
            time: row.time,
            memory: u64::try_from(row.memory).unwrap_or(0),
            percentage: row.percentage,
            limit: row.limit_pct,
        }
    }
}

async fn upsert_user(conn: &mut PgConnection, name: &str) -> Result<User, sqlx::Error> {
    let row = sqlx::query_as::<_, UserRow>(
        "INSERT INTO users (name) VALUES ($1)
         ON CONFLICT (name) DO UPDATE SET name = EXCLUDED.name
         RETURNING id, name",
    )
    .bind(name)
    .fetch_one(conn)
    .await?;
    Ok(row.into())
}

async fn delete_matching(
    conn: &mut PgConnection,
    selector: &WhitelistSelector,
) -> Result<u64, sqlx::Error> {
    let result = match selector {
        WhitelistSelector::Global => {
            sqlx::query("DELETE FROM whitelist WHERE global_whitelist")
                .execute(conn)
                .await?
        }
        WhitelistSelector::Scoped { user, node } => {
            sqlx::query(
                "DELETE FROM whitelist w
                 USING users u
                 WHERE w.user_id = u.id
                   AND u.name = $1
                   AND w.node = $2
                   AND NOT w.global_whitelist",
            )
            .bind(user)
            .bind(node)
            .execute(conn)
            .await?
        }
    };
    Ok(result.rows_affected())
}

// ── Store ────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect using the configured URL and pool size.
    pub async fn connect(config: &PostgresConfig) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.database_url())
            .await?;
        info!(host = %config.host, db = %config.database, "PostgreSQL connected");
        Ok(Self { pool })
    }

    /// Apply the bundled schema migrations.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        info!("Database migrations applied successfully");
        Ok(())
    }
}

#[async_trait::async_trait]
impl Store for PgStore {
    async fn health(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn find_user(&self, name: &str) -> Result<Option<User>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>("SELECT id, name FROM users WHERE name = $1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(User::from))
    }

    async fn replace_whitelist(&self, entry: NewWhitelist) -> Result<Whitelist, StoreError> {
        entry.validate()?;

        let mut tx = self.pool.begin().await?;
        let user_id = match entry.user.as_deref() {
            Some(name) => Some(upsert_user(&mut tx, name).await?.id),
            None => None,
        };
        let replaced = delete_matching(&mut tx, &WhitelistSelector::covering(&entry)).await?;

        let id = sqlx::query_scalar::<_, i64>(
            "INSERT INTO whitelist (user_id, node, start_time, end_time, global_whitelist)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING id",
        )
        .bind(user_id)
        .bind(&entry.node)
        .bind(entry.start_time)
        .bind(entry.end_time)
        .bind(entry.global)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;

        debug!(id, replaced, global = entry.global, "whitelist entry stored");
        Ok(Whitelist {
            id,
            user: entry.user,
            node: entry.node,
            start_time: entry.start_time,
            end_time: entry.end_time,
            global: entry.global,
        })
    }

    async fn delete_whitelist(&self, selector: &WhitelistSelector) -> Result<u64, StoreError> {
        let mut conn = self.pool.acquire().await?;
        Ok(delete_matching(&mut conn, selector).await?)
    }

    async fn find_whitelist(&self, query: &WhitelistQuery) -> Result<Vec<Whitelist>, StoreError> {
        let rows = sqlx::query_as::<_, WhitelistRow>(
            "SELECT w.id, u.name AS user_name, w.node, w.start_time, w.end_time,
                    w.global_whitelist
             FROM whitelist w
             LEFT JOIN users u ON u.id = w.user_id
             WHERE ($1::BOOLEAN IS NULL OR w.global_whitelist = $1)
               AND ($2::TEXT IS NULL OR u.name = $2)
               AND ($3::TEXT IS NULL OR w.node = $3)
               AND ($4::TIMESTAMPTZ IS NULL
                    OR (w.start_time <= $4 AND (w.end_time IS NULL OR w.end_time >= $4)))
             ORDER BY w.start_time DESC, w.id DESC",
        )
        .bind(query.global)
        .bind(&query.user)
        .bind(&query.node)
        .bind(query.active_at)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Whitelist::from).collect())
    }

    async fn insert_notification(
        &self,
        notification: NewNotification,
    ) -> Result<Notification, StoreError> {
        let mut tx = self.pool.begin().await?;
        let user = upsert_user(&mut tx, &notification.user).await?;

        let id = sqlx::query_scalar::<_, i64>(
            "INSERT INTO notification (user_id, node, time, memory, percentage, \"limit\")
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING id",
        )
        .bind(user.id)
        .bind(&notification.node)
        .bind(notification.time)
        .bind(i64::try_from(notification.memory).unwrap_or(i64::MAX))
        .bind(notification.percentage)
        .bind(notification.limit)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(Notification {
            id,
            user: notification.user,
            node: notification.node,
            time: notification.time,
            memory: notification.memory,
            percentage: notification.percentage,
            limit: notification.limit,
        })
    }

    async fn find_notifications(
        &self,
        query: &NotificationQuery,
    ) -> Result<Vec<Notification>, StoreError> {
        let rows = sqlx::query_as::<_, NotificationRow>(
            "SELECT n.id, u.name AS user_name, n.node, n.time, n.memory, n.percentage,
                    n.\"limit\" AS limit_pct
             FROM notification n
             JOIN users u ON u.id = n.user_id
             WHERE ($1::TEXT IS NULL OR u.name = $1)
               AND ($2::DOUBLE PRECISION IS NULL OR n.\"limit\" = $2)
               AND ($3::TIMESTAMPTZ IS NULL OR n.time >= $3)
             ORDER BY n.time DESC, n.id DESC",
        )
        .bind(&query.user)
        .bind(query.limit)
        .bind(query.since)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Notification::from).collect())
    }

    fn backend_name(&self) -> &str {
        "postgres"
    }
}
