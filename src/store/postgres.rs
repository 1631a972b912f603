use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;

use super::ServerStore;
use crate::models::server::{NewServer, PaymentServer, ServerUpdate};

/// sqlx/Postgres store. One row per proxy server in `payment_servers`.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run pending migrations from the migrations/ directory.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl ServerStore for PgStore {
    async fn insert(
        &self,
        server: &NewServer,
        is_selected: bool,
    ) -> anyhow::Result<PaymentServer> {
        let row = sqlx::query_as::<_, PaymentServer>(
            r#"INSERT INTO payment_servers
                   (name, url, api_key, api_secret, capacity_limit, priority, is_active, is_selected, product_id_pool)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
               RETURNING id, name, url, api_key, api_secret, capacity_limit, current_usage,
                         is_active, is_selected, priority, last_used, product_id_pool,
                         created_at, updated_at"#,
        )
        .bind(&server.name)
        .bind(&server.url)
        .bind(&server.api_key)
        .bind(&server.api_secret)
        .bind(server.capacity_limit)
        .bind(server.priority)
        .bind(server.is_active)
        .bind(is_selected)
        .bind(&server.product_id_pool)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn get(&self, id: i64) -> anyhow::Result<Option<PaymentServer>> {
        let row = sqlx::query_as::<_, PaymentServer>(
            r#"SELECT id, name, url, api_key, api_secret, capacity_limit, current_usage,
                      is_active, is_selected, priority, last_used, product_id_pool,
                      created_at, updated_at
               FROM payment_servers WHERE id = $1"#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn list(&self) -> anyhow::Result<Vec<PaymentServer>> {
        let rows = sqlx::query_as::<_, PaymentServer>(
            r#"SELECT id, name, url, api_key, api_secret, capacity_limit, current_usage,
                      is_active, is_selected, priority, last_used, product_id_pool,
                      created_at, updated_at
               FROM payment_servers ORDER BY id ASC"#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn update(
        &self,
        id: i64,
        changes: &ServerUpdate,
    ) -> anyhow::Result<Option<PaymentServer>> {
        let row = sqlx::query_as::<_, PaymentServer>(
            r#"UPDATE payment_servers
               SET name = COALESCE($2, name),
                   url = COALESCE($3, url),
                   api_key = COALESCE($4, api_key),
                   api_secret = COALESCE($5, api_secret),
                   capacity_limit = COALESCE($6, capacity_limit),
                   priority = COALESCE($7, priority),
                   is_active = COALESCE($8, is_active),
                   product_id_pool = COALESCE($9, product_id_pool),
                   updated_at = NOW()
               WHERE id = $1
               RETURNING id, name, url, api_key, api_secret, capacity_limit, current_usage,
                         is_active, is_selected, priority, last_used, product_id_pool,
                         created_at, updated_at"#,
        )
        .bind(id)
        .bind(&changes.name)
        .bind(&changes.url)
        .bind(&changes.api_key)
        .bind(&changes.api_secret)
        .bind(changes.capacity_limit)
        .bind(changes.priority)
        .bind(changes.is_active)
        .bind(&changes.product_id_pool)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn delete(&self, id: i64) -> anyhow::Result<bool> {
        let result = sqlx::query("DELETE FROM payment_servers WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn select(&self, id: i64, at: DateTime<Utc>) -> anyhow::Result<bool> {
        // Clear-all-then-set inside one transaction so readers never
        // observe two selected rows.
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "UPDATE payment_servers SET is_selected = FALSE, updated_at = NOW() WHERE is_selected",
        )
        .execute(&mut *tx)
        .await?;
        let result = sqlx::query(
            r#"UPDATE payment_servers
               SET is_selected = TRUE, last_used = $2, updated_at = NOW()
               WHERE id = $1"#,
        )
        .bind(id)
        .bind(at)
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }
        tx.commit().await?;
        Ok(true)
    }

    async fn add_usage(
        &self,
        id: i64,
        amount: Decimal,
        at: DateTime<Utc>,
    ) -> anyhow::Result<Option<PaymentServer>> {
        // Atomic increment: concurrent reports never lose money. The
        // caller's threshold decision still works from its earlier read,
        // so capacity enforcement stays eventual, not instant.
        let row = sqlx::query_as::<_, PaymentServer>(
            r#"UPDATE payment_servers
               SET current_usage = current_usage + $2, last_used = $3, updated_at = NOW()
               WHERE id = $1
               RETURNING id, name, url, api_key, api_secret, capacity_limit, current_usage,
                         is_active, is_selected, priority, last_used, product_id_pool,
                         created_at, updated_at"#,
        )
        .bind(id)
        .bind(amount)
        .bind(at)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn reset_usage(&self, id: i64) -> anyhow::Result<bool> {
        let result = sqlx::query(
            "UPDATE payment_servers SET current_usage = 0, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
