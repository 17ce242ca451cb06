//! Access gate over the allow-list: who may obtain an account and
//! whether an existing identity may currently act.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::cpf;
use crate::errors::AppResult;

/// Pluggable gate over the allow-list store.
///
/// Blocking is a soft, application-level denial: credentials stay valid
/// and login keeps working, only gated actions are refused.
#[async_trait]
pub trait AccessGate: Send + Sync {
    /// An allow-list entry exists for this CPF.
    async fn is_authorized(&self, cpf: &str) -> AppResult<bool>;

    /// The entry's blocked flag; a missing entry is not blocked.
    async fn is_blocked(&self, cpf: &str) -> AppResult<bool>;

    /// Last write wins; concurrent admin edits are not serialized.
    async fn set_blocked(&self, cpf: &str, blocked: bool) -> AppResult<()>;
}

/// Gate backed by the `authorized_cpfs` table.
#[derive(Debug, Clone)]
pub struct SqliteGate {
    pool: SqlitePool,
}

impl SqliteGate {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AccessGate for SqliteGate {
    async fn is_authorized(&self, cpf: &str) -> AppResult<bool> {
        let key = cpf::normalize(cpf);
        let count: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM authorized_cpfs WHERE cpf = ?")
            .bind(&key)
            .fetch_one(&self.pool)
            .await?;

        if count == 0 {
            tracing::debug!(cpf = %key, "cpf not on allow-list");
        }
        Ok(count > 0)
    }

    async fn is_blocked(&self, cpf: &str) -> AppResult<bool> {
        let key = cpf::normalize(cpf);
        let blocked: Option<bool> =
            sqlx::query_scalar("SELECT blocked FROM authorized_cpfs WHERE cpf = ?")
                .bind(&key)
                .fetch_optional(&self.pool)
                .await?;

        Ok(blocked.unwrap_or(false))
    }

    async fn set_blocked(&self, cpf: &str, blocked: bool) -> AppResult<()> {
        let key = cpf::normalize(cpf);
        let affected = sqlx::query("UPDATE authorized_cpfs SET blocked = ? WHERE cpf = ?")
            .bind(blocked)
            .bind(&key)
            .execute(&self.pool)
            .await?
            .rows_affected();

        if affected == 0 {
            tracing::warn!(cpf = %key, blocked, "set_blocked on missing allow-list entry");
        } else {
            tracing::debug!(cpf = %key, blocked, "allow-list blocked flag updated");
        }
        Ok(())
    }
}
