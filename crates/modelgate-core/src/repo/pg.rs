//! PostgreSQL repository implementation.

use async_trait::async_trait;
use chrono::Utc;
use modelgate_types::error::{RepoResult, RepositoryError};
use modelgate_types::{
    Account, AuthData, ModelMapping, Provider, ProxyHealth, ProxyServer, QuotaPattern,
    RequestLogEntry,
};
use sqlx::postgres::PgPool;
use sqlx::Row;

use super::Repository;

pub struct PgRepository {
    pool: PgPool,
}

impl PgRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> RepoResult<Self> {
        let pool = PgPool::connect(database_url).await.map_err(map_sqlx_err)?;
        Ok(Self::new(pool))
    }
}

fn map_sqlx_err(err: sqlx::Error) -> RepositoryError {
    match err {
        sqlx::Error::RowNotFound => RepositoryError::NotFound("row not found".to_string()),
        other => RepositoryError::Database(other.to_string()),
    }
}

fn map_dup(err: sqlx::Error, what: &str) -> RepositoryError {
    if err.to_string().contains("duplicate") {
        RepositoryError::AlreadyExists(what.to_string())
    } else {
        map_sqlx_err(err)
    }
}

fn account_from_row(row: &sqlx::postgres::PgRow) -> RepoResult<Account> {
    let auth_json: serde_json::Value = row.try_get("auth_data").map_err(map_sqlx_err)?;
    let auth_data: AuthData = serde_json::from_value(auth_json)
        .map_err(|e| RepositoryError::Serialization(e.to_string()))?;
    Ok(Account {
        id: row.try_get("id").map_err(map_sqlx_err)?,
        provider_id: row.try_get("provider_id").map_err(map_sqlx_err)?,
        label: row.try_get("label").map_err(map_sqlx_err)?,
        is_active: row.try_get("is_active").map_err(map_sqlx_err)?,
        auth_data,
        proxy_id: row.try_get("proxy_id").map_err(map_sqlx_err)?,
        proxy_url: row.try_get("proxy_url").map_err(map_sqlx_err)?,
        created_by: row.try_get("created_by").map_err(map_sqlx_err)?,
        created_at: row.try_get("created_at").map_err(map_sqlx_err)?,
        updated_at: row.try_get("updated_at").map_err(map_sqlx_err)?,
    })
}

fn provider_from_row(row: &sqlx::postgres::PgRow) -> RepoResult<Provider> {
    let auth_types: serde_json::Value = row.try_get("supported_auth_types").map_err(map_sqlx_err)?;
    let models: serde_json::Value = row.try_get("supported_models").map_err(map_sqlx_err)?;
    Ok(Provider {
        id: row.try_get("id").map_err(map_sqlx_err)?,
        name: row.try_get("name").map_err(map_sqlx_err)?,
        base_url: row.try_get("base_url").map_err(map_sqlx_err)?,
        supported_auth_types: serde_json::from_value(auth_types)
            .map_err(|e| RepositoryError::Serialization(e.to_string()))?,
        supported_models: serde_json::from_value(models)
            .map_err(|e| RepositoryError::Serialization(e.to_string()))?,
        is_active: row.try_get("is_active").map_err(map_sqlx_err)?,
        quota_window_secs: row.try_get("quota_window_secs").map_err(map_sqlx_err)?,
    })
}

fn proxy_from_row(row: &sqlx::postgres::PgRow) -> RepoResult<ProxyServer> {
    let health: String = row.try_get("health_status").map_err(map_sqlx_err)?;
    let health_status = match health.as_str() {
        "degraded" => ProxyHealth::Degraded,
        "down" => ProxyHealth::Down,
        _ => ProxyHealth::Healthy,
    };
    Ok(ProxyServer {
        id: row.try_get("id").map_err(map_sqlx_err)?,
        url: row.try_get("url").map_err(map_sqlx_err)?,
        is_active: row.try_get("is_active").map_err(map_sqlx_err)?,
        max_accounts: row.try_get("max_accounts").map_err(map_sqlx_err)?,
        current_accounts: row.try_get("current_accounts").map_err(map_sqlx_err)?,
        health_status,
        marked_down_at: row.try_get("marked_down_at").map_err(map_sqlx_err)?,
        priority: row.try_get("priority").map_err(map_sqlx_err)?,
    })
}

fn health_str(health: ProxyHealth) -> &'static str {
    match health {
        ProxyHealth::Healthy => "healthy",
        ProxyHealth::Degraded => "degraded",
        ProxyHealth::Down => "down",
    }
}

fn pattern_from_row(row: &sqlx::postgres::PgRow) -> RepoResult<QuotaPattern> {
    Ok(QuotaPattern {
        account_id: row.try_get("account_id").map_err(map_sqlx_err)?,
        model: row.try_get("model").map_err(map_sqlx_err)?,
        est_request_limit: row.try_get("est_request_limit").map_err(map_sqlx_err)?,
        est_token_limit: row.try_get("est_token_limit").map_err(map_sqlx_err)?,
        confidence: row.try_get("confidence").map_err(map_sqlx_err)?,
        sample_count: row.try_get("sample_count").map_err(map_sqlx_err)?,
        last_exhausted_at: row.try_get("last_exhausted_at").map_err(map_sqlx_err)?,
    })
}

#[async_trait]
impl Repository for PgRepository {
    async fn list_active_accounts(&self, provider_id: &str) -> RepoResult<Vec<Account>> {
        let rows = sqlx::query(
            r#"SELECT id, provider_id, label, is_active, auth_data, proxy_id, proxy_url,
                      created_by, created_at, updated_at
               FROM accounts WHERE provider_id = $1 AND is_active = TRUE"#,
        )
        .bind(provider_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        rows.iter().map(account_from_row).collect()
    }

    async fn get_account(&self, id: &str) -> RepoResult<Account> {
        let row = sqlx::query(
            r#"SELECT id, provider_id, label, is_active, auth_data, proxy_id, proxy_url,
                      created_by, created_at, updated_at
               FROM accounts WHERE id = $1"#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?
        .ok_or_else(|| RepositoryError::NotFound(id.to_string()))?;

        account_from_row(&row)
    }

    async fn create_account(&self, account: &Account) -> RepoResult<()> {
        let auth_json = serde_json::to_value(&account.auth_data)
            .map_err(|e| RepositoryError::Serialization(e.to_string()))?;

        sqlx::query(
            r#"INSERT INTO accounts (id, provider_id, label, is_active, auth_data, proxy_id,
                                     proxy_url, created_by, created_at, updated_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)"#,
        )
        .bind(&account.id)
        .bind(&account.provider_id)
        .bind(&account.label)
        .bind(account.is_active)
        .bind(auth_json)
        .bind(&account.proxy_id)
        .bind(&account.proxy_url)
        .bind(&account.created_by)
        .bind(account.created_at)
        .bind(account.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_dup(e, &account.id))?;

        Ok(())
    }

    async fn delete_account(&self, id: &str) -> RepoResult<()> {
        sqlx::query("DELETE FROM accounts WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        Ok(())
    }

    async fn update_auth_data(&self, account_id: &str, auth: &AuthData) -> RepoResult<()> {
        let auth_json = serde_json::to_value(auth)
            .map_err(|e| RepositoryError::Serialization(e.to_string()))?;

        let result = sqlx::query(
            "UPDATE accounts SET auth_data = $2, updated_at = $3 WHERE id = $1",
        )
        .bind(account_id)
        .bind(auth_json)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(account_id.to_string()));
        }
        Ok(())
    }

    async fn set_account_active(&self, account_id: &str, active: bool) -> RepoResult<()> {
        sqlx::query("UPDATE accounts SET is_active = $2, updated_at = $3 WHERE id = $1")
            .bind(account_id)
            .bind(active)
            .bind(Utc::now())
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        Ok(())
    }

    async fn list_providers(&self) -> RepoResult<Vec<Provider>> {
        let rows = sqlx::query(
            r#"SELECT id, name, base_url, supported_auth_types, supported_models, is_active,
                      quota_window_secs
               FROM providers WHERE is_active = TRUE"#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        rows.iter().map(provider_from_row).collect()
    }

    async fn get_provider(&self, id: &str) -> RepoResult<Provider> {
        let row = sqlx::query(
            r#"SELECT id, name, base_url, supported_auth_types, supported_models, is_active,
                      quota_window_secs
               FROM providers WHERE id = $1"#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?
        .ok_or_else(|| RepositoryError::NotFound(id.to_string()))?;

        provider_from_row(&row)
    }

    async fn list_proxies(&self) -> RepoResult<Vec<ProxyServer>> {
        let rows = sqlx::query(
            r#"SELECT id, url, is_active, max_accounts, current_accounts, health_status,
                      marked_down_at, priority
               FROM proxies"#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        rows.iter().map(proxy_from_row).collect()
    }

    async fn update_proxy(&self, proxy: &ProxyServer) -> RepoResult<()> {
        sqlx::query(
            r#"UPDATE proxies SET url = $2, is_active = $3, max_accounts = $4,
                      current_accounts = $5, health_status = $6, marked_down_at = $7,
                      priority = $8
               WHERE id = $1"#,
        )
        .bind(&proxy.id)
        .bind(&proxy.url)
        .bind(proxy.is_active)
        .bind(proxy.max_accounts)
        .bind(proxy.current_accounts)
        .bind(health_str(proxy.health_status))
        .bind(proxy.marked_down_at)
        .bind(proxy.priority)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(())
    }

    async fn count_accounts_per_proxy(&self) -> RepoResult<Vec<(String, i64)>> {
        let rows = sqlx::query(
            r#"SELECT proxy_id, COUNT(*) AS n FROM accounts
               WHERE proxy_id IS NOT NULL GROUP BY proxy_id"#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        rows.iter()
            .map(|row| {
                let id: String = row.try_get("proxy_id").map_err(map_sqlx_err)?;
                let n: i64 = row.try_get("n").map_err(map_sqlx_err)?;
                Ok((id, n))
            })
            .collect()
    }

    async fn find_mapping(&self, alias: &str) -> RepoResult<Option<ModelMapping>> {
        let row = sqlx::query(
            r#"SELECT alias, provider_id, model_name, enabled, priority, owner_id
               FROM model_mappings
               WHERE alias = $1 AND enabled = TRUE
               ORDER BY priority DESC LIMIT 1"#,
        )
        .bind(alias)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        row.map(|row| {
            Ok(ModelMapping {
                alias: row.try_get("alias").map_err(map_sqlx_err)?,
                provider_id: row.try_get("provider_id").map_err(map_sqlx_err)?,
                model_name: row.try_get("model_name").map_err(map_sqlx_err)?,
                enabled: row.try_get("enabled").map_err(map_sqlx_err)?,
                priority: row.try_get("priority").map_err(map_sqlx_err)?,
                owner_id: row.try_get("owner_id").map_err(map_sqlx_err)?,
            })
        })
        .transpose()
    }

    async fn upsert_mapping(&self, mapping: &ModelMapping) -> RepoResult<()> {
        sqlx::query(
            r#"INSERT INTO model_mappings (alias, provider_id, model_name, enabled, priority, owner_id)
               VALUES ($1, $2, $3, $4, $5, $6)
               ON CONFLICT (alias) DO UPDATE SET
                   provider_id = EXCLUDED.provider_id,
                   model_name = EXCLUDED.model_name,
                   enabled = EXCLUDED.enabled,
                   priority = EXCLUDED.priority,
                   owner_id = EXCLUDED.owner_id"#,
        )
        .bind(&mapping.alias)
        .bind(&mapping.provider_id)
        .bind(&mapping.model_name)
        .bind(mapping.enabled)
        .bind(mapping.priority)
        .bind(&mapping.owner_id)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(())
    }

    async fn delete_mapping(&self, alias: &str) -> RepoResult<()> {
        sqlx::query("DELETE FROM model_mappings WHERE alias = $1")
            .bind(alias)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        Ok(())
    }

    async fn get_quota_pattern(
        &self,
        account_id: &str,
        model: &str,
    ) -> RepoResult<Option<QuotaPattern>> {
        let row = sqlx::query(
            r#"SELECT account_id, model, est_request_limit, est_token_limit, confidence,
                      sample_count, last_exhausted_at
               FROM account_quota_patterns WHERE account_id = $1 AND model = $2"#,
        )
        .bind(account_id)
        .bind(model)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        row.as_ref().map(pattern_from_row).transpose()
    }

    async fn upsert_quota_pattern(&self, pattern: &QuotaPattern) -> RepoResult<()> {
        sqlx::query(
            r#"INSERT INTO account_quota_patterns
                   (account_id, model, est_request_limit, est_token_limit, confidence,
                    sample_count, last_exhausted_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7)
               ON CONFLICT (account_id, model) DO UPDATE SET
                   est_request_limit = EXCLUDED.est_request_limit,
                   est_token_limit = EXCLUDED.est_token_limit,
                   confidence = EXCLUDED.confidence,
                   sample_count = EXCLUDED.sample_count,
                   last_exhausted_at = EXCLUDED.last_exhausted_at"#,
        )
        .bind(&pattern.account_id)
        .bind(&pattern.model)
        .bind(pattern.est_request_limit)
        .bind(pattern.est_token_limit)
        .bind(pattern.confidence)
        .bind(pattern.sample_count)
        .bind(pattern.last_exhausted_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(())
    }

    async fn list_quota_patterns(&self) -> RepoResult<Vec<QuotaPattern>> {
        let rows = sqlx::query(
            r#"SELECT account_id, model, est_request_limit, est_token_limit, confidence,
                      sample_count, last_exhausted_at
               FROM account_quota_patterns"#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        rows.iter().map(pattern_from_row).collect()
    }

    async fn insert_request_log(&self, entry: &RequestLogEntry) -> RepoResult<()> {
        sqlx::query(
            r#"INSERT INTO request_logs
                   (account_id, proxy_id, provider_id, model, status_code, latency_ms,
                    retry_count, switched_from_account_id, error, created_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)"#,
        )
        .bind(&entry.account_id)
        .bind(&entry.proxy_id)
        .bind(&entry.provider_id)
        .bind(&entry.model)
        .bind(entry.status_code)
        .bind(entry.latency_ms)
        .bind(entry.retry_count)
        .bind(&entry.switched_from_account_id)
        .bind(&entry.error)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(())
    }
}
