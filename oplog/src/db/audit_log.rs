//! 操作ログストレージ

use crate::audit::types::{AuditLogFilter, AuditRecord};
use crate::common::error::{OplogError, OplogResult};
use crate::db::traits::AuditStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

const DEFAULT_LIMIT: i64 = 50;

/// 操作ログのDB操作
#[derive(Clone)]
pub struct AuditLogStorage {
    pool: SqlitePool,
}

/// sqlx::FromRow用の行構造体
#[derive(Debug, sqlx::FromRow)]
struct AuditLogRow {
    id: i64,
    timestamp: String,
    client_ip: String,
    ip_location: String,
    method: String,
    path: String,
    user_agent: String,
    body: String,
    latency_ms: i64,
    username: String,
    role_name: String,
    endpoint_description: String,
    status: i64,
    response_data: String,
}

impl TryFrom<AuditLogRow> for AuditRecord {
    type Error = OplogError;

    fn try_from(row: AuditLogRow) -> Result<Self, Self::Error> {
        let timestamp = DateTime::parse_from_rfc3339(&row.timestamp)
            .map_err(|e| OplogError::Database(format!("Invalid timestamp: {}", e)))?
            .with_timezone(&Utc);
        let status = i32::try_from(row.status)
            .map_err(|e| OplogError::Database(format!("Invalid status: {}", e)))?;

        Ok(AuditRecord {
            id: Some(row.id),
            timestamp,
            client_ip: row.client_ip,
            ip_location: row.ip_location,
            method: row.method,
            path: row.path,
            user_agent: row.user_agent,
            body: row.body,
            latency_ms: row.latency_ms,
            username: row.username,
            role_name: row.role_name,
            endpoint_description: row.endpoint_description,
            status,
            response_data: row.response_data,
        })
    }
}

impl AuditLogStorage {
    /// 新しいストレージを作成
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// フィルタ条件で検索（新しい順）
    pub async fn query(&self, filter: &AuditLogFilter) -> OplogResult<Vec<AuditRecord>> {
        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT id, timestamp, client_ip, ip_location, method, path, user_agent, body, \
             latency_ms, username, role_name, endpoint_description, status, response_data \
             FROM operation_logs",
        );
        push_where(&mut builder, filter);
        builder
            .push(" ORDER BY id DESC LIMIT ")
            .push_bind(filter.limit.unwrap_or(DEFAULT_LIMIT))
            .push(" OFFSET ")
            .push_bind(filter.offset.unwrap_or(0));

        let rows: Vec<AuditLogRow> = builder
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| OplogError::Database(format!("Failed to query audit logs: {}", e)))?;

        rows.into_iter().map(AuditRecord::try_from).collect()
    }

    /// フィルタ条件に一致する件数
    pub async fn count(&self, filter: &AuditLogFilter) -> OplogResult<i64> {
        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT COUNT(*) FROM operation_logs");
        push_where(&mut builder, filter);

        let (count,): (i64,) = builder
            .build_query_as()
            .fetch_one(&self.pool)
            .await
            .map_err(|e| OplogError::Database(format!("Failed to count audit logs: {}", e)))?;
        Ok(count)
    }
}

fn push_where(builder: &mut QueryBuilder<'_, Sqlite>, filter: &AuditLogFilter) {
    let mut separator = " WHERE ";
    if let Some(method) = &filter.method {
        builder
            .push(separator)
            .push("method = ")
            .push_bind(method.to_ascii_uppercase());
        separator = " AND ";
    }
    if let Some(path) = &filter.path {
        builder
            .push(separator)
            .push("path LIKE ")
            .push_bind(format!("%{}%", path));
        separator = " AND ";
    }
    if let Some(username) = &filter.username {
        builder
            .push(separator)
            .push("username = ")
            .push_bind(username.clone());
    }
}

#[async_trait]
impl AuditStore for AuditLogStorage {
    async fn insert_batch(&self, records: &[AuditRecord]) -> OplogResult<()> {
        if records.is_empty() {
            return Ok(());
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| OplogError::Database(format!("Failed to begin transaction: {}", e)))?;

        for record in records {
            sqlx::query(
                r#"INSERT INTO operation_logs (
                    timestamp, client_ip, ip_location, method, path, user_agent,
                    body, latency_ms, username, role_name, endpoint_description,
                    status, response_data
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
            )
            .bind(record.timestamp.to_rfc3339())
            .bind(&record.client_ip)
            .bind(&record.ip_location)
            .bind(&record.method)
            .bind(&record.path)
            .bind(&record.user_agent)
            .bind(&record.body)
            .bind(record.latency_ms)
            .bind(&record.username)
            .bind(&record.role_name)
            .bind(&record.endpoint_description)
            .bind(record.status)
            .bind(&record.response_data)
            .execute(&mut *tx)
            .await
            .map_err(|e| OplogError::Database(format!("Failed to insert audit log: {}", e)))?;
        }

        tx.commit()
            .await
            .map_err(|e| OplogError::Database(format!("Failed to commit transaction: {}", e)))?;

        Ok(())
    }
}
