//! エンドポイントパターンストレージ

use crate::audit::types::EndpointPattern;
use crate::common::error::{OplogError, OplogResult};
use sqlx::SqlitePool;

/// エンドポイントパターンのDB操作
#[derive(Clone)]
pub struct EndpointPatternStorage {
    pool: SqlitePool,
}

impl EndpointPatternStorage {
    /// 新しいストレージを作成
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// 全パターンを登録順に取得
    pub async fn list_all(&self) -> OplogResult<Vec<EndpointPattern>> {
        let rows: Vec<(String, String, String)> = sqlx::query_as(
            "SELECT method, path_pattern, description FROM endpoint_patterns ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| OplogError::Database(format!("Failed to list endpoint patterns: {}", e)))?;

        Ok(rows
            .into_iter()
            .map(|(method, path_pattern, description)| EndpointPattern {
                method,
                path_pattern,
                description,
            })
            .collect())
    }

    /// パターンを一括登録する
    ///
    /// `replace` がtrueの場合は既存のパターンを全て削除してから登録する。
    pub async fn import(&self, patterns: &[EndpointPattern], replace: bool) -> OplogResult<u64> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| OplogError::Database(format!("Failed to begin transaction: {}", e)))?;

        if replace {
            sqlx::query("DELETE FROM endpoint_patterns")
                .execute(&mut *tx)
                .await
                .map_err(|e| {
                    OplogError::Database(format!("Failed to clear endpoint patterns: {}", e))
                })?;
        }

        let mut inserted = 0;
        for pattern in patterns {
            let result = sqlx::query(
                "INSERT INTO endpoint_patterns (method, path_pattern, description) VALUES (?, ?, ?)",
            )
            .bind(pattern.method.to_ascii_uppercase())
            .bind(&pattern.path_pattern)
            .bind(&pattern.description)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                OplogError::Database(format!("Failed to insert endpoint pattern: {}", e))
            })?;
            inserted += result.rows_affected();
        }

        tx.commit()
            .await
            .map_err(|e| OplogError::Database(format!("Failed to commit transaction: {}", e)))?;

        Ok(inserted)
    }
}
