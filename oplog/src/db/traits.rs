//! Repository traitパターン定義
//!
//! 永続化を抽象化し、ライターをストレージ実装から切り離す。

use async_trait::async_trait;

use crate::audit::types::AuditRecord;
use crate::common::error::OplogResult;

/// 操作ログ永続化のRepository trait
#[async_trait]
pub trait AuditStore: Send + Sync {
    /// レコードを一括挿入する
    async fn insert_batch(&self, records: &[AuditRecord]) -> OplogResult<()>;
}
