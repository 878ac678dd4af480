//! SQLiteに保存されたパターンを使うレジストリ

use super::{group_by_method, lookup, EndpointRegistry, PatternTable};
use crate::audit::types::EndpointPattern;
use crate::common::error::OplogResult;
use crate::db::endpoints::EndpointPatternStorage;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// `endpoint_patterns` テーブルのスナップショットを保持するレジストリ
///
/// 読み取りはメモリ上のスナップショットのみを参照し、DBには触れない。
/// テーブルの変更は [`refresh`](Self::refresh) で反映する。
#[derive(Clone)]
pub struct SqliteEndpointRegistry {
    storage: EndpointPatternStorage,
    snapshot: Arc<RwLock<Arc<PatternTable>>>,
}

impl SqliteEndpointRegistry {
    /// DBから読み込んでレジストリを作成
    pub async fn load(storage: EndpointPatternStorage) -> OplogResult<Self> {
        let registry = Self {
            storage,
            snapshot: Arc::new(RwLock::new(Arc::new(PatternTable::new()))),
        };
        registry.refresh().await?;
        Ok(registry)
    }

    /// DBからスナップショットを再読み込みする
    ///
    /// 読み込みに失敗した場合は以前のスナップショットを維持する。
    pub async fn refresh(&self) -> OplogResult<usize> {
        let patterns: Vec<EndpointPattern> = self.storage.list_all().await?;
        let count = patterns.len();
        let table = Arc::new(group_by_method(patterns));

        let mut guard = self
            .snapshot
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = table;
        debug!(count, "Endpoint pattern snapshot refreshed");
        Ok(count)
    }

    /// 定期的にスナップショットを再読み込みするタスクを起動
    pub fn spawn_refresh(&self, interval: Duration) -> JoinHandle<()> {
        let registry = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // 最初のtickは即座に完了するためスキップ
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = registry.refresh().await {
                    warn!("Failed to refresh endpoint patterns: {}", e);
                }
            }
        })
    }

    fn current(&self) -> Arc<PatternTable> {
        self.snapshot
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl EndpointRegistry for SqliteEndpointRegistry {
    fn list_endpoints(&self, method: &str) -> Arc<[EndpointPattern]> {
        lookup(&self.current(), method)
    }
}
