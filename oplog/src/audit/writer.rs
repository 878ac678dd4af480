//! 操作ログの非同期バッファライター
//!
//! mpscチャネルでレコードを受信し、定期的にストアへ一括書き込みする。
//! リクエスト処理側は送信するだけで、永続化の完了や失敗を待たない。

use crate::audit::types::AuditRecord;
use crate::config::get_env_with_fallback_parse;
use crate::db::traits::AuditStore;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// 組み立て済みレコードの受け取り口
///
/// `submit` は即座に戻り、永続化の失敗を呼び出し側へ伝えない。
pub trait AuditSink: Send + Sync {
    /// レコードを非同期永続化に回す
    fn submit(&self, record: AuditRecord);
}

/// 操作ログライター設定
#[derive(Debug, Clone)]
pub struct AuditLogWriterConfig {
    /// フラッシュ間隔（秒）。デフォルト: 5
    pub flush_interval_secs: u64,
    /// バッファ上限レコード数。デフォルト: 10000
    pub buffer_capacity: usize,
}

impl Default for AuditLogWriterConfig {
    fn default() -> Self {
        Self {
            flush_interval_secs: get_env_with_fallback_parse(
                "OPLOG_FLUSH_INTERVAL_SECS",
                "OPERATION_LOG_FLUSH_INTERVAL",
                5,
            ),
            buffer_capacity: get_env_with_fallback_parse(
                "OPLOG_BUFFER_CAPACITY",
                "OPERATION_LOG_BUFFER_SIZE",
                10_000,
            ),
        }
    }
}

/// 操作ログの非同期ライター
///
/// Clone可能（senderのクローン）。全てのクローンがdropされると
/// バックグラウンドタスクは残りをフラッシュして終了する。
#[derive(Clone)]
pub struct AuditLogWriter {
    sender: mpsc::Sender<AuditRecord>,
}

impl AuditLogWriter {
    /// 新しいAuditLogWriterを作成し、バックグラウンドタスクを起動
    pub fn new(store: Arc<dyn AuditStore>, config: AuditLogWriterConfig) -> Self {
        Self::spawn(store, config).0
    }

    /// ライターとバックグラウンドタスクのハンドルを返す
    ///
    /// ハンドルをawaitすると、全senderのdrop後の最終フラッシュ完了を待てる。
    pub fn spawn(store: Arc<dyn AuditStore>, config: AuditLogWriterConfig) -> (Self, JoinHandle<()>) {
        let capacity = config.buffer_capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);

        let handle = tokio::spawn(Self::background_task(rx, store, config));

        (Self { sender: tx }, handle)
    }

    /// レコードをバッファに送信（ブロックしない）
    pub fn send(&self, record: AuditRecord) {
        if let Err(e) = self.sender.try_send(record) {
            warn!("Failed to send operation log record: {}", e);
        }
    }

    /// バックグラウンドフラッシュタスク
    async fn background_task(
        mut rx: mpsc::Receiver<AuditRecord>,
        store: Arc<dyn AuditStore>,
        config: AuditLogWriterConfig,
    ) {
        let capacity = config.buffer_capacity.max(1);
        let mut buffer = VecDeque::with_capacity(capacity);
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(
            config.flush_interval_secs.max(1),
        ));
        // 最初のtickはすぐに発火するのでスキップ
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if !buffer.is_empty() {
                        Self::flush_buffer(&mut buffer, store.as_ref()).await;
                    }
                }
                record = rx.recv() => {
                    match record {
                        Some(record) => {
                            if buffer.len() >= capacity {
                                let discarded = buffer.pop_front();
                                warn!(
                                    "Operation log buffer overflow (capacity: {}), discarding oldest record: {:?}",
                                    capacity,
                                    discarded.map(|r| r.path)
                                );
                            }
                            buffer.push_back(record);
                        }
                        None => {
                            // チャネルが閉じられた → 残りをフラッシュして終了
                            if !buffer.is_empty() {
                                info!(
                                    "Operation log writer shutting down, flushing {} remaining records",
                                    buffer.len()
                                );
                                Self::flush_buffer(&mut buffer, store.as_ref()).await;
                            }
                            info!("Operation log writer background task stopped");
                            return;
                        }
                    }
                }
            }
        }
    }

    /// バッファ内レコードをストアに一括書き込み
    async fn flush_buffer(buffer: &mut VecDeque<AuditRecord>, store: &dyn AuditStore) {
        let records: Vec<AuditRecord> = buffer.drain(..).collect();
        let count = records.len();

        if let Err(e) = store.insert_batch(&records).await {
            warn!(
                "Failed to flush operation log records: {}. {} records lost.",
                e, count
            );
            return;
        }

        info!("Flushed {} operation log records", count);
    }
}

impl AuditSink for AuditLogWriter {
    fn submit(&self, record: AuditRecord) {
        self.send(record);
    }
}
