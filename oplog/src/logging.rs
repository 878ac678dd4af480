//! ロギング初期化
//!
//! 標準エラー出力へのfmtレイヤーと、`OPLOG_LOG_DIR` 指定時の日次ローテーションJSONファイル出力。

use crate::common::error::{OplogError, OplogResult};
use std::sync::OnceLock;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

// ファイル出力のワーカーガード（プロセス終了まで保持）
static GUARD: OnceLock<WorkerGuard> = OnceLock::new();

const LOG_FILE_PREFIX: &str = "oplog.log";

fn build_filter() -> EnvFilter {
    match std::env::var("OPLOG_LOG_LEVEL").or_else(|_| std::env::var("RUST_LOG")) {
        Ok(directive) => {
            EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new("info"))
        }
        Err(_) => EnvFilter::new("info"),
    }
}

/// グローバルsubscriberを初期化する
///
/// 2回目以降の呼び出しはエラーを返す。
pub fn init() -> OplogResult<()> {
    // 標準出力は `logs` サブコマンドのJSON Linesに使う
    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .boxed();

    let file_layer = match std::env::var("OPLOG_LOG_DIR") {
        Ok(dir) if !dir.is_empty() => {
            let appender = tracing_appender::rolling::daily(&dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let _ = GUARD.set(guard);
            Some(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(writer)
                    .with_ansi(false)
                    .boxed(),
            )
        }
        _ => None,
    };

    tracing_subscriber::registry()
        .with(build_filter())
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| OplogError::Internal(format!("Failed to initialize logging: {}", e)))
}
