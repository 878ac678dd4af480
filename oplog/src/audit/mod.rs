//! 操作ログ監査
//!
//! 変更系HTTPリクエストを観測し、1リクエスト1レコードの操作ログとして非同期に永続化する

/// 操作ログの型定義
pub mod types;

/// 監査対象の判定
pub mod policy;

/// リクエストボディのキャプチャと再生
pub mod capture;

/// ボディの正規化（multipartの平坦化）
pub mod normalize;

/// エンドポイントパターンの照合
pub mod resolver;

/// ユーザー解決・IP所在地
pub mod identity;

/// レコードの組み立て
pub mod assembler;

/// 非同期バッファライター
pub mod writer;

/// 操作ログミドルウェア
pub mod middleware;

pub use middleware::{audit_middleware, AuditInterceptor};
pub use writer::{AuditLogWriter, AuditLogWriterConfig, AuditSink};
