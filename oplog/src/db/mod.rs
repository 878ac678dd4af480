//! データベースアクセス層
//!
//! SQLiteベースのデータ永続化

/// 操作ログストレージ
pub mod audit_log;

/// エンドポイントパターンストレージ
pub mod endpoints;

/// データベースマイグレーション
pub mod migrations;

/// Repository traitパターン（テスタビリティ向上）
pub mod traits;
