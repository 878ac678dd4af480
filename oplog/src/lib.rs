//! oplog - HTTP操作ログ監査
//!
//! 全リクエスト/レスポンスを観測し、操作ログとして非同期に永続化する

#![warn(missing_docs)]

/// 共通型定義（エラー・IP）
pub mod common;

/// 操作ログ監査（インターセプタ本体）
pub mod audit;

/// エンドポイントパターンのレジストリ
pub mod registry;

/// データベースアクセス
pub mod db;

/// 設定管理（環境変数ヘルパー）
pub mod config;

/// ロギング初期化ユーティリティ
pub mod logging;

/// CLIインターフェース
pub mod cli;

/// デモサーバー
pub mod server;
