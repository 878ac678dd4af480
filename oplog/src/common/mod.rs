//! 共通型定義

/// エラー型
pub mod error;

/// IPアドレス正規化・クライアントIP抽出
pub mod ip;
