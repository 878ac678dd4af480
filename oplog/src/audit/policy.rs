//! 監査対象判定
//!
//! 正規化・エンドポイント解決より前に評価する最も安価な短絡判定。

use axum::http::Method;

/// 監査対象フィルタ
#[derive(Debug, Clone, Default)]
pub struct FilterPolicy {
    excluded_paths: Vec<String>,
}

impl FilterPolicy {
    /// 除外パス（部分一致）を指定して作成
    pub fn new(excluded_paths: Vec<String>) -> Self {
        Self { excluded_paths }
    }

    /// 監査対象か判定する
    ///
    /// 1. GET/OPTIONS は頻度が高く価値が低いため対象外
    /// 2. 除外パスを含むパスは対象外
    pub fn should_audit(&self, method: &Method, path: &str) -> bool {
        if method == Method::GET || method == Method::OPTIONS {
            return false;
        }
        !self
            .excluded_paths
            .iter()
            .any(|excluded| path.contains(excluded.as_str()))
    }
}
