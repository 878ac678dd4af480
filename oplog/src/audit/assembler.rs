//! 操作ログレコードの組み立て
//!
//! I/Oを伴わない純粋な合成処理。入力はすべてコピー・派生値で、呼び出し側の状態は変更しない。

use crate::audit::capture::CapturedRequest;
use crate::audit::types::{AuditRecord, CurrentUser, ResponseEnvelope, NONE, UNAUTHENTICATED};
use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::warn;

/// レスポンス側の観測結果
#[derive(Debug, Clone, Copy)]
pub struct ResponseOutcome<'a> {
    /// HTTPステータスコード
    pub status: u16,
    /// ハンドラーが公開したエンベロープ
    pub envelope: Option<&'a ResponseEnvelope>,
}

/// 組み立ての入力
#[derive(Debug, Clone)]
pub struct RecordParts<'a> {
    /// キャプチャ済みリクエスト
    pub captured: &'a CapturedRequest,
    /// プレフィックス除去済みパス
    pub path: String,
    /// 正規化済みボディ
    pub body: String,
    /// 完了時刻
    pub finished_at: DateTime<Utc>,
    /// 処理時間
    pub latency: Duration,
    /// 解決済みユーザー
    pub user: CurrentUser,
    /// エンドポイント説明（未一致は `None`）
    pub endpoint_description: Option<&'a str>,
    /// IP所在地
    pub ip_location: String,
    /// レスポンス
    pub outcome: ResponseOutcome<'a>,
}

/// ルートプレフィックスを除去する
///
/// プレフィックスはセグメント単位で一致した場合のみ除去する。
/// `"api"` に対し `/api/users` → `/users`、`/apix/users` はそのまま。
pub fn strip_route_prefix(path: &str, prefix: &str) -> String {
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        return path.to_string();
    }
    let Some(rest) = path
        .strip_prefix('/')
        .and_then(|p| p.strip_prefix(prefix))
    else {
        return path.to_string();
    };
    if rest.is_empty() {
        "/".to_string()
    } else if rest.starts_with('/') {
        rest.to_string()
    } else {
        path.to_string()
    }
}

/// レコードを組み立てる
pub fn assemble(parts: RecordParts<'_>) -> AuditRecord {
    let captured = parts.captured;

    let (username, role_name) = if parts.user.is_authenticated() {
        (parts.user.username, parts.user.role_name)
    } else {
        (UNAUTHENTICATED.to_string(), UNAUTHENTICATED.to_string())
    };

    let mut status = i32::from(parts.outcome.status);
    let response_data = match parts.outcome.envelope {
        Some(envelope) => {
            if let Some(code) = envelope.code {
                status = code;
            }
            serde_json::to_string(envelope).unwrap_or_else(|e| {
                warn!("Failed to serialize response envelope: {}", e);
                NONE.to_string()
            })
        }
        None => NONE.to_string(),
    };

    AuditRecord {
        id: None,
        timestamp: parts.finished_at,
        client_ip: captured.client_ip.clone(),
        ip_location: parts.ip_location,
        method: captured.method.clone(),
        path: parts.path,
        user_agent: captured.user_agent.clone(),
        body: parts.body,
        latency_ms: i64::try_from(parts.latency.as_millis()).unwrap_or(i64::MAX),
        username,
        role_name,
        endpoint_description: parts
            .endpoint_description
            .unwrap_or(NONE)
            .to_string(),
        status,
        response_data,
    }
}
