//! リクエストボディのキャプチャと再生
//!
//! ボディは一度しか読めないストリームなので、全体をメモリに読み込んでから
//! 同じバイト列を持つ新しいボディを差し戻す。下流のハンドラーは監査の存在を意識しない。

use crate::common::ip::client_ip;
use axum::{
    body::{to_bytes, Body},
    extract::Request,
    http::header,
};
use bytes::Bytes;
use std::time::Instant;
use tracing::warn;

/// キャプチャ済みのリクエスト情報
///
/// 所有データのみを保持し、リクエストオブジェクト自体は参照しない。
#[derive(Debug, Clone)]
pub struct CapturedRequest {
    /// キャプチャ開始時刻
    pub started_at: Instant,
    /// HTTPメソッド
    pub method: String,
    /// リクエストパス（プレフィックス除去前）
    pub path: String,
    /// Content-Type
    pub content_type: Option<String>,
    /// クライアントIP
    pub client_ip: String,
    /// User-Agent
    pub user_agent: String,
    /// ボディのバイト列
    pub body: Bytes,
}

/// ボディを読み込み、再生可能なボディを差し戻したリクエストを返す
///
/// 読み込みに失敗してもリクエストは中断しない。警告を出し、空ボディとして扱う。
pub async fn capture_request(request: Request) -> (Request, CapturedRequest) {
    let started_at = Instant::now();
    let (parts, body) = request.into_parts();

    let body = match to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(
                method = %parts.method,
                path = %parts.uri.path(),
                "Failed to read request body: {}",
                e
            );
            Bytes::new()
        }
    };

    let header_str = |name: header::HeaderName| {
        parts
            .headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };

    let captured = CapturedRequest {
        started_at,
        method: parts.method.to_string(),
        path: parts.uri.path().to_string(),
        content_type: header_str(header::CONTENT_TYPE),
        client_ip: client_ip(&parts.headers, &parts.extensions),
        user_agent: header_str(header::USER_AGENT).unwrap_or_default(),
        body: body.clone(),
    };

    // Bytesのcloneは参照カウントのみ。差し戻したボディは独立して消費される
    let request = Request::from_parts(parts, Body::from(body));
    (request, captured)
}
