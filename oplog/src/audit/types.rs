//! 操作ログの型定義

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 未認証リクエストのユーザー名・ロール名
pub const UNAUTHENTICATED: &str = "unauthenticated";

/// エンドポイント未一致・レスポンス未公開を表す値
pub const NONE: &str = "none";

/// 空ボディの記録値
pub const EMPTY_BODY: &str = "{}";

/// 操作ログレコード
///
/// 監査対象リクエスト1件につき1つ生成され、組み立て後は変更されない。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// レコードID（DB挿入後に設定）
    pub id: Option<i64>,
    /// リクエスト完了時刻
    pub timestamp: DateTime<Utc>,
    /// クライアントIPアドレス
    pub client_ip: String,
    /// IP所在地
    pub ip_location: String,
    /// HTTPメソッド
    pub method: String,
    /// リクエストパス（ルートプレフィックス除去済み）
    pub path: String,
    /// User-Agent
    pub user_agent: String,
    /// 正規化済みリクエストボディ
    pub body: String,
    /// 処理時間（ミリ秒）
    pub latency_ms: i64,
    /// ユーザー名
    pub username: String,
    /// ロール名
    pub role_name: String,
    /// エンドポイント説明
    pub endpoint_description: String,
    /// ステータスコード（レスポンスエンベロープのコードで上書きされる）
    pub status: i32,
    /// レスポンスデータ（JSON）
    pub response_data: String,
}

/// エンドポイントパターン（外部レジストリが提供する読み取り専用データ）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointPattern {
    /// HTTPメソッド
    pub method: String,
    /// パスパターン（`:name` セグメントと `*` を使用可能）
    #[serde(alias = "path")]
    pub path_pattern: String,
    /// 説明
    #[serde(alias = "desc")]
    pub description: String,
}

impl EndpointPattern {
    /// 新しいパターンを作成
    pub fn new(method: &str, path_pattern: &str, description: &str) -> Self {
        Self {
            method: method.to_string(),
            path_pattern: path_pattern.to_string(),
            description: description.to_string(),
        }
    }
}

/// 現在のユーザー（認証レイヤーがresponse extensionsに設定）
///
/// `id == 0` は未認証を表す。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentUser {
    /// ユーザーID
    pub id: u64,
    /// ユーザー名
    pub username: String,
    /// ロール名
    pub role_name: String,
}

impl CurrentUser {
    /// 認証済みかどうか
    pub fn is_authenticated(&self) -> bool {
        self.id > 0
    }
}

/// 構造化レスポンスエンベロープ
///
/// ハンドラーが返すと、JSONボディとして送信されると同時に
/// response extensionsにも格納され、操作ログの `response_data` になる。
/// `code` がある場合は記録上のステータスを上書きする。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    /// アプリケーション定義のステータスコード
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<i32>,
    /// ペイロード
    pub payload: serde_json::Value,
}

impl ResponseEnvelope {
    /// コード付きエンベロープ
    pub fn with_code(code: i32, payload: serde_json::Value) -> Self {
        Self {
            code: Some(code),
            payload,
        }
    }

    /// コードなしエンベロープ
    pub fn payload(payload: serde_json::Value) -> Self {
        Self {
            code: None,
            payload,
        }
    }
}

impl IntoResponse for ResponseEnvelope {
    fn into_response(self) -> Response {
        let mut response = (StatusCode::OK, Json(&self)).into_response();
        response.extensions_mut().insert(self);
        response
    }
}

/// 操作ログ検索フィルタ
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditLogFilter {
    /// HTTPメソッドでフィルタ
    pub method: Option<String>,
    /// パスの部分一致でフィルタ
    pub path: Option<String>,
    /// ユーザー名でフィルタ
    pub username: Option<String>,
    /// 取得件数（デフォルト50）
    pub limit: Option<i64>,
    /// オフセット
    pub offset: Option<i64>,
}
