//! 操作ログミドルウェア
//!
//! 変更系リクエストのボディをキャプチャして下流へ再生し、
//! ハンドラー完了後に操作ログを組み立ててシンクへ送る。
//! 組み立てはdropガードで行うため、panicやキャンセルでも必ず1件記録される。

use crate::audit::assembler::{assemble, strip_route_prefix, RecordParts, ResponseOutcome};
use crate::audit::capture::{capture_request, CapturedRequest};
use crate::audit::identity::{
    ExtensionIdentityResolver, IdentityResolver, IpLocator, LocalIpLocator,
};
use crate::audit::normalize::normalize_body;
use crate::audit::policy::FilterPolicy;
use crate::audit::resolver::resolve_description;
use crate::audit::types::ResponseEnvelope;
use crate::audit::writer::AuditSink;
use crate::config::AuditConfig;
use crate::registry::EndpointRegistry;
use axum::{
    extract::{Request, State},
    http::{Extensions, Method},
    middleware::Next,
    response::Response,
};
use chrono::Utc;
use std::sync::Arc;
use tracing::trace;

/// ハンドラーがpanicした場合に記録するステータス
pub const STATUS_PANICKED: u16 = 500;

/// レスポンス前にクライアントが切断した場合に記録するステータス
pub const STATUS_CLIENT_CLOSED: u16 = 499;

/// 操作ログインターセプタの共有状態
///
/// 起動時に一度構築し、全リクエストから読み取り専用で共有する。
#[derive(Clone)]
pub struct AuditInterceptor {
    policy: Arc<FilterPolicy>,
    route_prefix: Arc<str>,
    multipart_max_bytes: u64,
    registry: Arc<dyn EndpointRegistry>,
    identity: Arc<dyn IdentityResolver>,
    locator: Arc<dyn IpLocator>,
    sink: Arc<dyn AuditSink>,
}

impl AuditInterceptor {
    /// 設定・レジストリ・シンクから作成
    ///
    /// ユーザー解決は [`ExtensionIdentityResolver`]、IP所在地は [`LocalIpLocator`] を使う。
    pub fn new(
        config: &AuditConfig,
        registry: Arc<dyn EndpointRegistry>,
        sink: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            policy: Arc::new(FilterPolicy::new(config.excluded_paths.clone())),
            route_prefix: Arc::from(config.route_prefix.as_str()),
            multipart_max_bytes: config.multipart_max_bytes,
            registry,
            identity: Arc::new(ExtensionIdentityResolver),
            locator: Arc::new(LocalIpLocator),
            sink,
        }
    }

    /// ユーザー解決を差し替える
    pub fn with_identity_resolver(mut self, identity: Arc<dyn IdentityResolver>) -> Self {
        self.identity = identity;
        self
    }

    /// IP所在地解決を差し替える
    pub fn with_ip_locator(mut self, locator: Arc<dyn IpLocator>) -> Self {
        self.locator = locator;
        self
    }

    /// 監査対象か判定する
    pub fn should_audit(&self, method: &Method, path: &str) -> bool {
        self.policy.should_audit(method, path)
    }

    /// レコードを組み立ててシンクへ送る
    ///
    /// `extensions` はレスポンスが得られなかった場合（panic・キャンセル）は `None`。
    fn finalize(
        &self,
        captured: &CapturedRequest,
        outcome: ResponseOutcome<'_>,
        extensions: Option<&Extensions>,
    ) {
        let finished_at = Utc::now();
        let latency = captured.started_at.elapsed();

        let path = strip_route_prefix(&captured.path, &self.route_prefix);
        let body = normalize_body(
            &captured.body,
            captured.content_type.as_deref(),
            self.multipart_max_bytes,
        );
        let endpoints = self.registry.list_endpoints(&captured.method);
        let endpoint_description = resolve_description(&captured.method, &path, &endpoints);
        let user = self.identity.current_user(extensions);
        let ip_location = self.locator.locate(&captured.client_ip);

        let record = assemble(RecordParts {
            captured,
            path,
            body,
            finished_at,
            latency,
            user,
            endpoint_description,
            ip_location,
            outcome,
        });

        trace!(
            method = %record.method,
            path = %record.path,
            status = record.status,
            latency_ms = record.latency_ms,
            username = %record.username,
            "operation log record captured"
        );

        self.sink.submit(record);
    }
}

/// ハンドラー完了を待たずに終了した場合もレコードを送るガード
struct AuditGuard {
    interceptor: AuditInterceptor,
    captured: Option<CapturedRequest>,
}

impl AuditGuard {
    fn new(interceptor: AuditInterceptor, captured: CapturedRequest) -> Self {
        Self {
            interceptor,
            captured: Some(captured),
        }
    }

    /// レスポンスを観測してレコードを送る
    fn finish(&mut self, response: &Response) {
        if let Some(captured) = self.captured.take() {
            let extensions = response.extensions();
            let outcome = ResponseOutcome {
                status: response.status().as_u16(),
                envelope: extensions.get::<ResponseEnvelope>(),
            };
            self.interceptor
                .finalize(&captured, outcome, Some(extensions));
        }
    }
}

impl Drop for AuditGuard {
    fn drop(&mut self) {
        if let Some(captured) = self.captured.take() {
            let status = if std::thread::panicking() {
                STATUS_PANICKED
            } else {
                STATUS_CLIENT_CLOSED
            };
            let outcome = ResponseOutcome {
                status,
                envelope: None,
            };
            self.interceptor.finalize(&captured, outcome, None);
        }
    }
}

/// 操作ログミドルウェア
///
/// `axum::middleware::from_fn_with_state` で最も外側に配置する。
/// 監査対象外のリクエストはボディに触れずにそのまま通す。
pub async fn audit_middleware(
    State(interceptor): State<AuditInterceptor>,
    request: Request,
    next: Next,
) -> Response {
    if !interceptor.should_audit(request.method(), request.uri().path()) {
        return next.run(request).await;
    }

    let (request, captured) = capture_request(request).await;
    let mut guard = AuditGuard::new(interceptor, captured);

    let response = next.run(request).await;

    guard.finish(&response);
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::types::{AuditRecord, CurrentUser, EndpointPattern, UNAUTHENTICATED};
    use crate::registry::StaticEndpointRegistry;
    use axum::{
        body::{to_bytes, Body, Bytes},
        http::{header, StatusCode},
        middleware as axum_middleware,
        response::IntoResponse,
        routing::{get, post},
        Router,
    };
    use std::sync::Mutex;
    use std::time::Duration;
    use tower::ServiceExt;
    use tower_http::catch_panic::CatchPanicLayer;

    /// 受け取ったレコードを保持するシンク
    #[derive(Default)]
    struct CollectingSink {
        records: Mutex<Vec<AuditRecord>>,
    }

    impl CollectingSink {
        fn records(&self) -> Vec<AuditRecord> {
            self.records.lock().unwrap().clone()
        }
    }

    impl AuditSink for CollectingSink {
        fn submit(&self, record: AuditRecord) {
            self.records.lock().unwrap().push(record);
        }
    }

    async fn echo(body: Bytes) -> Bytes {
        body
    }

    async fn created() -> impl IntoResponse {
        (StatusCode::CREATED, "created")
    }

    async fn envelope() -> ResponseEnvelope {
        ResponseEnvelope::with_code(7, serde_json::json!({"ok": false}))
    }

    async fn slow() -> &'static str {
        tokio::time::sleep(Duration::from_millis(60)).await;
        "done"
    }

    async fn hang() -> &'static str {
        tokio::time::sleep(Duration::from_secs(60)).await;
        "never"
    }

    async fn boom() -> &'static str {
        panic!("handler failure")
    }

    /// response extensionsにユーザーを設定する認証レイヤーの代役
    async fn fake_auth(request: Request, next: Next) -> Response {
        let mut response = next.run(request).await;
        response.extensions_mut().insert(CurrentUser {
            id: 9,
            username: "alice".to_string(),
            role_name: "admin".to_string(),
        });
        response
    }

    fn app_with(config: AuditConfig) -> (Router, Arc<CollectingSink>) {
        let sink = Arc::new(CollectingSink::default());
        let registry = Arc::new(StaticEndpointRegistry::new(vec![
            EndpointPattern::new("POST", "/leave/create", "create leave"),
            EndpointPattern::new("DELETE", "/leave/:id", "delete leave"),
            EndpointPattern::new("POST", "/echo", "echo"),
        ]));
        let interceptor = AuditInterceptor::new(&config, registry, sink.clone());

        let authed = Router::new()
            .route("/me/update", post(created))
            .layer(axum_middleware::from_fn(fake_auth));

        let app = Router::new()
            .route("/echo", post(echo).get(echo).options(echo))
            .route("/api/leave/create", post(created))
            .route("/api/leave/:id", axum::routing::delete(created))
            .route("/envelope", post(envelope))
            .route("/slow", post(slow))
            .route("/hang", post(hang))
            .route("/boom", post(boom))
            .route("/upload/chunk", post(echo))
            .route("/health", get(|| async { "ok" }))
            .merge(authed)
            .layer(axum_middleware::from_fn_with_state(
                interceptor,
                audit_middleware,
            ))
            .layer(CatchPanicLayer::new());

        (app, sink)
    }

    fn app() -> (Router, Arc<CollectingSink>) {
        app_with(AuditConfig::default().with_excluded_paths(["/upload/chunk"]))
    }

    fn request(method: Method, uri: &str, body: impl Into<Body>) -> Request {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::USER_AGENT, "test-agent")
            .header("x-forwarded-for", "10.0.0.8")
            .body(body.into())
            .unwrap()
    }

    #[tokio::test]
    async fn test_get_and_options_are_not_recorded() {
        let (app, sink) = app();

        for method in [Method::GET, Method::OPTIONS] {
            let response = app
                .clone()
                .oneshot(request(method, "/echo", "payload"))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        assert!(sink.records().is_empty());
    }

    #[tokio::test]
    async fn test_excluded_path_is_not_recorded() {
        let (app, sink) = app();
        let response = app
            .oneshot(request(Method::POST, "/upload/chunk", "part"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(sink.records().is_empty());
    }

    #[tokio::test]
    async fn test_handler_receives_exact_body_and_record_is_complete() {
        let (app, sink) = app();
        let payload: &[u8] = br#"{"reason":"sick","days":2}"#;

        let response = app
            .oneshot(request(Method::POST, "/echo", payload))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let echoed = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&echoed[..], payload);

        let records = sink.records();
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.method, "POST");
        assert_eq!(record.path, "/echo");
        assert_eq!(record.body, r#"{"reason":"sick","days":2}"#);
        assert_eq!(record.client_ip, "10.0.0.8");
        assert_eq!(record.ip_location, "LAN");
        assert_eq!(record.user_agent, "test-agent");
        assert_eq!(record.status, 200);
        assert_eq!(record.username, UNAUTHENTICATED);
        assert_eq!(record.role_name, UNAUTHENTICATED);
        assert_eq!(record.endpoint_description, "echo");
        assert_eq!(record.response_data, "none");
    }

    #[tokio::test]
    async fn test_empty_body_is_recorded_as_empty_object() {
        let (app, sink) = app();
        app.oneshot(request(Method::POST, "/echo", Body::empty()))
            .await
            .unwrap();
        assert_eq!(sink.records()[0].body, "{}");
    }

    #[tokio::test]
    async fn test_route_prefix_is_stripped_before_resolution() {
        let (app, sink) = app_with(AuditConfig::default().with_route_prefix("/api"));

        app.clone()
            .oneshot(request(Method::POST, "/api/leave/create", "{}"))
            .await
            .unwrap();
        app.oneshot(request(Method::DELETE, "/api/leave/12", Body::empty()))
            .await
            .unwrap();

        let records = sink.records();
        assert_eq!(records[0].path, "/leave/create");
        assert_eq!(records[0].endpoint_description, "create leave");
        assert_eq!(records[0].status, 201);
        assert_eq!(records[1].path, "/leave/12");
        assert_eq!(records[1].endpoint_description, "delete leave");
    }

    #[tokio::test]
    async fn test_unmatched_endpoint_is_none() {
        let (app, sink) = app();
        app.oneshot(request(Method::POST, "/slow", Body::empty()))
            .await
            .unwrap();
        assert_eq!(sink.records()[0].endpoint_description, "none");
    }

    #[tokio::test]
    async fn test_multipart_file_is_redacted() {
        let (app, sink) = app();
        let boundary = "X-OPLOG-BOUNDARY";
        let body = format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"title\"\r\n\r\nreport\r\n\
             --{b}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"a.bin\"\r\n\
             Content-Type: application/octet-stream\r\n\r\n\x01\x02\x03\r\n--{b}--\r\n",
            b = boundary
        );
        let request = Request::builder()
            .method(Method::POST)
            .uri("/echo")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", boundary),
            )
            .body(Body::from(body.clone()))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        let echoed = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&echoed[..], body.as_bytes());

        let recorded: serde_json::Value =
            serde_json::from_str(&sink.records()[0].body).unwrap();
        assert_eq!(
            recorded,
            serde_json::json!({
                "title": "report",
                "file": "binary data omitted",
                "content-type": "multipart/form-data",
            })
        );
    }

    #[tokio::test]
    async fn test_latency_covers_handler_time() {
        let (app, sink) = app();
        app.oneshot(request(Method::POST, "/slow", Body::empty()))
            .await
            .unwrap();
        assert!(sink.records()[0].latency_ms >= 60);
    }

    #[tokio::test]
    async fn test_envelope_code_overrides_status() {
        let (app, sink) = app();
        let response = app
            .oneshot(request(Method::POST, "/envelope", Body::empty()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let record = &sink.records()[0];
        assert_eq!(record.status, 7);
        assert_eq!(record.response_data, r#"{"code":7,"payload":{"ok":false}}"#);
    }

    #[tokio::test]
    async fn test_user_is_read_from_response_extensions() {
        let (app, sink) = app();
        app.oneshot(request(Method::POST, "/me/update", Body::empty()))
            .await
            .unwrap();

        let record = &sink.records()[0];
        assert_eq!(record.username, "alice");
        assert_eq!(record.role_name, "admin");
        assert_eq!(record.status, 201);
    }

    #[tokio::test]
    async fn test_panicking_handler_is_recorded_as_500() {
        let (app, sink) = app();
        let response = app
            .oneshot(request(Method::POST, "/boom", "x"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, 500);
        assert_eq!(records[0].body, "x");
        assert_eq!(records[0].username, UNAUTHENTICATED);
    }

    #[tokio::test]
    async fn test_cancelled_request_is_recorded_as_499() {
        let (app, sink) = app();
        let handle = tokio::spawn(app.oneshot(request(Method::POST, "/hang", "x")));

        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.abort();
        let _ = handle.await;

        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, 499);
        assert_eq!(records[0].path, "/hang");
    }

    #[tokio::test]
    async fn test_one_record_per_request() {
        let (app, sink) = app();
        for _ in 0..5 {
            app.clone()
                .oneshot(request(Method::POST, "/echo", "x"))
                .await
                .unwrap();
        }
        assert_eq!(sink.records().len(), 5);
    }

    #[tokio::test]
    async fn test_custom_collaborators() {
        struct FixedUser;
        impl IdentityResolver for FixedUser {
            fn current_user(&self, _: Option<&Extensions>) -> CurrentUser {
                CurrentUser {
                    id: 1,
                    username: "svc".to_string(),
                    role_name: "system".to_string(),
                }
            }
        }
        struct Nowhere;
        impl IpLocator for Nowhere {
            fn locate(&self, _: &str) -> String {
                "nowhere".to_string()
            }
        }

        let sink = Arc::new(CollectingSink::default());
        let interceptor = AuditInterceptor::new(
            &AuditConfig::default(),
            Arc::new(StaticEndpointRegistry::default()),
            sink.clone(),
        )
        .with_identity_resolver(Arc::new(FixedUser))
        .with_ip_locator(Arc::new(Nowhere));
        let app = Router::new()
            .route("/x", post(created))
            .layer(axum_middleware::from_fn_with_state(
                interceptor,
                audit_middleware,
            ));

        app.oneshot(request(Method::POST, "/x", Body::empty()))
            .await
            .unwrap();

        let record = &sink.records()[0];
        assert_eq!(record.username, "svc");
        assert_eq!(record.ip_location, "nowhere");
    }

    /// 永続化の失敗はクライアントへ返したレスポンスに影響しない
    #[tokio::test]
    async fn test_store_failure_does_not_alter_response() {
        use crate::audit::types::AuditLogFilter;
        use crate::audit::writer::{AuditLogWriter, AuditLogWriterConfig};
        use crate::db::audit_log::AuditLogStorage;
        use crate::db::migrations::initialize_database;

        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite:{}", dir.path().join("oplog.db").display());
        let pool = initialize_database(&url).await.unwrap();
        let storage = AuditLogStorage::new(pool.clone());
        // 閉じたプールへの書き込みは常に失敗する
        pool.close().await;

        let (writer, writer_task) = AuditLogWriter::spawn(
            Arc::new(storage),
            AuditLogWriterConfig {
                flush_interval_secs: 300,
                buffer_capacity: 10,
            },
        );
        let interceptor = AuditInterceptor::new(
            &AuditConfig::default(),
            Arc::new(StaticEndpointRegistry::default()),
            Arc::new(writer),
        );
        let app = Router::new()
            .route("/echo", post(echo))
            .route("/api/leave/create", post(created))
            .layer(axum_middleware::from_fn_with_state(
                interceptor,
                audit_middleware,
            ));

        let response = app
            .clone()
            .oneshot(request(Method::POST, "/echo", "keep me intact"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"keep me intact");

        let response = app
            .clone()
            .oneshot(request(Method::POST, "/api/leave/create", Body::empty()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"created");

        // 全senderをdropすると最終フラッシュが走り、失敗してもタスクは正常終了する
        drop(app);
        tokio::time::timeout(Duration::from_secs(5), writer_task)
            .await
            .unwrap()
            .unwrap();

        let reopened = AuditLogStorage::new(initialize_database(&url).await.unwrap());
        let count = reopened.count(&AuditLogFilter::default()).await.unwrap();
        assert_eq!(count, 0);
    }
}
