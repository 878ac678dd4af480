//! リクエストボディの正規化
//!
//! multipart/form-data はフィールド名→最初の値のフラットなJSONに変換し、
//! ファイルの中身は固定文字列に置き換える。それ以外のボディはそのまま記録する。

use crate::audit::types::EMPTY_BODY;
use crate::common::error::{OplogError, OplogResult};
use bytes::Bytes;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// ファイルフィールドの代替文字列
pub const FILE_REDACTED: &str = "binary data omitted";

/// multipart由来であることを示すマーカーのキー
pub const MULTIPART_MARKER_KEY: &str = "content-type";

/// multipart由来であることを示すマーカーの値
pub const MULTIPART_MARKER_VALUE: &str = "multipart/form-data";

/// ボディを記録用の文字列に正規化する
///
/// - 空ボディは `"{}"`
/// - boundary付きの multipart/form-data は [`parse_multipart_form`] の結果をJSON化
/// - ファイルパートを含む multipart は解析に失敗しても、そこまでのフィールドをJSON化
/// - ファイルパートを含まない解析失敗の multipart は元のボディ文字列にフォールバック
/// - それ以外は元のボディ文字列
pub fn normalize_body(body: &Bytes, content_type: Option<&str>, max_bytes: u64) -> String {
    if body.is_empty() {
        return EMPTY_BODY.to_string();
    }

    if let Some(boundary) = content_type.and_then(multipart_boundary) {
        let mut form = FormState::default();
        let parsed =
            futures::executor::block_on(read_form(body.clone(), boundary, max_bytes, &mut form));
        match parsed {
            Ok(()) => return form_json(form.finish()),
            Err(e) if form.saw_file || declares_file_part(body) => {
                debug!("Malformed multipart body with file part, recording parsed fields: {}", e);
                return form_json(form.finish());
            }
            Err(e) => {
                debug!("Malformed multipart body, recording raw text: {}", e);
            }
        }
    }

    String::from_utf8_lossy(body).into_owned()
}

fn form_json(params: BTreeMap<String, String>) -> String {
    match serde_json::to_string(&params) {
        Ok(json) => json,
        Err(e) => {
            warn!("Failed to serialize multipart params: {}", e);
            EMPTY_BODY.to_string()
        }
    }
}

/// Content-Typeが boundary 付きの multipart/form-data ならboundaryを返す
fn multipart_boundary(content_type: &str) -> Option<String> {
    if !content_type
        .to_ascii_lowercase()
        .contains(MULTIPART_MARKER_VALUE)
    {
        return None;
    }
    multer::parse_boundary(content_type).ok()
}

/// ヘッダーが壊れていてパーサーが拾えなかったファイルパートも検出する
fn declares_file_part(body: &[u8]) -> bool {
    const NEEDLE: &[u8] = b"filename";
    body.windows(NEEDLE.len())
        .any(|window| window.eq_ignore_ascii_case(NEEDLE))
}

/// 解析途中のフォーム
///
/// エラーで中断しても、それまでに読んだフィールドは残る。
#[derive(Debug, Default)]
struct FormState {
    params: BTreeMap<String, String>,
    saw_file: bool,
    text_bytes: u64,
}

impl FormState {
    fn finish(mut self) -> BTreeMap<String, String> {
        self.params.insert(
            MULTIPART_MARKER_KEY.to_string(),
            MULTIPART_MARKER_VALUE.to_string(),
        );
        self.params
    }
}

/// multipartボディを解析し、フィールド名→最初の値のマップを返す
///
/// 同名フィールドの2つ目以降の値は捨てる。ファイルフィールドは中身を読み捨て、
/// [`FILE_REDACTED`] に置き換える。`max_bytes` はテキストフィールドの合計サイズの上限で、
/// ファイルの中身は数えない。
/// 解析用の状態はこの関数の終了時（エラー時を含む）に解放される。
pub fn parse_multipart_form(
    body: Bytes,
    boundary: String,
    max_bytes: u64,
) -> OplogResult<BTreeMap<String, String>> {
    let mut form = FormState::default();
    // メモリ上のストリームなのでI/O待ちは発生しない
    futures::executor::block_on(read_form(body, boundary, max_bytes, &mut form))?;
    Ok(form.finish())
}

async fn read_form(
    body: Bytes,
    boundary: String,
    max_bytes: u64,
    form: &mut FormState,
) -> OplogResult<()> {
    let stream = futures::stream::once(async move { Ok::<Bytes, std::io::Error>(body) });
    let mut multipart = multer::Multipart::new(stream, boundary);

    while let Some(mut field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();

        if field.file_name().is_some() {
            form.saw_file = true;
            form.params
                .entry(name)
                .or_insert_with(|| FILE_REDACTED.to_string());
            while field.chunk().await?.is_some() {}
            continue;
        }

        let mut value = Vec::new();
        while let Some(chunk) = field.chunk().await? {
            form.text_bytes += chunk.len() as u64;
            if form.text_bytes > max_bytes {
                return Err(OplogError::Multipart(format!(
                    "text fields exceed {} bytes",
                    max_bytes
                )));
            }
            value.extend_from_slice(&chunk);
        }
        form.params
            .entry(name)
            .or_insert_with(|| String::from_utf8_lossy(&value).into_owned());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOUNDARY: &str = "X-OPLOG-BOUNDARY";

    fn content_type() -> String {
        format!("multipart/form-data; boundary={}", BOUNDARY)
    }

    fn text_part(name: &str, value: &str) -> String {
        format!(
            "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
            BOUNDARY, name, value
        )
    }

    fn file_part(name: &str, filename: &str, data: &[u8]) -> Vec<u8> {
        let mut part = format!(
            "--{}\r\nContent-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: application/octet-stream\r\n\r\n",
            BOUNDARY, name, filename
        )
        .into_bytes();
        part.extend_from_slice(data);
        part.extend_from_slice(b"\r\n");
        part
    }

    fn closing() -> String {
        format!("--{}--\r\n", BOUNDARY)
    }

    fn multipart_body(fields: &[(&str, &str)], file: Option<(&str, &[u8])>) -> Bytes {
        let mut body = Vec::new();
        for (name, value) in fields {
            body.extend_from_slice(text_part(name, value).as_bytes());
        }
        if let Some((name, data)) = file {
            body.extend_from_slice(&file_part(name, "secret.bin", data));
        }
        body.extend_from_slice(closing().as_bytes());
        Bytes::from(body)
    }

    #[test]
    fn test_empty_body_is_empty_object() {
        assert_eq!(normalize_body(&Bytes::new(), None, 1024), "{}");
        assert_eq!(
            normalize_body(&Bytes::new(), Some(&content_type()), 1024),
            "{}"
        );
    }

    #[test]
    fn test_json_body_passes_through() {
        let body = Bytes::from_static(br#"{"desc":"sick leave"}"#);
        assert_eq!(
            normalize_body(&body, Some("application/json"), 1024),
            r#"{"desc":"sick leave"}"#
        );
    }

    #[test]
    fn test_multipart_fields_and_file_are_flattened() {
        let file_bytes: &[u8] = b"\x00\x01PRIVATE-FILE-CONTENT\xff";
        let body = multipart_body(&[("a", "1"), ("b", "2")], Some(("avatar", file_bytes)));

        let normalized = normalize_body(&body, Some(&content_type()), 1 << 20);
        let map: BTreeMap<String, String> = serde_json::from_str(&normalized).unwrap();

        assert_eq!(map.get("a").map(String::as_str), Some("1"));
        assert_eq!(map.get("b").map(String::as_str), Some("2"));
        assert_eq!(map.get("avatar").map(String::as_str), Some(FILE_REDACTED));
        assert_eq!(
            map.get("content-type").map(String::as_str),
            Some("multipart/form-data")
        );
        assert!(!normalized.contains("PRIVATE-FILE-CONTENT"));
    }

    #[test]
    fn test_repeated_field_keeps_first_value() {
        let body = multipart_body(&[("tag", "first"), ("tag", "second")], None);
        let map = parse_multipart_form(body, BOUNDARY.to_string(), 1 << 20).unwrap();
        assert_eq!(map.get("tag").map(String::as_str), Some("first"));
    }

    #[test]
    fn test_multipart_without_boundary_passes_through() {
        let body = Bytes::from_static(b"not really multipart");
        assert_eq!(
            normalize_body(&body, Some("multipart/form-data"), 1024),
            "not really multipart"
        );
    }

    #[test]
    fn test_malformed_multipart_falls_back_to_raw_text() {
        let raw = format!(
            "--{}\r\nContent-Disposition: form-data; name=\"a\"\r\n\r\nunterminated",
            BOUNDARY
        );
        let body = Bytes::from(raw.clone());
        assert_eq!(normalize_body(&body, Some(&content_type()), 1 << 20), raw);
    }

    #[test]
    fn test_multipart_over_size_limit_falls_back() {
        let body = multipart_body(&[("a", "x".repeat(4096).as_str())], None);
        let result = parse_multipart_form(body.clone(), BOUNDARY.to_string(), 128);
        assert!(result.is_err());

        let normalized = normalize_body(&body, Some(&content_type()), 128);
        assert_eq!(normalized, String::from_utf8_lossy(&body));
    }

    /// ファイルの中身はサイズ上限に数えず、上限を超えるアップロードも秘匿される
    #[test]
    fn test_file_larger_than_limit_is_still_redacted() {
        let secret = "TOP-SECRET-FILE-BYTES";
        let mut data = secret.as_bytes().to_vec();
        data.extend(std::iter::repeat(b'p').take(512));
        let body = multipart_body(&[("note", "hi")], Some(("avatar", data.as_slice())));

        let normalized = normalize_body(&body, Some(&content_type()), 256);
        assert!(!normalized.contains(secret));

        let map: BTreeMap<String, String> = serde_json::from_str(&normalized).unwrap();
        assert_eq!(map.get("avatar").map(String::as_str), Some(FILE_REDACTED));
        assert_eq!(map.get("note").map(String::as_str), Some("hi"));
        assert_eq!(
            map.get("content-type").map(String::as_str),
            Some("multipart/form-data")
        );
    }

    /// ファイルパートの途中で途切れたボディは、読めたフィールドだけを記録する
    #[test]
    fn test_unterminated_file_part_never_records_raw_bytes() {
        let secret = "TOP-SECRET-FILE-BYTES";
        let mut body = text_part("note", "hi").into_bytes();
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"avatar\"; filename=\"secret.bin\"\r\n\r\n{}",
                BOUNDARY, secret
            )
            .as_bytes(),
        );
        let body = Bytes::from(body);
        assert!(parse_multipart_form(body.clone(), BOUNDARY.to_string(), 1 << 20).is_err());

        let normalized = normalize_body(&body, Some(&content_type()), 1 << 20);
        assert!(!normalized.contains(secret));

        let map: BTreeMap<String, String> = serde_json::from_str(&normalized).unwrap();
        assert_eq!(map.get("note").map(String::as_str), Some("hi"));
        assert_eq!(map.get("avatar").map(String::as_str), Some(FILE_REDACTED));
        assert_eq!(
            map.get("content-type").map(String::as_str),
            Some("multipart/form-data")
        );
    }

    /// テキストが上限を超えたあとにファイルパートが続く場合も生のボディは記録しない
    #[test]
    fn test_text_overflow_before_file_part_is_not_recorded_raw() {
        let secret = "TOP-SECRET-FILE-BYTES";
        let body = multipart_body(
            &[("a", "x".repeat(4096).as_str())],
            Some(("avatar", secret.as_bytes())),
        );

        let normalized = normalize_body(&body, Some(&content_type()), 128);
        assert!(!normalized.contains(secret));
        let map: BTreeMap<String, String> = serde_json::from_str(&normalized).unwrap();
        assert_eq!(
            map.get("content-type").map(String::as_str),
            Some("multipart/form-data")
        );
    }

    proptest::proptest! {
        #[test]
        fn prop_non_multipart_text_is_recorded_verbatim(text in ".+") {
            let body = Bytes::from(text.clone());
            proptest::prop_assert_eq!(normalize_body(&body, Some("text/plain"), 1024), text);
        }

        #[test]
        fn prop_file_contents_never_leak(data in proptest::collection::vec(proptest::num::u8::ANY, 1..256)) {
            let body = multipart_body(&[("note", "hi")], Some(("upload", data.as_slice())));
            let params = parse_multipart_form(body, BOUNDARY.to_string(), 1 << 20).unwrap();
            proptest::prop_assert_eq!(params.get("upload").map(String::as_str), Some(FILE_REDACTED));
            proptest::prop_assert_eq!(params.get("note").map(String::as_str), Some("hi"));
        }
    }
}
