//! エンドポイントパターン解決
//!
//! 正規化済みパスに一致する最初のパターンの説明を返す。
//!
//! パターン構文:
//! - `:name` で始まるセグメントは任意の1セグメント（空は不可）に一致
//! - `*` は `/` を含む任意の文字列に一致
//! - それ以外の文字はリテラル
//!
//! 一致は大文字小文字を区別し、パス全体に対して判定する。
//! パターン一覧は呼び出し側が所有する読み取り専用のスナップショットで、ここではキャッシュしない。

use crate::audit::types::EndpointPattern;

/// パスがパターンに一致するか判定する
///
/// パターンを先頭から1文字ずつ照合する。`*` のみ後続との組み合わせを試す。
pub fn key_match(path: &str, pattern: &str) -> bool {
    match_from(pattern, path, true)
}

fn match_from(pattern: &str, path: &str, segment_start: bool) -> bool {
    let Some(c) = pattern.chars().next() else {
        return path.is_empty();
    };
    let rest = &pattern[c.len_utf8()..];

    match c {
        ':' if segment_start => {
            // パラメータ名はセグメント末尾まで
            let rest = rest.find('/').map_or("", |i| &rest[i..]);
            let segment = path.find('/').unwrap_or(path.len());
            segment > 0 && match_from(rest, &path[segment..], false)
        }
        '*' => {
            if rest.is_empty() {
                return true;
            }
            path.char_indices()
                .map(|(i, _)| i)
                .chain(std::iter::once(path.len()))
                .any(|i| match_from(rest, &path[i..], false))
        }
        '/' => path
            .strip_prefix('/')
            .map_or(false, |tail| match_from(rest, tail, true)),
        literal => path
            .strip_prefix(literal)
            .map_or(false, |tail| match_from(rest, tail, false)),
    }
}

/// メソッドとパスに一致する最初のエンドポイントの説明を返す
///
/// 一致しなければ `None`（記録上は `"none"`）。
pub fn resolve_description<'a>(
    method: &str,
    path: &str,
    endpoints: &'a [EndpointPattern],
) -> Option<&'a str> {
    endpoints
        .iter()
        .filter(|endpoint| endpoint.method == method)
        .find(|endpoint| key_match(path, &endpoint.path_pattern))
        .map(|endpoint| endpoint.description.as_str())
}
