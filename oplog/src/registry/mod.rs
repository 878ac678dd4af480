//! エンドポイントパターンのレジストリ
//!
//! インターセプタはメソッドごとのパターン一覧を同期的に取得する。
//! 一覧は `Arc` のスナップショットで返し、呼び出し側はロックを保持しない。

pub mod sqlite;

pub use sqlite::SqliteEndpointRegistry;

use crate::audit::types::EndpointPattern;
use crate::common::error::{OplogError, OplogResult};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// メソッド別のパターン表
pub(crate) type PatternTable = HashMap<String, Arc<[EndpointPattern]>>;

/// エンドポイントパターンの読み取り専用レジストリ
pub trait EndpointRegistry: Send + Sync {
    /// 指定メソッドのパターンを登録順に返す
    fn list_endpoints(&self, method: &str) -> Arc<[EndpointPattern]>;
}

/// パターンをメソッド別にまとめる（登録順は維持）
pub(crate) fn group_by_method(patterns: Vec<EndpointPattern>) -> PatternTable {
    let mut grouped: HashMap<String, Vec<EndpointPattern>> = HashMap::new();
    for mut pattern in patterns {
        pattern.method = pattern.method.to_ascii_uppercase();
        grouped.entry(pattern.method.clone()).or_default().push(pattern);
    }
    grouped
        .into_iter()
        .map(|(method, patterns)| (method, Arc::from(patterns)))
        .collect()
}

pub(crate) fn lookup(table: &PatternTable, method: &str) -> Arc<[EndpointPattern]> {
    table
        .get(&method.to_ascii_uppercase())
        .cloned()
        .unwrap_or_else(|| Arc::from(Vec::new()))
}

/// 固定のパターン一覧を持つレジストリ
#[derive(Debug, Clone, Default)]
pub struct StaticEndpointRegistry {
    table: PatternTable,
}

impl StaticEndpointRegistry {
    /// パターン一覧から作成
    pub fn new(patterns: Vec<EndpointPattern>) -> Self {
        Self {
            table: group_by_method(patterns),
        }
    }

    /// YAML/JSONのカタログファイルから作成
    pub fn from_file(path: impl AsRef<Path>) -> OplogResult<Self> {
        Ok(Self::new(load_catalog(path)?))
    }

    /// 登録パターン数
    pub fn len(&self) -> usize {
        self.table.values().map(|patterns| patterns.len()).sum()
    }

    /// 空かどうか
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EndpointRegistry for StaticEndpointRegistry {
    fn list_endpoints(&self, method: &str) -> Arc<[EndpointPattern]> {
        lookup(&self.table, method)
    }
}

/// カタログファイルを読み込む
///
/// JSONはYAMLのサブセットなので、どちらもserde_yamlで解釈する。
pub fn load_catalog(path: impl AsRef<Path>) -> OplogResult<Vec<EndpointPattern>> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| {
        OplogError::Catalog(format!("Failed to read {}: {}", path.display(), e))
    })?;
    parse_catalog(&content)
        .map_err(|e| OplogError::Catalog(format!("Failed to parse {}: {}", path.display(), e)))
}

/// カタログ文字列を解釈する
pub fn parse_catalog(content: &str) -> Result<Vec<EndpointPattern>, serde_yaml::Error> {
    serde_yaml::from_str(content)
}
