//! logs サブコマンド
//!
//! 保存済みの操作ログを新しい順にJSON Linesで出力します。

use crate::audit::types::{AuditLogFilter, AuditRecord};
use crate::config::default_database_url;
use crate::db::audit_log::AuditLogStorage;
use crate::db::migrations::initialize_database;
use clap::Args;
use std::io::Write;

/// logs サブコマンドの引数
#[derive(Args, Debug, Clone)]
pub struct LogsArgs {
    /// Filter by HTTP method
    #[arg(short, long)]
    pub method: Option<String>,

    /// Filter by path substring
    #[arg(short, long)]
    pub path: Option<String>,

    /// Filter by username
    #[arg(short, long)]
    pub username: Option<String>,

    /// Maximum number of records
    #[arg(short, long, default_value = "50")]
    pub limit: i64,

    /// Number of records to skip
    #[arg(long, default_value = "0")]
    pub offset: i64,

    /// Database URL (default: OPLOG_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,
}

impl LogsArgs {
    fn filter(&self) -> AuditLogFilter {
        AuditLogFilter {
            method: self.method.clone(),
            path: self.path.clone(),
            username: self.username.clone(),
            limit: Some(self.limit),
            offset: Some(self.offset),
        }
    }
}

/// Execute the logs command
pub async fn execute(args: &LogsArgs) -> Result<(), anyhow::Error> {
    let url = args
        .database_url
        .clone()
        .unwrap_or_else(default_database_url);
    let storage = AuditLogStorage::new(initialize_database(&url).await?);
    let records = storage.query(&args.filter()).await?;

    write_records(&records, &mut std::io::stdout().lock())
}

/// 1行1レコードで書き出す
fn write_records(records: &[AuditRecord], out: &mut impl Write) -> Result<(), anyhow::Error> {
    for record in records {
        serde_json::to_writer(&mut *out, record)?;
        writeln!(out)?;
    }
    Ok(())
}
