//! serve サブコマンド
//!
//! インターセプタを組み込んだデモサーバーを起動します。

use crate::config::{AuditConfig, ServerConfig};
use crate::server::run_server;
use clap::Args;

/// serve サブコマンドの引数
#[derive(Args, Debug, Clone, Default)]
pub struct ServeArgs {
    /// Listen port
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Bind address
    #[arg(short = 'H', long)]
    pub host: Option<String>,

    /// Database URL
    #[arg(long)]
    pub database_url: Option<String>,

    /// YAML/JSON endpoint catalog (uses the database patterns when omitted)
    #[arg(long)]
    pub endpoints_file: Option<String>,
}

impl ServeArgs {
    /// 環境変数の設定に引数を上書きする
    pub fn server_config(&self) -> ServerConfig {
        let mut config = ServerConfig::from_env();
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(host) = &self.host {
            config.host = host.clone();
        }
        if let Some(url) = &self.database_url {
            config.database_url = url.clone();
        }
        if let Some(file) = &self.endpoints_file {
            config.endpoints_file = Some(file.clone());
        }
        config
    }
}

/// Execute the serve command
pub async fn execute(args: &ServeArgs) -> Result<(), anyhow::Error> {
    run_server(args.server_config(), AuditConfig::from_env()).await?;
    Ok(())
}
