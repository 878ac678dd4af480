//! endpoints サブコマンド
//!
//! データベースのエンドポイントパターンを管理します。

use crate::config::default_database_url;
use crate::db::endpoints::EndpointPatternStorage;
use crate::db::migrations::initialize_database;
use crate::registry::load_catalog;
use clap::{Args, Subcommand};
use std::path::PathBuf;

/// endpoints サブコマンドの引数
#[derive(Args, Debug, Clone)]
pub struct EndpointsArgs {
    /// Database URL (default: OPLOG_DATABASE_URL)
    #[arg(long, global = true)]
    pub database_url: Option<String>,

    /// Operation
    #[command(subcommand)]
    pub command: EndpointsCommand,
}

/// endpoints の操作
#[derive(Subcommand, Debug, Clone)]
pub enum EndpointsCommand {
    /// Import patterns from a YAML/JSON catalog
    Import {
        /// Catalog file
        file: PathBuf,
        /// Delete existing patterns first
        #[arg(long, default_value_t = false)]
        replace: bool,
    },
    /// List stored patterns
    List,
}

/// Execute the endpoints command
pub async fn execute(args: &EndpointsArgs) -> Result<(), anyhow::Error> {
    let url = args
        .database_url
        .clone()
        .unwrap_or_else(default_database_url);
    let storage = EndpointPatternStorage::new(initialize_database(&url).await?);

    match &args.command {
        EndpointsCommand::Import { file, replace } => {
            let patterns = load_catalog(file)?;
            let inserted = storage.import(&patterns, *replace).await?;
            println!("Imported {} endpoint patterns from {}", inserted, file.display());
        }
        EndpointsCommand::List => {
            let patterns = storage.list_all().await?;
            if patterns.is_empty() {
                println!("No endpoint patterns registered");
            } else {
                println!("METHOD\tPATTERN\tDESCRIPTION");
                for pattern in patterns {
                    println!(
                        "{}\t{}\t{}",
                        pattern.method, pattern.path_pattern, pattern.description
                    );
                }
            }
        }
    }
    Ok(())
}
