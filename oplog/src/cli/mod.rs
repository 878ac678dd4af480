//! CLI module for oplog
//!
//! Provides the demo server and maintenance commands for the operation log.

pub mod endpoints;
pub mod logs;
pub mod serve;

use clap::{Parser, Subcommand};

/// oplog - HTTP operation log interceptor
#[derive(Parser, Debug)]
#[command(name = "oplog")]
#[command(version, about, long_about = None)]
#[command(after_help = r#"ENVIRONMENT VARIABLES:
    OPLOG_HOST                    Bind address (default: 0.0.0.0)
    OPLOG_PORT                    Listen port (default: 8080)
    OPLOG_LOG_LEVEL               Log level (default: info)
    OPLOG_LOG_DIR                 Directory for JSON log files (optional)
    OPLOG_DATABASE_URL            Database URL (default: sqlite:data/oplog.db)
    OPLOG_ENDPOINTS_FILE          YAML/JSON endpoint catalog (optional)
    OPLOG_ENDPOINTS_REFRESH_SECS  Endpoint pattern reload interval (default: 60)
    OPLOG_EXCLUDED_PATHS          Comma separated path substrings to skip
    OPLOG_ROUTE_PREFIX            Route prefix stripped from recorded paths
    OPLOG_MULTIPART_MAX_MB        Multipart parse limit in MB (default: 32)
    OPLOG_FLUSH_INTERVAL_SECS     Writer flush interval (default: 5)
    OPLOG_BUFFER_CAPACITY         Writer buffer capacity (default: 10000)
"#)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the demo server with the interceptor attached
    Serve(serve::ServeArgs),
    /// Print stored operation log records as JSON lines
    Logs(logs::LogsArgs),
    /// Manage endpoint patterns stored in the database
    Endpoints(endpoints::EndpointsArgs),
}
