//! Server configuration.
//!
//! [`Config`] is parsed from the command line at startup. The subset that
//! clients may read back through `CONFIG GET` is kept in [`ServerConfig`],
//! which is shared with every command handler.

use clap::Parser;
use std::path::PathBuf;

use crate::{DEFAULT_DBFILENAME, DEFAULT_DIR, DEFAULT_HOST, DEFAULT_PORT};

/// Command-line configuration.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "snapkv",
    version,
    about = "A Redis-compatible in-memory key-value server"
)]
pub struct Config {
    /// Host to bind to
    #[arg(long, default_value = DEFAULT_HOST)]
    pub host: String,

    /// Port to listen on
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Directory holding the snapshot file
    #[arg(long, default_value = DEFAULT_DIR)]
    pub dir: String,

    /// Snapshot file name inside `--dir`
    #[arg(long, default_value = DEFAULT_DBFILENAME)]
    pub dbfilename: String,

    /// Log filter, e.g. `debug` or `snapkv=trace`. Falls back to RUST_LOG, then `info`.
    #[arg(long)]
    pub log_level: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            dir: DEFAULT_DIR.to_string(),
            dbfilename: DEFAULT_DBFILENAME.to_string(),
            log_level: None,
        }
    }
}

impl Config {
    /// Returns the bind address as a string
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Full path of the snapshot file to load at startup.
    pub fn snapshot_path(&self) -> PathBuf {
        PathBuf::from(&self.dir).join(&self.dbfilename)
    }

    /// The client-visible part of the configuration.
    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            dir: self.dir.clone(),
            dbfilename: self.dbfilename.clone(),
        }
    }
}

/// Parameters readable through `CONFIG GET`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub dir: String,
    pub dbfilename: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Config::default().server_config()
    }
}

impl ServerConfig {
    /// Looks up a parameter by name (case-insensitive).
    pub fn get(&self, name: &str) -> Option<&str> {
        match name.to_ascii_lowercase().as_str() {
            "dir" => Some(&self.dir),
            "dbfilename" => Some(&self.dbfilename),
            _ => None,
        }
    }
}
