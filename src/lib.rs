//! # SnapKV - A Redis-Compatible In-Memory Key-Value Server
//!
//! SnapKV speaks the RESP protocol over TCP, supports per-key expiry, and
//! bootstraps its dataset from an RDB snapshot file at startup.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                              SnapKV                                     │
//! │                                                                         │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐                  │
//! │  │ TCP Server  │───>│ Connection  │───>│  Command    │                  │
//! │  │ (Listener)  │    │  Handler    │    │  Handler    │                  │
//! │  └─────────────┘    └─────────────┘    └──────┬──────┘                  │
//! │                                               │                         │
//! │                                               ▼                         │
//! │  ┌─────────────┐    ┌──────────────────────────────────────────────┐   │
//! │  │  Snapshot   │───>│              StorageEngine                   │   │
//! │  │  Loader     │    │  ┌────────┐ ┌────────┐ ┌────────┐ ┌────────┐ │   │
//! │  │ (startup)   │    │  │Shard 0 │ │Shard 1 │ │Shard 2 │ │...N    │ │   │
//! │  └─────────────┘    │  └────────┘ └────────┘ └────────┘ └────────┘ │   │
//! │                     └──────────────────────────────────────────────┘   │
//! │                                               ▲                         │
//! │                     ┌─────────────────────────┴───────────────────────┐ │
//! │                     │           ExpirySweeper                         │ │
//! │                     └─────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use snapkv::config::ServerConfig;
//! use snapkv::server::Server;
//! use snapkv::storage::{start_expiry_sweeper, StorageEngine};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let storage = Arc::new(StorageEngine::new());
//!     snapkv::snapshot::load_into("dump.rdb".as_ref(), &storage)?;
//!     let _sweeper = start_expiry_sweeper(Arc::clone(&storage));
//!
//!     let server = Server::bind("127.0.0.1:6379", storage, Arc::new(ServerConfig::default())).await?;
//!     server.run_until(async { let _ = tokio::signal::ctrl_c().await; }).await;
//!     Ok(())
//! }
//! ```
//!
//! ## Supported Commands
//!
//! - `PING`
//! - `ECHO message`
//! - `SET key value [PX milliseconds]`
//! - `GET key`
//! - `KEYS *`
//! - `CONFIG GET dir|dbfilename`
//!
//! ## Module Overview
//!
//! - [`protocol`]: RESP request parser and response types
//! - [`storage`]: Thread-safe storage engine with TTL support
//! - [`snapshot`]: RDB snapshot loading
//! - [`commands`]: Command table and handlers
//! - [`connection`]: Client connection management
//! - [`server`]: Listener and shutdown
//! - [`config`]: Command-line and runtime configuration

pub mod commands;
pub mod config;
pub mod connection;
pub mod protocol;
pub mod server;
pub mod snapshot;
pub mod storage;

pub use commands::CommandHandler;
pub use config::{Config, ServerConfig};
pub use connection::{handle_connection, ConnectionHandler};
pub use protocol::{ParseError, RespParser, RespValue};
pub use server::{Server, ServerError};
pub use snapshot::SnapshotError;
pub use storage::{start_expiry_sweeper, ExpiryConfig, ExpirySweeper, StorageEngine};

/// The default port (same as Redis)
pub const DEFAULT_PORT: u16 = 6379;

/// The default host to bind to
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// The default snapshot directory
pub const DEFAULT_DIR: &str = ".";

/// The default snapshot file name
pub const DEFAULT_DBFILENAME: &str = "dump.rdb";

/// Version of SnapKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
