//! Command Handler
//!
//! Receives decoded requests, validates them against the command table,
//! executes them against the storage engine and returns the response.
//!
//! ## Supported Commands
//!
//! - `PING` - Test connection
//! - `ECHO message` - Echo message
//! - `SET key value [PX milliseconds]` - Set a key, optionally with expiry
//! - `GET key` - Get a key's value
//! - `KEYS *` - List all live keys
//! - `CONFIG GET parameter` - Read `dir` or `dbfilename`
//!
//! Argument errors produce an error reply and never touch the store.

use super::registry::CommandRegistry;
use crate::config::ServerConfig;
use crate::protocol::{parse_i64, Request, RespValue};
use crate::storage::StorageEngine;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

/// Dispatches requests to command handlers.
///
/// Cheap to clone; every connection holds its own copy.
#[derive(Clone)]
pub struct CommandHandler {
    storage: Arc<StorageEngine>,
    config: Arc<ServerConfig>,
    registry: Arc<CommandRegistry>,
}

impl CommandHandler {
    /// Creates a command handler over the given store and configuration.
    pub fn new(storage: Arc<StorageEngine>, config: Arc<ServerConfig>) -> Self {
        Self {
            storage,
            config,
            registry: Arc::new(CommandRegistry::with_builtin_commands()),
        }
    }

    /// Executes a request and returns the response.
    pub fn execute(&self, request: Request) -> RespValue {
        let Some(name) = request.first() else {
            return RespValue::error("empty command");
        };

        let upper = String::from_utf8_lossy(name).to_ascii_uppercase();
        let Some(spec) = self.registry.get(&upper) else {
            return RespValue::error(format!(
                "unknown command '{}'",
                String::from_utf8_lossy(name)
            ));
        };

        if !spec.arity.accepts(request.len()) {
            return wrong_arity(spec.name);
        }

        trace!(command = spec.name, argc = request.len(), "Dispatching command");
        (spec.handler)(self, &request)
    }

    pub fn storage(&self) -> &Arc<StorageEngine> {
        &self.storage
    }
}

fn wrong_arity(name: &str) -> RespValue {
    RespValue::error(format!(
        "wrong number of arguments for '{}' command",
        name.to_ascii_lowercase()
    ))
}

/// PING
pub(super) fn cmd_ping(_handler: &CommandHandler, _args: &[Bytes]) -> RespValue {
    RespValue::pong()
}

/// ECHO message
pub(super) fn cmd_echo(_handler: &CommandHandler, args: &[Bytes]) -> RespValue {
    RespValue::bulk_string(args[1].clone())
}

/// SET key value [PX milliseconds]
pub(super) fn cmd_set(handler: &CommandHandler, args: &[Bytes]) -> RespValue {
    let key = args[1].clone();
    let value = args[2].clone();

    if args.len() == 3 {
        handler.storage.set(key, value);
        return RespValue::ok();
    }

    if !args[3].eq_ignore_ascii_case(b"PX") {
        return RespValue::error("syntax error");
    }

    let ms = match parse_i64(&args[4]) {
        Some(ms) => ms,
        None => return RespValue::error("value is not an integer or out of range"),
    };
    if ms < 0 {
        return RespValue::error("invalid expire time in 'set' command");
    }

    handler
        .storage
        .set_with_ttl(key, value, Duration::from_millis(ms as u64));
    RespValue::ok()
}

/// GET key
pub(super) fn cmd_get(handler: &CommandHandler, args: &[Bytes]) -> RespValue {
    match handler.storage.get(&args[1]) {
        Some(value) => RespValue::bulk_string(value),
        None => RespValue::null(),
    }
}

/// KEYS pattern
pub(super) fn cmd_keys(handler: &CommandHandler, args: &[Bytes]) -> RespValue {
    match handler.storage.keys(&args[1]) {
        Ok(keys) => RespValue::array(keys.into_iter().map(RespValue::bulk_string).collect()),
        Err(e) => RespValue::error(e.to_string()),
    }
}

/// CONFIG GET parameter
pub(super) fn cmd_config(handler: &CommandHandler, args: &[Bytes]) -> RespValue {
    if !args[1].eq_ignore_ascii_case(b"GET") {
        return RespValue::error(format!(
            "unknown subcommand '{}' for 'CONFIG' command",
            String::from_utf8_lossy(&args[1])
        ));
    }

    let name = String::from_utf8_lossy(&args[2]).to_ascii_lowercase();
    match handler.config.get(&name) {
        Some(value) => RespValue::array(vec![
            RespValue::bulk_string(Bytes::from(name)),
            RespValue::bulk_string(Bytes::copy_from_slice(value.as_bytes())),
        ]),
        None => RespValue::array(vec![]),
    }
}
