//! Command table.
//!
//! Maps an uppercased command name to its handler and arity contract. The
//! dispatcher validates arity here so handlers can index their arguments
//! directly.

use super::handler::{cmd_config, cmd_echo, cmd_get, cmd_keys, cmd_ping, cmd_set, CommandHandler};
use crate::protocol::RespValue;
use bytes::Bytes;
use std::collections::HashMap;

/// Handler signature. `args[0]` is the command name as sent by the client.
pub type CommandFn = fn(&CommandHandler, &[Bytes]) -> RespValue;

/// Number of arguments a command accepts, including the command name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandArity {
    Exact(usize),
    OneOf(&'static [usize]),
}

impl CommandArity {
    pub fn accepts(&self, argc: usize) -> bool {
        match self {
            CommandArity::Exact(n) => argc == *n,
            CommandArity::OneOf(options) => options.contains(&argc),
        }
    }
}

/// A registered command.
#[derive(Clone, Copy)]
pub struct CommandSpec {
    pub name: &'static str,
    pub arity: CommandArity,
    pub handler: CommandFn,
}

impl std::fmt::Debug for CommandSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandSpec")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .finish()
    }
}

/// Runtime command registry.
#[derive(Debug, Clone, Default)]
pub struct CommandRegistry {
    entries: HashMap<&'static str, CommandSpec>,
}

impl CommandRegistry {
    /// Builds an empty command registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a registry with every supported command.
    pub fn with_builtin_commands() -> Self {
        let mut registry = Self::new();
        registry.register(CommandSpec {
            name: "PING",
            arity: CommandArity::Exact(1),
            handler: cmd_ping,
        });
        registry.register(CommandSpec {
            name: "ECHO",
            arity: CommandArity::Exact(2),
            handler: cmd_echo,
        });
        registry.register(CommandSpec {
            name: "SET",
            arity: CommandArity::OneOf(&[3, 5]),
            handler: cmd_set,
        });
        registry.register(CommandSpec {
            name: "GET",
            arity: CommandArity::Exact(2),
            handler: cmd_get,
        });
        registry.register(CommandSpec {
            name: "KEYS",
            arity: CommandArity::Exact(2),
            handler: cmd_keys,
        });
        registry.register(CommandSpec {
            name: "CONFIG",
            arity: CommandArity::Exact(3),
            handler: cmd_config,
        });
        registry
    }

    /// Adds or replaces a command. Names must be uppercase.
    pub fn register(&mut self, spec: CommandSpec) {
        self.entries.insert(spec.name, spec);
    }

    /// Looks up an uppercased command name.
    pub fn get(&self, name: &str) -> Option<&CommandSpec> {
        self.entries.get(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
