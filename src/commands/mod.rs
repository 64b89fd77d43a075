//! Command Dispatch Module
//!
//! ```text
//! Client Request
//!       │
//!       ▼
//! ┌─────────────────┐
//! │  RESP Parser    │  (protocol module)
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │ CommandHandler  │  name lookup + arity check
//! │ CommandRegistry │
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │ StorageEngine   │  (storage module)
//! └─────────────────┘
//! ```
//!
//! Dispatch is stateless per request: the same request always produces the
//! same kind of response for a given store state.

pub mod handler;
pub mod registry;

pub use handler::CommandHandler;
pub use registry::{CommandArity, CommandRegistry, CommandSpec};
