//! MCP (Model Context Protocol) client support
//!
//! One [`capability::CapabilityClient`] talks to one server. It sits on a
//! [`session::Session`], which owns the handshake and lifecycle, which in turn
//! runs over a [`transport::Transport`] opened through
//! [`transport::TransportHandle`].
//!
//! # Module Layout
//!
//! - `types`      -- JSON-RPC primitives, MCP wire types, app-facing descriptors
//! - `client`     -- Transport-agnostic async JSON-RPC 2.0 client
//! - `protocol`   -- Typed MCP lifecycle wrapper over `JsonRpcClient`
//! - `session`    -- Connection state machine
//! - `resolver`   -- Pure content and schema normalization
//! - `capability` -- The application-facing client
//! - `transport`  -- `Transport` trait and concrete implementations (stdio,
//!   HTTP, fake)
//! - `config`     -- Server and transport parameters

pub mod capability;
pub mod client;
pub mod config;
pub mod protocol;
pub mod resolver;
pub mod session;
pub mod transport;
pub mod types;

pub use types::*;
