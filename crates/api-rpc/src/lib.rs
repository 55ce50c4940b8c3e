//! JSON-RPC API Layer
//!
//! JSON-RPC 2.0 surface of the Agent Runner: request validation, marshaling
//! and error-code mapping over the core orchestrator.

pub mod error;
pub mod handler;
pub mod server;
pub mod types;

pub use handler::{RpcHandler, RpcLimits};
pub use server::{RpcServer, RpcServerConfig};
