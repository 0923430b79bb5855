//! Multi-tenant hierarchical agent fleet runtime.
//!
//! Each `(tenant, path)` pair addresses one stateful Agent: a counter, a set
//! of named children, an inventory, recent messages, and chat statistics,
//! all owned by a single-writer actor and persisted to its own SQLite file.
//! Agents are created lazily on first request and form a tree — messages,
//! broadcasts, and stock updates move between parent and child without any
//! network hop, since the whole tree lives in one process's registry.

pub mod agent;
pub mod collaborators;
pub mod config;
pub mod domain_types;
pub mod error;
pub mod hierarchy;
pub mod protocol;
pub mod rest_api;
pub mod router;
pub mod server;
pub mod store;

pub use crate::agent::AgentHandle;
pub use crate::config::FleetConfig;
pub use crate::error::{ApiError, ApiResult};
pub use crate::router::{Collaborators, Router};
