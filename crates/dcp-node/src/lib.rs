//! # dcp-node — Credential Node
//!
//! Library half of the `dcp-node` binary: configuration (`config.rs`),
//! telemetry (`telemetry.rs`) and the wiring of stores, services and state
//! machines into a [`Node`] (`node.rs`). Embedding services use [`Node`]
//! directly to reach the synchronous entry points of each role.

pub mod config;
pub mod node;
pub mod telemetry;

pub use config::{ConfigError, NodeConfig};
pub use node::{Collaborators, HolderRole, IssuerRole, Node, NodeError, RunningNode, StoreBackend};
