//! CPH Bridge Reconciler - Library interface
//!
//! Verifies lock/burn claims against the source chain and executes the
//! matching mint/unlock on the destination chain exactly once, retrying
//! transient destination failures in the background.

pub mod api;
pub mod config;
pub mod contracts;
pub mod db;
pub mod error;
pub mod executor;
pub mod gateway;
pub mod metrics;
pub mod node_check;
pub mod reconciler;
pub mod registry;
pub mod rpc_fallback;
pub mod scheduler;
pub mod signer;
pub mod totals;
pub mod types;
pub mod verifier;
