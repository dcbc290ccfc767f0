//! Shared test utilities for the baseline hardener workspace.
//!
//! Dev-dependency only, never published.
//!
//! # Modules
//!
//! - [`changes`]: builders for common [`PolicyChange`](harden_core::PolicyChange) shapes
//! - [`host`]: [`TestHost`](host::TestHost), a sandboxed host backed by file stores

pub mod changes;
pub mod host;

pub use host::TestHost;
