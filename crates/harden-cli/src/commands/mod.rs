//! Command implementations for harden-cli

pub mod apply;
pub mod rollback;
pub mod verify;

pub use apply::run_apply;
pub use rollback::{run_manifest_show, run_render_rollback, run_rollback};
pub use verify::run_verify;
