//! Filesystem layer for the baseline hardener
//!
//! Provides crash-safe writes for manifests and reports, scoped staging files
//! for mechanism tools, and the canonical artifact checksum format.

pub mod checksum;
pub mod error;
pub mod io;
pub mod staging;

pub use checksum::{compute_bytes_checksum, compute_file_checksum};
pub use error::{Error, Result};
pub use io::{read_locked, read_text, write_atomic, write_text};
pub use staging::StagingFile;
