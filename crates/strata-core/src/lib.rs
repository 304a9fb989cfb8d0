//! Core shared types for strata.
//!
//! This crate is intentionally small: it holds the logical clock used to version project
//! snapshots and the path key every registry in the workspace is indexed by.

mod panic;
mod path;
mod version;

pub use panic::panic_payload_to_str;
pub use path::FilePath;
pub use version::VersionStamp;
