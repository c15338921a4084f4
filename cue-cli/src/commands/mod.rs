//! CLI command implementations.

pub mod follow;
pub mod host;
pub mod init;
pub mod pair;
