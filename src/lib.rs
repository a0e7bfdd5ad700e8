//! Keeps a local rack topology file in sync with a ZooKeeper subtree.
//!
//! Each child under the watched base path names a host; its value is the
//! host's rack id. The engine watches the whole subtree, re-reads it on every
//! change and atomically rewrites `"<address> <rack_id>"` lines to the
//! topology file.
mod cli;
mod config;
mod connection;
mod coordination;
mod errors;
mod reconciler;
mod resolver;
mod supervisor;
mod topology;
mod watcher;
pub mod utils;

pub use cli::*;
pub use config::*;
pub use connection::*;
pub use coordination::*;
pub use errors::*;
pub use reconciler::*;
pub use resolver::*;
pub use supervisor::*;
pub use topology::*;
pub use utils::*;
pub use watcher::*;

//-----------------------------------------------------------
// Test utils

#[cfg(test)]
pub mod test_utils;
