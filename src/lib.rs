//! `ygit`: a minimal read-only Git client for memory-constrained hosts.
//!
//! Speaks just enough of Git's Smart HTTP protocol v2 to clone, fetch,
//! checkout, and report status against a remote, storing everything it
//! needs in a small set of custom key/value stores instead of a full
//! `.git` directory.

pub mod checkout;
pub mod crypto;
pub mod db;
pub mod error;
pub mod fetch;
pub mod inflate;
pub mod object;
pub mod pack;
pub mod pktline;
pub mod repo;
pub mod transport;
pub mod tree;

pub use error::{Error, Result};
pub use repo::Repo;
