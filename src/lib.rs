//! Template Miner
//!
//! A multi-threaded proof-of-work miner for text block templates:
//! - Locates the nonce field following a marker in the template
//! - Partitions the nonce space into disjoint per-worker ranges
//! - Hashes every candidate with Blake2s and checks a configurable target
//! - Persists the first valid block it finds and reports throughput

pub mod config;
pub mod crypto;
pub mod error;
pub mod persist;
pub mod target;
pub mod template;
pub mod types;
pub mod utils;
pub mod worker;

pub use config::Config;
pub use crypto::{Blake2s, StreamingHash};
pub use error::{Error, Result};
pub use target::Target;
pub use template::Template;
pub use types::*;
pub use worker::{MinedBlock, MinerPool, PoolConfig, PoolReport, SearchWorker};

/// Application information
pub const APP_NAME: &str = "template-miner";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");
pub const APP_DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");
