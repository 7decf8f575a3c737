//! Storage Engine Module
//!
//! This module provides the core storage functionality of the cache: the
//! per-shard engine, the router that spreads keys over shards, and the
//! background expiry sweeper.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  Router (seeded djb33 % N)                  │
//! │  ┌─────────┐ ┌─────────┐ ┌─────────┐ ┌─────────┐           │
//! │  │ Shard 0 │ │ Shard 1 │ │ Shard 2 │ │ Shard N │           │
//! │  │ RwLock  │ │ RwLock  │ │ RwLock  │ │ RwLock  │           │
//! │  └────▲────┘ └────▲────┘ └────▲────┘ └────▲────┘           │
//! └───────┼───────────┼───────────┼───────────┼────────────────┘
//!         │           │           │           │
//!   ┌─────┴───────────┴───────────┴───────────┴─────┐
//!   │   ExpirySweeper (one Tokio task per shard)    │
//!   └───────────────────────────────────────────────┘
//! ```
//!
//! ## Features
//!
//! - **Sharded Storage**: independent shards reduce lock contention
//! - **RwLock**: Multiple concurrent readers, exclusive writers
//! - **Lazy Expiry**: expired entries are invisible to reads immediately
//! - **Active Expiry**: the sweeper reclaims expired entries in the background
//!
//! ## Example
//!
//! ```
//! use chronocache::storage::{random_seed, Router, Ttl};
//! use std::time::Duration;
//!
//! let router: Router<String> = Router::new(8, random_seed(), None, None);
//!
//! router.set("name".into(), "Ariz".into(), Ttl::Never);
//! assert_eq!(router.get("name"), Some("Ariz".to_string()));
//!
//! router.set(
//!     "session".into(),
//!     "token123".into(),
//!     Ttl::After(Duration::from_secs(3600)),
//! );
//! ```

pub mod entry;
pub mod expiry;
pub mod router;
pub mod shard;

// Re-export commonly used types
pub use entry::{Entry, Ttl};
pub use expiry::{ExpirySweeper, SweeperState};
pub use router::{djb33, random_seed, Router};
pub use shard::{Destructor, EvictionCallback, Shard};
