//! # chronocache - A Sharded In-Process Cache with Expiration
//!
//! chronocache is an in-memory key-value cache for a single process. Every
//! entry may carry its own expiration, the keyspace is split across
//! independently locked shards, and a background task reclaims expired
//! entries without blocking foreground traffic.
//!
//! ## Features
//!
//! - **Generic Values**: one engine for any `V`
//! - **Per-Entry TTL**: default, never, or an explicit duration per write
//! - **Sharded Locks**: RwLock per shard, keys routed with a seeded hash
//! - **Atomic Compute**: read-transform-write and two-key combine operations
//! - **Callbacks**: destructor and eviction hooks, always run outside locks
//! - **Snapshots**: save/load live entries with `bincode`
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                              Cache (handle)                             │
//! │                                                                         │
//! │   set / add / replace / get / delete / compute* / increment             │
//! │                                   │                                     │
//! │                                   ▼                                     │
//! │                     ┌──────────────────────────────────────────────┐   │
//! │                     │                  Router                      │   │
//! │                     │  ┌────────┐ ┌────────┐ ┌────────┐ ┌────────┐ │   │
//! │                     │  │Shard 0 │ │Shard 1 │ │Shard 2 │ │...N    │ │   │
//! │                     │  │RwLock  │ │RwLock  │ │RwLock  │ │shards  │ │   │
//! │                     │  └────────┘ └────────┘ └────────┘ └────────┘ │   │
//! │                     └──────────────────────────────────────────────┘   │
//! │                                               ▲                         │
//! │                                               │                         │
//! │                     ┌─────────────────────────┴───────────────────────┐ │
//! │                     │           ExpirySweeper                         │ │
//! │                     │      (Background Tokio Tasks)                   │ │
//! │                     └─────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```
//! use chronocache::{Cache, Ttl};
//! use std::time::Duration;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let cache: Cache<String> = Cache::builder()
//!     .shards(16)
//!     .default_ttl(Duration::from_secs(300))
//!     .sweep_interval(Duration::from_secs(1))
//!     .on_evicted(|key, _| println!("evicted {}", key))
//!     .build();
//!
//! cache.set_default("greeting", "hello".to_string());
//! cache.set("pinned", "forever".to_string(), Ttl::Never);
//!
//! assert_eq!(cache.get("greeting"), Some("hello".to_string()));
//! # }
//! ```
//!
//! ## Lazy + Active Expiry
//!
//! Entries with a TTL are expired in two ways:
//! 1. **Lazy**: every read checks the expiration, so an expired entry is
//!    never returned
//! 2. **Active**: the sweeper periodically removes expired entries, running
//!    the destructor and eviction callbacks for each
//!
//! Dropping the last clone of a [`Cache`] stops its sweeper.
//!
//! ## Module Overview
//!
//! - [`cache`]: the public handle and its builder
//! - [`storage`]: shards, routing and the expiry sweeper
//! - [`persist`]: snapshot save/load
//! - [`config`]: construction settings
//! - [`error`]: error types

pub mod cache;
pub mod config;
pub mod error;
pub mod persist;
pub mod storage;

// Re-export commonly used types for convenience
pub use cache::{Cache, CacheBuilder, CacheStats};
pub use config::{CacheConfig, DEFAULT_SHARDS};
pub use error::{CacheError, Result};
pub use storage::{Entry, SweeperState, Ttl};

/// Version of chronocache
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
