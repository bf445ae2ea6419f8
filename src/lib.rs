//! # keymesh
//!
//! A distributed data-routing layer. A fleet of machines, each holding
//! a partial shard of a large keyed corpus, appears to consumers as a
//! single keyed HTTP service: nodes advertise themselves and their
//! keys into a shared coordination store, clients resolve a key to a
//! live node and proxy HTTP traffic to it, and failing bindings are
//! deregistered on the read path so the cluster heals itself.
//!
//! ## Architecture
//!
//! ```text
//!                  ┌─────────────────────────────┐
//!                  │      coordination store     │
//!                  │  nodes/<n>        (leased)  │
//!                  │  nodes/<n>/__keys/<k>       │
//!                  │  data/<k>/__nodes/<n>       │
//!                  └───────┬─────────────┬───────┘
//!                   lease, │             │ resolve,
//!                   watch  │             │ heal
//!                  ┌───────▼──────┐  ┌───▼──────────┐
//!                  │    Node      │  │    Client    │
//!                  │  + Provider  │◄─┤ KeyedTransport│
//!                  │  + data HTTP │  └──────────────┘
//!                  └──────────────┘
//! ```
//!
//! ## Usage
//!
//! Serve a local directory to the cluster:
//! ```bash
//! keymesh-node --name 10.0.0.5:7070 --bind 0.0.0.0:7070 \
//!     --data-dir /srv/corpus --etcd http://127.0.0.1:2379
//! ```
//!
//! Route reads from anywhere:
//! ```bash
//! keymeshctl nodes
//! keymeshctl key /github.com/x/y
//! keymeshctl get /github.com/x/y
//! ```

pub mod backend;
pub mod client;
pub mod common;
pub mod http;
pub mod node;
pub mod ops;
pub mod provider;
pub mod registry;

// Re-export commonly used types
pub use backend::{Backend, ChangeEvent, EtcdBackend, EventAction, MemoryBackend};
pub use client::{Client, KeyedTransport};
pub use common::{key_bucket, Config, Error, NodeConfig, Result};
pub use http::{data_router, provider_router, HttpProvider};
pub use node::Node;
pub use ops::{cluster_status, evict_node, StatusReport};
pub use provider::{DirProvider, MemoryProvider, Provider};
pub use registry::Registry;
