//! Common utilities and types shared across keymesh

pub mod config;
pub mod error;
pub mod hash;
pub mod utils;

pub use config::{Config, NodeConfig, DEFAULT_ROOT_PREFIX};
pub use error::{Error, Result};
pub use hash::key_bucket;
pub use utils::{
    clean_node_name, decode_node, encode_node, normalize_key, parse_duration, slash, unslash,
};
