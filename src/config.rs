//! Runtime configuration for the block VFS client.

use std::net::SocketAddr;
use std::time::Duration;

/// Width of the device-presence mask on the wire (§3). This is a protocol
/// contract, not a tunable, so it lives as a crate-level const rather than
/// a `Config` field.
pub const MAX_DEVICES: usize = 16;

/// Block size in bytes (§2/§3).
pub const BLOCK_SIZE: usize = 256;

#[derive(Debug, Clone)]
pub struct Config {
    /// Address of the remote cloud device controller.
    pub controller_addr: SocketAddr,

    /// Maximum number of resident blocks in the LRU cache.
    pub cache_blocks: usize,

    /// Timeout for the initial TCP connect (not per-request — §5 has no
    /// per-request deadlines by design).
    pub connect_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            controller_addr: "127.0.0.1:3190"
                .parse()
                .expect("default controller address must parse"),
            cache_blocks: 64,
            connect_timeout: Duration::from_millis(2000),
        }
    }
}

impl Config {
    /// Build a `Config` from environment variables, falling back to
    /// `Default` for anything unset or unparsable.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let (Ok(host), Ok(port)) = (
            std::env::var("BLOCKVFS_HOST"),
            std::env::var("BLOCKVFS_PORT"),
        ) {
            if let Ok(addr) = format!("{host}:{port}").parse() {
                config.controller_addr = addr;
            }
        } else if let Ok(addr) = std::env::var("BLOCKVFS_ADDR") {
            if let Ok(addr) = addr.parse() {
                config.controller_addr = addr;
            }
        }

        if let Ok(blocks) = std::env::var("BLOCKVFS_CACHE_BLOCKS") {
            if let Ok(val) = blocks.parse() {
                config.cache_blocks = val;
            }
        }

        if let Ok(ms) = std::env::var("BLOCKVFS_CONNECT_TIMEOUT_MS") {
            if let Ok(val) = ms.parse() {
                config.connect_timeout = Duration::from_millis(val);
            }
        }

        config
    }
}
