//! Client-side block-addressed virtual filesystem over a remote cloud
//! device controller.
//!
//! Three tightly-coupled pieces make up the core: the register-frame codec
//! and transport client that speak to the controller over one long-lived
//! TCP connection, the device table and block cache that give the file
//! layer somewhere to put and find bytes, and the file layer itself, which
//! is the only public surface most callers need (see [`file::FileLayer`]).

pub mod cache;
pub mod codec;
pub mod config;
pub mod device;
pub mod error;
pub mod file;
pub mod transport;

pub use config::Config;
pub use error::{VfsError, VfsResult};
pub use file::{FileHandle, FileLayer};
