//! blockvfsctl — a thin binary wrapping the `blockvfs` library.
//!
//! The spec treats a full command-line driver as an external collaborator
//! (out of scope); this binary is just enough to exercise the file layer
//! against a running controller from the shell, the way `sisctl`'s
//! `main.rs` is a thin wrapper around its library crate.

use anyhow::{Context, Result};
use blockvfs::{Config, FileLayer};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env();
    tracing::info!(addr = %config.controller_addr, "starting blockvfsctl");

    let path = std::env::args().nth(1).unwrap_or_else(|| "probe".to_string());

    let mut layer = FileLayer::new(&config);
    let handle = layer
        .open(&path)
        .with_context(|| format!("opening {path}"))?;
    tracing::info!(handle, "opened file");

    let payload = b"blockvfsctl self-check";
    let written = layer.write(handle, payload).context("self-check write")?;
    layer.seek(handle, 0).context("seek to start")?;

    let mut buf = vec![0u8; written];
    let read = layer.read(handle, &mut buf).context("self-check read")?;
    if read != written || buf.as_slice() != &payload[..] {
        anyhow::bail!("self-check mismatch: wrote {written} bytes, read back {read}");
    }

    layer.close(handle).context("closing file")?;
    layer.shutdown().context("shutting down")?;

    tracing::info!("self-check passed");
    Ok(())
}
