//! FiberDB migrator CLI: a one-shot tool that reads a legacy
//! `anchors/attached` file tree and writes equivalent entities through a
//! FiberDB engine's WAL.
//!
//! Usage: `fiberdb-migrate <legacy-root>` with `FIBERDB_DATA_PATH` set to
//! the destination data directory (falls back to `EngineConfig::default`'s
//! platform data directory otherwise).

use fiberdb::config::EngineConfig;
use fiberdb::engine::Engine;
use fiberdb::migrate;
use std::panic;

fn main() -> anyhow::Result<()> {
    panic::set_hook(Box::new(|panic_info| {
        eprintln!("fiberdb-migrate fatal error:");
        eprintln!("{panic_info}");
    }));

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let legacy_root = std::env::args()
        .nth(1)
        .ok_or_else(|| anyhow::anyhow!("usage: fiberdb-migrate <legacy-root>"))?;

    let config = EngineConfig::from_env();
    tracing::info!(data_path = %config.data_path.display(), "opening engine");
    let engine = Engine::open(config)?;

    let report = migrate::migrate(engine.store(), &legacy_root)?;
    tracing::info!(
        succeeded = report.succeeded(),
        failed = report.failed(),
        "migration complete"
    );

    for outcome in &report.outcomes {
        if let Err(message) = &outcome.result {
            tracing::warn!(key = %outcome.key, %message, "anchor failed to migrate");
        }
    }

    if report.failed() > 0 {
        anyhow::bail!("{} of {} anchors failed to migrate", report.failed(), report.outcomes.len());
    }

    Ok(())
}
