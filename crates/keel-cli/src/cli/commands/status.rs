//! Status snapshot command.

use std::sync::Arc;

use anyhow::{Context, Result};
use keel_core::Runtime;
use keel_core::config::KeelConfig;
use keel_core::lifecycle::LifecycleManager;

/// Prints a memory status and cache analytics snapshot as JSON.
///
/// # Errors
/// Returns an error if the snapshot cannot be serialized.
pub fn run(config: KeelConfig) -> Result<()> {
    let runtime = Runtime::with_lifecycle(
        config,
        Arc::new(LifecycleManager::without_process_hooks()),
    );

    let snapshot = serde_json::json!({
        "memory": runtime.monitor().memory_status(),
        "caches": runtime.caches().global_analytics(),
        "sessions": runtime.loggers().global_stats(),
    });
    println!(
        "{}",
        serde_json::to_string_pretty(&snapshot).context("serialize status snapshot")?
    );
    Ok(())
}
