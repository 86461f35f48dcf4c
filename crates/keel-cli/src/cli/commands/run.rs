//! Foreground runtime command.

use anyhow::Result;
use keel_core::Runtime;
use keel_core::config::KeelConfig;
use keel_core::logging::SessionLogger;

/// Runs the runtime until a shutdown signal, then drives one cleanup
/// pass and exits with the reason's code.
///
/// # Errors
/// Returns an error after a fault-driven shutdown so the process exits
/// non-zero.
pub async fn run(config: KeelConfig) -> Result<()> {
    let runtime = Runtime::new(config);

    let session_id = SessionLogger::generate_session_id();
    let logger = runtime.loggers().create(&session_id, None);
    logger.info("keel runtime started");
    tracing::info!(session_id = %session_id, "runtime started; waiting for shutdown signal");

    let reason = runtime.lifecycle().wait_for_shutdown().await;
    logger.info(format!("shutdown requested: {reason}"));

    if let Some(report) = runtime.shutdown(reason.clone()).await {
        tracing::info!(
            reason = %report.reason,
            handlers_run = report.handlers_run,
            failures = report.failures.len(),
            "cleanup finished"
        );
    }

    if reason.exit_code() != 0 {
        anyhow::bail!("shut down after fault: {reason}");
    }
    Ok(())
}
