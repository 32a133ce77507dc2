use crate::shutdown::Shutdown;
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;
use vault_sort::infra::AuditLogger;
use vault_sort_runtime::{LLMClient, RunConfig, RunSummary, RuntimeController, StopReason};

/// Runs one sorting pass and returns the process exit code.
pub async fn run(config: RunConfig, wait_oracle: bool, shutdown: &Shutdown) -> Result<i32> {
    println!(
        "🗂  Sorting {}{}",
        config.vault.root.display(),
        if config.dry_run { " (dry run)" } else { "" }
    );

    let client = LLMClient::new(config.oracle.url.clone(), config.request_timeout());
    if wait_oracle {
        println!("⏳ Waiting for oracle at {}...", client.url());
        let limit = Duration::from_secs(config.oracle.wait_secs);
        if let Err(e) = client.wait_until_reachable(limit).await {
            warn!("Oracle not reachable, continuing anyway: {}", e);
        }
    }

    let run_id = format!(
        "{}-{}",
        chrono::Local::now().format("%Y%m%d-%H%M%S"),
        &uuid::Uuid::new_v4().simple().to_string()[..8]
    );
    let log_path = config.audit_dir().join(format!("run-{}.jsonl", run_id));
    let audit = Arc::new(
        AuditLogger::new(&log_path, run_id.as_str())
            .with_context(|| format!("Failed to open audit log {}", log_path.display()))?,
    );

    let mut controller = RuntimeController::new(config, Arc::new(client), audit)
        .context("Failed to prepare the run")?;
    let summary = controller
        .run(&shutdown.token())
        .await
        .context("Run aborted")?;

    print_summary(&summary);
    println!("📝 Audit log: {}", log_path.display());

    Ok(match summary.stop_reason {
        StopReason::Interrupted => shutdown.exit_code(),
        _ => 0,
    })
}

fn print_summary(summary: &RunSummary) {
    let c = &summary.counters;
    println!();
    println!("Stopped: {}", summary.stop_reason);
    println!(
        "  steps {}  moves {}  rejected {}  deferred {}  failed {}",
        c.steps, c.moves, c.rejections, c.deferrals, c.failures
    );
    if summary.intake_moved + summary.intake_failed > 0 {
        println!(
            "  intake {} staged, {} failed",
            summary.intake_moved, summary.intake_failed
        );
    }
    if c.resolved + c.skipped > 0 {
        println!("  {} already gone, {} left in place", c.resolved, c.skipped);
    }
    if !summary.permanently_skipped.is_empty() {
        println!("  gave up on:");
        for path in &summary.permanently_skipped {
            println!("    {}", path.display());
        }
    }
    println!(
        "  cleanup: {} flattened, {} empty folders removed",
        summary.flattened, summary.removed_dirs
    );
    println!("  took {:.1}s", summary.duration.as_secs_f64());
}
