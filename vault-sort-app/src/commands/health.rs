use anyhow::Result;
use std::time::Duration;
use vault_sort_runtime::{LLMClient, RunConfig};
use vault_sort_tools::{DestinationRoot, VaultLayout};

pub async fn run(config: &RunConfig) -> Result<()> {
    println!("🏥 Health Check\n");
    let mut healthy = true;

    print!("📁 Vault folders... ");
    match check_vault(config) {
        Ok(()) => println!("✓"),
        Err(e) => {
            println!("✗ ({})", e);
            healthy = false;
        }
    }

    print!("📝 Audit directory... ");
    match check_audit_dir(config) {
        Ok(()) => println!("✓"),
        Err(e) => {
            println!("✗ ({})", e);
            healthy = false;
        }
    }

    print!("🌐 Oracle endpoint {}... ", config.oracle.url);
    let client = LLMClient::new(config.oracle.url.clone(), config.request_timeout());
    if client.is_reachable(Duration::from_secs(2)).await {
        println!("✓");
    } else {
        println!("✗ (not reachable)");
        healthy = false;
    }

    println!();
    if healthy {
        println!("✅ All checks passed");
        Ok(())
    } else {
        anyhow::bail!("Health check failed");
    }
}

fn check_vault(config: &RunConfig) -> Result<()> {
    let layout = VaultLayout::new(&config.vault.root)?;
    let mut missing: Vec<String> = Vec::new();
    if !layout.inbox().is_dir() {
        missing.push("INBOX".into());
    }
    for root in DestinationRoot::ALL {
        if !layout.root_dir(root).is_dir() {
            missing.push(root.label().to_string());
        }
    }
    if !missing.is_empty() {
        anyhow::bail!("missing {}", missing.join(", "));
    }
    Ok(())
}

fn check_audit_dir(config: &RunConfig) -> Result<()> {
    let dir = config.audit_dir();
    std::fs::create_dir_all(&dir)?;
    let probe = dir.join(".health-probe");
    std::fs::write(&probe, b"ok")?;
    std::fs::remove_file(&probe)?;
    Ok(())
}
