use crate::config::{default_config, home_dir, save};
use anyhow::{bail, Context, Result};
use std::path::Path;
use vault_sort_tools::VaultLayout;

/// Writes a default config to `config_path` and creates the vault folders.
pub fn run(config_path: &Path, force: bool) -> Result<()> {
    println!("🚀 vault-sort initialization\n");

    if config_path.exists() && !force {
        bail!(
            "Config already exists at {} (use --force to overwrite)",
            config_path.display()
        );
    }

    let home = home_dir().context("HOME is not set")?;
    let config = default_config(&home);

    println!("📁 Creating vault at {}...", config.vault.root.display());
    std::fs::create_dir_all(&config.vault.root)
        .with_context(|| format!("Failed to create {}", config.vault.root.display()))?;
    let layout = VaultLayout::new(&config.vault.root)?;
    layout
        .ensure()
        .with_context(|| format!("Failed to create folders under {}", layout.root().display()))?;
    std::fs::create_dir_all(config.audit_dir())
        .with_context(|| format!("Failed to create {}", config.audit_dir().display()))?;

    save(&config, config_path)?;
    println!("📝 Wrote {}", config_path.display());

    println!("\n✅ Initialization complete!");
    println!("\nNext steps:");
    println!("  edit the people and taxonomy sections of the config");
    println!("  vault-sort health");
    println!("  vault-sort run --dry-run");
    Ok(())
}
