use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use vault_sort_runtime::RunConfig;

pub const CONFIG_ENV: &str = "VAULT_SORT_CONFIG";

/// Config file to use: the explicit path, then `$VAULT_SORT_CONFIG`, then
/// `$XDG_CONFIG_HOME/vault-sort/config.yaml`, then `~/.config/vault-sort/config.yaml`.
pub fn locate(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }
    if let Some(path) = env_path(CONFIG_ENV) {
        return Ok(path);
    }
    if let Some(base) = env_path("XDG_CONFIG_HOME") {
        return Ok(base.join("vault-sort").join("config.yaml"));
    }
    match home_dir() {
        Some(home) => Ok(home.join(".config").join("vault-sort").join("config.yaml")),
        None => bail!("Cannot locate a config file: HOME is not set, pass --config"),
    }
}

/// Reads the file, applies environment overrides, then validates.
pub fn load(path: &Path) -> Result<RunConfig> {
    let mut config = RunConfig::read_file(path)
        .with_context(|| format!("Failed to load {}. Run 'vault-sort init' first.", path.display()))?;
    apply_overrides(&mut config, |key| std::env::var(key).ok())?;
    config
        .validate()
        .with_context(|| format!("Invalid configuration in {}", path.display()))?;
    Ok(config)
}

/// Environment knobs that win over the file.
pub fn apply_overrides<F>(config: &mut RunConfig, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(url) = lookup("VAULT_SORT_LLM_URL") {
        config.oracle.url = url;
    }
    if let Some(raw) = lookup("VAULT_SORT_DRY_RUN") {
        config.dry_run = parse_flag(&raw)
            .with_context(|| format!("VAULT_SORT_DRY_RUN has an invalid value: {}", raw))?;
    }
    if let Some(raw) = lookup("VAULT_SORT_MAX_STEPS") {
        config.limits.max_steps = raw
            .trim()
            .parse()
            .with_context(|| format!("VAULT_SORT_MAX_STEPS is not a number: {}", raw))?;
    }
    if let Some(raw) = lookup("VAULT_SORT_MEM_LIMIT") {
        config.limits.mem_limit = raw
            .trim()
            .parse()
            .with_context(|| format!("VAULT_SORT_MEM_LIMIT is not a number: {}", raw))?;
    }
    if let Some(raw) = lookup("VAULT_SORT_REQUEST_TIMEOUT") {
        config.oracle.request_timeout_secs = raw
            .trim()
            .parse()
            .with_context(|| format!("VAULT_SORT_REQUEST_TIMEOUT is not a number: {}", raw))?;
    }
    Ok(())
}

fn parse_flag(raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => bail!("expected a boolean, got {}", other),
    }
}

/// Vault under `~/_Vault`, fed from Downloads and Desktop.
pub fn default_config(home: &Path) -> RunConfig {
    let mut config = RunConfig::default();
    config.vault.root = home.join("_Vault");
    config.intake.roots = vec![home.join("Downloads"), home.join("Desktop")];
    config
}

pub fn save(config: &RunConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let content = config.to_yaml()?;
    std::fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

pub fn home_dir() -> Option<PathBuf> {
    env_path("HOME")
}

fn env_path(key: &str) -> Option<PathBuf> {
    std::env::var_os(key)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}
