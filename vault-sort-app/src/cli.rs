use anyhow::{bail, Result};
use std::path::PathBuf;

pub const USAGE: &str = "\
Usage: vault-sort <command> [options]

Commands:
  init      Write a default config and create the vault folders
  health    Check vault folders, audit directory and oracle endpoint
  run       Stage intake folders and sort the inbox

Options:
  --config <PATH>   Config file (default: $VAULT_SORT_CONFIG or ~/.config/vault-sort/config.yaml)
  --dry-run         Plan moves without touching the filesystem
  --wait-oracle     Wait for the oracle endpoint before running
  --force           Let init overwrite an existing config
  -h, --help        Show this help";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Init,
    Health,
    Run,
    Help,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cli {
    pub command: Command,
    pub config: Option<PathBuf>,
    pub dry_run: bool,
    pub wait_oracle: bool,
    pub force: bool,
}

impl Cli {
    /// Parses arguments without the program name.
    pub fn parse<I, S>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut cli = Cli {
            command: Command::Help,
            config: None,
            dry_run: false,
            wait_oracle: false,
            force: false,
        };
        let mut command = None;
        let mut args = args.into_iter().map(Into::into);

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--config" | "-c" => match args.next() {
                    Some(path) => cli.config = Some(PathBuf::from(path)),
                    None => bail!("--config needs a path"),
                },
                "--dry-run" => cli.dry_run = true,
                "--wait-oracle" => cli.wait_oracle = true,
                "--force" => cli.force = true,
                "-h" | "--help" | "help" => return Ok(cli),
                other if other.starts_with('-') => bail!("Unknown option: {}", other),
                other => {
                    if command.is_some() {
                        bail!("Unexpected argument: {}", other);
                    }
                    command = Some(match other {
                        "init" => Command::Init,
                        "health" => Command::Health,
                        "run" => Command::Run,
                        _ => bail!("Unknown command: {}", other),
                    });
                }
            }
        }

        cli.command = command.unwrap_or(Command::Run);
        Ok(cli)
    }
}
