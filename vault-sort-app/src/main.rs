use std::process::ExitCode;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use vault_sort_app::cli::{Cli, Command, USAGE};
use vault_sort_app::shutdown::Shutdown;
use vault_sort_app::{commands, config};

#[tokio::main]
async fn main() -> ExitCode {
    // Default info, RUST_LOG overrides
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer())
        .init();

    #[cfg(feature = "prometheus")]
    if let Ok(addr) = std::env::var("VAULT_SORT_METRICS_ADDR") {
        match addr.parse() {
            Ok(addr) => {
                if let Err(e) = vault_sort_runtime::metrics::install_prometheus(addr) {
                    tracing::warn!("Metrics exporter not started: {}", e);
                }
            }
            Err(e) => tracing::warn!("Invalid VAULT_SORT_METRICS_ADDR {}: {}", addr, e),
        }
    }

    let cli = match Cli::parse(std::env::args().skip(1)) {
        Ok(cli) => cli,
        Err(e) => {
            eprintln!("❌ {}\n\n{}", e, USAGE);
            return ExitCode::from(2);
        }
    };

    match run(cli).await {
        Ok(code) => ExitCode::from(code.clamp(0, 255) as u8),
        Err(e) => {
            eprintln!("❌ {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<i32> {
    if cli.command == Command::Help {
        println!("{}", USAGE);
        return Ok(0);
    }

    let config_path = config::locate(cli.config.as_deref())?;
    match cli.command {
        Command::Init => {
            commands::init::run(&config_path, cli.force)?;
            Ok(0)
        }
        Command::Health => {
            let config = config::load(&config_path)?;
            commands::health::run(&config).await?;
            Ok(0)
        }
        Command::Run => {
            let mut config = config::load(&config_path)?;
            if cli.dry_run {
                config.dry_run = true;
            }
            let shutdown = Shutdown::new();
            shutdown.install_signal_handlers();
            commands::run::run(config, cli.wait_oracle, &shutdown).await
        }
        Command::Help => Ok(0),
    }
}
