use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use mb_domain::config::{AppConfig, ConfigManager, LogFormat, SkipReason};
use mb_supervisor::app::Application;

#[derive(Parser)]
#[command(name = "multibot", about = "Multi-tenant Telegram bot supervisor")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the supervisor (default).
    Serve,
    /// Inspect bot configuration files.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print the version.
    Version,
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Parse every config in CONFIG_DIR and report problems.
    Validate,
    /// List the configs that would be loaded.
    Show,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::from_env();

    match cli.command {
        None | Some(Command::Serve) => {
            init_tracing(&config);
            let app = Application::bootstrap(config).await?;
            app.run().await
        }
        Some(Command::Config(ConfigCommand::Validate)) => {
            init_tracing(&config);
            let manager = ConfigManager::new(config.config_dir.clone());
            let report = manager.load_dir();
            for bot_id in &report.loaded {
                println!("ok      {bot_id}");
            }
            let mut invalid = 0;
            for (path, reason) in &report.skipped {
                match reason {
                    SkipReason::MissingToken(hint) => {
                        let hint = hint
                            .as_deref()
                            .map(|v| format!(" (set {v})"))
                            .unwrap_or_default();
                        println!("skipped {}: token not configured{hint}", path.display());
                    }
                    SkipReason::Invalid(message) => {
                        invalid += 1;
                        println!("INVALID {}: {message}", path.display());
                    }
                }
            }
            if invalid > 0 {
                std::process::exit(1);
            }
            Ok(())
        }
        Some(Command::Config(ConfigCommand::Show)) => {
            let manager = ConfigManager::new(config.config_dir.clone());
            manager.load_dir();
            let mut bots: Vec<_> = manager.all().into_values().collect();
            bots.sort_by(|a, b| a.id.cmp(&b.id));
            for bot in bots {
                let plugins = bot.enabled_plugins().join(", ");
                println!(
                    "{} ({}) mode={} enabled={} plugins=[{plugins}]",
                    bot.id, bot.name, bot.mode, bot.enabled
                );
            }
            Ok(())
        }
        Some(Command::Version) => {
            println!("multibot {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Structured logging per LOG_LEVEL / LOG_FORMAT.
fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.clone()));
    match config.logging.format {
        LogFormat::Json => tracing_subscriber::fmt().with_env_filter(filter).json().init(),
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
}
