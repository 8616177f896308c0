//! twtxt registry CLI
//!
//! Runs the registry as a long-lived process (`serve`) or performs one-shot
//! maintenance against its storage.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use registry::{
    config::{ConfigWatcher, load_config},
    error::{AppError, Result},
    models::Config,
    pipeline::Submission,
    service::RegistryService,
    utils::{etag, format_lines},
};

/// Federated twtxt registry
#[derive(Parser, Debug)]
#[command(
    name = "registry",
    version,
    about = "Federated twtxt registry: crawls feeds and peer registries"
)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "registry.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the registry: periodic refresh and persistence until Ctrl-C
    Serve,

    /// Run one refresh sweep over all feeds and peers
    Refresh,

    /// Add a user feed, or a peer registry's /api/plain/tweets URL
    Submit {
        /// Feed URL
        url: String,

        /// Nickname (not needed for peer registries)
        #[arg(short, long, default_value = "")]
        nick: String,
    },

    /// Query the index
    Query {
        #[arg(value_enum)]
        kind: QueryKind,

        /// Search term, tag or mentioned URL
        term: Option<String>,

        /// Page of results (20 per page)
        #[arg(short, long, default_value_t = 1, allow_negative_numbers = true)]
        page: i64,
    },

    /// Remove a user and its statuses
    Delete {
        /// Feed URL of the user
        url: String,
    },

    /// Validate the configuration file
    Validate,

    /// Show configuration and storage summary
    Info,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum QueryKind {
    /// Users by nick or URL substring
    Users,
    /// Statuses containing a substring
    Tweets,
    /// Statuses with a hashtag (any tagged status when no term is given)
    Tags,
    /// Statuses mentioning a URL
    Mentions,
    /// Every status
    All,
}

/// Initialize logging with the given default filter.
fn init_logging(level: &str) {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

/// Main entry point for the CLI application.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let loaded = load_config(&cli.config);
    let level = match &loaded {
        _ if cli.verbose => "debug".to_string(),
        Ok(config) => config.logging.level.clone(),
        Err(_) => "info".to_string(),
    };
    init_logging(&level);

    let config = match loaded {
        Ok(config) => config,
        Err(e) => {
            log::error!("Config validation failed: {}", e);
            return Err(e);
        }
    };
    if !cli.config.exists() {
        log::warn!("{} not found, running with defaults", cli.config.display());
    }

    match cli.command {
        Command::Serve => serve(&cli.config, config).await?,

        Command::Refresh => {
            let service = RegistryService::open(config).await?;
            let summary = service.refresh().await;
            service.shutdown().await?;
            println!(
                "checked {} / updated {} / unchanged {} / failed {} / peers {} / new users {}",
                summary.checked,
                summary.updated,
                summary.unchanged,
                summary.failed,
                summary.peers_crawled,
                summary.users_discovered
            );
        }

        Command::Submit { url, nick } => {
            let service = RegistryService::open(config).await?;
            let result = service.submit(&nick, &url, None).await;
            service.shutdown().await?;
            match result? {
                Submission::User { url, statuses } => {
                    println!("Added {} ({} statuses)", url, statuses)
                }
                Submission::Peer {
                    url,
                    users_discovered,
                } => println!("Added peer registry {} ({} new users)", url, users_discovered),
            }
        }

        Command::Query { kind, term, page } => {
            let service = RegistryService::open(config).await?;
            let term = term.unwrap_or_default();
            let results = match kind {
                QueryKind::Users => Ok(service.query_user(&term)),
                QueryKind::Tweets => service.query_in_status(&term),
                QueryKind::Tags if term.is_empty() => Ok(service.query_tagged()),
                QueryKind::Tags => service.query_tag(&term).await,
                QueryKind::Mentions => service.query_mentions(&term),
                QueryKind::All => Ok(service.query_all_statuses()),
            };
            service.shutdown().await?;

            let results = results?;
            let body = format_lines(service.reduce_to_page(page, &results));
            log::debug!("{} results, etag {}", results.len(), etag(body.as_bytes()));
            print!("{body}");
        }

        Command::Delete { url } => {
            let service = RegistryService::open(config).await?;
            let result = service.delete_user(&url).await;
            service.shutdown().await?;
            let user = result?;
            println!("Deleted {} ({}, {} statuses)", user.nick, user.url, user.status.len());
        }

        Command::Validate => {
            log::info!("Validating configuration...");
            log::info!(
                "✓ Config OK ({} backend at {})",
                config.database.kind,
                config.database.path.display()
            );
            log::info!("All validations passed!");
        }

        Command::Info => {
            log::info!("Config file: {}", cli.config.display());
            log::info!("Instance: {} ({})", config.instance.name, config.instance.url);
            log::info!(
                "Database: {} at {}",
                config.database.kind,
                config.database.path.display()
            );
            log::info!(
                "Schedule: refresh every {:?}, push every {:?}",
                config.schedule.refresh_interval(),
                config.schedule.push_interval()
            );

            let service = RegistryService::open(config).await?;
            let snapshot = service.snapshot();
            service.shutdown().await?;
            log::info!(
                "Stored: {} users, {} statuses, {} peers",
                snapshot.users.len(),
                snapshot.status_count(),
                snapshot.remotes.len()
            );
        }
    }

    log::info!("Done!");

    Ok(())
}

/// Run until Ctrl-C, reloading whenever the config file changes.
async fn serve(path: &std::path::Path, config: Config) -> Result<()> {
    let service = RegistryService::start(config).await?;
    log::info!(
        "Registry running with {} users and {} peers",
        service.registry().len(),
        service.remotes().len()
    );

    let mut watcher = match ConfigWatcher::new(path) {
        Ok(watcher) => Some(watcher),
        Err(e) => {
            log::warn!("Config reload disabled: {}", e);
            None
        }
    };

    loop {
        let changed = async {
            match watcher.as_mut() {
                Some(watcher) => watcher.changed().await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.map_err(AppError::Io)?;
                log::info!("Shutting down...");
                break;
            }
            event = changed => {
                if event.is_none() {
                    log::warn!("Config watcher stopped; reload disabled");
                    watcher = None;
                    continue;
                }
                match load_config(path) {
                    Ok(config) => {
                        if let Err(e) = service.configure(config).await {
                            log::error!("Reload failed: {}", e);
                        }
                    }
                    Err(e) => log::error!("Ignoring invalid config change: {}", e),
                }
            }
        }
    }

    service.shutdown().await
}
