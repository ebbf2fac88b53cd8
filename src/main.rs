//! # Publish Harness CLI (`pubh`)
//!
//! ## Usage
//!
//! ```bash
//! pubh --config ./config/pubh.toml --as <actor> <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `pubh init` | Create the store directory layout |
//! | `pubh collection create\|list\|show\|approve\|unlock\|delete` | Manage collections |
//! | `pubh content create\|edit\|complete\|review\|delete\|find\|version\|mark-delete` | Move content through the stages |
//! | `pubh publish <collection>` | Publish an approved collection now |
//! | `pubh history` | List published collections |
//! | `pubh serve` | Publish scheduled collections on time until Ctrl-C |
//! | `pubh completions <shell>` | Print shell completions |
//!
//! Log output goes to stderr and is controlled with `RUST_LOG`
//! (default `publish_harness=info`).

use std::path::PathBuf;
use std::time::Duration;

use anyhow::bail;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use publish_harness::config;
use publish_harness::editorial::{self, ContentOp};
use publish_harness::harness::Harness;
use publish_harness::{history, publish, scheduler};

/// Publish Harness: editorial staging and multi-target publishing.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file and an `--as` flag naming the acting user.
#[derive(Parser)]
#[command(
    name = "pubh",
    about = "Publish Harness: editorial staging and transactional multi-target publishing",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/pubh.toml")]
    config: PathBuf,

    /// Identity of the acting user (checked against `[permissions]`).
    #[arg(long = "as", global = true, default_value = "anonymous")]
    actor: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the store directories (collections, master, archive, records).
    ///
    /// Idempotent.
    Init,

    /// Create, inspect, approve and delete collections.
    Collection {
        #[command(subcommand)]
        action: CollectionAction,
    },

    /// Move content through a collection's stages.
    Content {
        #[command(subcommand)]
        action: ContentAction,
    },

    /// Publish an approved collection to every configured target now.
    Publish {
        /// Collection id or name.
        collection: String,
    },

    /// List published collections, newest first.
    History {
        /// Maximum number of records to show.
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// Run the scheduler: publish scheduled collections at their publish date.
    Serve,

    /// Print shell completions to stdout.
    Completions {
        shell: Shell,
    },
}

#[derive(Subcommand)]
enum CollectionAction {
    /// Create a new, empty collection.
    Create {
        name: String,
        /// `manual` or `scheduled`.
        #[arg(long = "type", default_value = "manual")]
        collection_type: String,
        /// Publish date: RFC 3339 or `YYYY-MM-DD HH:MM` (UTC). Required for
        /// scheduled collections.
        #[arg(long)]
        publish_date: Option<String>,
        /// Viewer team granted read access (repeatable).
        #[arg(long = "team")]
        teams: Vec<String>,
    },
    /// List collections.
    List,
    /// Show a collection's details and staged content.
    Show { collection: String },
    /// Approve a fully reviewed collection for publishing.
    Approve { collection: String },
    /// Return an approved collection to editing.
    Unlock { collection: String },
    /// Delete an empty collection.
    Delete { collection: String },
}

#[derive(Subcommand)]
enum ContentAction {
    /// Start new content as an empty draft.
    Create { collection: String, uri: String },
    /// Bring content (staged or published) back into editing.
    Edit { collection: String, uri: String },
    /// Mark a draft complete.
    Complete { collection: String, uri: String },
    /// Review completed content (not your own).
    Review { collection: String, uri: String },
    /// Delete staged content.
    Delete { collection: String, uri: String },
    /// Print the path content resolves to.
    Find { collection: String, uri: String },
    /// Snapshot published content as the next `previous/vN` version.
    Version { collection: String, uri: String },
    /// Remove published content (file or directory) when the collection publishes.
    MarkDelete { collection: String, uri: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "publish_harness=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    // Commands that don't require config
    if let Commands::Completions { shell } = &cli.command {
        clap_complete::generate(*shell, &mut Cli::command(), "pubh", &mut std::io::stdout());
        return Ok(());
    }

    let cfg = config::load_config(&cli.config)?;
    let actor = cli.actor.as_str();

    match cli.command {
        Commands::Init => editorial::run_init(&cfg)?,
        Commands::History { limit } => history::run_history(&cfg, limit)?,
        Commands::Completions { .. } => {
            // Handled above (before config loading)
            unreachable!()
        }
        command => {
            let harness = Harness::from_config(&cfg)?;
            match command {
                Commands::Collection { action } => match action {
                    CollectionAction::Create {
                        name,
                        collection_type,
                        publish_date,
                        teams,
                    } => editorial::run_collection_create(
                        &harness,
                        actor,
                        &name,
                        &collection_type,
                        publish_date.as_deref(),
                        teams,
                    )?,
                    CollectionAction::List => editorial::run_collection_list(&harness)?,
                    CollectionAction::Show { collection } => {
                        editorial::run_collection_show(&harness, &collection)?
                    }
                    CollectionAction::Approve { collection } => {
                        editorial::run_collection_approve(&harness, actor, &collection)?
                    }
                    CollectionAction::Unlock { collection } => {
                        editorial::run_collection_unlock(&harness, actor, &collection)?
                    }
                    CollectionAction::Delete { collection } => {
                        editorial::run_collection_delete(&harness, actor, &collection)?
                    }
                },
                Commands::Content { action } => {
                    let (op, collection, uri) = match action {
                        ContentAction::Find { collection, uri } => {
                            editorial::run_content_find(&harness, actor, &collection, &uri)?;
                            return Ok(());
                        }
                        ContentAction::Version { collection, uri } => {
                            editorial::run_content_version(&harness, actor, &collection, &uri)?;
                            return Ok(());
                        }
                        ContentAction::Create { collection, uri } => (ContentOp::Create, collection, uri),
                        ContentAction::Edit { collection, uri } => (ContentOp::Edit, collection, uri),
                        ContentAction::Complete { collection, uri } => {
                            (ContentOp::Complete, collection, uri)
                        }
                        ContentAction::Review { collection, uri } => (ContentOp::Review, collection, uri),
                        ContentAction::Delete { collection, uri } => (ContentOp::Delete, collection, uri),
                        ContentAction::MarkDelete { collection, uri } => {
                            (ContentOp::MarkDelete, collection, uri)
                        }
                    };
                    editorial::run_content(&harness, actor, &collection, op, &uri)?;
                }
                Commands::Publish { collection } => {
                    publish::run_publish(&harness, actor, &collection).await?
                }
                Commands::Serve => {
                    if !cfg.scheduler.enabled {
                        bail!("The scheduler is disabled ([scheduler] enabled = false)");
                    }
                    scheduler::run_serve(&harness, Duration::from_secs(cfg.scheduler.rescan_secs))
                        .await?
                }
                Commands::Init | Commands::History { .. } | Commands::Completions { .. } => {
                    unreachable!()
                }
            }
        }
    }

    Ok(())
}
