//! attrsync CLI - drive attribute sync and event delivery from a shell.
//!
//! Each invocation opens the file-backed store, runs one command through a
//! sync context and waits for the resulting network work before exiting.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use url::Url;

use attrsync_storage::keys::INSTALLATION_ID;
use attrsync_storage::{FileStore, KeyValueStore, KeyValueStoreExt};
use attrsync_sync::attributes::AttributeInput;
use attrsync_sync::{
    ApplyOutcome, AttributeEditor, AttributeType, EmailMarketing, HttpRequestExecutor,
    ProbationKind, SyncConfig, SyncContext,
};

#[derive(Parser)]
#[command(name = "attrsync")]
#[command(about = "attrsync - attribute sync and event delivery client")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// JSON configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Store file (default: platform data directory).
    #[arg(short, long)]
    store: Option<PathBuf>,

    /// API key, overriding the configuration file.
    #[arg(long, env = "ATTRSYNC_API_KEY")]
    api_key: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Set an attribute.
    Set {
        key: String,
        value: String,

        /// Explicit type; detected from the value when omitted.
        #[arg(short = 't', long = "type", value_enum)]
        attr_type: Option<TypeArg>,
    },

    /// Remove an attribute.
    Remove { key: String },

    /// Add values to an array attribute.
    Add {
        key: String,
        #[arg(required = true)]
        values: Vec<String>,
    },

    /// Remove values from an array attribute.
    Pull {
        key: String,
        #[arg(required = true)]
        values: Vec<String>,
    },

    /// Add a tag to a collection.
    Tag { collection: String, tag: String },

    /// Remove a tag from a collection, or the whole collection.
    Untag {
        collection: String,
        tag: Option<String>,
    },

    /// Set native profile attributes.
    Profile {
        #[arg(long)]
        language: Option<String>,
        #[arg(long)]
        region: Option<String>,
        #[arg(long)]
        email: Option<String>,
        #[arg(long, value_enum)]
        email_marketing: Option<MarketingArg>,
    },

    /// Show the local snapshot and sync state.
    Show,

    /// Signal a session start (checks the last transaction).
    SessionStart,

    /// Leave push or profile probation.
    ExitProbation {
        #[arg(value_enum)]
        kind: ProbationArg,
    },

    /// Track an event.
    Track {
        name: String,

        /// Event parameters as a JSON object.
        #[arg(short, long, default_value = "{}")]
        params: String,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum TypeArg {
    String,
    Boolean,
    Integer,
    Float,
    Date,
    Url,
}

impl From<TypeArg> for AttributeType {
    fn from(arg: TypeArg) -> Self {
        match arg {
            TypeArg::String => AttributeType::String,
            TypeArg::Boolean => AttributeType::Boolean,
            TypeArg::Integer => AttributeType::Integer,
            TypeArg::Float => AttributeType::Float,
            TypeArg::Date => AttributeType::Date,
            TypeArg::Url => AttributeType::Url,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum ProbationArg {
    Push,
    Profile,
}

#[derive(Clone, Copy, ValueEnum)]
enum MarketingArg {
    Subscribed,
    Unsubscribed,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let ctx = open_context(&cli).await?;

    let result = run(&ctx, cli.command).await;
    if let Err(e) = ctx.flush().await {
        warn!("Some work could not be completed: {}", e);
    }
    ctx.shutdown();
    result
}

async fn open_context(cli: &Cli) -> Result<SyncContext> {
    let mut config = match &cli.config {
        Some(path) => SyncConfig::load(path)
            .await
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => SyncConfig::default(),
    };
    if let Some(api_key) = &cli.api_key {
        config.endpoint.api_key = api_key.clone();
    }

    let store_path = match &cli.store {
        Some(path) => path.clone(),
        None => dirs::data_dir()
            .context("No data directory on this platform, pass --store")?
            .join("attrsync")
            .join("store.json"),
    };
    let store = FileStore::open(&store_path)
        .await
        .with_context(|| format!("Failed to open store {}", store_path.display()))?;
    info!("Using store {}", store.path().display());

    if config.endpoint.installation_id.is_none() {
        config.endpoint.installation_id = Some(installation_id(&store).await?);
    }

    let executor = HttpRequestExecutor::new(config.endpoint.clone())
        .context("Failed to create HTTP client")?;
    let ctx = SyncContext::new(config, Arc::new(store), Arc::new(executor));
    ctx.start();
    Ok(ctx)
}

/// Installation id persisted in the store, created on first use.
async fn installation_id(store: &FileStore) -> Result<String> {
    if let Some(id) = store.get_typed::<String>(INSTALLATION_ID).await? {
        return Ok(id);
    }
    let id = uuid::Uuid::new_v4().to_string();
    store.set(INSTALLATION_ID, json!(id)).await?;
    Ok(id)
}

async fn run(ctx: &SyncContext, command: Commands) -> Result<()> {
    match command {
        Commands::Set {
            key,
            value,
            attr_type,
        } => {
            let input = parse_input(&value, attr_type);
            cmd_edit(ctx, |e| match attr_type {
                Some(t) => {
                    e.set_typed_attribute(&key, input, t.into());
                }
                None => {
                    e.set_attribute(&key, input);
                }
            })
            .await
        }

        Commands::Remove { key } => {
            cmd_edit(ctx, |e| {
                e.remove_attribute(&key);
            })
            .await
        }

        Commands::Add { key, values } => {
            cmd_edit(ctx, |e| {
                e.add_to_array(&key, &values);
            })
            .await
        }

        Commands::Pull { key, values } => {
            cmd_edit(ctx, |e| {
                e.remove_from_array(&key, &values);
            })
            .await
        }

        Commands::Tag { collection, tag } => {
            cmd_edit(ctx, |e| {
                e.add_tag(&collection, &tag);
            })
            .await
        }

        Commands::Untag { collection, tag } => {
            cmd_edit(ctx, |e| match &tag {
                Some(tag) => {
                    e.remove_tag(&collection, tag);
                }
                None => {
                    e.clear_tag_collection(&collection);
                }
            })
            .await
        }

        Commands::Profile {
            language,
            region,
            email,
            email_marketing,
        } => {
            cmd_edit(ctx, |e| {
                if let Some(language) = &language {
                    e.set_language(Some(language.as_str()).filter(|s| !s.is_empty()));
                }
                if let Some(region) = &region {
                    e.set_region(Some(region.as_str()).filter(|s| !s.is_empty()));
                }
                if let Some(email) = &email {
                    e.set_email(Some(email.as_str()).filter(|s| !s.is_empty()));
                }
                if let Some(state) = email_marketing {
                    e.set_email_marketing(Some(match state {
                        MarketingArg::Subscribed => EmailMarketing::Subscribed,
                        MarketingArg::Unsubscribed => EmailMarketing::Unsubscribed,
                    }));
                }
            })
            .await
        }

        Commands::Show => cmd_show(ctx).await,

        Commands::SessionStart => {
            ctx.start_session();
            println!("Session started.");
            Ok(())
        }

        Commands::ExitProbation { kind } => {
            let kind = match kind {
                ProbationArg::Push => ProbationKind::Push,
                ProbationArg::Profile => ProbationKind::Profile,
            };
            if ctx.exit_probation(kind).await? {
                println!("Left {:?} probation.", kind);
            } else {
                println!("Already out of {:?} probation.", kind);
            }
            Ok(())
        }

        Commands::Track { name, params } => {
            let params: Value =
                serde_json::from_str(&params).context("Event parameters must be JSON")?;
            if !params.is_object() {
                anyhow::bail!("Event parameters must be a JSON object");
            }
            let id = ctx.track(name, params);
            println!("Tracked event {}", id);
            Ok(())
        }
    }
}

/// Apply one edit and report what happened.
async fn cmd_edit<F>(ctx: &SyncContext, f: F) -> Result<()>
where
    F: FnOnce(&mut AttributeEditor),
{
    let outcome = ctx.edit(f).await.context("Edit rejected")?;
    match outcome {
        ApplyOutcome::Unchanged => println!("Nothing changed."),
        ApplyOutcome::Gated => println!("Saved locally (in probation, not sent)."),
        ApplyOutcome::Scheduled { version } => println!("Saved, sending version {}.", version),
    }
    Ok(())
}

async fn cmd_show(ctx: &SyncContext) -> Result<()> {
    let coordinator = ctx.coordinator();
    let attributes = coordinator.attributes().await?;
    let tags = coordinator.tags().await?;
    let state = coordinator.sync_state().await?;

    let report = json!({
        "attributes": attributes,
        "tags": tags,
        "sync": state,
        "pending_events": ctx.events().len(),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Turn a command-line value into editor input.
///
/// With an explicit type, numbers stay numbers so the editor can coerce
/// them; dates are read as RFC 3339.
fn parse_input(raw: &str, attr_type: Option<TypeArg>) -> AttributeInput {
    match attr_type {
        Some(TypeArg::Date) => match DateTime::parse_from_rfc3339(raw) {
            Ok(date) => AttributeInput::Date(date.with_timezone(&Utc)),
            Err(_) => number_or_text(raw),
        },
        Some(TypeArg::Boolean) => match raw {
            "true" => AttributeInput::Bool(true),
            "false" => AttributeInput::Bool(false),
            _ => number_or_text(raw),
        },
        Some(TypeArg::String) | Some(TypeArg::Url) => AttributeInput::Text(raw.to_string()),
        Some(_) => number_or_text(raw),
        None => {
            if let Ok(b) = raw.parse::<bool>() {
                return AttributeInput::Bool(b);
            }
            if let Ok(url) = Url::parse(raw) {
                if matches!(url.scheme(), "http" | "https") {
                    return AttributeInput::Url(url);
                }
            }
            if let Ok(date) = DateTime::parse_from_rfc3339(raw) {
                return AttributeInput::Date(date.with_timezone(&Utc));
            }
            number_or_text(raw)
        }
    }
}

fn number_or_text(raw: &str) -> AttributeInput {
    match raw.parse::<f64>() {
        Ok(n) if n.is_finite() => AttributeInput::Number(n),
        _ => AttributeInput::Text(raw.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_input_detection() {
        assert_eq!(parse_input("true", None), AttributeInput::Bool(true));
        assert_eq!(parse_input("42", None), AttributeInput::Number(42.0));
        assert_eq!(parse_input("ada", None), AttributeInput::Text("ada".to_string()));
        assert!(matches!(
            parse_input("https://example.com", None),
            AttributeInput::Url(_)
        ));
        assert!(matches!(
            parse_input("2024-05-01T10:00:00Z", None),
            AttributeInput::Date(_)
        ));
    }

    #[test]
    fn test_parse_input_typed() {
        assert_eq!(
            parse_input("12", Some(TypeArg::String)),
            AttributeInput::Text("12".to_string())
        );
        assert_eq!(
            parse_input("1.2", Some(TypeArg::Integer)),
            AttributeInput::Number(1.2)
        );
        assert_eq!(
            parse_input("0", Some(TypeArg::Boolean)),
            AttributeInput::Number(0.0)
        );
    }

    #[test]
    fn test_cli_parses() {
        let cli = Cli::try_parse_from(["attrsync", "set", "age", "30", "--type", "integer"]).unwrap();
        assert!(matches!(cli.command, Commands::Set { .. }));

        let cli = Cli::try_parse_from(["attrsync", "exit-probation", "push"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::ExitProbation {
                kind: ProbationArg::Push
            }
        ));
    }
}
