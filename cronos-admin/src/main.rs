//! `cronos-admin`: maintenance tool for the Cronos memory stores.
//!
//! ```text
//! cronos-admin --config cronos.toml integrity-check
//! cronos-admin library --user u1
//! cronos-admin neighbors --entity Dragon --universe w1 --user u1
//! cronos-admin raw-query "SELECT label, id FROM nodes WHERE user_id = :user" --param user=u1
//! cronos-admin reset-graph --confirm
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use cronos_core::config::{CronosConfig, EmbeddingBackend};
use cronos_core::embedding::EmbeddingProvider;
use cronos_core::types::Properties;
use cronos_core::vector::SearchFilter;
use cronos_core::{MemoryContext, ReadOutcome};
use cronos_embed::HttpEmbeddingProvider;
use serde_json::{Value, json};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "cronos-admin")]
#[command(about = "Maintenance tool for Cronos memory stores", long_about = None)]
struct Cli {
    /// Path to cronos.toml (defaults apply when omitted)
    #[arg(short, long, env = "CRONOS_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Delete every node and relationship in the knowledge graph
    ResetGraph {
        /// Required; the reset cannot be undone
        #[arg(long, default_value_t = false)]
        confirm: bool,
    },
    /// Run the storage engine's integrity check on the graph
    IntegrityCheck,
    /// Run a read-only statement against the graph
    RawQuery {
        /// Statement, with `:name` placeholders
        statement: String,
        /// Named parameter as key=value (repeatable)
        #[arg(long = "param", value_parser = parse_param)]
        params: Vec<(String, String)>,
    },
    /// List a user's universes, characters and adventures
    Library {
        #[arg(long)]
        user: String,
    },
    /// Show the relationship edges around an entity
    Neighbors {
        #[arg(long)]
        entity: String,
        #[arg(long)]
        universe: String,
        #[arg(long)]
        user: String,
        #[arg(long, default_value_t = 1)]
        depth: u32,
    },
    /// Search episodic memories
    Search {
        #[arg(long)]
        query: String,
        #[arg(long)]
        user: String,
        #[arg(long)]
        universe: Option<String>,
        #[arg(short, long, default_value_t = 3)]
        k: usize,
    },
}

fn parse_param(raw: &str) -> std::result::Result<(String, String), String> {
    raw.split_once('=')
        .map(|(key, value)| (key.trim().to_string(), value.to_string()))
        .filter(|(key, _)| !key.is_empty())
        .ok_or_else(|| format!("expected key=value, got `{raw}`"))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => CronosConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => CronosConfig::default(),
    };
    config.apply_env_overrides();
    init_tracing(&config);

    let context = build_context(&config)?;
    let outcome = run(&context, cli.command);
    context.shutdown();
    outcome
}

fn init_tracing(config: &CronosConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.general.log_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    let installed = if config.general.log_format == "json" {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    if let Err(err) = installed {
        eprintln!("cronos-admin: could not install tracing subscriber: {err}");
    }
}

fn build_context(config: &CronosConfig) -> Result<MemoryContext> {
    let context = match config.embedding.provider {
        EmbeddingBackend::Ollama | EmbeddingBackend::OpenAi => {
            let provider: Arc<dyn EmbeddingProvider> = Arc::new(
                HttpEmbeddingProvider::from_config(&config.embedding)
                    .context("building embedding provider")?,
            );
            MemoryContext::with_provider(config, provider)?
        }
        EmbeddingBackend::Hashing | EmbeddingBackend::Stub => MemoryContext::init(config)?,
    };
    if !context.graph().is_connected() {
        warn!(path = %config.graph.path, "Knowledge graph is not connected");
    }
    Ok(context)
}

fn run(context: &MemoryContext, command: Command) -> Result<()> {
    match command {
        Command::ResetGraph { confirm } => {
            if !confirm {
                bail!("refusing to reset the knowledge graph without --confirm");
            }
            context.graph().reset()?;
            info!("Knowledge graph reset");
            print_json(&json!({ "status": "reset" }))
        }
        Command::IntegrityCheck => {
            let ok = context.graph().integrity_check()?;
            let status = if ok { "ok" } else { "corrupt" };
            print_json(&json!({ "graph": status }))?;
            if !ok {
                bail!("graph integrity check failed");
            }
            Ok(())
        }
        Command::RawQuery { statement, params } => {
            let params: Properties = params
                .into_iter()
                .map(|(key, value)| (key, Value::String(value)))
                .collect();
            let rows = context.graph().raw_query(&statement, &params)?;
            print_json(&json!({ "rows": rows }))
        }
        Command::Library { user } => {
            let library = context.catalog().list_for_user(&user);
            print_json(&json!({
                "universes": listing(library.universes)?,
                "characters": listing(library.characters)?,
                "adventures": listing(library.adventures)?,
            }))
        }
        Command::Neighbors {
            entity,
            universe,
            user,
            depth,
        } => {
            let edges = context
                .graph()
                .try_query_neighbors(&entity, &universe, &user, depth, None)
                .into_result("graph")?;
            print_json(&json!({ "edges": edges }))
        }
        Command::Search {
            query,
            user,
            universe,
            k,
        } => {
            let filter = match universe {
                Some(universe) => SearchFilter::tenant(user, universe),
                None => SearchFilter::user(user),
            };
            let hits = context.vector().try_search(&query, &filter, k).into_result("vector")?;
            let documents: Vec<Value> = hits
                .into_iter()
                .map(|hit| json!({ "text": hit.record.text, "similarity": hit.similarity }))
                .collect();
            print_json(&json!({ "documents": documents }))
        }
    }
}

/// A library sub-list as JSON, or an error object when it could not be read.
fn listing<T: serde::Serialize>(outcome: ReadOutcome<Vec<T>>) -> Result<Value> {
    Ok(match outcome {
        ReadOutcome::Ok(items) => serde_json::to_value(items)?,
        ReadOutcome::NotConnected => json!({ "error": "not connected" }),
        ReadOutcome::Failed(err) => json!({ "error": err.to_string() }),
    })
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn params_parse_as_key_value() {
        assert_eq!(parse_param("user=u1"), Ok(("user".into(), "u1".into())));
        assert_eq!(parse_param("q=a=b"), Ok(("q".into(), "a=b".into())));
        assert!(parse_param("novalue").is_err());
        assert!(parse_param("=x").is_err());
    }

    #[test]
    fn second_subscriber_install_is_reported_not_fatal() {
        let config = CronosConfig::in_memory();
        init_tracing(&config);
        init_tracing(&config);
    }

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn commands_run_against_in_memory_context() {
        let context = MemoryContext::init(&CronosConfig::in_memory()).expect("init");
        context
            .catalog()
            .upsert_universe(&cronos_core::Universe::new("w1", "u1", "Eldoria"))
            .expect("universe");

        run(&context, Command::Library { user: "u1".into() }).expect("library");
        run(&context, Command::IntegrityCheck).expect("check");
        assert!(run(&context, Command::ResetGraph { confirm: false }).is_err());
        run(&context, Command::ResetGraph { confirm: true }).expect("reset");
        assert!(context.catalog().get_universe("w1", "u1").is_err());
        assert!(
            run(
                &context,
                Command::RawQuery {
                    statement: "DELETE FROM nodes".into(),
                    params: Vec::new(),
                },
            )
            .is_err()
        );
    }
}
