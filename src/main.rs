mod cli;

use anyhow::bail;
use clap::Parser;
use trawl_core::bootstrap::resolve_config_path;
use trawl_core::{Config, Engine};
use trawl_index::format_as_context;

use crate::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config_path = resolve_config_path(cli.config.as_deref());
    let config = Config::load(&config_path)?;
    tracing::debug!(path = %config_path.display(), "config loaded");
    let engine = Engine::from_config(config)?;

    match cli.command {
        Commands::Index { repo, force } => {
            let result = engine.index_repository(&repo, force).await;
            println!("{}", serde_json::to_string_pretty(&result)?);
            if !result.success {
                bail!("indexing {repo} failed");
            }
        }
        Commands::Search {
            repo,
            query,
            top_k,
            threshold,
            path,
            context,
        } => {
            let hits = engine
                .search(&repo, &query, top_k, threshold, path.as_deref())
                .await?;
            if context {
                println!("{}", format_as_context(&hits));
            } else if hits.is_empty() {
                println!("no results");
            } else {
                for hit in &hits {
                    let file = hit.metadata.get("file_path").and_then(|v| v.as_str());
                    let start = hit.metadata.get("start_line").and_then(serde_json::Value::as_u64);
                    let end = hit.metadata.get("end_line").and_then(serde_json::Value::as_u64);
                    println!(
                        "{:.3}  {}:{}-{}",
                        hit.score,
                        file.unwrap_or("?"),
                        start.unwrap_or(0),
                        end.unwrap_or(0)
                    );
                }
            }
        }
        Commands::Status { repo } => {
            let (state, record) = engine.status(&repo);
            match record {
                Some(record) => println!(
                    "{repo}: {state} ({} files, {} chunks)",
                    record.file_count, record.chunk_count
                ),
                None => println!("{repo}: {state}"),
            }
        }
        Commands::Clear { repo } => {
            if engine.clear_index(&repo).await? {
                println!("{repo}: index cleared");
            } else {
                println!("{repo}: nothing to clear");
            }
        }
        Commands::Cleanup { repo: Some(repo) } => {
            if engine.remove_checkout(&repo).await? {
                println!("{repo}: checkout removed");
            } else {
                println!("{repo}: no checkout on disk");
            }
        }
        Commands::Cleanup { repo: None } => {
            let removed = engine.cleanup_expired().await;
            println!("removed {removed} expired checkout(s)");
        }
    }

    Ok(())
}
