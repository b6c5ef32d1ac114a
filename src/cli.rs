use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "trawl")]
#[command(about = "Index code repositories and search them semantically", long_about = None)]
pub struct Cli {
    #[arg(long, global = true, help = "Config file (default: $TRAWL_CONFIG or config/default.toml)")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Index a repository (GitHub URL or local path)")]
    Index {
        #[arg(help = "Repository reference")]
        repo: String,

        #[arg(long, help = "Re-index even if already indexed")]
        force: bool,
    },

    #[command(about = "Search an indexed repository")]
    Search {
        #[arg(help = "Repository reference")]
        repo: String,

        #[arg(help = "Natural-language query")]
        query: String,

        #[arg(short = 'k', long, help = "Maximum number of results (overrides config)")]
        top_k: Option<usize>,

        #[arg(short, long, allow_negative_numbers = true, help = "Minimum similarity score (overrides config)")]
        threshold: Option<f32>,

        #[arg(short, long, help = "Only search files whose path contains this fragment")]
        path: Option<String>,

        #[arg(long, help = "Print results as an XML context block")]
        context: bool,
    },

    #[command(about = "Show the index state of a repository")]
    Status {
        #[arg(help = "Repository reference")]
        repo: String,
    },

    #[command(about = "Remove a repository's chunks and index record")]
    Clear {
        #[arg(help = "Repository reference")]
        repo: String,
    },

    #[command(about = "Delete expired checkouts, or one repository's checkout")]
    Cleanup {
        #[arg(help = "Repository reference whose checkout to delete")]
        repo: Option<String>,
    },
}
