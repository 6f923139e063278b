use clap::{Parser, Subcommand};

/// crawldex cli
#[derive(Parser)]
#[command(name = "crawldex")]
#[command(about = "Web crawling and indexing pipeline workers")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the crawler worker: fetch URLs from the crawl queue and archive them
    Crawl,

    /// Run the indexer worker: read archived documents and build the inverted index
    Index,
}

impl Cli {
    /// parse args
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
