use std::process::ExitCode;

use crawldex::cli::{Cli, Commands};
use crawldex::config::{self, Config, ARCHIVE_FILE_NAME};
use crawldex::crawler::Crawler;
use crawldex::documents::PgDocumentStore;
use crawldex::index::InvertedIndex;
use crawldex::indexer::Indexer;
use crawldex::logging;
use crawldex::network::HttpClient;
use crawldex::queue::RedisQueue;
use crawldex::warc::WarcWriter;
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse_args();

    if let Err(e) = logging::init_logging(config::log_dir()) {
        eprintln!("failed to initialize logging: {e}");
        return ExitCode::FAILURE;
    }

    let result = match cli.command {
        Commands::Crawl => run_crawler().await,
        Commands::Index => run_indexer().await,
    };

    // The worker loops are infinite; reaching here means startup failed.
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run_crawler() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::for_crawler()?;
    info!("crawler service starting");

    let queue = RedisQueue::connect(&config.redis_url).await?;
    info!("connected to queue service");

    let store = PgDocumentStore::connect_with_retry(&config.db_url).await?;
    store.ensure_schema().await?;
    info!("connected to metadata store");

    let warc_path = config.warc_path();
    let warc = WarcWriter::open(&warc_path)?;
    info!(path = %warc_path.display(), "archive open");

    let fetcher = HttpClient::new(config.user_agent.clone(), Config::FETCH_TIMEOUT_SECS)?;

    let crawler = Crawler::new(
        queue,
        store,
        fetcher,
        warc,
        ARCHIVE_FILE_NAME.to_string(),
        config.seed_url.clone(),
    );

    crawler.seed_if_empty().await?;
    let requeued = crawler.reconcile_unindexed().await?;
    if requeued > 0 {
        info!(requeued, "re-queued crawled documents that were never indexed");
    }

    crawler.run().await;
    Ok(())
}

async fn run_indexer() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::for_indexer()?;
    info!("indexer service starting");

    let queue = RedisQueue::connect(&config.redis_url).await?;
    info!("connected to queue service");

    let store = PgDocumentStore::connect_with_retry(&config.db_url).await?;
    store.ensure_schema().await?;
    info!("connected to metadata store");

    let index = InvertedIndex::open(&config.index_path)?;
    info!(path = %config.index_path.display(), "index store open");

    let indexer = Indexer::new(queue, store, index, config.warc_base_path.clone());
    indexer.run().await;
    Ok(())
}
