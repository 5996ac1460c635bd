use clap::{Parser, Subcommand};
use repo_crawler_worker::config::{self, Config};
use repo_crawler_worker::worker::{WorkMode, WorkerLoop};
use tracing::error;

#[derive(Parser)]
#[command(name = "repo-crawler-worker", about = "Per-worker block-processing engine for the repository crawler fleet")]
struct Cli {
    #[arg(long, env = "CONFIG_PATH", default_value = "config.toml")]
    config_path: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Repeatedly pull and process one explicit block URL.
    Crawl {
        #[arg(long)]
        block_url: String,
    },
    /// Repeatedly cycle through block URLs derived from the listed hoster API domains.
    CrawlHoster {
        #[arg(required = true)]
        domains: Vec<String>,
    },
    /// Repeatedly pull from the load-balanced endpoint for a hoster type.
    CrawlType {
        platform_type: String,
    },
    /// Clear the cooperative running flag so the next loop iteration stops.
    CrawlStop,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();

    if let Command::CrawlStop = cli.command {
        config::clear_running_flag();
        return;
    }

    let config = match Config::from_env(&cli.config_path) {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "configuration error");
            std::process::exit(2);
        }
    };

    let mode = match cli.command {
        Command::Crawl { block_url } => WorkMode::BlockUrl(block_url),
        Command::CrawlHoster { domains } => WorkMode::HosterDomains(domains),
        Command::CrawlType { platform_type } => WorkMode::HosterType(platform_type),
        Command::CrawlStop => unreachable!("handled above"),
    };

    let worker = WorkerLoop::new(&config, mode);
    if let Err(e) = worker.run().await {
        error!(error = %e, "worker loop exited with a fatal error");
        std::process::exit(1);
    }
}
