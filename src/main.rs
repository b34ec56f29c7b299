use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use git_dump::cli::{self, Config};
use git_dump::crawler::{self, CrawlState};
use git_dump::http_client::HttpClient;
use git_dump::{restore, urls};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();

    if !config.no_banner {
        cli::print_banner();
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(cli::level_filter(&config.log_level)))
        .with_writer(std::io::stderr)
        .init();

    let url_list =
        cli::read_lines(&config.input_file).context("Failed to read URLs from file")?;

    let client = HttpClient::new(&config)?;
    let state = Arc::new(CrawlState::new(client, &config));

    info!("Starting to download Git files...");

    let mut bases = Vec::new();
    let mut repos = Vec::new();
    for raw_url in &url_list {
        let base = match urls::normalize_url(raw_url) {
            Ok(base) => base,
            Err(err) => {
                error!("Failed to normalize URL {raw_url}: {err}");
                continue;
            }
        };
        match urls::url_to_local_path(&base, &config.output_dir) {
            Ok(repo_path) => {
                repos.push(repo_path);
                bases.push(base);
            }
            Err(err) => {
                error!("Failed to convert URL {base} to local repo path: {err}");
            }
        }
    }

    crawler::run(Arc::clone(&state), bases).await?;

    info!("Finished downloading Git files. Restoring repositories...");
    restore::restore_repositories(&repos).await;

    info!("Finished restoring repositories. Downloading found files...");
    crawler::download_files(&state).await?;

    info!("🎉 Finished!");
    Ok(())
}
