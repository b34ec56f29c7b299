//! Recursive discovery crawler.
//!
//! Tasks flow through an unbounded channel into a dispatcher that
//! gates actual execution with a counting semaphore, so fan-out is
//! never blocked by a full worker pool while effective parallelism
//! stays capped. Each queued task carries a clone of the channel
//! sender; once the last task exits, `recv` observes the closed
//! channel and the crawl is complete.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use dashmap::DashSet;
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::cli::Config;
use crate::errors::ParseError;
use crate::git_index;
use crate::git_parsing;
use crate::http_client::HttpClient;
use crate::urls;

/// Well-known files probed under every `.git/` base.
const COMMON_GIT_FILES: &[&str] = &[
    ".", // probe for a directory listing
    "COMMIT_EDITMSG",
    "config",
    "description",
    "FETCH_HEAD",
    "HEAD",
    "index",
    "info/exclude",
    "info/refs",
    "logs/HEAD",
    "objects/info/packs",
    "ORIG_HEAD",
    "packed-refs",
    "refs/remotes/origin/HEAD",
];

/// Index-entry extensions that the server would execute rather than
/// serve back, so fetching them is pointless.
const NON_DOWNLOADABLE_EXTENSIONS: &[&str] = &[".php", ".php4", ".php5"];

/// Shared state for one crawl run.
pub struct CrawlState {
    pub client: HttpClient,
    /// URLs that have been claimed by a task; insertion is the
    /// authoritative dedup for the whole run.
    pub seen: DashSet<String>,
    pub semaphore: Arc<Semaphore>,
    /// Non-Git file URLs discovered in index entries, fetched in a
    /// separate pass after the crawl settles.
    pub download_urls: Mutex<Vec<Url>>,
    pub output_dir: PathBuf,
    pub force_fetch: bool,
}

impl CrawlState {
    pub fn new(client: HttpClient, config: &Config) -> Self {
        Self {
            client,
            seen: DashSet::new(),
            semaphore: Arc::new(Semaphore::new(config.workers_num)),
            download_urls: Mutex::new(Vec::new()),
            output_dir: config.output_dir.clone(),
            force_fetch: config.force_fetch,
        }
    }
}

struct CrawlTask {
    target: Url,
    base: Url,
    tx: UnboundedSender<CrawlTask>,
}

/// Seeds the well-known file list for every base URL and drives the
/// crawl to completion.
pub async fn run(state: Arc<CrawlState>, bases: Vec<Url>) -> Result<()> {
    let (tx, mut rx) = mpsc::unbounded_channel::<CrawlTask>();

    for base in &bases {
        for file in COMMON_GIT_FILES {
            match urls::url_join(base, file) {
                Ok(target) => {
                    let _ = tx.send(CrawlTask {
                        target,
                        base: base.clone(),
                        tx: tx.clone(),
                    });
                }
                Err(error) => {
                    error!("Failed to build target URL for {base} and {file}: {error}");
                }
            }
        }
    }
    // Every queued task owns a sender clone, so dropping ours makes
    // `recv` return `None` exactly when the last task has exited.
    drop(tx);

    while let Some(task) = rx.recv().await {
        // Cheap cull; the atomic insert at task entry is authoritative.
        if state.seen.contains(task.target.as_str()) {
            continue;
        }
        let permit = state.semaphore.clone().acquire_owned().await?;
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            process_git_url(&state, task).await;
            drop(permit);
        });
    }

    Ok(())
}

async fn process_git_url(state: &CrawlState, task: CrawlTask) {
    let CrawlTask { target, base, tx } = task;

    if !state.seen.insert(target.to_string()) {
        warn!("URL already seen: {target}");
        return;
    }

    let file_name = match urls::url_to_local_path(&target, &state.output_dir) {
        Ok(path) => path,
        Err(error) => {
            error!("Failed to convert URL to save path: {error}");
            return;
        }
    };

    let mut need_fetch = true;
    if !state.force_fetch && file_name.exists() {
        debug!("File {} already exists, skipping fetch", file_name.display());
        need_fetch = false;
    }

    if need_fetch {
        let response = match state.client.fetch(&target).await {
            Ok(response) => response,
            Err(error) => {
                error!("Failed to fetch URL {target}: {error}");
                return;
            }
        };

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let Some(mime) = urls::split_mime(&content_type) else {
            error!("Invalid Content-Type for {target}: {content_type:?}");
            return;
        };
        debug!("MIME Type for {target}: {mime}");

        if mime == "text/html" {
            handle_html_content(state, response, &target, &base, &tx).await;
            return;
        }

        if let Err(error) = state.client.save_response(response, &file_name).await {
            error!("Failed to save response {}: {error}", file_name.display());
            return;
        }
        debug!("Saved {}", file_name.display());
    }

    let (git_paths, additional_urls) = match extract_paths(&file_name, &base) {
        Ok(extracted) => extracted,
        Err(error) => {
            error!(
                "Error extracting URLs from file {}: {error}",
                file_name.display()
            );
            let _ = std::fs::remove_file(&file_name);
            return;
        }
    };

    for path in git_paths {
        let new_url = match urls::url_join(&base, &path) {
            Ok(new_url) => new_url,
            Err(error) => {
                error!("Failed to join URL {base} with path {path}: {error}");
                continue;
            }
        };
        if state.seen.contains(new_url.as_str()) {
            continue;
        }
        let _ = tx.send(CrawlTask {
            target: new_url,
            base: base.clone(),
            tx: tx.clone(),
        });
    }

    if !additional_urls.is_empty() {
        state.download_urls.lock().unwrap().extend(additional_urls);
    }
}

/// Follows the links of a server-generated directory listing.
///
/// Listing links resolve against the listing URL itself, unlike Git
/// paths, which always resolve against the repository base.
async fn handle_html_content(
    state: &CrawlState,
    response: reqwest::Response,
    target: &Url,
    base: &Url,
    tx: &UnboundedSender<CrawlTask>,
) {
    let body = match response.text().await {
        Ok(body) => body,
        Err(error) => {
            error!("Failed to read response {target}: {error}");
            return;
        }
    };

    if !body.contains("Index of /") && !body.contains("Directory listing for /") {
        warn!("Skip URL: {target}");
        return;
    }

    info!("Found directory listing: {target}");
    for link in git_parsing::extract_links(&body) {
        if link.contains('?') {
            continue;
        }
        let new_url = match urls::url_join(target, &link) {
            Ok(new_url) => new_url,
            Err(error) => {
                error!("Failed to join URL {target} with path {link}: {error}");
                continue;
            }
        };
        if state.seen.contains(new_url.as_str()) {
            continue;
        }
        let _ = tx.send(CrawlTask {
            target: new_url,
            base: base.clone(),
            tx: tx.clone(),
        });
    }
}

/// Turns a saved file into Git-relative paths to crawl next and, for
/// index entries, working-tree file URLs for the post-crawl pass.
fn extract_paths(file_name: &Path, base: &Url) -> Result<(Vec<String>, Vec<Url>), ParseError> {
    let mut additional_urls = Vec::new();

    let git_paths = if file_name.to_string_lossy().ends_with("/index") {
        let index = git_index::parse_index_file(file_name)?;
        let mut git_paths = Vec::with_capacity(index.entries.len());
        for entry in &index.entries {
            git_paths.push(git_parsing::sha1_to_path(&entry.sha1));
            if !is_downloadable(&entry.file_name) {
                continue;
            }
            let relative = format!("../{}", entry.file_name.trim_start_matches('/'));
            match urls::url_join(base, &relative) {
                Ok(download_url) => additional_urls.push(download_url),
                Err(error) => error!("Error joining URL: {error}"),
            }
        }
        git_paths
    } else {
        git_parsing::hashes_and_refs(file_name)?
    };

    Ok((git_paths, additional_urls))
}

/// Fetches the working-tree file URLs collected during the crawl.
/// Flat fan-out over the same semaphore; no recursion here.
pub async fn download_files(state: &Arc<CrawlState>) -> Result<()> {
    let download_urls: Vec<Url> = std::mem::take(&mut *state.download_urls.lock().unwrap());

    let mut tasks = JoinSet::new();
    for download_url in download_urls {
        if !state.seen.insert(download_url.to_string()) {
            continue;
        }
        let file_name = match urls::url_to_local_path(&download_url, &state.output_dir) {
            Ok(path) => path,
            Err(error) => {
                error!("Failed to convert URL to save path: {error}");
                continue;
            }
        };
        let permit = state.semaphore.clone().acquire_owned().await?;
        let state = Arc::clone(state);
        tasks.spawn(async move {
            match state.client.fetch_file(&download_url, &file_name).await {
                Ok(()) => info!("Downloaded file {}", file_name.display()),
                Err(error) => error!("Failed to fetch file {download_url}: {error}"),
            }
            drop(permit);
        });
    }
    while tasks.join_next().await.is_some() {}

    Ok(())
}

fn is_downloadable(file_name: &str) -> bool {
    !NON_DOWNLOADABLE_EXTENSIONS
        .iter()
        .any(|extension| file_name.ends_with(extension))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_side_sources_are_not_downloadable() {
        assert!(!is_downloadable("admin/login.php"));
        assert!(!is_downloadable("legacy.php4"));
        assert!(!is_downloadable("legacy.php5"));
        assert!(is_downloadable("src/a.txt"));
        assert!(is_downloadable("php_guide.md"));
    }

    #[test]
    fn every_base_probes_the_listing_first() {
        assert_eq!(COMMON_GIT_FILES[0], ".");
        assert_eq!(COMMON_GIT_FILES.len(), 14);
    }
}
