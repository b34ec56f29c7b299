//! Working-tree restoration over the reconstructed repositories.

use std::path::PathBuf;

use tokio::process::Command;
use tracing::{error, info};

/// Runs `git checkout .` in the parent of every reconstructed `.git`
/// directory. Failures are logged and the remaining repositories are
/// still processed.
pub async fn restore_repositories(repos: &[PathBuf]) {
    for repo_path in repos {
        let Some(parent_dir) = repo_path.parent() else {
            error!("Repository path {} has no parent", repo_path.display());
            continue;
        };

        match Command::new("git")
            .args(["checkout", "."])
            .current_dir(parent_dir)
            .output()
            .await
        {
            Ok(output) if output.status.success() => {
                info!("Restored repository in {}", parent_dir.display());
            }
            Ok(output) => {
                error!(
                    "Error restoring repository in {}: {}",
                    parent_dir.display(),
                    String::from_utf8_lossy(&output.stderr).trim()
                );
            }
            Err(error) => {
                error!(
                    "Error running git in {}: {error}",
                    parent_dir.display()
                );
            }
        }
    }
}
