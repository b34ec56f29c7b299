//! URL normalization and URL-to-filesystem mapping.

use std::path::{Path, PathBuf};

use url::Url;

use crate::errors::UrlError;

/// Normalizes a user-supplied target into a `.git/` base URL.
///
/// Prepends `http://` when no scheme is present and appends the
/// `/.git/` suffix when the input does not already end with it.
/// Idempotent: normalizing an already normalized URL is a no-op.
pub fn normalize_url(input: &str) -> Result<Url, UrlError> {
    let mut raw = if input.contains("://") {
        input.to_string()
    } else {
        format!("http://{input}")
    };

    if !raw.ends_with('/') {
        raw.push('/');
    }
    if !raw.ends_with("/.git/") {
        raw.push_str(".git/");
    }

    Url::parse(&raw).map_err(|source| UrlError::Parse {
        input: input.to_string(),
        source,
    })
}

/// Resolves a relative reference against a base URL.
///
/// Standard relative-reference semantics apply: a leading `/` replaces
/// the path and `..` segments pop, so joining `../site.css` against
/// `http://host/.git/` escapes the `.git` directory.
pub fn url_join(base: &Url, rel: &str) -> Result<Url, UrlError> {
    base.join(rel).map_err(|source| UrlError::Parse {
        input: rel.to_string(),
        source,
    })
}

/// Maps a URL onto `<output_dir>/<host>/<path>`.
///
/// The host carries no port, and the URL path is mirrored verbatim
/// below it, so the parent of a repository's `.git` directory can be
/// recovered from the local tree alone.
pub fn url_to_local_path(url: &Url, output_dir: &Path) -> Result<PathBuf, UrlError> {
    let host = url
        .host_str()
        .ok_or_else(|| UrlError::NoHost(url.clone()))?;
    Ok(output_dir
        .join(host)
        .join(url.path().trim_start_matches('/')))
}

/// Extracts the `type/subtype` pair from a `Content-Type` value,
/// dropping parameters and lowercasing. Returns `None` for anything
/// that is not exactly two slash-separated parts.
pub fn split_mime(content_type: &str) -> Option<String> {
    let mime = content_type.split(';').next()?.trim();
    let parts: Vec<&str> = mime.split('/').collect();
    match parts[..] {
        [kind, subtype] if !kind.is_empty() && !subtype.is_empty() => Some(format!(
            "{}/{}",
            kind.to_ascii_lowercase(),
            subtype.to_ascii_lowercase()
        )),
        _ => None,
    }
}
