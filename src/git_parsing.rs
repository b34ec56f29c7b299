//! Loose-object decoding and reference extraction.
//!
//! Downloaded files are scanned for anything that can seed further
//! fetches: 40-hex object hashes, `pack-<sha>` names and `refs/...`
//! paths. Loose object files are zlib-inflated first; tree objects
//! additionally have their binary entries decoded, since the hashes
//! they carry are raw bytes the text scan cannot see.

use std::path::Path;

use lazy_static::lazy_static;
use regex::bytes::Regex as BytesRegex;
use regex::Regex;

use crate::errors::ParseError;

lazy_static! {
    static ref OBJECT_PATH_RE: Regex = Regex::new(r"/objects/[0-9a-f]{2}/[0-9a-f]{38}$").unwrap();
    static ref HASH_RE: BytesRegex = BytesRegex::new(r"\b(?:pack-)?[0-9a-f]{40}\b").unwrap();
    static ref REFS_RE: BytesRegex = BytesRegex::new(r"\brefs(?:/[a-z0-9_.-]+)+").unwrap();
    static ref HTML_RE: BytesRegex = BytesRegex::new(r"(?i)<html").unwrap();
    static ref LINK_RE: Regex = Regex::new(r#"<a href="([^"]+)"#).unwrap();
}

const NULL_SHA1: &str = "0000000000000000000000000000000000000000";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Blob,
    Tree,
    Commit,
    Tag,
}

/// Maps a hex SHA-1 to its loose-object path, `objects/<2>/<38>`.
pub fn sha1_to_path(sha1: &str) -> String {
    format!("objects/{}/{}", &sha1[..2], &sha1[2..])
}

/// Reads a downloaded file and returns every Git-relative path it
/// references.
///
/// Loose objects are inflated first; blobs are skipped entirely since
/// their payload references nothing worth crawling. A buffer that
/// looks like an HTML page fails with [`ParseError::HtmlContent`] so
/// the caller can delete the masquerading file.
pub fn hashes_and_refs(path: &Path) -> Result<Vec<String>, ParseError> {
    let mut data = std::fs::read(path)?;
    let mut tree_paths = Vec::new();

    if is_object_path(path) {
        data = inflate_object(&data)?;
        let (kind, _size, payload) = parse_object_header(&data)?;
        match kind {
            ObjectKind::Blob => return Ok(Vec::new()),
            ObjectKind::Tree => tree_paths = tree_entry_paths(&data[payload..]),
            ObjectKind::Commit | ObjectKind::Tag => {}
        }
    }

    if HTML_RE.is_match(&data) {
        return Err(ParseError::HtmlContent);
    }

    let mut paths = extract_objects_and_refs(&data);
    paths.extend(tree_paths);
    Ok(paths)
}

/// Collects object and ref paths from an arbitrary byte buffer.
///
/// Hashes come first, in buffer order: `pack-` tokens expand to their
/// `.pack` and `.idx` pair, the all-zero SHA is dropped, and anything
/// else becomes a loose-object path. Ref paths follow verbatim.
pub fn extract_objects_and_refs(data: &[u8]) -> Vec<String> {
    let mut paths = Vec::new();

    for found in HASH_RE.find_iter(data) {
        let Ok(token) = std::str::from_utf8(found.as_bytes()) else {
            continue;
        };
        if token.starts_with("pack-") {
            for extension in ["pack", "idx"] {
                paths.push(format!("objects/pack/{token}.{extension}"));
            }
        } else if token != NULL_SHA1 {
            paths.push(sha1_to_path(token));
        }
    }

    for found in REFS_RE.find_iter(data) {
        if let Ok(reference) = std::str::from_utf8(found.as_bytes()) {
            paths.push(reference.to_string());
        }
    }

    paths
}

/// Extracts every `<a href="...">` value from a directory listing.
pub fn extract_links(html: &str) -> Vec<String> {
    LINK_RE
        .captures_iter(html)
        .map(|captures| captures[1].to_string())
        .collect()
}

fn is_object_path(path: &Path) -> bool {
    OBJECT_PATH_RE.is_match(&path.to_string_lossy().replace('\\', "/"))
}

fn inflate_object(data: &[u8]) -> Result<Vec<u8>, ParseError> {
    miniz_oxide::inflate::decompress_to_vec_zlib(data)
        .map_err(|error| ParseError::Zlib(error.to_string()))
}

/// Parses the `<type> <size>\0` header of an inflated loose object.
/// Returns the kind, the declared size and the payload offset.
fn parse_object_header(data: &[u8]) -> Result<(ObjectKind, usize, usize), ParseError> {
    let space = data
        .iter()
        .position(|&byte| byte == b' ')
        .ok_or(ParseError::BadObjectHeader)?;
    let kind = match &data[..space] {
        b"blob" => ObjectKind::Blob,
        b"tree" => ObjectKind::Tree,
        b"commit" => ObjectKind::Commit,
        b"tag" => ObjectKind::Tag,
        _ => return Err(ParseError::BadObjectHeader),
    };

    let digits_end = data[space + 1..]
        .iter()
        .position(|&byte| byte == 0)
        .ok_or(ParseError::BadObjectHeader)?;
    let digits = std::str::from_utf8(&data[space + 1..space + 1 + digits_end])
        .map_err(|_| ParseError::BadObjectHeader)?;
    let size: usize = digits.parse()?;

    Ok((kind, size, space + 1 + digits_end + 1))
}

/// Decodes the `<mode> <name>\0<20-byte sha>` records of a tree
/// payload into loose-object paths.
fn tree_entry_paths(mut payload: &[u8]) -> Vec<String> {
    let mut paths = Vec::new();
    while let Some(nul) = payload.iter().position(|&byte| byte == 0) {
        if payload.len() < nul + 1 + 20 {
            break;
        }
        let sha1 = hex::encode(&payload[nul + 1..nul + 21]);
        if sha1 != NULL_SHA1 {
            paths.push(sha1_to_path(&sha1));
        }
        payload = &payload[nul + 21..];
    }
    paths
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn zlib(data: &[u8]) -> Vec<u8> {
        miniz_oxide::deflate::compress_to_vec_zlib(data, 6)
    }

    fn object_bytes(kind: &str, payload: &[u8]) -> Vec<u8> {
        let mut raw = format!("{kind} {}\0", payload.len()).into_bytes();
        raw.extend_from_slice(payload);
        zlib(&raw)
    }

    fn write_object(dir: &Path, sha1: &str, bytes: &[u8]) -> std::path::PathBuf {
        let path = dir.join("objects").join(&sha1[..2]).join(&sha1[2..]);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::File::create(&path)
            .unwrap()
            .write_all(bytes)
            .unwrap();
        path
    }

    const SHA_A: &str = "aabbccddeeff00112233445566778899aabbccdd";
    const SHA_B: &str = "1234567890123456789012345678901234567890";

    #[test]
    fn sha1_path_round_trips() {
        let path = sha1_to_path(SHA_A);
        assert_eq!(path, format!("objects/aa/{}", &SHA_A[2..]));
        let rebuilt = format!("{}{}", &path[8..10], &path[11..]);
        assert_eq!(rebuilt, SHA_A);
    }

    #[test]
    fn extracts_hashes_then_refs_in_order() {
        let data = format!("{SHA_A} refs/heads/main\nsome noise {SHA_B}\n");
        let paths = extract_objects_and_refs(data.as_bytes());
        assert_eq!(
            paths,
            vec![
                sha1_to_path(SHA_A),
                sha1_to_path(SHA_B),
                "refs/heads/main".to_string(),
            ]
        );
    }

    #[test]
    fn skips_all_zero_sha() {
        let data = format!("0000000000000000000000000000000000000000 {SHA_A}");
        let paths = extract_objects_and_refs(data.as_bytes());
        assert_eq!(paths, vec![sha1_to_path(SHA_A)]);
    }

    #[test]
    fn pack_token_expands_to_pack_and_idx() {
        let data = format!("P pack-{SHA_A}.pack");
        let paths = extract_objects_and_refs(data.as_bytes());
        assert_eq!(
            paths,
            vec![
                format!("objects/pack/pack-{SHA_A}.pack"),
                format!("objects/pack/pack-{SHA_A}.idx"),
            ]
        );
    }

    #[test]
    fn ignores_hex_shorter_than_forty_chars() {
        let paths = extract_objects_and_refs(b"deadbeef deadbeefdeadbeef");
        assert!(paths.is_empty());
    }

    #[test]
    fn extracts_remote_refs() {
        let paths = extract_objects_and_refs(b"ref: refs/remotes/origin/main");
        assert_eq!(paths, vec!["refs/remotes/origin/main".to_string()]);
    }

    #[test]
    fn plain_file_with_html_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("HEAD");
        std::fs::write(&path, b"<HTML><body>not found</body>").unwrap();
        assert!(matches!(
            hashes_and_refs(&path),
            Err(ParseError::HtmlContent)
        ));
    }

    #[test]
    fn blob_objects_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        // A blob whose payload mentions a hash; it must not be crawled.
        let body = object_bytes("blob", format!("see {SHA_B}").as_bytes());
        let path = write_object(dir.path(), SHA_A, &body);
        assert!(hashes_and_refs(&path).unwrap().is_empty());
    }

    #[test]
    fn commit_objects_yield_tree_and_parent() {
        let dir = tempfile::tempdir().unwrap();
        let payload = format!("tree {SHA_B}\nparent {SHA_A}\n\nmessage\n");
        let body = object_bytes("commit", payload.as_bytes());
        let path = write_object(dir.path(), SHA_A, &body);
        let paths = hashes_and_refs(&path).unwrap();
        assert_eq!(paths, vec![sha1_to_path(SHA_B), sha1_to_path(SHA_A)]);
    }

    #[test]
    fn tree_objects_yield_binary_entry_hashes() {
        let dir = tempfile::tempdir().unwrap();
        let mut payload = Vec::new();
        payload.extend_from_slice(b"100644 a.txt\0");
        payload.extend_from_slice(&hex::decode(SHA_A).unwrap());
        payload.extend_from_slice(b"40000 src\0");
        payload.extend_from_slice(&hex::decode(SHA_B).unwrap());
        let body = object_bytes("tree", &payload);
        let path = write_object(dir.path(), SHA_B, &body);
        let paths = hashes_and_refs(&path).unwrap();
        assert_eq!(paths, vec![sha1_to_path(SHA_A), sha1_to_path(SHA_B)]);
    }

    #[test]
    fn corrupt_object_fails_to_inflate() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_object(dir.path(), SHA_A, b"not zlib at all");
        assert!(matches!(hashes_and_refs(&path), Err(ParseError::Zlib(_))));
    }

    #[test]
    fn unknown_object_type_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let body = zlib(b"weird 3\0abc");
        let path = write_object(dir.path(), SHA_A, &body);
        assert!(matches!(
            hashes_and_refs(&path),
            Err(ParseError::BadObjectHeader)
        ));
    }

    #[test]
    fn extracts_listing_links() {
        let html = r#"<html><a href="config">config</a> <a href="?C=M;O=A">sort</a></html>"#;
        assert_eq!(extract_links(html), vec!["config", "?C=M;O=A"]);
    }
}
