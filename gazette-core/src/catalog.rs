//! The on-disk catalog source: a directory of news documents.
//!
//! A document file name starts with a numeric Unix timestamp and ends in
//! `.txt` (case-insensitive); dot-prefixed files are ignored. The first
//! line of a file is its title, the remaining lines are the body.

use std::collections::BTreeMap;
use std::fs;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

/// Error reading the news directory. Callers treat this as "no change
/// this cycle", never as fatal.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("failed to read news directory {dir}: {source}")]
    ReadDir {
        dir: String,
        source: std::io::Error,
    },
    #[error("failed to read document {path}: {source}")]
    ReadFile {
        path: String,
        source: std::io::Error,
    },
}

/// One document on disk.
#[derive(Debug, Clone)]
pub struct Document {
    pub timestamp: i64,
    pub path: PathBuf,
    pub filename: String,
}

/// List the document files in the news directory, sorted by timestamp.
/// Files with non-numeric stems or the wrong extension are skipped.
pub fn list_documents(dir: &Path) -> Result<Vec<Document>, CatalogError> {
    let entries = fs::read_dir(dir).map_err(|source| CatalogError::ReadDir {
        dir: dir.display().to_string(),
        source,
    })?;

    let mut documents = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        let filename = match path.file_name().and_then(|n| n.to_str()) {
            Some(name) => name.to_string(),
            None => continue,
        };
        if filename.starts_with('.') || !filename.to_ascii_lowercase().ends_with(".txt") {
            continue;
        }
        let stem = match filename.rfind('.') {
            Some(idx) => &filename[..idx],
            None => filename.as_str(),
        };
        let timestamp = match stem.parse::<i64>() {
            Ok(ts) => ts,
            Err(_) => continue,
        };
        documents.push(Document {
            timestamp,
            path,
            filename,
        });
    }
    documents.sort_by_key(|d| d.timestamp);
    Ok(documents)
}

/// Scan the directory into the catalog mapping, timestamp to filename.
pub fn scan(dir: &Path) -> Result<BTreeMap<i64, String>, CatalogError> {
    Ok(list_documents(dir)?
        .into_iter()
        .map(|d| (d.timestamp, d.filename))
        .collect())
}

/// Read a document's title (its first line). Empty file yields an empty
/// title.
pub fn read_title(path: &Path) -> Result<String, CatalogError> {
    let file = fs::File::open(path).map_err(|source| CatalogError::ReadFile {
        path: path.display().to_string(),
        source,
    })?;
    let mut reader = BufReader::new(file);
    let mut title = String::new();
    reader
        .read_line(&mut title)
        .map_err(|source| CatalogError::ReadFile {
            path: path.display().to_string(),
            source,
        })?;
    Ok(title.trim_end_matches(['\n', '\r']).to_string())
}

/// Read a document's full text (title line included), normalized to
/// `\n` line endings without a trailing newline.
pub fn read_document(path: &Path) -> Result<String, CatalogError> {
    let text = fs::read_to_string(path).map_err(|source| CatalogError::ReadFile {
        path: path.display().to_string(),
        source,
    })?;
    let lines: Vec<&str> = text.lines().collect();
    Ok(lines.join("\n"))
}

/// The `count` newest documents in timestamp order; 0 means all of them.
pub fn newest_documents(dir: &Path, count: usize) -> Result<Vec<Document>, CatalogError> {
    let documents = list_documents(dir)?;
    let skip = if count == 0 || count >= documents.len() {
        0
    } else {
        documents.len() - count
    };
    Ok(documents.into_iter().skip(skip).collect())
}
