//! Loading the document collection and stopword list.

use crate::{Document, Result};
use serde::Deserialize;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

#[derive(Deserialize)]
#[serde(untagged)]
enum Collection {
    Wrapped { movies: Vec<Document> },
    Bare(Vec<Document>),
}

/// Reads `{"movies": [...]}` or a bare JSON array, preserving file order.
pub fn load_documents<P: AsRef<Path>>(path: P) -> Result<Vec<Document>> {
    let reader = BufReader::new(File::open(path.as_ref())?);
    let docs = match serde_json::from_reader(reader)? {
        Collection::Wrapped { movies } => movies,
        Collection::Bare(docs) => docs,
    };
    tracing::info!(path = %path.as_ref().display(), num_docs = docs.len(), "loaded documents");
    Ok(docs)
}

/// One stopword per line; blank lines ignored.
pub fn load_stopwords<P: AsRef<Path>>(path: P) -> Result<Vec<String>> {
    let reader = BufReader::new(File::open(path)?);
    let mut words = Vec::new();
    for line in reader.lines() {
        let line = line?;
        let word = line.trim();
        if !word.is_empty() {
            words.push(word.to_lowercase());
        }
    }
    Ok(words)
}
