//! Sentence and word window chunking for embedding input.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    // sentence-ending punctuation run, then the whitespace that separates sentences
    static ref SENTENCE_END: Regex = Regex::new(r"[.!?]+\s+").expect("valid regex");
}

/// Split on sentence-ending punctuation followed by whitespace. Punctuation stays with its sentence.
pub fn split_sentences(text: &str) -> Vec<&str> {
    let text = text.trim();
    if text.is_empty() {
        return Vec::new();
    }
    let mut sentences = Vec::new();
    let mut last = 0;
    for mat in SENTENCE_END.find_iter(text) {
        let sentence = text[last..mat.end()].trim_end();
        if !sentence.is_empty() {
            sentences.push(sentence);
        }
        last = mat.end();
    }
    if last < text.len() {
        sentences.push(&text[last..]);
    }
    sentences
}

/// Windows of `max_chunk_size` sentences advancing by `max_chunk_size - overlap`.
///
/// A trailing window holding `overlap` sentences or fewer repeats only context the
/// previous window already emitted, so it is dropped.
pub fn chunk(text: &str, max_chunk_size: usize, overlap: usize) -> Vec<String> {
    let sentences = split_sentences(text);
    windows(&sentences, max_chunk_size, overlap).into_iter().map(|w| w.join(" ")).collect()
}

/// Same windowing as [`chunk`] over whitespace-separated words.
pub fn chunk_words(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    let words: Vec<&str> = text.split_whitespace().collect();
    windows(&words, chunk_size, overlap).into_iter().map(|w| w.join(" ")).collect()
}

fn windows<'a, T>(items: &'a [T], size: usize, overlap: usize) -> Vec<&'a [T]> {
    let size = size.max(1);
    let step = size.saturating_sub(overlap).max(1);
    let mut out = Vec::new();
    let mut start = 0;
    while start < items.len() {
        let window = &items[start..(start + size).min(items.len())];
        // the very first window is kept even when short
        if start > 0 && window.len() <= overlap {
            break;
        }
        out.push(window);
        start += step;
    }
    out
}
