use lazy_static::lazy_static;
use regex::Regex;
use rust_stemmers::{Algorithm, Stemmer};
use unicode_normalization::UnicodeNormalization;
use std::collections::HashSet;

lazy_static! {
    static ref PUNCT: Regex = Regex::new(r"[[:punct:]]").expect("valid regex");
    static ref STEMMER: Stemmer = Stemmer::create(Algorithm::English);
    static ref DEFAULT_STOPWORDS: Vec<&'static str> = vec![
        "a","about","above","after","again","against","all","am","an","and","any","are","aren't","as","at",
        "be","because","been","before","being","below","between","both","but","by",
        "can","can't","cannot","could","couldn't",
        "did","didn't","do","does","doesn't","doing","don't","down","during",
        "each","few","for","from","further",
        "had","hadn't","has","hasn't","have","haven't","having","he","he'd","he'll","he's","her","here","here's","hers","herself","him","himself","his","how","how's",
        "i","i'd","i'll","i'm","i've","if","in","into","is","isn't","it","it's","its","itself",
        "let's","me","more","most","mustn't","my","myself",
        "no","nor","not","of","off","on","once","only","or","other","ought","our","ours","ourselves","out","over","own",
        "same","she","she'd","she'll","she's","should","shouldn't","so","some","such",
        "than","that","that's","the","their","theirs","them","themselves","then","there","there's","these","they","they'd","they'll","they're","they've","this","those","through","to","too",
        "under","until","up","very",
        "was","wasn't","we","we'd","we'll","we're","we've","were","weren't","what","what's","when","when's","where","where's","which","while","who","who's","whom","why","why's","with","won't","would","wouldn't",
        "you","you'd","you'll","you're","you've","your","yours","yourself","yourselves"
    ];
}

/// Text normalizer shared by indexing and querying.
///
/// Pipeline: NFKC, lowercase, strip ASCII punctuation, split on whitespace,
/// drop stopwords, Porter (English Snowball) stemming. Stopwords are normalized
/// through the same punctuation stripping so "don't" filters "dont".
#[derive(Debug, Clone)]
pub struct Tokenizer {
    stopwords: HashSet<String>,
}

impl Default for Tokenizer {
    fn default() -> Self { Self::new(DEFAULT_STOPWORDS.iter().copied()) }
}

impl Tokenizer {
    pub fn new<I, S>(stopwords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let stopwords = stopwords
            .into_iter()
            .map(|w| strip_punctuation(&w.as_ref().trim().to_lowercase()))
            .filter(|w| !w.is_empty())
            .collect();
        Self { stopwords }
    }

    pub fn is_stopword(&self, token: &str) -> bool { self.stopwords.contains(token) }

    pub fn tokenize(&self, text: &str) -> Vec<String> {
        let normalized = strip_punctuation(&text.nfkc().collect::<String>().to_lowercase());
        normalized
            .split_whitespace()
            .filter(|token| !self.is_stopword(token))
            .map(|token| STEMMER.stem(token).into_owned())
            .collect()
    }
}

fn strip_punctuation(text: &str) -> String { PUNCT.replace_all(text, "").into_owned() }

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_tokenize() {
        let t = Tokenizer::default().tokenize("Running, runner's run!");
        assert_eq!(t[0], "run");
        assert_eq!(t.last().map(String::as_str), Some("run"));
    }

    #[test]
    fn possessive_collapses_to_stem() {
        let t = Tokenizer::default().tokenize("A cowboy doll is a boy's toy.");
        assert_eq!(t, vec!["cowboy", "doll", "boy", "toy"]);
    }

    #[test]
    fn custom_stopwords_replace_defaults() {
        let tok = Tokenizer::new(["toy"]);
        assert_eq!(tok.tokenize("the toy"), vec!["the"]);
    }

    #[test]
    fn empty_and_punctuation_only() {
        let tok = Tokenizer::default();
        assert!(tok.tokenize("").is_empty());
        assert!(tok.tokenize("?! ... --").is_empty());
    }
}
