use anyhow::Result;
use marquee_core::embedding::{EmbeddingProvider, HashingEmbedder};
use marquee_core::persist::CachePaths;
use marquee_core::{Document, HybridSearch, InvertedIndex, SearchConfig, SearchError, Tokenizer};
use std::sync::Arc;
use tempfile::tempdir;

fn two_docs() -> Vec<Document> {
    vec![
        Document::new(1, "Toy Story", "A cowboy doll is a boy's toy."),
        Document::new(2, "Shrek", "An ogre lives in a swamp."),
    ]
}

fn movies() -> Vec<Document> {
    vec![
        Document::new(101, "Toy Story", "A cowboy doll is a boy's toy. His toys come alive when nobody watches."),
        Document::new(205, "Shrek", "An ogre lives in a swamp. A talking donkey joins him on a quest."),
        Document::new(42, "Jaws", "A great white shark terrorizes a beach town. The police chief hunts the shark."),
        Document::new(7, "Finding Nemo", "A clownfish searches the ocean for his son. A forgetful fish helps him."),
        Document::new(88, "Cars", "A race car is stranded in a small desert town."),
    ]
}

fn engine(dir: &std::path::Path, docs: Vec<Document>) -> Result<HybridSearch> {
    let provider: Arc<dyn EmbeddingProvider> = Arc::new(HashingEmbedder::new(256));
    let config = SearchConfig { cache_dir: dir.to_path_buf(), ..SearchConfig::default() };
    Ok(HybridSearch::new(docs, Tokenizer::default(), provider, config)?)
}

#[test]
fn bm25_save_load_roundtrip() -> Result<()> {
    let dir = tempdir()?;
    let paths = CachePaths::new(dir.path());
    let mut built = InvertedIndex::new(Tokenizer::default());
    built.build(&two_docs());
    built.save(&paths)?;

    let loaded = InvertedIndex::load(&paths, Tokenizer::default())?;
    assert_eq!(loaded.postings, built.postings);
    assert_eq!(loaded.term_frequencies, built.term_frequencies);
    assert_eq!(loaded.doc_lengths, built.doc_lengths);
    assert_eq!(loaded.docs, built.docs);
    assert_eq!(loaded.search("doll", 1, 1.5, 0.75)[0].doc_id, 1);
    Ok(())
}

#[test]
fn load_without_save_is_cache_miss() {
    let dir = tempdir().unwrap();
    let err = InvertedIndex::load(&CachePaths::new(dir.path()), Tokenizer::default()).unwrap_err();
    assert!(matches!(err, SearchError::CacheMiss(_)));
}

#[test]
fn doll_query_ranks_toy_story_first() -> Result<()> {
    let dir = tempdir()?;
    let hs = engine(dir.path(), two_docs())?;
    let results = hs.bm25_search("doll", 2);
    assert_eq!(results[0].doc_id, 1);
    assert_eq!(results[0].title, "Toy Story");
    Ok(())
}

#[test]
fn fused_searches_over_sparse_ids() -> Result<()> {
    let dir = tempdir()?;
    let hs = engine(dir.path(), movies())?;

    let rrf = hs.rrf_search("shark beach", 60.0, 3)?;
    assert_eq!(rrf.len(), 3);
    assert_eq!(rrf[0].doc_id, 42);
    assert_eq!(rrf[0].bm25_rank, Some(1));
    assert!(rrf[0].sem_rank.is_some());
    assert!(rrf.windows(2).all(|w| w[0].rrf_score >= w[1].rrf_score));

    let weighted = hs.weighted_search("ogre donkey swamp", 0.5, 2)?;
    assert_eq!(weighted.len(), 2);
    assert_eq!(weighted[0].doc_id, 205);
    assert_eq!(weighted[0].title, "Shrek");
    assert!(weighted[0].hybrid_score <= 1.0);
    Ok(())
}

#[test]
fn alpha_one_matches_lexical_order() -> Result<()> {
    let dir = tempdir()?;
    let hs = engine(dir.path(), movies())?;
    let lexical: Vec<u32> = hs.bm25_search("fish ocean son", 2).iter().map(|r| r.doc_id).collect();
    let fused: Vec<u32> = hs.weighted_search("fish ocean son", 1.0, 2)?.iter().map(|r| r.doc_id).collect();
    assert_eq!(fused, lexical);
    Ok(())
}

#[test]
fn stale_bm25_cache_is_rebuilt() -> Result<()> {
    let dir = tempdir()?;
    engine(dir.path(), two_docs())?;
    let hs = engine(dir.path(), movies())?;
    assert_eq!(hs.index().num_docs(), 5);
    assert_eq!(hs.semantic().num_chunks(), 5);
    let reloaded = InvertedIndex::load(&CachePaths::new(dir.path()), Tokenizer::default())?;
    assert_eq!(reloaded.num_docs(), 5);
    Ok(())
}

#[test]
fn semantic_only_hits_carry_full_description() -> Result<()> {
    let dir = tempdir()?;
    let filler = "the ".repeat(40).trim_end().to_string();
    let docs = vec![
        Document::new(1, "Cars", "A race car is stranded in a small desert town."),
        Document::new(2, "Filler", filler.clone()),
        Document::new(3, "Dunes", "Another desert story about sand."),
    ];
    let provider: Arc<dyn EmbeddingProvider> = Arc::new(HashingEmbedder::new(256));
    let config = SearchConfig { cache_dir: dir.path().to_path_buf(), overfetch: 1, ..SearchConfig::default() };
    let hs = HybridSearch::new(docs, Tokenizer::default(), provider, config)?;

    let rrf = hs.rrf_search("desert the", 60.0, 2)?;
    let filler_hit = rrf.iter().find(|r| r.doc_id == 2).expect("filler fused in");
    assert!(filler_hit.bm25_rank.is_none());
    assert_eq!(filler_hit.description, filler);

    let weighted = hs.weighted_search("desert the", 0.5, 2)?;
    let filler_hit = weighted.iter().find(|r| r.doc_id == 2).expect("filler fused in");
    assert_eq!(filler_hit.description, filler);
    Ok(())
}
