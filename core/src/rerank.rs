//! LLM reranking of fused results.

use crate::hybrid::{RrfResult, WeightedResult};
use crate::index::Bm25Result;
use crate::llm::LanguageModel;
use crate::{Result, SearchError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Anything with a title and description the model can judge.
pub trait Candidate {
    fn title(&self) -> &str;
    fn description(&self) -> &str;
}

macro_rules! impl_candidate {
    ($($ty:ty),*) => {$(
        impl Candidate for $ty {
            fn title(&self) -> &str { &self.title }
            fn description(&self) -> &str { &self.description }
        }
    )*};
}

impl_candidate!(RrfResult, WeightedResult, Bm25Result);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reranked<T> {
    #[serde(flatten)]
    pub result: T,
    /// Model relevance score (individual) or position in the model's ordering (batch).
    pub rerank_score: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RerankMethod {
    Individual,
    Batch,
}

impl fmt::Display for RerankMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RerankMethod::Individual => "individual",
            RerankMethod::Batch => "batch",
        })
    }
}

impl FromStr for RerankMethod {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "individual" => Ok(RerankMethod::Individual),
            "batch" => Ok(RerankMethod::Batch),
            other => Err(format!("unknown rerank method {other:?}")),
        }
    }
}

const INDIVIDUAL_PROMPT: &str = "Rate how well this movie matches the search query.

Query: \"{query}\"
Movie: {title} - {description}

Consider:
- Direct relevance to query
- User intent (what they're looking for)
- Content appropriateness

Rate 0-10 (10 = perfect match).
Give me ONLY the number in your response, no other text or explanation.

Score:";

const BATCH_PROMPT: &str = "Rank these movies by relevance to the search query.

Query: \"{query}\"

Movies:
{doc_list}

Return ONLY the ids in order of relevance (best match first). Return a valid JSON list, nothing else. For example:

[75, 12, 34, 2, 1]
";

pub fn rerank<T: Candidate>(
    llm: &dyn LanguageModel,
    method: RerankMethod,
    query: &str,
    results: Vec<T>,
) -> Result<Vec<Reranked<T>>> {
    match method {
        RerankMethod::Individual => individual_rerank(llm, query, results),
        RerankMethod::Batch => batch_rerank(llm, query, results),
    }
}

/// One prompt per result asking for a 0-10 score; sorted by score, ties keep input order.
/// Answers that are not a number score 0.
pub fn individual_rerank<T: Candidate>(llm: &dyn LanguageModel, query: &str, results: Vec<T>) -> Result<Vec<Reranked<T>>> {
    let mut out = Vec::with_capacity(results.len());
    for result in results {
        let prompt = INDIVIDUAL_PROMPT
            .replace("{query}", query)
            .replace("{title}", result.title())
            .replace("{description}", result.description());
        let answer = llm.complete(&prompt)?;
        let rerank_score = answer.trim().parse::<f64>().unwrap_or(0.0);
        tracing::debug!(title = result.title(), rerank_score, "individual rerank");
        out.push(Reranked { result, rerank_score });
    }
    out.sort_by(|a, b| b.rerank_score.total_cmp(&a.rerank_score));
    Ok(out)
}

/// A single prompt listing every result by index; the model answers with a JSON list of
/// indices. Results the model leaves out follow the ranked ones in input order.
pub fn batch_rerank<T: Candidate>(llm: &dyn LanguageModel, query: &str, results: Vec<T>) -> Result<Vec<Reranked<T>>> {
    let doc_list: String = results
        .iter()
        .enumerate()
        .map(|(idx, r)| format!("<movie id={idx}>{}\n{}\n</movie>\n", r.title(), r.description()))
        .collect();
    let prompt = BATCH_PROMPT.replace("{query}", query).replace("{doc_list}", &doc_list);
    let answer = llm.complete(&prompt)?;
    let order = parse_index_list(&answer)?;

    let n = results.len();
    let mut position = vec![usize::MAX; n];
    for (pos, idx) in order.into_iter().enumerate() {
        if idx < n && position[idx] == usize::MAX {
            position[idx] = pos;
        }
    }
    let mut out: Vec<(usize, Reranked<T>)> = results
        .into_iter()
        .enumerate()
        .map(|(idx, result)| {
            let rank = if position[idx] == usize::MAX { n + idx } else { position[idx] };
            (rank, Reranked { result, rerank_score: rank as f64 })
        })
        .collect();
    out.sort_by_key(|(rank, _)| *rank);
    Ok(out.into_iter().map(|(_, r)| r).collect())
}

/// Accepts a bare JSON list or one wrapped in a ```json fence.
fn parse_index_list(answer: &str) -> Result<Vec<usize>> {
    let trimmed = answer.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    let body = body.strip_suffix("```").unwrap_or(body).trim();
    serde_json::from_str(body).map_err(|e| SearchError::Provider(format!("unparseable rerank answer: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::ScriptedModel;

    fn results() -> Vec<Bm25Result> {
        ["Alpha", "Beta", "Gamma"]
            .iter()
            .enumerate()
            .map(|(i, t)| Bm25Result {
                doc_id: i as u32 + 1,
                title: t.to_string(),
                description: format!("{t} plot"),
                score: 1.0,
            })
            .collect()
    }

    fn titles<T: Candidate>(v: &[Reranked<T>]) -> Vec<&str> { v.iter().map(|r| r.result.title()).collect() }

    #[test]
    fn individual_sorts_by_model_score() {
        let llm = ScriptedModel::new(["3", "9", "not sure"]);
        let out = individual_rerank(&llm, "q", results()).unwrap();
        assert_eq!(titles(&out), vec!["Beta", "Alpha", "Gamma"]);
        assert_eq!(out[2].rerank_score, 0.0);
        assert!(llm.prompts.lock().unwrap()[1].contains("Movie: Beta - Beta plot"));
    }

    #[test]
    fn batch_orders_by_returned_indices() {
        let llm = ScriptedModel::new(["```json\n[2, 0]\n```"]);
        let out = batch_rerank(&llm, "q", results()).unwrap();
        assert_eq!(titles(&out), vec!["Gamma", "Alpha", "Beta"]);
        assert_eq!(out[0].rerank_score, 0.0);
        assert!(llm.prompts.lock().unwrap()[0].contains("<movie id=1>Beta\nBeta plot\n</movie>"));
    }

    #[test]
    fn batch_rejects_garbage() {
        let llm = ScriptedModel::new(["the best one is Alpha"]);
        assert!(matches!(batch_rerank(&llm, "q", results()), Err(SearchError::Provider(_))));
    }
}
