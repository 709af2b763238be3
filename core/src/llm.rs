//! Language-model collaborator and query enhancement.

use crate::embedding::blocking_client;
use crate::{Result, SearchError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const GEMINI_MODEL: &str = "gemini-2.5-flash";
const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Text in, text out. Implementations block until the completion is available.
pub trait LanguageModel: Send + Sync {
    fn complete(&self, prompt: &str) -> Result<String>;
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    contents: [Content<'a>; 1],
}

#[derive(Serialize)]
struct Content<'a> {
    parts: [Part<'a>; 1],
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

/// Gemini `generateContent` over REST.
pub struct GeminiClient {
    client: reqwest::blocking::Client,
    base_url: String,
    model: String,
    api_key: String,
}

impl GeminiClient {
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        Self::with_model(api_key, GEMINI_MODEL)
    }

    pub fn with_model(api_key: impl Into<String>, model: impl Into<String>) -> Result<Self> {
        let client = blocking_client()?;
        Ok(Self { client, base_url: GEMINI_BASE_URL.to_string(), model: model.into(), api_key: api_key.into() })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

impl LanguageModel for GeminiClient {
    fn complete(&self, prompt: &str) -> Result<String> {
        let url = format!("{}/models/{}:generateContent", self.base_url.trim_end_matches('/'), self.model);
        let body = GenerateRequest { contents: [Content { parts: [Part { text: prompt }] }] };
        let resp: GenerateResponse = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()?
            .error_for_status()?
            .json()?;
        let text: String = resp
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .ok_or_else(|| SearchError::Provider("model returned no candidates".into()))?;
        Ok(text)
    }
}

const SPELL_PROMPT: &str = "Fix any spelling errors in this movie search query.

Only correct obvious typos. Don't change correctly spelled words.

Query: \"{query}\"

If no errors, return the original query.
Corrected:";

const REWRITE_PROMPT: &str = "Rewrite this movie search query to be more specific and searchable.

Original: \"{query}\"

Consider:
- Common movie knowledge (famous actors, popular films)
- Genre conventions (horror = scary, animation = cartoon)
- Keep it concise (under 10 words)
- It should be a search query, not a full sentence

Rewritten query:";

const EXPAND_PROMPT: &str = "Expand this movie search query with related terms.

Add synonyms and related concepts that might appear in movie descriptions.
Keep expansions relevant and focused.
This will be appended to the original query.

Query: \"{query}\"

Return only the additional terms, space separated:";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryEnhancement {
    Spell,
    Rewrite,
    Expand,
}

impl QueryEnhancement {
    fn prompt(self, query: &str) -> String {
        let template = match self {
            QueryEnhancement::Spell => SPELL_PROMPT,
            QueryEnhancement::Rewrite => REWRITE_PROMPT,
            QueryEnhancement::Expand => EXPAND_PROMPT,
        };
        template.replace("{query}", query)
    }
}

impl fmt::Display for QueryEnhancement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            QueryEnhancement::Spell => "spell",
            QueryEnhancement::Rewrite => "rewrite",
            QueryEnhancement::Expand => "expand",
        };
        f.write_str(name)
    }
}

impl FromStr for QueryEnhancement {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "spell" => Ok(QueryEnhancement::Spell),
            "rewrite" => Ok(QueryEnhancement::Rewrite),
            "expand" => Ok(QueryEnhancement::Expand),
            other => Err(format!("unknown enhancement {other:?}")),
        }
    }
}

/// Rewrite `query` through the model. Expansion appends the returned terms to the query.
pub fn enhance_query(llm: &dyn LanguageModel, mode: QueryEnhancement, query: &str) -> Result<String> {
    let answer = clean_answer(&llm.complete(&mode.prompt(query))?);
    let enhanced = match mode {
        QueryEnhancement::Expand if !answer.is_empty() => format!("{query} {answer}"),
        _ if answer.is_empty() => query.to_string(),
        _ => answer,
    };
    tracing::info!(original = query, enhanced = %enhanced, mode = %mode, "enhanced query");
    Ok(enhanced)
}

fn clean_answer(raw: &str) -> String { raw.trim().trim_matches('"').trim().to_string() }

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Replays canned answers in order and records every prompt.
    pub struct ScriptedModel {
        answers: Mutex<Vec<String>>,
        pub prompts: Mutex<Vec<String>>,
    }

    impl ScriptedModel {
        pub fn new<I: IntoIterator<Item = S>, S: Into<String>>(answers: I) -> Self {
            let mut answers: Vec<String> = answers.into_iter().map(Into::into).collect();
            answers.reverse();
            Self { answers: Mutex::new(answers), prompts: Mutex::new(Vec::new()) }
        }
    }

    impl LanguageModel for ScriptedModel {
        fn complete(&self, prompt: &str) -> Result<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.answers.lock().unwrap().pop().ok_or_else(|| SearchError::Provider("script exhausted".into()))
        }
    }
}
