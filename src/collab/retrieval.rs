//! Knowledge-retrieval collaborator: doctrine snippets for turn briefs
//!
//! Retrieval is the slowest, least reliable dependency in the pipeline.
//! Empty results on timeout are valid, never an error surfaced to the turn.

use crate::core::error::{EngineError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

/// One ranked snippet of retrieved doctrine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DoctrineSnippet {
    pub text: String,
    pub source_id: String,
}

#[async_trait]
pub trait DoctrineRetriever: Send + Sync {
    /// Retrieve up to `top_k` snippets ranked for `query`
    async fn retrieve(&self, query: &str, top_k: usize) -> Result<Vec<DoctrineSnippet>>;
}

/// HTTP retrieval service client
pub struct HttpRetriever {
    client: Client,
    endpoint: String,
}

impl HttpRetriever {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.into(),
        }
    }
}

#[derive(Serialize)]
struct RetrievalRequest<'a> {
    query: &'a str,
    top_k: usize,
}

#[derive(Deserialize)]
struct RetrievalResponse {
    results: Vec<DoctrineSnippet>,
}

#[async_trait]
impl DoctrineRetriever for HttpRetriever {
    async fn retrieve(&self, query: &str, top_k: usize) -> Result<Vec<DoctrineSnippet>> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&RetrievalRequest { query, top_k })
            .send()
            .await
            .map_err(|e| EngineError::Retrieval(e.to_string()))?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(EngineError::Retrieval(format!("API error: {}", error_text)));
        }

        let parsed: RetrievalResponse = response
            .json()
            .await
            .map_err(|e| EngineError::Retrieval(e.to_string()))?;
        Ok(parsed.results.into_iter().take(top_k).collect())
    }
}

/// In-memory retriever over a fixed corpus. Ranking is naive term overlap;
/// used by the runner demo and tests.
#[derive(Default)]
pub struct StaticRetriever {
    corpus: Vec<DoctrineSnippet>,
}

impl StaticRetriever {
    pub fn new(corpus: Vec<DoctrineSnippet>) -> Self {
        Self { corpus }
    }

    pub fn add(&mut self, text: impl Into<String>, source_id: impl Into<String>) {
        self.corpus.push(DoctrineSnippet {
            text: text.into(),
            source_id: source_id.into(),
        });
    }
}

#[async_trait]
impl DoctrineRetriever for StaticRetriever {
    async fn retrieve(&self, query: &str, top_k: usize) -> Result<Vec<DoctrineSnippet>> {
        let terms: Vec<String> = query
            .to_lowercase()
            .split_whitespace()
            .map(str::to_string)
            .collect();

        let mut scored: Vec<(usize, &DoctrineSnippet)> = self
            .corpus
            .iter()
            .map(|snippet| {
                let text = snippet.text.to_lowercase();
                let score = terms.iter().filter(|t| text.contains(t.as_str())).count();
                (score, snippet)
            })
            .filter(|(score, _)| *score > 0)
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0));

        Ok(scored.into_iter().take(top_k).map(|(_, s)| s.clone()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_retriever_ranks_by_overlap() {
        let mut retriever = StaticRetriever::default();
        retriever.add("hold the bridge against raiders", "doctrine-1");
        retriever.add("raiders favor night attacks on bridges", "doctrine-2");
        retriever.add("orchard pruning in spring", "doctrine-3");

        let results = retriever.retrieve("raiders bridge", 2).await.unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|s| s.source_id != "doctrine-3"));
    }

    #[tokio::test]
    async fn test_no_overlap_is_empty_not_error() {
        let mut retriever = StaticRetriever::default();
        retriever.add("hold the bridge", "doctrine-1");
        let results = retriever.retrieve("volcano", 3).await.unwrap();
        assert!(results.is_empty());
    }
}
