use async_trait::async_trait;

use axon_core::types::{Domain, Source};

use crate::error::Result;

/// One retrieval backend. Implementations return sources sorted by
/// descending score, at most `top_k` of them.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    /// Short name for logs and the fallback decision.
    fn name(&self) -> &'static str;

    async fn search(&self, query: &str, domain: Domain, top_k: usize) -> Result<Vec<Source>>;
}

/// Sort descending by score and truncate. Backends call this before
/// returning so the ordering invariant holds regardless of upstream.
pub fn finalise(mut sources: Vec<Source>, top_k: usize) -> Vec<Source> {
    sources.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    sources.truncate(top_k);
    sources
}

#[cfg(test)]
pub(crate) fn make_source(doc_id: &str, score: f32) -> Source {
    Source {
        doc_id: doc_id.to_string(),
        title: None,
        page: None,
        score,
        snippet: format!("snippet for {doc_id}"),
        article_label: None,
        article_path: None,
        source_type: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finalise_sorts_and_truncates() {
        let out = finalise(
            vec![make_source("a", 0.2), make_source("b", 0.9), make_source("c", 0.5)],
            2,
        );
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].doc_id, "b");
        assert_eq!(out[1].doc_id, "c");
    }
}
