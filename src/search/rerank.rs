//! LLM reranking
//!
//! When enabled and the candidate pool exceeds the requested limit, the
//! pool is shown to the chat model, which returns relevance scores as a
//! JSON array. Any failure degrades to the hybrid order.

use std::sync::Arc;

use serde::Deserialize;

use crate::llm::ChatModel;
use crate::types::ScoredChunk;

const RERANK_SYSTEM: &str = "\
You score search results for relevance to a query. Respond with a JSON array \
of objects {\"index\": <candidate index>, \"score\": <0.0 to 1.0>} covering \
the candidates worth returning, highest score = most relevant. Output only \
the JSON array.";

#[derive(Debug, Deserialize)]
struct RerankEntry {
    index: usize,
    score: f32,
}

/// Ask the chat model to score `candidates` against `query`.
///
/// Returns one rerank score per candidate (missing indices default to 0),
/// or `None` when the call or the parse fails so the caller can keep the
/// hybrid order.
pub async fn rerank_candidates(
    chat: &Arc<dyn ChatModel>,
    query: &str,
    candidates: &[ScoredChunk],
) -> Option<Vec<f32>> {
    if candidates.is_empty() {
        return Some(vec![]);
    }

    let mut prompt = format!("Query: {}\n\nCandidates:\n", query);
    for (i, candidate) in candidates.iter().enumerate() {
        let preview: String = candidate.chunk.content.chars().take(400).collect();
        prompt.push_str(&format!("[{}] {}\n", i, preview.replace('\n', " ")));
    }

    let response = match chat.complete(RERANK_SYSTEM, &prompt).await {
        Ok(text) => text,
        Err(e) => {
            tracing::warn!(error = %e, "rerank call failed, keeping hybrid order");
            return None;
        }
    };

    let entries = parse_rerank_response(&response)?;

    let mut scores = vec![0.0f32; candidates.len()];
    for entry in entries {
        if entry.index < scores.len() {
            scores[entry.index] = entry.score;
        }
    }
    Some(scores)
}

/// Extract the JSON array from the model output, tolerating fences and
/// surrounding prose.
fn parse_rerank_response(response: &str) -> Option<Vec<RerankEntry>> {
    let start = response.find('[')?;
    let end = response.rfind(']')?;
    if end <= start {
        return None;
    }
    match serde_json::from_str::<Vec<RerankEntry>>(&response[start..=end]) {
        Ok(entries) => Some(entries),
        Err(e) => {
            tracing::warn!(error = %e, "rerank response did not parse, keeping hybrid order");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{RecallError, Result};
    use crate::types::Chunk;
    use async_trait::async_trait;

    struct ScriptedChat(String);

    #[async_trait]
    impl ChatModel for ScriptedChat {
        async fn complete(&self, _system: &str, _user: &str) -> Result<String> {
            Ok(self.0.clone())
        }

        fn model_name(&self) -> &str {
            "scripted"
        }
    }

    struct FailingChat;

    #[async_trait]
    impl ChatModel for FailingChat {
        async fn complete(&self, _system: &str, _user: &str) -> Result<String> {
            Err(RecallError::External("down".to_string()))
        }

        fn model_name(&self) -> &str {
            "failing"
        }
    }

    fn candidates(n: usize) -> Vec<ScoredChunk> {
        (0..n)
            .map(|i| ScoredChunk {
                chunk: Chunk {
                    id: format!("c_s_{}", i),
                    content: format!("candidate {}", i),
                    session_id: "s".to_string(),
                    chunk_index: i,
                    date: None,
                    event_date: None,
                    embedding: vec![],
                },
                score: 1.0 - i as f32 * 0.1,
                vector_score: 0.0,
                bm25_score: 0.0,
                rerank_score: None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_rerank_scores_and_missing_default_zero() {
        let chat: Arc<dyn ChatModel> = Arc::new(ScriptedChat(
            r#"[{"index": 2, "score": 0.9}, {"index": 0, "score": 0.4}]"#.to_string(),
        ));
        let scores = rerank_candidates(&chat, "q", &candidates(3)).await.unwrap();
        assert_eq!(scores, vec![0.4, 0.0, 0.9]);
    }

    #[tokio::test]
    async fn test_rerank_tolerates_fences() {
        let chat: Arc<dyn ChatModel> = Arc::new(ScriptedChat(
            "```json\n[{\"index\": 0, \"score\": 1.0}]\n```".to_string(),
        ));
        let scores = rerank_candidates(&chat, "q", &candidates(2)).await.unwrap();
        assert_eq!(scores, vec![1.0, 0.0]);
    }

    #[tokio::test]
    async fn test_rerank_failure_is_none() {
        let chat: Arc<dyn ChatModel> = Arc::new(FailingChat);
        assert!(rerank_candidates(&chat, "q", &candidates(2)).await.is_none());

        let chat: Arc<dyn ChatModel> = Arc::new(ScriptedChat("not json at all".to_string()));
        assert!(rerank_candidates(&chat, "q", &candidates(2)).await.is_none());
    }

    #[tokio::test]
    async fn test_out_of_range_indices_ignored() {
        let chat: Arc<dyn ChatModel> = Arc::new(ScriptedChat(
            r#"[{"index": 99, "score": 0.9}, {"index": 1, "score": 0.5}]"#.to_string(),
        ));
        let scores = rerank_candidates(&chat, "q", &candidates(2)).await.unwrap();
        assert_eq!(scores, vec![0.0, 0.5]);
    }
}
