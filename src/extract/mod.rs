//! Extractor client
//!
//! Delegates structured extraction of a session (memories, entities,
//! relationships) to the chat model. Results are cached per session id,
//! concurrent requests for the same session share one in-flight call, and
//! a process-wide semaphore caps active extractions.

mod parser;

pub use parser::{fact_lines, parse_extraction, Extraction, ParsedEntity, ParsedRelationship};

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Semaphore;

use crate::error::{RecallError, Result};
use crate::llm::ChatModel;
use crate::singleflight::SingleFlight;
use crate::types::Session;

const EXTRACTION_SYSTEM: &str = "\
You distill a conversation session into long-term memory. Respond with three \
sections. MEMORIES: one self-contained statement per line restating everything \
worth remembering about the user and the events discussed. ENTITIES: one line \
per named entity as `name | type | summary`. RELATIONSHIPS: one line per \
relation as `source | relation | target | date` where date is YYYY-MM-DD if \
known, otherwise omitted. Output the sections and nothing else.";

/// Extraction orchestration client
pub struct ExtractorClient {
    chat: Arc<dyn ChatModel>,
    semaphore: Arc<Semaphore>,
    cache: DashMap<String, Extraction>,
    inflight: SingleFlight<String, Option<Extraction>>,
}

impl ExtractorClient {
    pub fn new(chat: Arc<dyn ChatModel>, concurrency: usize) -> Self {
        Self {
            chat,
            semaphore: Arc::new(Semaphore::new(concurrency.max(1))),
            cache: DashMap::new(),
            inflight: SingleFlight::new(),
        }
    }

    /// Extract structured memory from a session.
    ///
    /// Returns `None` when the extractor call fails; the caller skips the
    /// session and proceeds with the rest of the batch. Successful results
    /// are cached by session id, so re-ingesting a session is cheap and
    /// idempotent.
    pub async fn extract(&self, session: &Session) -> Option<Extraction> {
        if let Some(hit) = self.cache.get(&session.session_id) {
            return Some(hit.clone());
        }

        let session = session.clone();
        let result = self
            .inflight
            .run(session.session_id.clone(), || async {
                match self.extract_uncached(&session).await {
                    Ok(extraction) => Some(extraction),
                    Err(e) => {
                        tracing::warn!(
                            session_id = %session.session_id,
                            error = %e,
                            "extraction failed, skipping session"
                        );
                        None
                    }
                }
            })
            .await;

        if let Some(ref extraction) = result {
            self.cache
                .entry(session.session_id.clone())
                .or_insert_with(|| extraction.clone());
        }
        result
    }

    async fn extract_uncached(&self, session: &Session) -> Result<Extraction> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| RecallError::External("extraction semaphore closed".to_string()))?;

        let mut prompt = String::new();
        if let Some(date) = &session.date {
            prompt.push_str(&format!("Session date: {}\n\n", date));
        }
        prompt.push_str(&session.render());

        let payload = self.chat.complete(EXTRACTION_SYSTEM, &prompt).await?;
        Ok(parse_extraction(&payload))
    }

    /// Drop cached extractions for a container's sessions.
    ///
    /// Called on container clear so a re-ingest observes fresh extractor
    /// output rather than stale cache entries.
    pub fn invalidate<I: IntoIterator<Item = String>>(&self, session_ids: I) {
        for id in session_ids {
            self.cache.remove(&id);
        }
    }

    /// Number of cached extractions
    pub fn cached_count(&self) -> usize {
        self.cache.len()
    }
}
