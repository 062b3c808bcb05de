//! Search augmentation of the outgoing user turn.

use std::sync::Arc;

use chrono::NaiveDateTime;
use tracing::debug;

use crate::inference::WebSearch;

/// Wrap `query` with the current time, the search context, and an
/// instruction to answer from that context instead of refusing to browse.
pub fn augment_query(query: &str, context: &str, now: NaiveDateTime) -> String {
    let current_time = now.format("%A, %B %d, %Y %I:%M %p");
    format!(
        "Here is live web context I just searched for.\n\
         Current Date and Time: {current_time}\n\
         ---------------------\n\
         {context}\n\
         ---------------------\n\
         IGNORE your internal knowledge cutoff date. Do NOT say you cannot browse the internet or access real-time data. \
         Based EXCLUSIVELY on the live context above, answer the following question concisely: {query}"
    )
}

pub struct Augmenter {
    search: Arc<dyn WebSearch>,
    max_results: usize,
}

impl Augmenter {
    pub fn new(search: Arc<dyn WebSearch>, max_results: usize) -> Self {
        Self {
            search,
            max_results,
        }
    }

    pub async fn search(&self, query: &str, max_results: usize) -> String {
        self.search.search(query, max_results).await
    }

    /// The user turn to send to the model. Falls back to `query` unchanged
    /// when search is off or found nothing.
    pub async fn prepare(&self, query: &str, use_search: bool) -> String {
        if !use_search {
            return query.to_string();
        }

        let context = self.search.search(query, self.max_results).await;
        if context.trim().is_empty() {
            debug!("No search context; sending the query as-is");
            return query.to_string();
        }

        augment_query(query, &context, chrono::Local::now().naive_local())
    }
}
