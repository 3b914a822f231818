//! Agent answering questions from a document store

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{DocumentStore, MetadataFilter};
use crate::agents::config::{AgentConfig, RetrievalConfig, DEFAULT_SYSTEM_PROMPT};
use crate::agents::core::{Agent, SystemPrompt};
use crate::agents::domain::{ChatMessage, MessageContext, TextStream};
use crate::agents::error::{backend_error, AgentResult};
use crate::agents::llm::{CompletionRequest, LlmProvider};

/// Reply when no passage matched
pub const NOTHING_FOUND: &str = "I couldn't find relevant information to answer your question.";

/// Instructions for turning a question into a metadata filter
pub const DEFAULT_FILTER_PROMPT: &str = r#"You convert questions about research papers into a metadata filter.
Reply with JSON only, in the form {"$and": [{"paper_id": "<id or list of ids>"}, {"section_category": "<section or list of sections>"}]}.
Paper ids look like "paper-1". Section categories are section titles such as "Introduction", "Results" or "Conclusion".
Leave out a clause when the question does not name it; reply {"$and": []} when it names neither"#;

/// Two-pass retrieval agent.
///
/// The first completion turns the question into a [`MetadataFilter`]. The
/// matching passages are then handed to a second completion as context.
pub struct RetrievalAgent {
    config: AgentConfig,
    retrieval: RetrievalConfig,
    provider: Arc<dyn LlmProvider>,
    documents: Arc<dyn DocumentStore>,
    system_prompt: SystemPrompt,
}

impl RetrievalAgent {
    pub fn new(
        config: AgentConfig,
        retrieval: RetrievalConfig,
        provider: Arc<dyn LlmProvider>,
        documents: Arc<dyn DocumentStore>,
    ) -> Self {
        let prompt = if config.system_prompt == DEFAULT_SYSTEM_PROMPT {
            DEFAULT_FILTER_PROMPT.to_string()
        } else {
            config.system_prompt.clone()
        };
        Self {
            system_prompt: SystemPrompt::new(prompt),
            config,
            retrieval,
            provider,
            documents,
        }
    }

    async fn ask(&self, prompt: String) -> AgentResult<String> {
        let request = CompletionRequest::new(vec![ChatMessage::user(prompt)]).with_llm_config(&self.config.llm);
        Ok(self.provider.complete(request).await?.message.content)
    }

    /// Passages for `message` under `filter`
    async fn gather(&self, message: &str, filter: &MetadataFilter) -> Vec<String> {
        let mut passages = Vec::new();

        for paper_id in &filter.paper_ids {
            let sections: Vec<Option<&str>> = if filter.section_categories.is_empty() {
                vec![None]
            } else {
                filter.section_categories.iter().map(|s| Some(s.as_str())).collect()
            };
            for section in sections {
                match self
                    .documents
                    .search_by_paper(message, paper_id, section, self.retrieval.section_k)
                    .await
                {
                    Ok(found) => passages.extend(found),
                    Err(e) => warn!(paper_id = %paper_id, section = ?section, error = %e, "Paper search failed"),
                }
            }
        }

        if filter.paper_ids.is_empty() {
            let general = MetadataFilter {
                paper_ids: Vec::new(),
                section_categories: filter.section_categories.clone(),
            };
            match self.documents.search(message, &general, self.retrieval.general_k).await {
                Ok(found) => passages.extend(found.into_iter().map(|d| d.content)),
                Err(e) => warn!(error = %e, "General search failed"),
            }
        }
        passages
    }

    async fn answer(&self, message: &str) -> AgentResult<String> {
        let reply = self
            .ask(format!("{}, User Query: {}", self.system_prompt.get(), message))
            .await?;
        let filter = MetadataFilter::parse(&reply);
        debug!(agent = %self.config.name, ?filter, "Parsed retrieval filter");

        let passages = self.gather(message, &filter).await;
        if passages.is_empty() {
            return Ok(NOTHING_FOUND.to_string());
        }

        self.ask(format!(
            "You are an expert summariser. Use the provided context to answer the user's question.\nContext: {}\nUser Query: {}",
            passages.join("\n\n"),
            message
        ))
        .await
    }
}

#[async_trait]
impl Agent for RetrievalAgent {
    fn config(&self) -> &AgentConfig {
        &self.config
    }

    fn system_prompt(&self) -> String {
        self.system_prompt.get()
    }

    fn set_system_prompt(&self, prompt: String) {
        self.system_prompt.set(prompt);
    }

    async fn handle_message(&self, message: &str, _ctx: &MessageContext) -> String {
        match self.answer(message).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(agent = %self.config.name, error = %e, "Retrieval failed");
                backend_error("RetrievalAgent", e)
            }
        }
    }

    async fn handle_message_stream(&self, message: &str, ctx: &MessageContext) -> TextStream {
        TextStream::once(self.handle_message(message, ctx).await)
    }
}
