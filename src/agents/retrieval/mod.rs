//! Document retrieval
//!
//! Passages of research papers, tagged with `paper_id` and
//! `section_category`, are searched through a [`DocumentStore`]. The
//! in-memory store ranks by term overlap and stands in for an external
//! vector index behind the same trait.

mod agent;
pub mod chunking;

pub use agent::{RetrievalAgent, DEFAULT_FILTER_PROMPT, NOTHING_FOUND};
pub use chunking::{SectionChunker, DEFAULT_SECTIONS, DEFAULT_WORD_LIMIT, FULL_DOCUMENT};

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::agents::error::{AgentError, AgentResult};
use crate::agents::tools::{ParamSpec, ParamType, Tool, ToolArgs, ToolRegistry};

/// Where a passage came from
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paper_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section_category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_number: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_chunk_index: Option<usize>,
}

/// One searchable passage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub content: String,
    #[serde(default)]
    pub metadata: DocumentMetadata,
}

impl Document {
    pub fn new(content: impl Into<String>, metadata: DocumentMetadata) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            content: content.into(),
            metadata,
        }
    }
}

/// AND-conjunction of metadata equalities; an empty list matches anything
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataFilter {
    #[serde(default)]
    pub paper_ids: Vec<String>,
    #[serde(default)]
    pub section_categories: Vec<String>,
}

fn string_values(value: &Value) -> Vec<String> {
    match value {
        Value::String(s) => vec![s.clone()],
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

impl MetadataFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn paper(mut self, paper_id: impl Into<String>) -> Self {
        self.paper_ids.push(paper_id.into());
        self
    }

    pub fn section(mut self, section: impl Into<String>) -> Self {
        self.section_categories.push(section.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.paper_ids.is_empty() && self.section_categories.is_empty()
    }

    /// Parse a `{"$and": [{"paper_id": ..}, {"section_category": ..}]}` filter.
    ///
    /// Markdown code fences are stripped first; anything unparseable yields
    /// an empty filter. Values may be single strings or lists.
    pub fn parse(reply: &str) -> Self {
        let cleaned = reply.replace("```json", "").replace("```", "");
        let Ok(raw) = serde_json::from_str::<Value>(cleaned.trim()) else {
            debug!(reply, "Filter reply is not JSON, using empty filter");
            return Self::default();
        };

        let mut filter = Self::default();
        for clause in raw.get("$and").and_then(Value::as_array).into_iter().flatten() {
            if let Some(value) = clause.get("paper_id") {
                filter.paper_ids.extend(string_values(value));
            }
            if let Some(value) = clause.get("section_category") {
                filter.section_categories.extend(string_values(value));
            }
        }
        filter
    }

    pub fn matches(&self, metadata: &DocumentMetadata) -> bool {
        let allowed = |values: &[String], actual: &Option<String>| {
            values.is_empty()
                || actual
                    .as_deref()
                    .map_or(false, |a| values.iter().any(|v| v.eq_ignore_ascii_case(a)))
        };
        allowed(&self.paper_ids, &metadata.paper_id)
            && allowed(&self.section_categories, &metadata.section_category)
    }
}

/// Search boundary over stored passages
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn add_documents(&self, documents: Vec<Document>) -> AgentResult<()>;

    /// Up to `k` passages matching `filter`, best first
    async fn search(&self, query: &str, filter: &MetadataFilter, k: usize) -> AgentResult<Vec<Document>>;

    /// Passage texts from one paper, optionally one section
    async fn search_by_paper(
        &self,
        query: &str,
        paper_id: &str,
        section_category: Option<&str>,
        k: usize,
    ) -> AgentResult<Vec<String>> {
        let mut filter = MetadataFilter::new().paper(paper_id);
        if let Some(section) = section_category {
            filter = filter.section(section);
        }
        Ok(self
            .search(query, &filter, k)
            .await?
            .into_iter()
            .map(|d| d.content)
            .collect())
    }
}

fn terms(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 2)
        .map(str::to_lowercase)
        .collect()
}

/// RAM-only store ranking passages by how many query terms they contain
#[derive(Debug, Default, Clone)]
pub struct InMemoryDocumentStore {
    documents: Arc<RwLock<Vec<Document>>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.documents.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.documents.read().await.is_empty()
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn add_documents(&self, documents: Vec<Document>) -> AgentResult<()> {
        self.documents.write().await.extend(documents);
        Ok(())
    }

    async fn search(&self, query: &str, filter: &MetadataFilter, k: usize) -> AgentResult<Vec<Document>> {
        let query_terms = terms(query);
        let documents = self.documents.read().await;

        let mut scored: Vec<(usize, &Document)> = documents
            .iter()
            .filter(|d| filter.matches(&d.metadata))
            .map(|d| (terms(&d.content).intersection(&query_terms).count(), d))
            .filter(|(score, _)| *score > 0)
            .collect();
        // Stable: ties keep insertion order
        scored.sort_by(|a, b| b.0.cmp(&a.0));

        Ok(scored.into_iter().take(k).map(|(_, d)| d.clone()).collect())
    }
}

/// Chunk every `*.txt` paper in `dir` and add the passages to `store`.
///
/// The file stem is the paper id; form feeds separate pages.
pub async fn load_corpus(
    dir: &Path,
    chunker: &SectionChunker,
    store: &dyn DocumentStore,
) -> AgentResult<usize> {
    let mut entries = tokio::fs::read_dir(dir).await.map_err(|e| {
        AgentError::Configuration(format!("Failed to read corpus directory {}: {}", dir.display(), e))
    })?;

    let mut paths = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some("txt") {
            paths.push(path);
        }
    }
    paths.sort();

    let mut total = 0;
    for path in paths {
        let Some(paper_id) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
            continue;
        };
        let text = tokio::fs::read_to_string(&path).await?;
        let pages: Vec<&str> = text.split('\u{c}').collect();
        let documents = chunker.chunk(&paper_id, &pages);
        total += documents.len();
        info!(paper_id = %paper_id, chunks = documents.len(), "Loaded paper");
        store.add_documents(documents).await?;
    }
    Ok(total)
}

/// Register a `search_by_paper` tool over `store`
pub fn configure_retrieval_tools(registry: &mut ToolRegistry, store: Arc<dyn DocumentStore>) -> AgentResult<()> {
    registry.register_tool(
        Tool::builder("search_by_paper")
            .description("Search passages of one research paper, optionally restricted to a section.")
            .param("query", ParamSpec::new(ParamType::String, "The natural language search query.").required())
            .param("paper_id", ParamSpec::new(ParamType::String, "Paper identifier, e.g. paper-1.").required())
            .param("section_category", ParamSpec::new(ParamType::String, "Section name to restrict the search to."))
            .param("k", ParamSpec::new(ParamType::Integer, "Number of passages to return (default: 3)."))
            .function(move |args: ToolArgs| {
                let store = store.clone();
                async move {
                    let text = |key: &str| args.get(key).and_then(Value::as_str).map(str::to_string);
                    let query = text("query").ok_or("argument 'query' must be a string")?;
                    let paper_id = text("paper_id").ok_or("argument 'paper_id' must be a string")?;
                    let section = text("section_category");
                    let k = args.get("k").and_then(Value::as_u64).map(|k| k as usize).unwrap_or(3);

                    let passages = store
                        .search_by_paper(&query, &paper_id, section.as_deref(), k)
                        .await
                        .map_err(|e| e.to_string())?;
                    Ok(json!(passages))
                }
            })
            .build()?,
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn passage(content: &str, paper: &str, section: &str) -> Document {
        Document::new(
            content,
            DocumentMetadata {
                paper_id: Some(paper.to_string()),
                section_category: Some(section.to_string()),
                ..Default::default()
            },
        )
    }

    async fn store() -> InMemoryDocumentStore {
        let store = InMemoryDocumentStore::new();
        store
            .add_documents(vec![
                passage("Interoperability across smart city platforms", "paper-1", "Introduction"),
                passage("Results show lower latency for oneM2M deployments", "paper-1", "Results"),
                passage("Latency results for the MLFlow pipeline", "paper-2", "Results"),
            ])
            .await
            .unwrap();
        store
    }

    #[test]
    fn test_parse_filter() {
        let filter = MetadataFilter::parse(
            "```json\n{\"$and\": [{\"paper_id\": \"paper-1\"}, {\"section_category\": [\"Results\", \"Discussion\"]}]}\n```",
        );
        assert_eq!(filter.paper_ids, vec!["paper-1"]);
        assert_eq!(filter.section_categories, vec!["Results", "Discussion"]);

        assert!(MetadataFilter::parse("null").is_empty());
        assert!(MetadataFilter::parse("I am not sure").is_empty());
    }

    #[tokio::test]
    async fn test_search_filters_and_ranks() {
        let store = store().await;

        let all = store.search("latency results", &MetadataFilter::new(), 5).await.unwrap();
        assert_eq!(all.len(), 2);

        let filtered = store
            .search_by_paper("latency results", "paper-1", Some("results"), 3)
            .await
            .unwrap();
        assert_eq!(filtered, vec!["Results show lower latency for oneM2M deployments"]);

        assert!(store
            .search_by_paper("latency", "paper-3", None, 3)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_retrieval_tool() {
        let mut registry = ToolRegistry::new();
        configure_retrieval_tools(&mut registry, Arc::new(store().await)).unwrap();

        let found = registry
            .invoke("search_by_paper", &json!({"query": "smart city", "paper_id": "paper-1"}))
            .await
            .unwrap();
        assert_eq!(found, json!(["Interoperability across smart city platforms"]));
    }

    #[tokio::test]
    async fn test_load_corpus() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("paper-9.txt"),
            "Title page\n\u{c}1 Introduction\nWe study routing.\n2 Results\nRouting works.",
        )
        .unwrap();
        std::fs::write(dir.path().join("notes.md"), "ignored").unwrap();

        let store = InMemoryDocumentStore::new();
        let loaded = load_corpus(dir.path(), &SectionChunker::default(), &store).await.unwrap();
        assert_eq!(loaded, 2);

        let hits = store.search_by_paper("routing", "paper-9", Some("Results"), 3).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].contains("Routing works."));
    }
}
