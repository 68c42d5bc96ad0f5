//! Knowledge base used by the knowledge agent
//!
//! Documents are split into passages on blank lines and indexed in an
//! in-memory tantivy index. A search takes the best BM25 candidates and then
//! diversifies them with maximal marginal relevance, so near-duplicate
//! passages do not crowd out the rest of the context.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use async_trait::async_trait;
use tantivy::collector::TopDocs;
use tantivy::query::QueryParser;
use tantivy::schema::{
    Field, IndexRecordOption, OwnedValue, Schema, TextFieldIndexing, TextOptions, Value, STORED,
};
use tantivy::tokenizer::{
    Language, LowerCaser, RemoveLongFilter, SimpleTokenizer, StopWordFilter, TextAnalyzer, Token,
    TokenStream,
};
use tantivy::{Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument};
use tracing::{debug, info};

use crate::core::{NetdeskError, Result};

/// Similarity search over support documentation
#[async_trait]
pub trait KnowledgeBase: Send + Sync {
    /// Up to `k` passages, most useful first
    async fn search(&self, question: &str, k: usize) -> Result<Vec<String>>;
}

/// Trade-off between relevance (1.0) and diversity (0.0)
pub const DEFAULT_MMR_LAMBDA: f32 = 0.25;

/// Candidates considered before diversification
const FETCH_K: usize = 20;

const ANALYZER: &str = "passage";

const WRITER_HEAP_BYTES: usize = 50_000_000;

fn index_error(e: impl std::fmt::Display) -> NetdeskError {
    NetdeskError::KnowledgeBase(format!("index: {}", e))
}

/// Lowercased words without English or Spanish stop words
fn analyzer() -> Result<TextAnalyzer> {
    let english = StopWordFilter::new(Language::English)
        .ok_or_else(|| index_error("no English stop words"))?;
    let spanish = StopWordFilter::new(Language::Spanish)
        .ok_or_else(|| index_error("no Spanish stop words"))?;
    Ok(TextAnalyzer::builder(SimpleTokenizer::default())
        .filter(RemoveLongFilter::limit(40))
        .filter(LowerCaser)
        .filter(english)
        .filter(spanish)
        .build())
}

fn term_counts(analyzer: &mut TextAnalyzer, text: &str) -> HashMap<String, f32> {
    let mut terms = HashMap::new();
    let mut stream = analyzer.token_stream(text);
    stream.process(&mut |token: &Token| {
        *terms.entry(token.text.clone()).or_insert(0.0) += 1.0;
    });
    terms
}

fn split_passages(text: &str) -> Vec<String> {
    let mut passages = Vec::new();
    let mut current = Vec::new();
    for line in text.lines().chain(std::iter::once("")) {
        if line.trim().is_empty() {
            if !current.is_empty() {
                passages.push(current.join("\n"));
                current.clear();
            }
        } else {
            current.push(line.trim_end());
        }
    }
    passages
}

struct Passage {
    text: String,
    terms: HashMap<String, f32>,
    norm: f32,
}

impl Passage {
    fn new(text: String, analyzer: &mut TextAnalyzer) -> Self {
        let terms = term_counts(analyzer, &text);
        let norm = terms.values().map(|v| v * v).sum::<f32>().sqrt();
        Self { text, terms, norm }
    }

    /// Cosine similarity of the two term vectors
    fn overlap(&self, other: &Passage) -> f32 {
        if self.norm == 0.0 || other.norm == 0.0 {
            return 0.0;
        }
        let dot: f32 = other
            .terms
            .iter()
            .filter_map(|(term, weight)| self.terms.get(term).map(|w| w * weight))
            .sum();
        dot / (self.norm * other.norm)
    }
}

/// In-process passage store
pub struct DocumentStore {
    index: Index,
    reader: IndexReader,
    text_field: Field,
    passage_field: Field,
    passages: Vec<Passage>,
    lambda: f32,
}

impl DocumentStore {
    pub fn new() -> Result<Self> {
        let indexing = TextFieldIndexing::default()
            .set_tokenizer(ANALYZER)
            .set_index_option(IndexRecordOption::WithFreqsAndPositions);
        let mut builder = Schema::builder();
        let text_field =
            builder.add_text_field("text", TextOptions::default().set_indexing_options(indexing));
        let passage_field = builder.add_u64_field("passage", STORED);

        let index = Index::create_in_ram(builder.build());
        index.tokenizers().register(ANALYZER, analyzer()?);
        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()
            .map_err(index_error)?;

        Ok(Self {
            index,
            reader,
            text_field,
            passage_field,
            passages: Vec::new(),
            lambda: DEFAULT_MMR_LAMBDA,
        })
    }

    pub fn with_lambda(mut self, lambda: f32) -> Self {
        self.lambda = lambda.clamp(0.0, 1.0);
        self
    }

    /// Add one document, split on blank lines
    pub fn add_document(&mut self, text: &str) -> Result<()> {
        self.add_documents(std::iter::once(text))
    }

    /// Index several documents with a single commit
    pub fn add_documents<'a>(&mut self, texts: impl IntoIterator<Item = &'a str>) -> Result<()> {
        let mut writer: IndexWriter = self.index.writer(WRITER_HEAP_BYTES).map_err(index_error)?;
        let mut analyzer = analyzer()?;

        for text in texts {
            for passage in split_passages(text) {
                let mut doc = TantivyDocument::default();
                doc.add_text(self.text_field, &passage);
                doc.add_u64(self.passage_field, self.passages.len() as u64);
                writer.add_document(doc).map_err(index_error)?;
                self.passages.push(Passage::new(passage, &mut analyzer));
            }
        }

        writer.commit().map_err(index_error)?;
        self.reader.reload().map_err(index_error)?;
        Ok(())
    }

    /// Load every `.md` and `.txt` file in `dir` (not recursive)
    pub fn load_dir(dir: &Path) -> Result<Self> {
        let entries = fs::read_dir(dir).map_err(|e| {
            NetdeskError::KnowledgeBase(format!("cannot read {}: {}", dir.display(), e))
        })?;

        let mut paths: Vec<_> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.is_file()
                    && matches!(
                        path.extension().and_then(|e| e.to_str()),
                        Some("md") | Some("txt")
                    )
            })
            .collect();
        paths.sort();

        let texts = paths
            .iter()
            .map(fs::read_to_string)
            .collect::<std::io::Result<Vec<_>>>()?;

        let mut store = Self::new()?;
        store.add_documents(texts.iter().map(String::as_str))?;

        info!(
            dir = %dir.display(),
            documents = paths.len(),
            passages = store.len(),
            "knowledge base loaded"
        );
        Ok(store)
    }

    pub fn len(&self) -> usize {
        self.passages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passages.is_empty()
    }

    /// Best `FETCH_K` passages by BM25, as (passage, score relative to the best)
    fn candidates(&self, question: &str) -> Result<Vec<(usize, f32)>> {
        let searcher = self.reader.searcher();
        let parser = QueryParser::for_index(&self.index, vec![self.text_field]);
        let (query, errors) = parser.parse_query_lenient(question);
        if !errors.is_empty() {
            debug!(errors = errors.len(), "question parsed leniently");
        }

        let top = searcher
            .search(&query, &TopDocs::with_limit(FETCH_K))
            .map_err(index_error)?;
        let best = top.first().map(|(score, _)| *score).unwrap_or(1.0);

        let mut candidates = Vec::with_capacity(top.len());
        for (score, address) in top {
            let doc: TantivyDocument = searcher.doc(address).map_err(index_error)?;
            let id = doc
                .get_first(self.passage_field)
                .and_then(|v: &OwnedValue| v.as_u64());
            if let Some(id) = id {
                candidates.push((id as usize, if best > 0.0 { score / best } else { 0.0 }));
            }
        }
        Ok(candidates)
    }

    /// Maximal marginal relevance over the BM25 candidates
    fn mmr(&self, mut candidates: Vec<(usize, f32)>, k: usize) -> Vec<String> {
        let mut selected: Vec<usize> = Vec::with_capacity(k);
        while selected.len() < k && !candidates.is_empty() {
            let mut best = 0;
            let mut best_score = f32::NEG_INFINITY;
            for (pos, (index, relevance)) in candidates.iter().enumerate() {
                let passage = &self.passages[*index];
                let redundancy = selected
                    .iter()
                    .map(|s| passage.overlap(&self.passages[*s]))
                    .fold(0.0f32, f32::max);
                let score = self.lambda * relevance - (1.0 - self.lambda) * redundancy;
                if score > best_score {
                    best = pos;
                    best_score = score;
                }
            }
            let (index, _) = candidates.remove(best);
            selected.push(index);
        }

        selected
            .into_iter()
            .map(|i| self.passages[i].text.clone())
            .collect()
    }
}

#[async_trait]
impl KnowledgeBase for DocumentStore {
    async fn search(&self, question: &str, k: usize) -> Result<Vec<String>> {
        if k == 0 || self.passages.is_empty() {
            return Ok(Vec::new());
        }
        let candidates = self.candidates(question)?;
        let results = self.mmr(candidates, k);
        debug!(k, found = results.len(), "knowledge search");
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> DocumentStore {
        let mut store = DocumentStore::new().unwrap();
        store
            .add_document(
                "To reset the office router, hold the reset button for ten seconds.\n\n\
                 Router reset: hold the reset button for ten seconds until the lights blink.\n\n\
                 The guest Wi-Fi password is printed on the back of the router.\n\n\
                 Printers are managed by the facilities team.",
            )
            .unwrap();
        store
    }

    #[test]
    fn test_split_on_blank_lines() {
        assert_eq!(store().len(), 4);
    }

    #[tokio::test]
    async fn test_search_returns_relevant_first() {
        let results = store().search("how do I reset the router", 3).await.unwrap();
        assert!(!results.is_empty());
        assert!(results[0].to_lowercase().contains("reset"));
        assert!(!results.iter().any(|r| r.contains("Printers")));
    }

    #[tokio::test]
    async fn test_mmr_prefers_diverse_passages() {
        let results = store().search("router reset button", 2).await.unwrap();
        assert_eq!(results.len(), 2);
        let resets = results.iter().filter(|r| r.contains("reset button")).count();
        assert_eq!(resets, 1, "near-duplicate passages should not both be picked");
    }

    #[tokio::test]
    async fn test_no_match_is_empty() {
        let results = store().search("kubernetes", 3).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_query_syntax_in_questions_is_tolerated() {
        let results = store()
            .search("where is the \"reset button\" (router)?", 2)
            .await
            .unwrap();
        assert!(!results.is_empty());
    }

    #[tokio::test]
    async fn test_empty_store_finds_nothing() {
        let store = DocumentStore::new().unwrap();
        assert!(store.search("router", 3).await.unwrap().is_empty());
    }

    #[test]
    fn test_load_dir() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("vpn.md"), "# VPN\n\nUse the corporate VPN client.").unwrap();
        fs::write(dir.path().join("notes.bin"), "ignored").unwrap();
        let store = DocumentStore::load_dir(dir.path()).unwrap();
        assert_eq!(store.len(), 2);

        let hits = tokio_test::block_on(store.search("corporate client", 3)).unwrap();
        assert_eq!(hits, vec!["Use the corporate VPN client.".to_string()]);
    }

    #[test]
    fn test_load_missing_dir() {
        assert!(DocumentStore::load_dir(Path::new("/nonexistent/netdesk-docs")).is_err());
    }
}
