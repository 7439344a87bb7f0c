//! Tantivy-based search index module.
//!
//! Full-text search over posts with field boosting. The document store stays
//! the source of truth; hits carry only the post id.

use std::path::Path;
use std::sync::Arc;
use tantivy::collector::TopDocs;
use tantivy::query::{BooleanQuery, BoostQuery, Occur, QueryParser};
use tantivy::schema::{Field, Schema, Value, STORED, STRING, TEXT};
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument, Term};
use tokio::sync::RwLock;

use crate::errors::AppError;
use crate::models::Post;

const BOOST_ITEM_NAME: f32 = 10.0;
const BOOST_LOCATION: f32 = 6.0;
const BOOST_DESCRIPTION: f32 = 4.0;
const BOOST_AUTHOR_NAME: f32 = 2.0;

/// Search hit with relevance score.
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub post_id: String,
    pub score: f32,
}

struct SearchFields {
    post_id: Field,
    item_name: Field,
    location: Field,
    description: Field,
    author_name: Field,
}

/// Tantivy search index for posts.
pub struct SearchIndex {
    index: Index,
    reader: IndexReader,
    writer: Arc<RwLock<IndexWriter>>,
    fields: SearchFields,
}

impl SearchIndex {
    /// Create or open a search index at the specified path.
    pub fn open(index_path: &Path) -> Result<Self, AppError> {
        std::fs::create_dir_all(index_path)
            .map_err(|e| AppError::Search(format!("Failed to create index directory: {}", e)))?;

        let mut schema_builder = Schema::builder();
        let post_id = schema_builder.add_text_field("post_id", STRING | STORED);
        let item_name = schema_builder.add_text_field("item_name", TEXT);
        let location = schema_builder.add_text_field("location", TEXT);
        let description = schema_builder.add_text_field("description", TEXT);
        let author_name = schema_builder.add_text_field("author_name", TEXT);
        let schema = schema_builder.build();

        let fields = SearchFields {
            post_id,
            item_name,
            location,
            description,
            author_name,
        };

        let index = Index::open_in_dir(index_path)
            .or_else(|_| Index::create_in_dir(index_path, schema.clone()))
            .map_err(|e| AppError::Search(format!("Failed to open/create index: {}", e)))?;

        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::OnCommitWithDelay)
            .try_into()
            .map_err(|e| AppError::Search(format!("Failed to create reader: {}", e)))?;

        let writer = index
            .writer(50_000_000) // 50MB buffer
            .map_err(|e| AppError::Search(format!("Failed to create writer: {}", e)))?;

        Ok(Self {
            index,
            reader,
            writer: Arc::new(RwLock::new(writer)),
            fields,
        })
    }

    /// Rebuild the entire index from posts.
    pub async fn rebuild(&self, posts: &[Post]) -> Result<(), AppError> {
        let mut writer = self.writer.write().await;

        writer.delete_all_documents()?;
        for post in posts {
            writer.add_document(self.create_document(post))?;
        }
        writer.commit()?;
        self.reader.reload()?;

        tracing::info!("Search index rebuilt with {} posts", posts.len());
        Ok(())
    }

    /// Index or re-index a single post.
    pub async fn index_post(&self, post: &Post) -> Result<(), AppError> {
        let mut writer = self.writer.write().await;

        writer.delete_term(Term::from_field_text(self.fields.post_id, &post.id));
        writer.add_document(self.create_document(post))?;
        writer.commit()?;
        self.reader.reload()?;

        Ok(())
    }

    /// Remove a post from the index.
    pub async fn remove_post(&self, post_id: &str) -> Result<(), AppError> {
        let mut writer = self.writer.write().await;

        writer.delete_term(Term::from_field_text(self.fields.post_id, post_id));
        writer.commit()?;
        self.reader.reload()?;

        Ok(())
    }

    /// Search for posts matching the query.
    pub fn search(
        &self,
        query_str: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<SearchResult>, AppError> {
        if query_str.trim().is_empty() {
            return Ok(Vec::new());
        }

        let searcher = self.reader.searcher();

        let field_queries = [
            (self.fields.item_name, BOOST_ITEM_NAME),
            (self.fields.location, BOOST_LOCATION),
            (self.fields.description, BOOST_DESCRIPTION),
            (self.fields.author_name, BOOST_AUTHOR_NAME),
        ];

        let mut subqueries: Vec<(Occur, Box<dyn tantivy::query::Query>)> = Vec::new();
        for (field, boost) in field_queries {
            let field_parser = QueryParser::for_index(&self.index, vec![field]);
            if let Ok(field_query) = field_parser.parse_query(query_str) {
                subqueries.push((Occur::Should, Box::new(BoostQuery::new(field_query, boost))));
            }
        }

        if subqueries.is_empty() {
            return Err(AppError::Search(format!(
                "Invalid search query: {}",
                query_str
            )));
        }
        let combined_query = BooleanQuery::new(subqueries);

        let top_docs = searcher
            .search(&combined_query, &TopDocs::with_limit(limit + offset))
            .map_err(|e| AppError::Search(format!("Search failed: {}", e)))?;

        let results = top_docs
            .into_iter()
            .skip(offset)
            .take(limit)
            .filter_map(|(score, doc_address)| {
                let doc: TantivyDocument = searcher.doc(doc_address).ok()?;
                let post_id = doc.get_first(self.fields.post_id)?.as_str()?.to_string();
                Some(SearchResult { post_id, score })
            })
            .collect();

        Ok(results)
    }

    fn create_document(&self, post: &Post) -> TantivyDocument {
        doc!(
            self.fields.post_id => post.id.clone(),
            self.fields.item_name => post.item_name.clone(),
            self.fields.location => post.location.clone(),
            self.fields.description => post.description.clone(),
            self.fields.author_name => post.author.name.clone()
        )
    }
}
