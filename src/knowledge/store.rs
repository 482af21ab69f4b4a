//! Knowledge store: persistence and similarity search for insights.
//!
//! Items are keyed by `(source_type, source_id)`; re-ingesting the same
//! identity upserts content/insight/embedding but preserves the row id
//! and creation time. Similarity search is a linear scan over rows with
//! embeddings — the corpus is small (hundreds to low thousands of
//! items), and freshness matters more than query latency, so no index
//! structure is maintained.

use std::cmp::Ordering;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, params_from_iter, OptionalExtension};

use crate::embeddings::{codec, EmbeddingProvider};
use crate::storage::Database;

/// Where a knowledge item came from. Own content is auto-approved at
/// ingestion; curated content carries attribution requirements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceType {
    OwnPost,
    OwnConversation,
    CuratedX,
    CuratedArticle,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::OwnPost => "own_post",
            SourceType::OwnConversation => "own_conversation",
            SourceType::CuratedX => "curated_x",
            SourceType::CuratedArticle => "curated_article",
        }
    }
}

impl FromStr for SourceType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "own_post" => Ok(SourceType::OwnPost),
            "own_conversation" => Ok(SourceType::OwnConversation),
            "curated_x" => Ok(SourceType::CuratedX),
            "curated_article" => Ok(SourceType::CuratedArticle),
            other => bail!("unknown knowledge source type: {}", other),
        }
    }
}

/// A stored, embedded unit of insight derived from some source text.
#[derive(Debug, Clone)]
pub struct KnowledgeItem {
    pub id: Option<i64>,
    pub source_type: SourceType,
    pub source_id: String,
    pub source_url: Option<String>,
    pub author: String,
    pub content: String,
    /// Short extracted summary, embedded in place of full text when present.
    pub insight: Option<String>,
    pub embedding: Option<Vec<f32>>,
    pub attribution_required: bool,
    /// Gate for inclusion in default retrieval.
    pub approved: bool,
    pub created_at: Option<DateTime<Utc>>,
}

/// Similarity search knobs. Defaults match the retrieval contract:
/// top 5, floor 0.5, approved items only.
#[derive(Debug, Clone)]
pub struct SearchParams {
    pub source_types: Option<Vec<SourceType>>,
    pub limit: usize,
    pub min_similarity: f32,
    pub approved_only: bool,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            source_types: None,
            limit: 5,
            min_similarity: 0.5,
            approved_only: true,
        }
    }
}

/// Embedding-indexed store over the shared database.
///
/// The vector dimensionality is pinned at construction from the active
/// provider; items and queries with any other length are rejected rather
/// than silently producing corrupt similarity scores.
pub struct KnowledgeStore {
    db: Arc<Database>,
    embedder: Arc<dyn EmbeddingProvider>,
    dimension: usize,
}

impl KnowledgeStore {
    pub fn new(db: Arc<Database>, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        let dimension = embedder.dimensions();
        Self {
            db,
            embedder,
            dimension,
        }
    }

    /// Check identity existence. Callers must use this before any
    /// extraction/embedding call — it is the primary cost control.
    pub fn exists(&self, source_type: SourceType, source_id: &str) -> Result<bool> {
        let found: Option<i64> = self
            .db
            .conn()
            .query_row(
                "SELECT 1 FROM knowledge WHERE source_type = ?1 AND source_id = ?2",
                params![source_type.as_str(), source_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Insert or update a knowledge item, computing its embedding when
    /// absent (from `insight` if present, else `content`).
    ///
    /// Upserts on `(source_type, source_id)`: content, insight, and
    /// embedding are replaced; identity and creation time are preserved.
    /// Returns the row id.
    pub async fn add_item(&self, mut item: KnowledgeItem) -> Result<i64> {
        let embedding = match item.embedding.take() {
            Some(embedding) => embedding,
            None => {
                let text = item.insight.as_deref().unwrap_or(&item.content);
                self.embedder.embed(text).await?
            }
        };

        if embedding.len() != self.dimension {
            bail!(
                "embedding dimension {} does not match store dimension {}",
                embedding.len(),
                self.dimension
            );
        }
        let blob = codec::serialize(&embedding);

        self.db.conn().execute(
            "INSERT INTO knowledge
             (source_type, source_id, source_url, author, content, insight,
              embedding, attribution_required, approved, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(source_type, source_id) DO UPDATE SET
             content = excluded.content,
             insight = excluded.insight,
             embedding = excluded.embedding",
            params![
                item.source_type.as_str(),
                item.source_id,
                item.source_url,
                item.author,
                item.content,
                item.insight,
                blob,
                item.attribution_required,
                item.approved,
                Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
            ],
        )?;

        // last_insert_rowid is unreliable after an upsert that took the
        // UPDATE branch; resolve the id by identity instead.
        let id: i64 = self.db.conn().query_row(
            "SELECT id FROM knowledge WHERE source_type = ?1 AND source_id = ?2",
            params![item.source_type.as_str(), item.source_id],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    /// Similarity search: embeds the query once, linearly scans candidate
    /// rows, and returns `(item, score)` pairs at or above the floor,
    /// best first, truncated to `limit`. Ties keep storage scan order.
    pub async fn search_similar(
        &self,
        query: &str,
        search: &SearchParams,
    ) -> Result<Vec<(KnowledgeItem, f32)>> {
        let query_embedding = self.embedder.embed(query).await?;
        if query_embedding.len() != self.dimension {
            bail!(
                "query embedding dimension {} does not match store dimension {}",
                query_embedding.len(),
                self.dimension
            );
        }

        let mut sql = String::from(
            "SELECT id, source_type, source_id, source_url, author, content, insight,
                    embedding, attribution_required, approved, created_at
             FROM knowledge WHERE embedding IS NOT NULL",
        );
        let mut bind: Vec<String> = Vec::new();

        if let Some(types) = &search.source_types {
            let placeholders = vec!["?"; types.len()].join(",");
            sql.push_str(&format!(" AND source_type IN ({})", placeholders));
            bind.extend(types.iter().map(|t| t.as_str().to_string()));
        }
        if search.approved_only {
            sql.push_str(" AND approved = 1");
        }

        let mut stmt = self.db.conn().prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(bind.iter()))?;

        let mut results: Vec<(KnowledgeItem, f32)> = Vec::new();
        while let Some(row) = rows.next()? {
            let item = Self::row_to_item(row)?;
            let embedding = item
                .embedding
                .as_ref()
                .context("candidate row lost its embedding mid-scan")?;
            let score = codec::cosine_similarity(&query_embedding, embedding)?;
            if score >= search.min_similarity {
                results.push((item, score));
            }
        }

        // Stable sort: equal scores keep scan order
        results.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
        results.truncate(search.limit);
        Ok(results)
    }

    pub fn get_by_source(
        &self,
        source_type: SourceType,
        source_id: &str,
    ) -> Result<Option<KnowledgeItem>> {
        let mut stmt = self.db.conn().prepare(
            "SELECT id, source_type, source_id, source_url, author, content, insight,
                    embedding, attribution_required, approved, created_at
             FROM knowledge WHERE source_type = ?1 AND source_id = ?2",
        )?;
        let mut rows = stmt.query(params![source_type.as_str(), source_id])?;
        match rows.next()? {
            Some(row) => Ok(Some(Self::row_to_item(row)?)),
            None => Ok(None),
        }
    }

    /// Most recent insights from own content (posts and conversations).
    pub fn get_own_insights(&self, limit: usize) -> Result<Vec<KnowledgeItem>> {
        let mut stmt = self.db.conn().prepare(
            "SELECT id, source_type, source_id, source_url, author, content, insight,
                    embedding, attribution_required, approved, created_at
             FROM knowledge
             WHERE source_type IN ('own_post', 'own_conversation')
             ORDER BY created_at DESC, id DESC LIMIT ?1",
        )?;
        let mut rows = stmt.query(params![limit as i64])?;

        let mut items = Vec::new();
        while let Some(row) = rows.next()? {
            items.push(Self::row_to_item(row)?);
        }
        Ok(items)
    }

    /// Record that a knowledge item influenced a generated artifact.
    /// Append-only; no uniqueness constraint.
    pub fn link_to_content(
        &self,
        content_id: i64,
        knowledge_id: i64,
        relevance: f32,
    ) -> Result<()> {
        self.db.conn().execute(
            "INSERT INTO content_knowledge_links (content_id, knowledge_id, relevance_score, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                content_id,
                knowledge_id,
                f64::from(relevance),
                Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
            ],
        )?;
        Ok(())
    }

    /// Knowledge items that influenced one generated artifact, most
    /// relevant first.
    pub fn linked_knowledge(&self, content_id: i64) -> Result<Vec<KnowledgeItem>> {
        let mut stmt = self.db.conn().prepare(
            "SELECT k.id, k.source_type, k.source_id, k.source_url, k.author, k.content,
                    k.insight, k.embedding, k.attribution_required, k.approved, k.created_at
             FROM content_knowledge_links l
             JOIN knowledge k ON k.id = l.knowledge_id
             WHERE l.content_id = ?1
             ORDER BY l.relevance_score DESC, l.id",
        )?;
        let mut rows = stmt.query(params![content_id])?;

        let mut items = Vec::new();
        while let Some(row) = rows.next()? {
            items.push(Self::row_to_item(row)?);
        }
        Ok(items)
    }

    fn row_to_item(row: &rusqlite::Row) -> Result<KnowledgeItem> {
        let source_type: String = row.get(1)?;
        let blob: Option<Vec<u8>> = row.get(7)?;
        let attribution_required: i64 = row.get(8)?;
        let approved: i64 = row.get(9)?;
        let raw_ts: String = row.get(10)?;

        let embedding = match blob {
            Some(bytes) => Some(codec::deserialize(&bytes)?),
            None => None,
        };

        Ok(KnowledgeItem {
            id: Some(row.get(0)?),
            source_type: source_type.parse()?,
            source_id: row.get(2)?,
            source_url: row.get(3)?,
            author: row.get(4)?,
            content: row.get(5)?,
            insight: row.get(6)?,
            embedding,
            attribution_required: attribution_required != 0,
            approved: approved != 0,
            created_at: Some(
                DateTime::parse_from_rfc3339(&raw_ts)
                    .with_context(|| format!("invalid stored timestamp: {}", raw_ts))?
                    .with_timezone(&Utc),
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::MockEmbeddings;

    const DIM: usize = 4;

    fn store_with(embedder: MockEmbeddings) -> KnowledgeStore {
        let db = Arc::new(Database::open_in_memory().unwrap());
        KnowledgeStore::new(db, Arc::new(embedder))
    }

    fn item(source_type: SourceType, source_id: &str, content: &str) -> KnowledgeItem {
        KnowledgeItem {
            id: None,
            source_type,
            source_id: source_id.to_string(),
            source_url: None,
            author: "self".to_string(),
            content: content.to_string(),
            insight: None,
            embedding: None,
            attribution_required: false,
            approved: true,
            created_at: None,
        }
    }

    #[tokio::test]
    async fn test_exists_after_add() {
        let store = store_with(MockEmbeddings::new(DIM));
        assert!(!store.exists(SourceType::OwnPost, "p1").unwrap());

        store
            .add_item(item(SourceType::OwnPost, "p1", "agents need memory"))
            .await
            .unwrap();
        assert!(store.exists(SourceType::OwnPost, "p1").unwrap());
        assert!(!store.exists(SourceType::CuratedX, "p1").unwrap());
    }

    #[tokio::test]
    async fn test_add_item_upserts_on_identity() {
        let store = store_with(MockEmbeddings::new(DIM));

        let first = store
            .add_item(item(SourceType::OwnPost, "p1", "first version"))
            .await
            .unwrap();
        let original = store
            .get_by_source(SourceType::OwnPost, "p1")
            .unwrap()
            .unwrap();

        let second = store
            .add_item(item(SourceType::OwnPost, "p1", "second version"))
            .await
            .unwrap();
        assert_eq!(first, second, "upsert must keep the row id");

        let updated = store
            .get_by_source(SourceType::OwnPost, "p1")
            .unwrap()
            .unwrap();
        assert_eq!(updated.content, "second version");
        assert_eq!(
            updated.created_at, original.created_at,
            "upsert must preserve creation time"
        );
    }

    #[tokio::test]
    async fn test_add_item_embeds_insight_over_content() {
        let embedder = MockEmbeddings::new(DIM)
            .with_vector("the insight", vec![1.0, 0.0, 0.0, 0.0])
            .with_vector("the content", vec![0.0, 1.0, 0.0, 0.0]);
        let store = store_with(embedder);

        let mut with_insight = item(SourceType::CuratedX, "c1", "the content");
        with_insight.insight = Some("the insight".to_string());
        store.add_item(with_insight).await.unwrap();

        let stored = store
            .get_by_source(SourceType::CuratedX, "c1")
            .unwrap()
            .unwrap();
        assert_eq!(stored.embedding.unwrap(), vec![1.0, 0.0, 0.0, 0.0]);
    }

    #[tokio::test]
    async fn test_add_item_keeps_supplied_embedding() {
        let store = store_with(MockEmbeddings::new(DIM));
        let mut pinned = item(SourceType::OwnPost, "p1", "some text");
        pinned.embedding = Some(vec![0.5, 0.5, 0.5, 0.5]);
        store.add_item(pinned).await.unwrap();

        // The supplied vector is stored as-is, not recomputed from text
        let stored = store
            .get_by_source(SourceType::OwnPost, "p1")
            .unwrap()
            .unwrap();
        assert_eq!(stored.embedding.unwrap(), vec![0.5, 0.5, 0.5, 0.5]);
    }

    #[tokio::test]
    async fn test_add_item_rejects_wrong_dimension() {
        let store = store_with(MockEmbeddings::new(DIM));
        let mut bad = item(SourceType::OwnPost, "p1", "text");
        bad.embedding = Some(vec![1.0, 2.0]);
        assert!(store.add_item(bad).await.is_err());
    }

    #[tokio::test]
    async fn test_search_filters_and_ranks() {
        let embedder = MockEmbeddings::new(DIM)
            .with_vector("query", vec![1.0, 0.0, 0.0, 0.0])
            .with_vector("close", vec![0.95, 0.312, 0.0, 0.0])
            .with_vector("mid", vec![0.6, 0.8, 0.0, 0.0])
            .with_vector("far", vec![0.3, 0.954, 0.0, 0.0]);
        let store = store_with(embedder);

        store
            .add_item(item(SourceType::OwnPost, "a", "close"))
            .await
            .unwrap();
        store
            .add_item(item(SourceType::OwnPost, "b", "mid"))
            .await
            .unwrap();
        store
            .add_item(item(SourceType::OwnPost, "c", "far"))
            .await
            .unwrap();

        let results = store
            .search_similar("query", &SearchParams::default())
            .await
            .unwrap();

        // "far" (similarity 0.3) is below the 0.5 floor
        let ids: Vec<&str> = results.iter().map(|(i, _)| i.source_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!(results[0].1 > 0.94);
        assert!((results[1].1 - 0.6).abs() < 1e-3);
    }

    #[tokio::test]
    async fn test_search_excludes_unapproved() {
        let embedder = MockEmbeddings::new(DIM)
            .with_vector("query", vec![1.0, 0.0, 0.0, 0.0])
            .with_vector("match", vec![1.0, 0.0, 0.0, 0.0]);
        let store = store_with(embedder);

        let mut unapproved = item(SourceType::CuratedX, "c1", "match");
        unapproved.approved = false;
        store.add_item(unapproved).await.unwrap();

        let results = store
            .search_similar("query", &SearchParams::default())
            .await
            .unwrap();
        assert!(results.is_empty());

        let all = store
            .search_similar(
                "query",
                &SearchParams {
                    approved_only: false,
                    ..SearchParams::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn test_search_source_type_filter_and_limit() {
        let embedder = MockEmbeddings::new(DIM)
            .with_vector("query", vec![1.0, 0.0, 0.0, 0.0])
            .with_vector("post", vec![1.0, 0.0, 0.0, 0.0])
            .with_vector("article", vec![0.9, 0.436, 0.0, 0.0]);
        let store = store_with(embedder);

        store
            .add_item(item(SourceType::OwnPost, "p", "post"))
            .await
            .unwrap();
        store
            .add_item(item(SourceType::CuratedArticle, "a", "article"))
            .await
            .unwrap();

        let only_articles = store
            .search_similar(
                "query",
                &SearchParams {
                    source_types: Some(vec![SourceType::CuratedArticle]),
                    ..SearchParams::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(only_articles.len(), 1);
        assert_eq!(only_articles[0].0.source_id, "a");

        let top_one = store
            .search_similar(
                "query",
                &SearchParams {
                    limit: 1,
                    ..SearchParams::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(top_one.len(), 1);
        assert_eq!(top_one[0].0.source_id, "p");
    }

    #[tokio::test]
    async fn test_get_own_insights_newest_first() {
        let store = store_with(MockEmbeddings::new(DIM));
        store
            .add_item(item(SourceType::OwnPost, "p1", "first"))
            .await
            .unwrap();
        store
            .add_item(item(SourceType::OwnConversation, "m1", "second"))
            .await
            .unwrap();
        store
            .add_item(item(SourceType::CuratedX, "c1", "curated"))
            .await
            .unwrap();

        let insights = store.get_own_insights(50).unwrap();
        assert_eq!(insights.len(), 2, "curated sources are excluded");
        assert_eq!(insights[0].source_id, "m1");
        assert_eq!(insights[1].source_id, "p1");

        let limited = store.get_own_insights(1).unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn test_link_to_content_append_only() {
        let store = store_with(MockEmbeddings::new(DIM));
        let knowledge_id = store
            .add_item(item(SourceType::OwnPost, "p1", "insight"))
            .await
            .unwrap();

        store.link_to_content(7, knowledge_id, 0.9).unwrap();
        store.link_to_content(7, knowledge_id, 0.9).unwrap();

        let count: i64 = store
            .db
            .conn()
            .query_row(
                "SELECT COUNT(*) FROM content_knowledge_links WHERE content_id = 7",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn test_source_type_round_trip() {
        for st in [
            SourceType::OwnPost,
            SourceType::OwnConversation,
            SourceType::CuratedX,
            SourceType::CuratedArticle,
        ] {
            assert_eq!(st.as_str().parse::<SourceType>().unwrap(), st);
        }
        assert!("podcast".parse::<SourceType>().is_err());
    }
}
