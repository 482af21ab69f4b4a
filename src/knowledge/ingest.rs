//! Knowledge ingestion: extract an insight, embed it, store it.
//!
//! Every entry point checks `exists()` before touching any model API —
//! dedup happens before extraction and embedding, never after. Ingestion
//! errors are the caller's to log and skip; a bad item must not abort a
//! batch.

use anyhow::Result;

use super::store::{KnowledgeItem, KnowledgeStore, SourceType};
use crate::synthesis::model::ChatModel;

/// Prompts shorter than this carry no reusable insight.
const MIN_PROMPT_CHARS: usize = 50;

/// Article text is truncated at ingestion: this much stored, and a
/// shorter slice quoted to the extraction model.
const MAX_ARTICLE_STORED_CHARS: usize = 5000;
const MAX_ARTICLE_EXTRACT_CHARS: usize = 2000;

const EXTRACT_PROMPT: &str = "\
Extract the key insight or learning from this content.
Focus on:
- What's the core technical or strategic insight?
- What pattern or principle does this reveal?
- What would be valuable for someone building AI agents to know?

Return ONLY the insight in 1-2 sentences, no preamble.

Content:
{content}";

/// Extracts a 1-2 sentence insight from raw content.
pub struct InsightExtractor<M: ChatModel> {
    model: M,
}

impl<M: ChatModel> InsightExtractor<M> {
    pub fn new(model: M) -> Self {
        Self { model }
    }

    pub async fn extract_insight(&self, content: &str, context: Option<&str>) -> Result<String> {
        let mut prompt = EXTRACT_PROMPT.replace("{content}", content);
        if let Some(context) = context {
            prompt.push_str(&format!("\nContext: {}", context));
        }
        let insight = self.model.complete(&prompt, 200).await?;
        Ok(insight.trim().to_string())
    }
}

/// Ingest one of our own published posts. Own content is auto-approved
/// and needs no attribution. Returns `None` if already ingested.
pub async fn ingest_own_post<M: ChatModel>(
    store: &KnowledgeStore,
    extractor: &InsightExtractor<M>,
    post_id: &str,
    content: &str,
    url: &str,
    author: &str,
) -> Result<Option<i64>> {
    if store.exists(SourceType::OwnPost, post_id)? {
        return Ok(None);
    }

    let insight = extractor.extract_insight(content, None).await?;

    let id = store
        .add_item(KnowledgeItem {
            id: None,
            source_type: SourceType::OwnPost,
            source_id: post_id.to_string(),
            source_url: Some(url.to_string()),
            author: author.to_string(),
            content: content.to_string(),
            insight: Some(insight),
            embedding: None,
            attribution_required: false,
            approved: true,
            created_at: None,
        })
        .await?;
    Ok(Some(id))
}

/// Ingest a coding-session prompt. Short prompts are skipped — they
/// carry no reusable insight.
pub async fn ingest_own_conversation<M: ChatModel>(
    store: &KnowledgeStore,
    extractor: &InsightExtractor<M>,
    message_uuid: &str,
    prompt: &str,
    project_path: &str,
) -> Result<Option<i64>> {
    if store.exists(SourceType::OwnConversation, message_uuid)? {
        return Ok(None);
    }
    if prompt.len() < MIN_PROMPT_CHARS {
        return Ok(None);
    }

    let context = format!("Project: {}", project_path);
    let insight = extractor.extract_insight(prompt, Some(&context)).await?;

    let id = store
        .add_item(KnowledgeItem {
            id: None,
            source_type: SourceType::OwnConversation,
            source_id: message_uuid.to_string(),
            source_url: None,
            author: "self".to_string(),
            content: prompt.to_string(),
            insight: Some(insight),
            embedding: None,
            attribution_required: false,
            approved: true,
            created_at: None,
        })
        .await?;
    Ok(Some(id))
}

/// Ingest a curated external post. Attribution is required unless the
/// license is "open"; curated content is pre-approved.
pub async fn ingest_curated_post<M: ChatModel>(
    store: &KnowledgeStore,
    extractor: &InsightExtractor<M>,
    post_id: &str,
    content: &str,
    url: &str,
    author: &str,
    license: &str,
) -> Result<Option<i64>> {
    if store.exists(SourceType::CuratedX, post_id)? {
        return Ok(None);
    }

    let context = format!("Author: {}", author);
    let insight = extractor.extract_insight(content, Some(&context)).await?;

    let id = store
        .add_item(KnowledgeItem {
            id: None,
            source_type: SourceType::CuratedX,
            source_id: post_id.to_string(),
            source_url: Some(url.to_string()),
            author: author.to_string(),
            content: content.to_string(),
            insight: Some(insight),
            embedding: None,
            attribution_required: license != "open",
            approved: true,
            created_at: None,
        })
        .await?;
    Ok(Some(id))
}

/// Ingest a curated article, keyed by URL. Stored content is truncated;
/// the extraction model sees an even shorter slice.
pub async fn ingest_curated_article<M: ChatModel>(
    store: &KnowledgeStore,
    extractor: &InsightExtractor<M>,
    url: &str,
    content: &str,
    title: &str,
    author: &str,
    license: &str,
) -> Result<Option<i64>> {
    if store.exists(SourceType::CuratedArticle, url)? {
        return Ok(None);
    }

    let context = format!("Article: {} by {}", title, author);
    let insight = extractor
        .extract_insight(truncate(content, MAX_ARTICLE_EXTRACT_CHARS), Some(&context))
        .await?;

    let id = store
        .add_item(KnowledgeItem {
            id: None,
            source_type: SourceType::CuratedArticle,
            source_id: url.to_string(),
            source_url: Some(url.to_string()),
            author: author.to_string(),
            content: truncate(content, MAX_ARTICLE_STORED_CHARS).to_string(),
            insight: Some(insight),
            embedding: None,
            attribution_required: license != "open",
            approved: true,
            created_at: None,
        })
        .await?;
    Ok(Some(id))
}

fn truncate(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::embeddings::MockEmbeddings;
    use crate::storage::Database;
    use crate::synthesis::model::MockModel;

    fn store() -> KnowledgeStore {
        let db = Arc::new(Database::open_in_memory().unwrap());
        KnowledgeStore::new(db, Arc::new(MockEmbeddings::new(8)))
    }

    fn extractor() -> InsightExtractor<MockModel> {
        InsightExtractor::new(MockModel::new(vec!["the extracted insight"]))
    }

    #[tokio::test]
    async fn test_ingest_own_post_stores_insight() {
        let store = store();
        let id = ingest_own_post(&store, &extractor(), "p1", "post body", "https://x.com/1", "me")
            .await
            .unwrap();
        assert!(id.is_some());

        let item = store
            .get_by_source(SourceType::OwnPost, "p1")
            .unwrap()
            .unwrap();
        assert_eq!(item.insight.as_deref(), Some("the extracted insight"));
        assert!(item.approved);
        assert!(!item.attribution_required);
        assert!(item.embedding.is_some());
    }

    #[tokio::test]
    async fn test_duplicate_skips_model_call() {
        let store = store();
        let extractor = extractor();
        ingest_own_post(&store, &extractor, "p1", "body", "u", "me")
            .await
            .unwrap();

        let second = ingest_own_post(&store, &extractor, "p1", "body", "u", "me")
            .await
            .unwrap();
        assert!(second.is_none());
        assert_eq!(
            extractor.model.prompts().len(),
            1,
            "dedup must happen before the extraction call"
        );
    }

    #[tokio::test]
    async fn test_short_prompt_skipped() {
        let store = store();
        let result = ingest_own_conversation(&store, &extractor(), "uuid-1", "short", "/proj")
            .await
            .unwrap();
        assert!(result.is_none());
        assert!(!store.exists(SourceType::OwnConversation, "uuid-1").unwrap());
    }

    #[tokio::test]
    async fn test_substantial_prompt_ingested() {
        let store = store();
        let prompt = "help me track down why the scheduler deadlocks when two workers \
                      grab the same queue slot";
        let id = ingest_own_conversation(&store, &extractor(), "uuid-1", prompt, "/proj")
            .await
            .unwrap();
        assert!(id.is_some());
    }

    #[tokio::test]
    async fn test_curated_license_controls_attribution() {
        let store = store();
        ingest_curated_post(&store, &extractor(), "c1", "text", "url", "alice", "open")
            .await
            .unwrap();
        ingest_curated_post(&store, &extractor(), "c2", "text", "url", "bob", "restricted")
            .await
            .unwrap();

        let open = store
            .get_by_source(SourceType::CuratedX, "c1")
            .unwrap()
            .unwrap();
        assert!(!open.attribution_required);

        let restricted = store
            .get_by_source(SourceType::CuratedX, "c2")
            .unwrap()
            .unwrap();
        assert!(restricted.attribution_required);
    }

    #[tokio::test]
    async fn test_article_content_truncated() {
        let store = store();
        let long = "a".repeat(12_000);
        ingest_curated_article(
            &store,
            &extractor(),
            "https://blog/post",
            &long,
            "Title",
            "alice",
            "attribution_required",
        )
        .await
        .unwrap();

        let item = store
            .get_by_source(SourceType::CuratedArticle, "https://blog/post")
            .unwrap()
            .unwrap();
        assert_eq!(item.content.len(), 5000);
    }
}
