use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::client::{BaseClient, GetRequest, HybridSearchRequest, QueryRequest, RecordBatch};
use crate::config::DistanceMetric;
use crate::embedding::{EmbeddingChoice, EmbeddingFunction};
use crate::error::{Result, SeekDbError};
use crate::filters::{DocFilter, Filter, RecordFilter};
use crate::hybrid::HybridRank;
use crate::query_result::QueryResult;
use crate::types::{
    CollectionDescription, CollectionInfo, Embedding, Embeddings, GetResult, Include,
    IncludeField,
};

/// Number of results when a query does not say.
pub const DEFAULT_N_RESULTS: usize = 10;

/// Nearest-neighbor query input. Vectors take precedence over texts.
#[derive(Clone, Debug)]
pub struct Query {
    pub query_embeddings: Option<Embeddings>,
    pub query_texts: Option<Vec<String>>,
    pub n_results: usize,
    pub where_meta: Option<Filter>,
    pub where_document: Option<DocFilter>,
    pub include: Option<Vec<IncludeField>>,
}

impl Default for Query {
    fn default() -> Self {
        Self {
            query_embeddings: None,
            query_texts: None,
            n_results: DEFAULT_N_RESULTS,
            where_meta: None,
            where_document: None,
            include: None,
        }
    }
}

impl Query {
    pub fn embeddings(embeddings: Embeddings) -> Self {
        Self {
            query_embeddings: Some(embeddings),
            ..Self::default()
        }
    }

    pub fn texts<I, S>(texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            query_texts: Some(texts.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    pub fn n_results(mut self, n: usize) -> Self {
        self.n_results = n;
        self
    }

    pub fn with_where(mut self, filter: Filter) -> Self {
        self.where_meta = Some(filter);
        self
    }

    pub fn with_where_document(mut self, filter: DocFilter) -> Self {
        self.where_document = Some(filter);
        self
    }

    pub fn include(mut self, fields: &[IncludeField]) -> Self {
        self.include = Some(fields.to_vec());
        self
    }
}

/// Hybrid search input: a vector branch restricted by filters, optionally
/// fused with a keyword branch through `rank`.
#[derive(Clone, Debug)]
pub struct HybridSearch {
    pub query: Query,
    /// Keyword text for the full-text branch.
    pub query_text: Option<String>,
    pub rank: Option<HybridRank>,
}

impl HybridSearch {
    pub fn new(query: Query) -> Self {
        Self {
            query,
            query_text: None,
            rank: None,
        }
    }

    pub fn query_text(mut self, text: impl Into<String>) -> Self {
        self.query_text = Some(text.into());
        self
    }

    pub fn rank(mut self, rank: HybridRank) -> Self {
        self.rank = Some(rank);
        self
    }
}

/// Handle to one collection on some backend.
///
/// Holds the backend, the collection's schema facts, and the embedding
/// function used to derive vectors from documents and query texts.
#[derive(Clone)]
pub struct Collection {
    client: Arc<dyn BaseClient>,
    info: CollectionInfo,
    embedding_function: Option<Arc<dyn EmbeddingFunction>>,
}

impl fmt::Debug for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collection")
            .field("info", &self.info)
            .field("mode", &self.client.mode())
            .field("embedding_function", &self.embedding_function.is_some())
            .finish()
    }
}

impl Collection {
    pub fn new(
        client: Arc<dyn BaseClient>,
        info: CollectionInfo,
        embedding_function: Option<Arc<dyn EmbeddingFunction>>,
    ) -> Self {
        Self {
            client,
            info,
            embedding_function,
        }
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn id(&self) -> Option<&str> {
        self.info.id.as_deref()
    }

    pub fn dimension(&self) -> u32 {
        self.info.dimension
    }

    pub fn distance(&self) -> DistanceMetric {
        self.info.distance
    }

    pub fn info(&self) -> &CollectionInfo {
        &self.info
    }

    pub fn embedding_function(&self) -> Option<&Arc<dyn EmbeddingFunction>> {
        self.embedding_function.as_ref()
    }

    /// Same collection with a different embedding function bound.
    pub fn with_embedding_function(mut self, choice: EmbeddingChoice) -> Self {
        self.embedding_function = choice.resolve();
        self
    }

    // DML

    /// Insert new records. Records without vectors get them from their
    /// documents through the bound embedding function.
    pub async fn add(&self, batch: RecordBatch) -> Result<()> {
        batch.validate(self.dimension())?;
        let batch = self.materialize(batch, true).await?;
        let n = batch.len();
        self.client
            .collection_add(&self.info, batch)
            .await
            .map_err(|e| e.in_collection(self.name()))?;
        debug!(collection = %self.name(), records = n, "added");
        Ok(())
    }

    /// Change the provided fields of existing records. Metadata-only updates
    /// leave vectors and documents untouched.
    pub async fn update(&self, batch: RecordBatch) -> Result<()> {
        self.require_fields(&batch, "update")?;
        batch.validate(self.dimension())?;
        let batch = self.materialize(batch, false).await?;
        self.client
            .collection_update(&self.info, batch)
            .await
            .map_err(|e| e.in_collection(self.name()))
    }

    /// Update existing ids, insert the rest. A new id still needs a vector
    /// (given, or derivable from its document).
    pub async fn upsert(&self, batch: RecordBatch) -> Result<()> {
        self.require_fields(&batch, "upsert")?;
        batch.validate(self.dimension())?;
        let batch = self.materialize(batch, false).await?;
        self.client
            .collection_upsert(&self.info, batch)
            .await
            .map_err(|e| e.in_collection(self.name()))
    }

    /// Delete records matching every provided criterion; returns how many went.
    pub async fn delete(&self, filter: RecordFilter) -> Result<u64> {
        if filter.is_empty() {
            return Err(SeekDbError::InvalidArgument(
                "delete requires at least one of ids, where or where_document".into(),
            ));
        }
        filter.validate()?;
        let deleted = self
            .client
            .collection_delete(&self.info, filter)
            .await
            .map_err(|e| e.in_collection(self.name()))?;
        debug!(collection = %self.name(), deleted, "deleted");
        Ok(deleted)
    }

    // DQL

    pub async fn query(&self, query: Query) -> Result<QueryResult> {
        let request = self.query_request(query).await?;
        self.client
            .collection_query(&self.info, request)
            .await
            .map_err(|e| e.in_collection(self.name()))
    }

    pub async fn query_embeddings(
        &self,
        query_embeddings: &[Embedding],
        n_results: usize,
        where_meta: Option<&Filter>,
        where_document: Option<&DocFilter>,
        include: Option<&[IncludeField]>,
    ) -> Result<QueryResult> {
        self.query(Query {
            query_embeddings: Some(query_embeddings.to_vec()),
            query_texts: None,
            n_results,
            where_meta: where_meta.cloned(),
            where_document: where_document.cloned(),
            include: include.map(<[IncludeField]>::to_vec),
        })
        .await
    }

    pub async fn query_texts(
        &self,
        texts: &[String],
        n_results: usize,
        where_meta: Option<&Filter>,
        where_document: Option<&DocFilter>,
        include: Option<&[IncludeField]>,
    ) -> Result<QueryResult> {
        self.query(Query {
            query_embeddings: None,
            query_texts: Some(texts.to_vec()),
            n_results,
            where_meta: where_meta.cloned(),
            where_document: where_document.cloned(),
            include: include.map(<[IncludeField]>::to_vec),
        })
        .await
    }

    /// Vector search restricted to filter matches, fused with a keyword
    /// branch when a rank is given and the backend supports it.
    pub async fn hybrid_search(&self, search: HybridSearch) -> Result<QueryResult> {
        let base = self.query_request(search.query).await?;
        let request = HybridSearchRequest {
            query_embeddings: base.query_embeddings,
            query_text: search.query_text,
            where_meta: base.where_meta,
            where_document: base.where_document,
            n_results: base.n_results,
            rank: search.rank,
            include: base.include,
        };
        self.client
            .collection_hybrid_search(&self.info, request)
            .await
            .map_err(|e| e.in_collection(self.name()))
    }

    pub async fn get(
        &self,
        filter: RecordFilter,
        limit: Option<usize>,
        offset: Option<usize>,
        include: Option<&[IncludeField]>,
    ) -> Result<GetResult> {
        filter.validate()?;
        let mut include = Include::from_fields(include);
        include.distances = false;
        self.client
            .collection_get(
                &self.info,
                GetRequest {
                    filter,
                    limit,
                    offset,
                    include,
                },
            )
            .await
            .map_err(|e| e.in_collection(self.name()))
    }

    pub async fn count(&self) -> Result<u64> {
        self.client
            .collection_count(&self.info)
            .await
            .map_err(|e| e.in_collection(self.name()))
    }

    /// First `limit` records with everything but distances.
    pub async fn peek(&self, limit: usize) -> Result<GetResult> {
        self.get(
            RecordFilter::default(),
            Some(limit),
            None,
            Some(&[
                IncludeField::Documents,
                IncludeField::Metadatas,
                IncludeField::Embeddings,
            ]),
        )
        .await
    }

    pub async fn describe(&self) -> Result<CollectionDescription> {
        self.client
            .collection_describe(&self.info)
            .await
            .map_err(|e| e.in_collection(self.name()))
    }

    fn require_fields(&self, batch: &RecordBatch, op: &str) -> Result<()> {
        if batch.has_fields() {
            Ok(())
        } else {
            Err(SeekDbError::InvalidArgument(format!(
                "{op} needs at least one of embeddings, metadatas or documents"
            )))
        }
    }

    /// Fill in vectors from documents where the caller gave none.
    ///
    /// With `require_vectors` (add) every record must end up with one. Otherwise
    /// only changed documents need new vectors; records touching neither keep theirs.
    async fn materialize(&self, mut batch: RecordBatch, require_vectors: bool) -> Result<RecordBatch> {
        if batch.embeddings.is_some() {
            return Ok(batch);
        }
        let Some(documents) = batch.documents.as_ref() else {
            if require_vectors {
                return Err(SeekDbError::MissingVector(
                    "provide embeddings, or documents with an embedding function".into(),
                ));
            }
            return Ok(batch);
        };
        let ef = self.embedding_function.as_ref().ok_or_else(|| {
            SeekDbError::MissingVector(format!(
                "collection `{}` has no embedding function; provide embeddings with documents",
                self.name()
            ))
        })?;
        let embeddings = self.embed(ef.as_ref(), documents).await?;
        batch.embeddings = Some(embeddings);
        Ok(batch)
    }

    async fn embed(&self, ef: &dyn EmbeddingFunction, texts: &[String]) -> Result<Embeddings> {
        let embeddings = ef.embed_documents(texts).await?;
        if embeddings.len() != texts.len() {
            return Err(SeekDbError::Embedding(format!(
                "embedding function returned {} vectors for {} inputs",
                embeddings.len(),
                texts.len()
            )));
        }
        for emb in &embeddings {
            crate::client::check_dimension(emb.len(), self.dimension(), || {
                "embedding function output".to_string()
            })?;
        }
        Ok(embeddings)
    }

    async fn query_request(&self, query: Query) -> Result<QueryRequest> {
        if query.n_results == 0 {
            return Err(SeekDbError::InvalidArgument(
                "n_results must be at least 1".into(),
            ));
        }
        if let Some(filter) = &query.where_meta {
            filter.validate()?;
        }
        if let Some(filter) = &query.where_document {
            filter.validate()?;
        }

        let query_embeddings = match (query.query_embeddings, query.query_texts) {
            (Some(embeddings), _) => {
                for emb in &embeddings {
                    crate::client::check_dimension(emb.len(), self.dimension(), || {
                        "query embedding".to_string()
                    })?;
                }
                embeddings
            }
            (None, Some(texts)) => {
                let ef = self.embedding_function.as_ref().ok_or_else(|| {
                    SeekDbError::MissingVector(format!(
                        "collection `{}` has no embedding function; query with embeddings",
                        self.name()
                    ))
                })?;
                self.embed(ef.as_ref(), &texts).await?
            }
            (None, None) => {
                return Err(SeekDbError::InvalidArgument(
                    "query needs query_embeddings or query_texts".into(),
                ));
            }
        };
        if query_embeddings.is_empty() {
            return Err(SeekDbError::InvalidArgument(
                "query needs at least one query vector".into(),
            ));
        }

        Ok(QueryRequest {
            query_embeddings,
            n_results: query.n_results,
            where_meta: query.where_meta,
            where_document: query.where_document,
            include: Include::from_fields(query.include.as_deref()),
        })
    }
}
