//! The backend contract (`BaseClient`), its structured request types, and the
//! user-facing [`Client`] that hands out [`Collection`] handles.
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::admin::{AdminApi, AdminClient};
use crate::collection::Collection;
use crate::config::{CollectionOptions, DEFAULT_DISTANCE, EmbeddedConfig, HnswConfig};
use crate::connection::{BaseConnection, Row};
use crate::detect::BackendKind;
use crate::embedding::{EmbeddingChoice, EmbeddingFunction};
use crate::embedded::{EmbeddedClient, EmbeddedEngine};
use crate::error::{Result, SeekDbError};
use crate::filters::{DocFilter, Filter, RecordFilter};
use crate::hybrid::HybridRank;
use crate::memory::MemoryEngine;
use crate::meta::CollectionNames;
use crate::query_result::QueryResult;
use crate::types::{
    CollectionDescription, CollectionInfo, Embeddings, GetResult, Include, Metadata,
};
use crate::version::Version;

/// Records for add/update/upsert, as parallel lists keyed by `ids`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RecordBatch {
    pub ids: Vec<String>,
    pub embeddings: Option<Embeddings>,
    pub metadatas: Option<Vec<Metadata>>,
    pub documents: Option<Vec<String>>,
}

/// Borrowed view of one record in a [`RecordBatch`].
#[derive(Clone, Copy, Debug)]
pub struct RecordRef<'a> {
    pub id: &'a str,
    pub embedding: Option<&'a [f32]>,
    pub metadata: Option<&'a Metadata>,
    pub document: Option<&'a str>,
}

impl RecordBatch {
    pub fn new<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            ids: ids.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn with_embeddings(mut self, embeddings: Embeddings) -> Self {
        self.embeddings = Some(embeddings);
        self
    }

    pub fn with_metadatas(mut self, metadatas: Vec<Metadata>) -> Self {
        self.metadatas = Some(metadatas);
        self
    }

    pub fn with_documents<I, S>(mut self, documents: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.documents = Some(documents.into_iter().map(Into::into).collect());
        self
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Whether anything besides ids is carried.
    pub fn has_fields(&self) -> bool {
        self.embeddings.is_some() || self.metadatas.is_some() || self.documents.is_some()
    }

    /// Ids non-empty and unique, every provided list as long as `ids`, vectors of `dimension`.
    pub fn validate(&self, dimension: u32) -> Result<()> {
        if self.ids.is_empty() {
            return Err(SeekDbError::InvalidArgument("ids must not be empty".into()));
        }
        if let Some(id) = self.ids.iter().find(|id| id.is_empty()) {
            return Err(SeekDbError::InvalidArgument(format!(
                "ids must be non-empty strings, got {id:?}"
            )));
        }
        let mut seen = std::collections::HashSet::with_capacity(self.ids.len());
        if let Some(dup) = self.ids.iter().find(|id| !seen.insert(id.as_str())) {
            return Err(SeekDbError::InvalidArgument(format!(
                "duplicate id `{dup}` within one batch"
            )));
        }

        let n = self.ids.len();
        let check = |len: Option<usize>, what: &str| match len {
            Some(len) if len != n => Err(SeekDbError::InvalidArgument(format!(
                "{what} length {len} does not match ids length {n}"
            ))),
            _ => Ok(()),
        };
        check(self.embeddings.as_ref().map(Vec::len), "embeddings")?;
        check(self.metadatas.as_ref().map(Vec::len), "metadatas")?;
        check(self.documents.as_ref().map(Vec::len), "documents")?;

        for (i, emb) in self.embeddings.iter().flatten().enumerate() {
            check_dimension(emb.len(), dimension, || format!("embedding for `{}`", self.ids[i]))?;
        }
        if let Some(meta) = self.metadatas.iter().flatten().find(|m| !m.is_object()) {
            return Err(SeekDbError::InvalidArgument(format!(
                "metadata must be a JSON object, got {meta}"
            )));
        }
        Ok(())
    }

    pub fn records(&self) -> impl Iterator<Item = RecordRef<'_>> {
        self.ids.iter().enumerate().map(|(i, id)| RecordRef {
            id,
            embedding: self.embeddings.as_ref().and_then(|e| e.get(i)).map(Vec::as_slice),
            metadata: self.metadatas.as_ref().and_then(|m| m.get(i)),
            document: self.documents.as_ref().and_then(|d| d.get(i)).map(String::as_str),
        })
    }
}

pub(crate) fn check_dimension(
    got: usize,
    expected: u32,
    what: impl FnOnce() -> String,
) -> Result<()> {
    if got != expected as usize {
        return Err(SeekDbError::InvalidArgument(format!(
            "{} has dimension {got}, collection expects {expected}",
            what()
        )));
    }
    Ok(())
}

/// Nearest-neighbor search over resolved query vectors.
#[derive(Clone, Debug)]
pub struct QueryRequest {
    pub query_embeddings: Embeddings,
    pub n_results: usize,
    pub where_meta: Option<Filter>,
    pub where_document: Option<DocFilter>,
    pub include: Include,
}

/// Filtered fetch without ranking.
#[derive(Clone, Debug, Default)]
pub struct GetRequest {
    pub filter: RecordFilter,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    pub include: Include,
}

/// Vector ranking restricted to filter-matching records, optionally fused with
/// a full-text branch through `rank`.
#[derive(Clone, Debug)]
pub struct HybridSearchRequest {
    pub query_embeddings: Embeddings,
    /// Full-text query for the keyword branch of a ranked search.
    pub query_text: Option<String>,
    pub where_meta: Option<Filter>,
    pub where_document: Option<DocFilter>,
    pub n_results: usize,
    pub rank: Option<HybridRank>,
    pub include: Include,
}

/// Contract every backend implements; [`Collection`] talks only to this.
#[async_trait]
pub trait BaseClient: BaseConnection + AdminApi {
    async fn create_collection(&self, name: &str, config: &HnswConfig) -> Result<CollectionInfo>;

    async fn get_collection(&self, name: &str) -> Result<CollectionInfo>;

    async fn delete_collection(&self, name: &str) -> Result<()>;

    async fn list_collections(&self) -> Result<Vec<CollectionInfo>>;

    async fn has_collection(&self, name: &str) -> Result<bool> {
        match self.get_collection(name).await {
            Ok(_) => Ok(true),
            Err(SeekDbError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Insert new records; `DuplicateId` if any id exists.
    async fn collection_add(&self, info: &CollectionInfo, batch: RecordBatch) -> Result<()>;

    /// Change provided fields of existing records; `NotFound` if any id is absent.
    async fn collection_update(&self, info: &CollectionInfo, batch: RecordBatch) -> Result<()>;

    async fn collection_upsert(&self, info: &CollectionInfo, batch: RecordBatch) -> Result<()>;

    /// Remove matching records, returning how many existed.
    async fn collection_delete(&self, info: &CollectionInfo, filter: RecordFilter) -> Result<u64>;

    async fn collection_query(
        &self,
        info: &CollectionInfo,
        request: QueryRequest,
    ) -> Result<QueryResult>;

    async fn collection_get(&self, info: &CollectionInfo, request: GetRequest)
    -> Result<GetResult>;

    async fn collection_hybrid_search(
        &self,
        info: &CollectionInfo,
        request: HybridSearchRequest,
    ) -> Result<QueryResult>;

    async fn collection_count(&self, info: &CollectionInfo) -> Result<u64>;

    async fn collection_describe(&self, info: &CollectionInfo) -> Result<CollectionDescription> {
        let count = self.collection_count(info).await?;
        let current = self.get_collection(&info.name).await?;
        Ok(CollectionDescription {
            info: current,
            count,
            mode: self.mode().to_string(),
        })
    }
}

/// User-facing collection lifecycle.
#[async_trait]
pub trait ClientApi: Send + Sync {
    /// `AlreadyExists` if the name is taken.
    async fn create_collection(&self, name: &str, options: CollectionOptions)
    -> Result<Collection>;

    /// `NotFound` if absent. The handle binds the default embedding function.
    async fn get_collection(&self, name: &str) -> Result<Collection>;

    async fn delete_collection(&self, name: &str) -> Result<()>;

    async fn list_collections(&self) -> Result<Vec<Collection>>;

    async fn has_collection(&self, name: &str) -> Result<bool>;
}

/// Entry point: one backend behind the uniform collection API.
///
/// Cloning is cheap and clones share the backend connection.
#[derive(Clone)]
pub struct Client {
    inner: Arc<dyn BaseClient>,
}

impl Client {
    pub fn new(inner: Arc<dyn BaseClient>) -> Self {
        Self { inner }
    }

    /// Embedded engine at `config.path`; nothing is opened until first use.
    pub fn embedded<E>(config: EmbeddedConfig, engine: E) -> Self
    where
        E: EmbeddedEngine + 'static,
    {
        Self::new(Arc::new(EmbeddedClient::new(config, engine)))
    }

    /// Embedded client backed by the in-process [`MemoryEngine`].
    pub fn in_memory(config: EmbeddedConfig) -> Self {
        Self::embedded(config, MemoryEngine::new())
    }

    /// Remote seekdb server. Connects lazily.
    #[cfg(feature = "server")]
    pub fn server(config: crate::config::ServerConfig) -> Self {
        Self::new(Arc::new(crate::server::ServerClient::from_config(
            config,
            crate::server::ServerFlavor::SeekDb,
        )))
    }

    /// Remote OceanBase tenant. Connects lazily.
    #[cfg(feature = "server")]
    pub fn oceanbase(config: crate::config::ServerConfig) -> Self {
        Self::new(Arc::new(crate::server::ServerClient::from_config(
            config,
            crate::server::ServerFlavor::OceanBase,
        )))
    }

    /// Server mode when `SERVER_HOST` is set, otherwise the embedded engine
    /// described by `SEEKDB_PATH`/`SEEKDB_DATABASE`.
    pub fn from_env() -> Result<Self> {
        #[cfg(feature = "server")]
        if std::env::var("SERVER_HOST").is_ok() {
            return Ok(Self::server(crate::config::ServerConfig::from_env()?));
        }
        Ok(Self::in_memory(EmbeddedConfig::from_env()))
    }

    pub fn backend(&self) -> &Arc<dyn BaseClient> {
        &self.inner
    }

    pub fn admin(&self) -> AdminClient {
        AdminClient::new(Arc::clone(&self.inner))
    }

    pub fn mode(&self) -> &'static str {
        self.inner.mode()
    }

    pub async fn connect(&self) -> Result<()> {
        self.inner.connect().await
    }

    pub fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    pub async fn close(&self) -> Result<()> {
        self.inner.close().await
    }

    pub async fn execute(&self, sql: &str) -> Result<Vec<Row>> {
        self.inner.execute(sql).await
    }

    pub async fn detect_db_type_and_version(&self) -> Result<(BackendKind, Version)> {
        self.inner.detect_db_type_and_version().await
    }

    /// Handle for an existing collection with a chosen embedding function.
    pub async fn get_collection_with(
        &self,
        name: &str,
        embedding_function: EmbeddingChoice,
    ) -> Result<Collection> {
        CollectionNames::validate(name)?;
        let info = self.inner.get_collection(name).await?;
        Ok(Collection::new(
            Arc::clone(&self.inner),
            info,
            embedding_function.resolve(),
        ))
    }

    pub async fn get_or_create_collection(
        &self,
        name: &str,
        options: CollectionOptions,
    ) -> Result<Collection> {
        if self.inner.has_collection(name).await? {
            return self
                .get_collection_with(name, options.embedding_function)
                .await;
        }
        let choice = options.embedding_function.clone();
        match self.create_collection(name, options).await {
            Err(SeekDbError::AlreadyExists(_)) => self.get_collection_with(name, choice).await,
            other => other,
        }
    }

    pub async fn count_collection(&self) -> Result<usize> {
        Ok(self.inner.list_collections().await?.len())
    }

    fn handle(&self, info: CollectionInfo) -> Collection {
        Collection::new(
            Arc::clone(&self.inner),
            info,
            EmbeddingChoice::Default.resolve(),
        )
    }
}

#[async_trait]
impl ClientApi for Client {
    async fn create_collection(
        &self,
        name: &str,
        options: CollectionOptions,
    ) -> Result<Collection> {
        CollectionNames::validate(name)?;
        let ef = options.embedding_function.resolve();
        let config = resolve_hnsw_config(&options, ef.as_deref())?;

        let info = self.inner.create_collection(name, &config).await?;
        info!(
            collection = %name,
            dimension = info.dimension,
            distance = %info.distance,
            mode = self.inner.mode(),
            "collection created"
        );
        Ok(Collection::new(Arc::clone(&self.inner), info, ef))
    }

    async fn get_collection(&self, name: &str) -> Result<Collection> {
        self.get_collection_with(name, EmbeddingChoice::Default).await
    }

    async fn delete_collection(&self, name: &str) -> Result<()> {
        CollectionNames::validate(name)?;
        self.inner.delete_collection(name).await?;
        info!(collection = %name, mode = self.inner.mode(), "collection deleted");
        Ok(())
    }

    async fn list_collections(&self) -> Result<Vec<Collection>> {
        let infos = self.inner.list_collections().await?;
        Ok(infos.into_iter().map(|info| self.handle(info)).collect())
    }

    async fn has_collection(&self, name: &str) -> Result<bool> {
        CollectionNames::validate(name)?;
        self.inner.has_collection(name).await
    }
}

/// Work out the index settings for a new collection.
///
/// Explicit dimensions (`options.dimension`, `configuration.dimension`) must
/// agree with each other. The embedding function's dimension is consulted when
/// no explicit dimension exists, or when a custom function is bound; the
/// default model is not loaded just to double-check an explicit value.
pub(crate) fn resolve_hnsw_config(
    options: &CollectionOptions,
    ef: Option<&dyn EmbeddingFunction>,
) -> Result<HnswConfig> {
    let mut candidates: Vec<(u32, &str)> = Vec::new();
    if let Some(d) = options.dimension {
        candidates.push((d, "dimension"));
    }
    if let Some(cfg) = &options.configuration {
        candidates.push((cfg.dimension, "configuration.dimension"));
    }

    let probe_ef = candidates.is_empty()
        || matches!(options.embedding_function, EmbeddingChoice::Custom(_));
    if let (true, Some(ef)) = (probe_ef, ef) {
        let d = ef.dimension()?;
        let d = u32::try_from(d).map_err(|_| {
            SeekDbError::InvalidArgument(format!("embedding dimension {d} out of range"))
        })?;
        candidates.push((d, "embedding function dimension"));
    }

    let Some(&(dimension, _)) = candidates.first() else {
        return Err(SeekDbError::InvalidArgument(
            "dimension is required when no embedding function is bound".into(),
        ));
    };
    if let Some((other, source)) = candidates.iter().find(|(d, _)| *d != dimension) {
        return Err(SeekDbError::InvalidArgument(format!(
            "{source} {other} conflicts with {} {dimension}",
            candidates[0].1
        )));
    }
    if dimension == 0 {
        return Err(SeekDbError::InvalidArgument(
            "dimension must be a positive integer".into(),
        ));
    }

    let mut config = options
        .configuration
        .clone()
        .unwrap_or_else(|| HnswConfig::new(dimension, DEFAULT_DISTANCE));
    config.dimension = dimension;
    if let Some(distance) = options.distance {
        config.distance = distance;
    }
    debug!(dimension, distance = %config.distance, "resolved collection index settings");
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DistanceMetric;
    use crate::embedding::HashEmbedding;
    use serde_json::json;

    #[test]
    fn batch_validation_checks_shapes() {
        let ok = RecordBatch::new(["a", "b"])
            .with_embeddings(vec![vec![0.0; 3], vec![1.0; 3]])
            .with_documents(["x", "y"]);
        assert!(ok.validate(3).is_ok());
        assert!(ok.validate(4).is_err());

        let short = RecordBatch::new(["a", "b"]).with_documents(["x"]);
        assert!(short.validate(3).is_err());

        let dup = RecordBatch::new(["a", "a"]);
        assert!(dup.validate(3).is_err());

        let bad_meta = RecordBatch::new(["a"]).with_metadatas(vec![json!(3)]);
        assert!(bad_meta.validate(3).is_err());

        assert!(RecordBatch::default().validate(3).is_err());
    }

    #[test]
    fn records_zip_parallel_lists() {
        let batch = RecordBatch::new(["a", "b"])
            .with_metadatas(vec![json!({"k": 1}), json!({"k": 2})]);
        let recs: Vec<_> = batch.records().collect();
        assert_eq!(recs[1].id, "b");
        assert_eq!(recs[1].metadata, Some(&json!({"k": 2})));
        assert!(recs[0].embedding.is_none());
        assert!(recs[0].document.is_none());
    }

    #[test]
    fn dimension_from_options_or_embedding() {
        let ef = HashEmbedding::new(5);
        let opts = CollectionOptions::new().embedding_function(EmbeddingChoice::custom(ef.clone()));
        let cfg = resolve_hnsw_config(&opts, Some(&ef)).unwrap();
        assert_eq!(cfg.dimension, 5);
        assert_eq!(cfg.distance, DistanceMetric::Cosine);

        let opts = CollectionOptions::new()
            .dimension(3)
            .distance(DistanceMetric::L2)
            .embedding_function(EmbeddingChoice::Disabled);
        let cfg = resolve_hnsw_config(&opts, None).unwrap();
        assert_eq!((cfg.dimension, cfg.distance), (3, DistanceMetric::L2));
    }

    #[test]
    fn conflicting_dimensions_are_rejected() {
        let ef = HashEmbedding::new(5);
        let opts = CollectionOptions::new()
            .dimension(3)
            .embedding_function(EmbeddingChoice::custom(ef.clone()));
        let err = resolve_hnsw_config(&opts, Some(&ef)).unwrap_err();
        assert!(matches!(err, SeekDbError::InvalidArgument(_)));

        let opts = CollectionOptions::new()
            .dimension(3)
            .configuration(HnswConfig::new(4, DistanceMetric::L2))
            .embedding_function(EmbeddingChoice::Disabled);
        assert!(resolve_hnsw_config(&opts, None).is_err());
    }

    #[test]
    fn missing_dimension_is_rejected() {
        let opts = CollectionOptions::new().embedding_function(EmbeddingChoice::Disabled);
        let err = resolve_hnsw_config(&opts, None).unwrap_err();
        assert!(matches!(err, SeekDbError::InvalidArgument(_)));
    }

    #[test]
    fn configuration_keeps_tuning() {
        let opts = CollectionOptions::new()
            .configuration(HnswConfig::new(8, DistanceMetric::InnerProduct).m(32))
            .embedding_function(EmbeddingChoice::Disabled);
        let cfg = resolve_hnsw_config(&opts, None).unwrap();
        assert_eq!(cfg.m, Some(32));
        assert_eq!(cfg.distance, DistanceMetric::InnerProduct);
    }
}
