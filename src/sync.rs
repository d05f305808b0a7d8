use std::sync::Arc;

use crate::admin::AdminApi;
use crate::client::{Client, ClientApi, RecordBatch};
use crate::collection::{Collection, HybridSearch, Query};
use crate::config::{CollectionOptions, DistanceMetric, EmbeddedConfig};
use crate::connection::Row;
use crate::detect::BackendKind;
use crate::embedded::EmbeddedEngine;
use crate::embedding::EmbeddingChoice;
use crate::error::{Result, SeekDbError};
use crate::filters::{DocFilter, Filter, RecordFilter};
use crate::query_result::QueryResult;
use crate::types::{CollectionDescription, Database, Embedding, GetResult, IncludeField};
use crate::version::Version;

/// Tokio runtime plus the async client it drives.
struct Inner {
    rt: tokio::runtime::Runtime,
    client: Client,
}

impl Inner {
    fn block_on<F: std::future::Future>(&self, fut: F) -> F::Output {
        self.rt.block_on(fut)
    }
}

/// Blocking wrapper around [`Client`].
///
/// Every call runs on an internal Tokio runtime with `block_on`. Do not call
/// these APIs from inside another Tokio runtime; use [`Client`] there.
#[derive(Clone)]
pub struct SyncClient {
    inner: Arc<Inner>,
}

impl SyncClient {
    pub fn new(client: Client) -> Result<Self> {
        let rt = tokio::runtime::Runtime::new()
            .map_err(|e| SeekDbError::Other(anyhow::Error::new(e)))?;
        Ok(Self {
            inner: Arc::new(Inner { rt, client }),
        })
    }

    pub fn embedded<E>(config: EmbeddedConfig, engine: E) -> Result<Self>
    where
        E: EmbeddedEngine + 'static,
    {
        Self::new(Client::embedded(config, engine))
    }

    pub fn in_memory(config: EmbeddedConfig) -> Result<Self> {
        Self::new(Client::in_memory(config))
    }

    #[cfg(feature = "server")]
    pub fn server(config: crate::config::ServerConfig) -> Result<Self> {
        Self::new(Client::server(config))
    }

    #[cfg(feature = "server")]
    pub fn oceanbase(config: crate::config::ServerConfig) -> Result<Self> {
        Self::new(Client::oceanbase(config))
    }

    pub fn from_env() -> Result<Self> {
        Self::new(Client::from_env()?)
    }

    /// The async client behind this wrapper.
    pub fn client(&self) -> &Client {
        &self.inner.client
    }

    pub fn connect(&self) -> Result<()> {
        self.inner.block_on(self.inner.client.connect())
    }

    pub fn close(&self) -> Result<()> {
        self.inner.block_on(self.inner.client.close())
    }

    pub fn execute(&self, sql: &str) -> Result<Vec<Row>> {
        self.inner.block_on(self.inner.client.execute(sql))
    }

    pub fn detect_db_type_and_version(&self) -> Result<(BackendKind, Version)> {
        self.inner
            .block_on(self.inner.client.detect_db_type_and_version())
    }

    // Collection management

    pub fn create_collection(&self, name: &str, options: CollectionOptions) -> Result<SyncCollection> {
        let collection = self
            .inner
            .block_on(self.inner.client.create_collection(name, options))?;
        Ok(self.wrap(collection))
    }

    pub fn get_collection(&self, name: &str) -> Result<SyncCollection> {
        let collection = self.inner.block_on(self.inner.client.get_collection(name))?;
        Ok(self.wrap(collection))
    }

    pub fn get_collection_with(
        &self,
        name: &str,
        embedding_function: EmbeddingChoice,
    ) -> Result<SyncCollection> {
        let collection = self
            .inner
            .block_on(self.inner.client.get_collection_with(name, embedding_function))?;
        Ok(self.wrap(collection))
    }

    pub fn get_or_create_collection(
        &self,
        name: &str,
        options: CollectionOptions,
    ) -> Result<SyncCollection> {
        let collection = self
            .inner
            .block_on(self.inner.client.get_or_create_collection(name, options))?;
        Ok(self.wrap(collection))
    }

    pub fn delete_collection(&self, name: &str) -> Result<()> {
        self.inner
            .block_on(self.inner.client.delete_collection(name))
    }

    pub fn list_collections(&self) -> Result<Vec<SyncCollection>> {
        let collections = self.inner.block_on(self.inner.client.list_collections())?;
        Ok(collections.into_iter().map(|c| self.wrap(c)).collect())
    }

    pub fn has_collection(&self, name: &str) -> Result<bool> {
        self.inner.block_on(self.inner.client.has_collection(name))
    }

    pub fn count_collection(&self) -> Result<usize> {
        self.inner.block_on(self.inner.client.count_collection())
    }

    // Database management

    pub fn create_database(&self, name: &str, tenant: Option<&str>) -> Result<()> {
        let admin = self.inner.client.admin();
        self.inner.block_on(admin.create_database(name, tenant))
    }

    pub fn get_database(&self, name: &str, tenant: Option<&str>) -> Result<Database> {
        let admin = self.inner.client.admin();
        self.inner.block_on(admin.get_database(name, tenant))
    }

    pub fn delete_database(&self, name: &str, tenant: Option<&str>) -> Result<()> {
        let admin = self.inner.client.admin();
        self.inner.block_on(admin.delete_database(name, tenant))
    }

    pub fn list_databases(
        &self,
        limit: Option<u32>,
        offset: Option<u32>,
        tenant: Option<&str>,
    ) -> Result<Vec<Database>> {
        let admin = self.inner.client.admin();
        self.inner
            .block_on(admin.list_databases(limit, offset, tenant))
    }

    fn wrap(&self, collection: Collection) -> SyncCollection {
        SyncCollection {
            inner: Arc::clone(&self.inner),
            collection,
        }
    }
}

/// Blocking wrapper around [`Collection`], sharing its client's runtime.
#[derive(Clone)]
pub struct SyncCollection {
    inner: Arc<Inner>,
    collection: Collection,
}

impl SyncCollection {
    pub fn collection(&self) -> &Collection {
        &self.collection
    }

    pub fn name(&self) -> &str {
        self.collection.name()
    }

    pub fn dimension(&self) -> u32 {
        self.collection.dimension()
    }

    pub fn distance(&self) -> DistanceMetric {
        self.collection.distance()
    }

    pub fn add(&self, batch: RecordBatch) -> Result<()> {
        self.inner.block_on(self.collection.add(batch))
    }

    pub fn update(&self, batch: RecordBatch) -> Result<()> {
        self.inner.block_on(self.collection.update(batch))
    }

    pub fn upsert(&self, batch: RecordBatch) -> Result<()> {
        self.inner.block_on(self.collection.upsert(batch))
    }

    pub fn delete(&self, filter: RecordFilter) -> Result<u64> {
        self.inner.block_on(self.collection.delete(filter))
    }

    pub fn query(&self, query: Query) -> Result<QueryResult> {
        self.inner.block_on(self.collection.query(query))
    }

    pub fn query_embeddings(
        &self,
        query_embeddings: &[Embedding],
        n_results: usize,
        where_meta: Option<&Filter>,
        where_document: Option<&DocFilter>,
        include: Option<&[IncludeField]>,
    ) -> Result<QueryResult> {
        self.inner.block_on(self.collection.query_embeddings(
            query_embeddings,
            n_results,
            where_meta,
            where_document,
            include,
        ))
    }

    pub fn query_texts(
        &self,
        texts: &[String],
        n_results: usize,
        where_meta: Option<&Filter>,
        where_document: Option<&DocFilter>,
        include: Option<&[IncludeField]>,
    ) -> Result<QueryResult> {
        self.inner.block_on(self.collection.query_texts(
            texts,
            n_results,
            where_meta,
            where_document,
            include,
        ))
    }

    pub fn hybrid_search(&self, search: HybridSearch) -> Result<QueryResult> {
        self.inner.block_on(self.collection.hybrid_search(search))
    }

    pub fn get(
        &self,
        filter: RecordFilter,
        limit: Option<usize>,
        offset: Option<usize>,
        include: Option<&[IncludeField]>,
    ) -> Result<GetResult> {
        self.inner
            .block_on(self.collection.get(filter, limit, offset, include))
    }

    pub fn count(&self) -> Result<u64> {
        self.inner.block_on(self.collection.count())
    }

    pub fn peek(&self, limit: usize) -> Result<GetResult> {
        self.inner.block_on(self.collection.peek(limit))
    }

    pub fn describe(&self) -> Result<CollectionDescription> {
        self.inner.block_on(self.collection.describe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbedding;

    #[test]
    fn blocking_round_trip_on_memory_engine() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let client = SyncClient::in_memory(EmbeddedConfig::new(dir.path()))?;
        let coll = client.create_collection(
            "notes",
            CollectionOptions::new().embedding_function(EmbeddingChoice::custom(HashEmbedding::new(8))),
        )?;
        coll.add(RecordBatch::new(["a", "b"]).with_documents(["alpha", "beta"]))?;
        assert_eq!(coll.count()?, 2);

        let res = coll.query(Query::texts(["alpha"]).n_results(1))?;
        assert_eq!(res.ids(), vec![vec!["a"]]);
        assert!(client.has_collection("notes")?);
        assert_eq!(client.count_collection()?, 1);
        Ok(())
    }
}
