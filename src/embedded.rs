//! Embedded backend: an in-process engine behind a synchronous call contract.
use std::fs;
use std::path::Path;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::admin::{AdminApi, DEFAULT_TENANT, check_tenant, paginate, validate_database_name};
use crate::client::{BaseClient, GetRequest, HybridSearchRequest, QueryRequest, RecordBatch};
use crate::config::{EmbeddedConfig, HnswConfig};
use crate::connection::{BaseConnection, Row};
use crate::detect::BackendKind;
use crate::error::{Result, SeekDbError};
use crate::filters::{DocFilter, Filter, RecordFilter};
use crate::query_result::QueryResult;
use crate::types::{
    CollectionInfo, Database, Document, Embedding, GetResult, Hit, Include, Metadata,
    RawQueryResult,
};
use crate::version::Version;

/// A record as an engine stores it.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StoredRecord {
    pub id: String,
    pub document: Option<Document>,
    pub metadata: Option<Metadata>,
    /// `None` for records written without a vector; those are never ranked.
    pub embedding: Option<Embedding>,
}

/// Native call contract of an embedded engine.
///
/// Collections are addressed by name inside a named database. Calls are
/// synchronous and expected to return quickly.
pub trait EmbeddedEngine: Send + Sync {
    /// Open (or create) the store rooted at `path`. Opening an open engine is a no-op.
    fn open(&self, path: &Path) -> Result<()>;

    fn close(&self) -> Result<()>;

    fn version(&self) -> Result<Version>;

    /// Run a raw statement against `database`.
    fn execute(&self, database: &str, statement: &str) -> Result<Vec<Row>>;

    /// `AlreadyExists` if present.
    fn create_database(&self, name: &str) -> Result<()>;

    fn has_database(&self, name: &str) -> Result<bool>;

    /// `NotFound` if absent.
    fn delete_database(&self, name: &str) -> Result<()>;

    /// Database names in ascending order.
    fn list_databases(&self) -> Result<Vec<String>>;

    fn create_collection(
        &self,
        database: &str,
        name: &str,
        config: &HnswConfig,
    ) -> Result<CollectionInfo>;

    fn get_collection(&self, database: &str, name: &str) -> Result<CollectionInfo>;

    fn delete_collection(&self, database: &str, name: &str) -> Result<()>;

    fn list_collections(&self, database: &str) -> Result<Vec<CollectionInfo>>;

    /// All-or-nothing; `DuplicateId` if any id exists.
    fn insert(&self, database: &str, collection: &str, batch: &RecordBatch) -> Result<()>;

    /// All-or-nothing; `NotFound` if any id is absent. Only provided fields change.
    fn update(&self, database: &str, collection: &str, batch: &RecordBatch) -> Result<()>;

    /// All-or-nothing; `MissingVector` for a new id without a vector.
    fn upsert(&self, database: &str, collection: &str, batch: &RecordBatch) -> Result<()>;

    fn delete(&self, database: &str, collection: &str, filter: &RecordFilter) -> Result<u64>;

    fn get(
        &self,
        database: &str,
        collection: &str,
        filter: &RecordFilter,
        limit: Option<usize>,
        offset: Option<usize>,
    ) -> Result<Vec<StoredRecord>>;

    /// Up to `k` filter-matching records closest to `vector`, closest first.
    fn search(
        &self,
        database: &str,
        collection: &str,
        vector: &[f32],
        k: usize,
        filter: &RecordFilter,
    ) -> Result<Vec<(StoredRecord, f32)>>;

    fn count(&self, database: &str, collection: &str) -> Result<u64>;
}

/// [`BaseClient`] over an [`EmbeddedEngine`], opened on first use.
pub struct EmbeddedClient<E> {
    config: EmbeddedConfig,
    engine: E,
    open: Mutex<bool>,
}

impl<E: EmbeddedEngine> EmbeddedClient<E> {
    pub fn new(config: EmbeddedConfig, engine: E) -> Self {
        Self {
            config,
            engine,
            open: Mutex::new(false),
        }
    }

    pub fn config(&self) -> &EmbeddedConfig {
        &self.config
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    fn database(&self) -> &str {
        &self.config.database
    }

    fn ensure_open(&self) -> Result<()> {
        let mut open = self.open.lock();
        if *open {
            return Ok(());
        }
        let path = &self.config.path;
        fs::create_dir_all(path).map_err(|e| SeekDbError::Connection {
            endpoint: path.display().to_string(),
            message: format!("cannot create database directory: {e}"),
        })?;
        self.engine.open(path)?;
        if !self.engine.has_database(self.database())? {
            self.engine.create_database(self.database())?;
        }
        *open = true;
        info!(path = %path.display(), database = %self.database(), "embedded engine opened");
        Ok(())
    }

    /// Run `f` against an open engine.
    fn with_engine<T>(&self, f: impl FnOnce(&E, &str) -> Result<T>) -> Result<T> {
        self.ensure_open()?;
        f(&self.engine, self.database())
    }

    fn search_groups(
        &self,
        collection: &str,
        vectors: &[Embedding],
        k: usize,
        filter: &RecordFilter,
        include: Include,
    ) -> Result<QueryResult> {
        let mut raw = RawQueryResult::empty(include);
        for vector in vectors {
            let hits = self
                .with_engine(|engine, db| engine.search(db, collection, vector, k, filter))?
                .into_iter()
                .map(|(record, distance)| Hit {
                    id: record.id,
                    document: record.document,
                    metadata: record.metadata,
                    embedding: record.embedding,
                    distance,
                })
                .collect();
            raw.push_group(hits);
        }
        QueryResult::from_raw(raw, include)
    }
}

fn search_filter(where_meta: Option<Filter>, where_document: Option<DocFilter>) -> RecordFilter {
    RecordFilter {
        ids: None,
        where_meta,
        where_document,
    }
}

#[async_trait]
impl<E: EmbeddedEngine> BaseConnection for EmbeddedClient<E> {
    async fn connect(&self) -> Result<()> {
        self.ensure_open()
    }

    fn is_connected(&self) -> bool {
        *self.open.lock()
    }

    async fn execute(&self, sql: &str) -> Result<Vec<Row>> {
        self.with_engine(|engine, db| engine.execute(db, sql))
    }

    async fn close(&self) -> Result<()> {
        let mut open = self.open.lock();
        if *open {
            self.engine.close()?;
            *open = false;
            debug!(path = %self.config.path.display(), "embedded engine closed");
        }
        Ok(())
    }

    async fn detect_db_type_and_version(&self) -> Result<(BackendKind, Version)> {
        let version = self.with_engine(|engine, _| engine.version())?;
        Ok((BackendKind::SeekDb, version))
    }

    fn mode(&self) -> &'static str {
        "embedded"
    }
}

#[async_trait]
impl<E: EmbeddedEngine> AdminApi for EmbeddedClient<E> {
    async fn create_database(&self, name: &str, tenant: Option<&str>) -> Result<()> {
        check_tenant(tenant, DEFAULT_TENANT)?;
        validate_database_name(name)?;
        self.with_engine(|engine, _| engine.create_database(name))
    }

    async fn get_database(&self, name: &str, tenant: Option<&str>) -> Result<Database> {
        check_tenant(tenant, DEFAULT_TENANT)?;
        if !self.with_engine(|engine, _| engine.has_database(name))? {
            return Err(SeekDbError::NotFound(format!("database `{name}`")));
        }
        Ok(Database {
            name: name.to_string(),
            tenant: Some(DEFAULT_TENANT.to_string()),
            ..Database::default()
        })
    }

    async fn delete_database(&self, name: &str, tenant: Option<&str>) -> Result<()> {
        check_tenant(tenant, DEFAULT_TENANT)?;
        self.with_engine(|engine, _| engine.delete_database(name))
    }

    async fn list_databases(
        &self,
        limit: Option<u32>,
        offset: Option<u32>,
        tenant: Option<&str>,
    ) -> Result<Vec<Database>> {
        check_tenant(tenant, DEFAULT_TENANT)?;
        let names = self.with_engine(|engine, _| engine.list_databases())?;
        Ok(paginate(names, limit, offset)
            .into_iter()
            .map(|name| Database {
                name,
                tenant: Some(DEFAULT_TENANT.to_string()),
                ..Database::default()
            })
            .collect())
    }
}

#[async_trait]
impl<E: EmbeddedEngine> BaseClient for EmbeddedClient<E> {
    async fn create_collection(&self, name: &str, config: &HnswConfig) -> Result<CollectionInfo> {
        self.with_engine(|engine, db| engine.create_collection(db, name, config))
    }

    async fn get_collection(&self, name: &str) -> Result<CollectionInfo> {
        self.with_engine(|engine, db| engine.get_collection(db, name))
    }

    async fn delete_collection(&self, name: &str) -> Result<()> {
        self.with_engine(|engine, db| engine.delete_collection(db, name))
    }

    async fn list_collections(&self) -> Result<Vec<CollectionInfo>> {
        self.with_engine(|engine, db| engine.list_collections(db))
    }

    async fn collection_add(&self, info: &CollectionInfo, batch: RecordBatch) -> Result<()> {
        self.with_engine(|engine, db| engine.insert(db, &info.name, &batch))
    }

    async fn collection_update(&self, info: &CollectionInfo, batch: RecordBatch) -> Result<()> {
        self.with_engine(|engine, db| engine.update(db, &info.name, &batch))
    }

    async fn collection_upsert(&self, info: &CollectionInfo, batch: RecordBatch) -> Result<()> {
        self.with_engine(|engine, db| engine.upsert(db, &info.name, &batch))
    }

    async fn collection_delete(&self, info: &CollectionInfo, filter: RecordFilter) -> Result<u64> {
        self.with_engine(|engine, db| engine.delete(db, &info.name, &filter))
    }

    async fn collection_query(
        &self,
        info: &CollectionInfo,
        request: QueryRequest,
    ) -> Result<QueryResult> {
        let filter = search_filter(request.where_meta, request.where_document);
        self.search_groups(
            &info.name,
            &request.query_embeddings,
            request.n_results,
            &filter,
            request.include,
        )
    }

    async fn collection_get(&self, info: &CollectionInfo, request: GetRequest) -> Result<GetResult> {
        let records = self.with_engine(|engine, db| {
            engine.get(db, &info.name, &request.filter, request.limit, request.offset)
        })?;
        let mut result = GetResult::empty(request.include);
        for record in records {
            result.push(record.id, record.document, record.metadata, record.embedding);
        }
        Ok(result)
    }

    /// The embedded engine has no keyword fusion; every hybrid search is a
    /// filtered KNN search.
    async fn collection_hybrid_search(
        &self,
        info: &CollectionInfo,
        request: HybridSearchRequest,
    ) -> Result<QueryResult> {
        if request.rank.is_some() || request.query_text.is_some() {
            debug!(collection = %info.name, "embedded hybrid search ranks by vector only");
        }
        let filter = search_filter(request.where_meta, request.where_document);
        self.search_groups(
            &info.name,
            &request.query_embeddings,
            request.n_results,
            &filter,
            request.include,
        )
    }

    async fn collection_count(&self, info: &CollectionInfo) -> Result<u64> {
        self.with_engine(|engine, db| engine.count(db, &info.name))
    }
}
