use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::admin::{AdminApi, check_tenant, validate_database_name};
use crate::backend::{SqlBackend, Statement};
use crate::client::{BaseClient, GetRequest, HybridSearchRequest, QueryRequest, RecordBatch, RecordRef};
use crate::config::{DEFAULT_DISTANCE, DistanceMetric, HnswConfig};
use crate::connection::{BaseConnection, Row};
use crate::detect::{BackendKind, Dialect, detect_db_type_and_version};
use crate::error::{Result, SeekDbError};
use crate::filters::{DocFilter, Filter, RecordFilter, SqlWhere, build_where_clause};
use crate::hybrid::{build_search_parm, is_invalid_argument};
use crate::meta::{CollectionFieldNames as F, CollectionNames};
use crate::query_result::QueryResult;
use crate::types::{
    CollectionInfo, Database, Embedding, GetResult, Hit, Include, RawQueryResult,
};
use crate::version::Version;

#[cfg(feature = "server")]
use crate::backend::MySqlBackend;
#[cfg(feature = "server")]
use crate::config::ServerConfig;

/// Which product a remote client expects to reach.
///
/// The flavor only names the mode; dialect decisions follow the detected
/// identity.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServerFlavor {
    SeekDb,
    OceanBase,
}

impl ServerFlavor {
    pub fn mode(&self) -> &'static str {
        match self {
            ServerFlavor::SeekDb => "server",
            ServerFlavor::OceanBase => "oceanbase",
        }
    }

    pub fn expected_kind(&self) -> BackendKind {
        match self {
            ServerFlavor::SeekDb => BackendKind::SeekDb,
            ServerFlavor::OceanBase => BackendKind::OceanBase,
        }
    }
}

#[derive(Clone, Copy)]
struct Identity {
    generation: u64,
    dialect: Dialect,
}

/// Remote client speaking SQL to seekdb or OceanBase through a [`SqlBackend`].
pub struct ServerClient<B> {
    backend: B,
    flavor: ServerFlavor,
    tenant: String,
    database: String,
    identity: Mutex<Option<Identity>>,
}

#[cfg(feature = "server")]
impl ServerClient<MySqlBackend> {
    /// Client over a lazily connected MySQL pool.
    pub fn from_config(config: ServerConfig, flavor: ServerFlavor) -> Self {
        let tenant = config.tenant.clone();
        let database = config.database.clone();
        Self::new(MySqlBackend::new(config), flavor, tenant, database)
    }

    pub fn from_env(flavor: ServerFlavor) -> Result<Self> {
        Ok(Self::from_config(ServerConfig::from_env()?, flavor))
    }

    pub fn builder() -> ServerClientBuilder {
        ServerClientBuilder::new()
    }
}

impl<B: SqlBackend> ServerClient<B> {
    pub fn new(
        backend: B,
        flavor: ServerFlavor,
        tenant: impl Into<String>,
        database: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            flavor,
            tenant: tenant.into(),
            database: database.into(),
            identity: Mutex::new(None),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn flavor(&self) -> ServerFlavor {
        self.flavor
    }

    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    /// Detected identity of the current connection; probed once per connection.
    pub async fn dialect(&self) -> Result<Dialect> {
        self.backend.connect().await?;
        let generation = self.backend.generation();
        if let Some(id) = *self.identity.lock() {
            if id.generation == generation {
                return Ok(id.dialect);
            }
        }

        let (kind, version) = detect_db_type_and_version(&self.backend).await?;
        let dialect = Dialect::new(kind, version);
        if kind != self.flavor.expected_kind() {
            warn!(expected = %self.flavor.expected_kind(), detected = %kind, "backend differs from requested flavor");
        }
        info!(
            endpoint = %self.backend.endpoint(),
            kind = %kind,
            version = %version,
            fulltext_parser = dialect.supports_fulltext_parser(),
            native_hybrid = dialect.supports_native_hybrid_search(),
            "backend identified"
        );
        *self.identity.lock() = Some(Identity {
            generation,
            dialect,
        });
        Ok(dialect)
    }

    async fn table_exists(&self, table: &str) -> Result<bool> {
        let rows = self
            .backend
            .fetch(
                "SELECT 1 FROM information_schema.TABLES \
                 WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ? LIMIT 1",
                &[Value::from(self.database.as_str()), Value::from(table)],
            )
            .await?;
        Ok(!rows.is_empty())
    }

    async fn schema_row(&self, name: &str) -> Result<Option<Row>> {
        let rows = self
            .backend
            .fetch(
                "SELECT SCHEMA_NAME, DEFAULT_CHARACTER_SET_NAME, DEFAULT_COLLATION_NAME \
                 FROM information_schema.SCHEMATA WHERE SCHEMA_NAME = ?",
                &[Value::from(name)],
            )
            .await?;
        Ok(rows.into_iter().next())
    }

    fn database_from_row(&self, row: &Row) -> Result<Database> {
        let name = row
            .get_string("SCHEMA_NAME")
            .ok_or_else(|| SeekDbError::Format("schema row without SCHEMA_NAME".into()))?;
        Ok(Database {
            name,
            tenant: Some(self.tenant.clone()),
            charset: row.get_string("DEFAULT_CHARACTER_SET_NAME"),
            collation: row.get_string("DEFAULT_COLLATION_NAME"),
        })
    }

    /// Ids of `ids` already stored in `table`.
    async fn existing_ids(&self, table: &str, ids: &[String]) -> Result<Vec<String>> {
        let where_ids = build_where_clause(None, None, Some(ids));
        let sql = format!("SELECT {} FROM `{table}` {}", F::ID, where_ids.clause);
        let rows = self.backend.fetch(&sql, &where_ids.params).await?;
        Ok(rows.iter().filter_map(|r| r.get_string(F::ID)).collect())
    }

    async fn knn(
        &self,
        info: &CollectionInfo,
        vector: &[f32],
        n_results: usize,
        where_meta: Option<&Filter>,
        where_document: Option<&DocFilter>,
        include: Include,
    ) -> Result<Vec<Hit>> {
        let table = CollectionNames::table_name(&info.name);
        let sql_where = with_vector(build_where_clause(where_meta, where_document, None));
        let func = info.distance.sql_function();
        let vec = vector_to_string(vector);
        let sql = format!(
            "SELECT {select}, {func}({emb}, '{vec}') AS distance \
             FROM `{table}` {where_clause} \
             ORDER BY {func}({emb}, '{vec}') \
             LIMIT {n_results}",
            select = select_clause(include),
            emb = F::EMBEDDING,
            where_clause = sql_where.clause,
        );
        let rows = self.backend.fetch(&sql, &sql_where.params).await?;
        rows.iter().map(|r| hit_from_row(r, include)).collect()
    }

    /// Run one search parameter through `DBMS_HYBRID_SEARCH`.
    async fn native_hybrid(&self, table: &str, parm: String, include: Include) -> Result<Vec<Hit>> {
        let rows = self
            .backend
            .fetch(
                &format!("SELECT DBMS_HYBRID_SEARCH.GET_SQL('{table}', ?) AS query_sql FROM dual"),
                &[Value::String(parm)],
            )
            .await?;
        let query_sql = rows
            .first()
            .and_then(|r| r.get_string("query_sql").or_else(|| r.get_string_by_index(0)))
            .unwrap_or_default();
        let query_sql = query_sql.trim().trim_matches(['\'', '"']);
        if query_sql.is_empty() {
            return Ok(Vec::new());
        }
        let rows = self.backend.fetch(query_sql, &[]).await?;
        rows.iter().map(|r| hybrid_hit_from_row(r, include)).collect()
    }

    fn insert_statement(table: &str, rec: &RecordRef<'_>) -> Result<Statement> {
        Ok(Statement::new(
            format!(
                "INSERT INTO `{table}` ({}, {}, {}, {}) VALUES (?, ?, ?, ?)",
                F::ID,
                F::DOCUMENT,
                F::METADATA,
                F::EMBEDDING
            ),
            vec![
                Value::from(rec.id),
                rec.document.map(Value::from).unwrap_or(Value::Null),
                metadata_param(rec)?,
                rec.embedding
                    .map(|e| Value::String(vector_to_string(e)))
                    .unwrap_or(Value::Null),
            ],
        ))
    }

    /// `None` when the record carries no field to change.
    fn update_statement(table: &str, rec: &RecordRef<'_>) -> Result<Option<Statement>> {
        let mut sets = Vec::new();
        let mut params = Vec::new();
        if let Some(doc) = rec.document {
            sets.push(format!("{} = ?", F::DOCUMENT));
            params.push(Value::from(doc));
        }
        if rec.metadata.is_some() {
            sets.push(format!("{} = ?", F::METADATA));
            params.push(metadata_param(rec)?);
        }
        if let Some(emb) = rec.embedding {
            sets.push(format!("{} = ?", F::EMBEDDING));
            params.push(Value::String(vector_to_string(emb)));
        }
        if sets.is_empty() {
            return Ok(None);
        }
        params.push(Value::from(rec.id));
        Ok(Some(Statement::new(
            format!("UPDATE `{table}` SET {} WHERE {} = ?", sets.join(", "), F::ID),
            params,
        )))
    }
}

#[async_trait]
impl<B: SqlBackend> BaseConnection for ServerClient<B> {
    async fn connect(&self) -> Result<()> {
        self.backend.connect().await
    }

    fn is_connected(&self) -> bool {
        self.backend.is_connected()
    }

    async fn execute(&self, sql: &str) -> Result<Vec<Row>> {
        self.backend.fetch(sql, &[]).await
    }

    async fn close(&self) -> Result<()> {
        self.backend.close().await
    }

    async fn detect_db_type_and_version(&self) -> Result<(BackendKind, Version)> {
        let dialect = self.dialect().await?;
        Ok((dialect.kind, dialect.version))
    }

    fn mode(&self) -> &'static str {
        self.flavor.mode()
    }
}

#[async_trait]
impl<B: SqlBackend> AdminApi for ServerClient<B> {
    async fn create_database(&self, name: &str, tenant: Option<&str>) -> Result<()> {
        check_tenant(tenant, &self.tenant)?;
        validate_database_name(name)?;
        if self.schema_row(name).await?.is_some() {
            return Err(SeekDbError::AlreadyExists(format!("database `{name}`")));
        }
        self.backend
            .exec(&format!("CREATE DATABASE {}", escape_identifier(name)), &[])
            .await?;
        Ok(())
    }

    async fn get_database(&self, name: &str, tenant: Option<&str>) -> Result<Database> {
        check_tenant(tenant, &self.tenant)?;
        let row = self
            .schema_row(name)
            .await?
            .ok_or_else(|| SeekDbError::NotFound(format!("database `{name}`")))?;
        self.database_from_row(&row)
    }

    async fn delete_database(&self, name: &str, tenant: Option<&str>) -> Result<()> {
        check_tenant(tenant, &self.tenant)?;
        if self.schema_row(name).await?.is_none() {
            return Err(SeekDbError::NotFound(format!("database `{name}`")));
        }
        self.backend
            .exec(&format!("DROP DATABASE {}", escape_identifier(name)), &[])
            .await?;
        Ok(())
    }

    async fn list_databases(
        &self,
        limit: Option<u32>,
        offset: Option<u32>,
        tenant: Option<&str>,
    ) -> Result<Vec<Database>> {
        check_tenant(tenant, &self.tenant)?;
        let mut sql = String::from(
            "SELECT SCHEMA_NAME, DEFAULT_CHARACTER_SET_NAME, DEFAULT_COLLATION_NAME \
             FROM information_schema.SCHEMATA ORDER BY SCHEMA_NAME",
        );
        sql.push_str(&limit_offset(limit.map(|l| l as usize), offset.map(|o| o as usize)));
        let rows = self.backend.fetch(&sql, &[]).await?;
        rows.iter().map(|r| self.database_from_row(r)).collect()
    }
}

#[async_trait]
impl<B: SqlBackend> BaseClient for ServerClient<B> {
    async fn create_collection(&self, name: &str, config: &HnswConfig) -> Result<CollectionInfo> {
        let dialect = self.dialect().await?;
        let table = CollectionNames::table_name(name);
        if self.table_exists(&table).await? {
            return Err(SeekDbError::AlreadyExists(format!("collection `{name}`")));
        }
        let sql = create_table_sql(&table, config, dialect);
        debug!(%sql, "create collection");
        self.backend.exec(&sql, &[]).await?;
        Ok(CollectionInfo {
            name: name.to_string(),
            id: None,
            dimension: config.dimension,
            distance: config.distance,
        })
    }

    async fn get_collection(&self, name: &str) -> Result<CollectionInfo> {
        let table = CollectionNames::table_name(name);
        if !self.table_exists(&table).await? {
            return Err(SeekDbError::NotFound(format!("collection `{name}`")));
        }

        let describe = self.backend.fetch(&format!("DESCRIBE `{table}`"), &[]).await?;
        let dimension = describe
            .iter()
            .find(|r| r.get_string("Field").as_deref() == Some(F::EMBEDDING))
            .and_then(|r| r.get_string("Type"))
            .and_then(|t| parse_dimension(&t))
            .ok_or_else(|| {
                SeekDbError::Format(format!("cannot read vector dimension of collection `{name}`"))
            })?;

        let create = self
            .backend
            .fetch(&format!("SHOW CREATE TABLE `{table}`"), &[])
            .await?;
        let distance = create
            .first()
            .and_then(|r| r.get_string("Create Table").or_else(|| r.get_string_by_index(1)))
            .and_then(|stmt| parse_distance(&stmt))
            .unwrap_or(DEFAULT_DISTANCE);

        Ok(CollectionInfo {
            name: name.to_string(),
            id: None,
            dimension,
            distance,
        })
    }

    async fn delete_collection(&self, name: &str) -> Result<()> {
        let table = CollectionNames::table_name(name);
        if !self.table_exists(&table).await? {
            return Err(SeekDbError::NotFound(format!("collection `{name}`")));
        }
        self.backend.exec(&format!("DROP TABLE `{table}`"), &[]).await?;
        Ok(())
    }

    async fn list_collections(&self) -> Result<Vec<CollectionInfo>> {
        let pattern = format!("{}%", CollectionNames::TABLE_PREFIX);
        let rows = match self
            .backend
            .fetch(&format!("SHOW TABLES LIKE '{pattern}'"), &[])
            .await
        {
            Ok(rows) => rows,
            Err(e) => {
                debug!(error = %e, "SHOW TABLES failed, using information_schema");
                self.backend
                    .fetch(
                        "SELECT TABLE_NAME FROM information_schema.TABLES \
                         WHERE TABLE_SCHEMA = ? AND TABLE_NAME LIKE ?",
                        &[Value::from(self.database.as_str()), Value::from(pattern)],
                    )
                    .await?
            }
        };

        let mut names: Vec<String> = rows
            .iter()
            .filter_map(|r| r.get_string_by_index(0))
            .filter_map(|t| CollectionNames::collection_name(&t).map(str::to_string))
            .collect();
        names.sort();

        let mut infos = Vec::with_capacity(names.len());
        for name in names {
            infos.push(self.get_collection(&name).await?);
        }
        Ok(infos)
    }

    async fn has_collection(&self, name: &str) -> Result<bool> {
        self.table_exists(&CollectionNames::table_name(name)).await
    }

    async fn collection_add(&self, info: &CollectionInfo, batch: RecordBatch) -> Result<()> {
        let table = CollectionNames::table_name(&info.name);
        if let Some(id) = self.existing_ids(&table, &batch.ids).await?.into_iter().next() {
            return Err(SeekDbError::DuplicateId(id));
        }
        let statements = batch
            .records()
            .map(|rec| Self::insert_statement(&table, &rec))
            .collect::<Result<Vec<_>>>()?;
        self.backend.exec_batch(&statements).await?;
        Ok(())
    }

    async fn collection_update(&self, info: &CollectionInfo, batch: RecordBatch) -> Result<()> {
        let table = CollectionNames::table_name(&info.name);
        let existing = self.existing_ids(&table, &batch.ids).await?;
        if let Some(missing) = batch.ids.iter().find(|id| !existing.contains(*id)) {
            return Err(SeekDbError::NotFound(format!("record `{missing}`")));
        }
        let mut statements = Vec::with_capacity(batch.len());
        for rec in batch.records() {
            statements.extend(Self::update_statement(&table, &rec)?);
        }
        self.backend.exec_batch(&statements).await?;
        Ok(())
    }

    async fn collection_upsert(&self, info: &CollectionInfo, batch: RecordBatch) -> Result<()> {
        let table = CollectionNames::table_name(&info.name);
        let existing = self.existing_ids(&table, &batch.ids).await?;
        let mut statements = Vec::with_capacity(batch.len());
        for rec in batch.records() {
            if existing.iter().any(|id| id == rec.id) {
                statements.extend(Self::update_statement(&table, &rec)?);
            } else if rec.embedding.is_none() {
                return Err(SeekDbError::MissingVector(format!(
                    "new record `{}` has no vector",
                    rec.id
                )));
            } else {
                statements.push(Self::insert_statement(&table, &rec)?);
            }
        }
        self.backend.exec_batch(&statements).await?;
        Ok(())
    }

    async fn collection_delete(&self, info: &CollectionInfo, filter: RecordFilter) -> Result<u64> {
        let table = CollectionNames::table_name(&info.name);
        let sql_where = filter.to_sql();
        self.backend
            .exec(&format!("DELETE FROM `{table}` {}", sql_where.clause), &sql_where.params)
            .await
    }

    async fn collection_query(
        &self,
        info: &CollectionInfo,
        request: QueryRequest,
    ) -> Result<QueryResult> {
        let mut raw = RawQueryResult::empty(request.include);
        for vector in &request.query_embeddings {
            let hits = self
                .knn(
                    info,
                    vector,
                    request.n_results,
                    request.where_meta.as_ref(),
                    request.where_document.as_ref(),
                    request.include,
                )
                .await?;
            raw.push_group(hits);
        }
        QueryResult::from_raw(raw, request.include)
    }

    async fn collection_get(&self, info: &CollectionInfo, request: GetRequest) -> Result<GetResult> {
        let table = CollectionNames::table_name(&info.name);
        let sql_where = request.filter.to_sql();
        let sql = format!(
            "SELECT {} FROM `{table}` {}{}",
            select_clause(request.include),
            sql_where.clause,
            limit_offset(request.limit, request.offset)
        );
        let rows = self.backend.fetch(&sql, &sql_where.params).await?;
        let mut result = GetResult::empty(request.include);
        for row in &rows {
            let hit = record_from_row(row, request.include)?;
            result.push(hit.id, hit.document, hit.metadata, hit.embedding);
        }
        Ok(result)
    }

    async fn collection_hybrid_search(
        &self,
        info: &CollectionInfo,
        request: HybridSearchRequest,
    ) -> Result<QueryResult> {
        let include = request.include;
        let native = match &request.rank {
            Some(_) => {
                let dialect = self.dialect().await?;
                if !dialect.supports_native_hybrid_search() {
                    info!(
                        collection = %info.name,
                        version = %dialect.version,
                        "native hybrid search unavailable, using filtered vector search"
                    );
                }
                dialect.supports_native_hybrid_search()
            }
            None => false,
        };

        let table = CollectionNames::table_name(&info.name);
        let mut raw = RawQueryResult::empty(include);
        for vector in &request.query_embeddings {
            let parm = if native {
                build_search_parm(
                    vector,
                    request.query_text.as_deref(),
                    request.where_meta.as_ref(),
                    request.where_document.as_ref(),
                    request.n_results,
                    request.rank.as_ref(),
                )?
            } else {
                None
            };

            let hits = match parm {
                Some(parm) => match self.native_hybrid(&table, parm, include).await {
                    Ok(hits) => Some(hits),
                    Err(e) if is_invalid_argument(&e) => {
                        warn!(collection = %info.name, error = %e, "hybrid search rejected, using filtered vector search");
                        None
                    }
                    Err(e) => return Err(e),
                },
                None => None,
            };
            let hits = match hits {
                Some(hits) => hits,
                None => {
                    self.knn(
                        info,
                        vector,
                        request.n_results,
                        request.where_meta.as_ref(),
                        request.where_document.as_ref(),
                        include,
                    )
                    .await?
                }
            };
            raw.push_group(hits);
        }
        QueryResult::from_raw(raw, include)
    }

    async fn collection_count(&self, info: &CollectionInfo) -> Result<u64> {
        let table = CollectionNames::table_name(&info.name);
        let rows = self
            .backend
            .fetch(&format!("SELECT COUNT(*) AS cnt FROM `{table}`"), &[])
            .await?;
        let row = rows
            .first()
            .ok_or_else(|| SeekDbError::Format(format!("COUNT on `{table}` returned no row")))?;
        let cnt = row.require_i64("cnt")?;
        u64::try_from(cnt).map_err(|_| SeekDbError::Format(format!("negative count {cnt}")))
    }
}

/// Builder for a lazily connected [`ServerClient`].
#[cfg(feature = "server")]
pub struct ServerClientBuilder {
    config: ServerConfig,
    flavor: ServerFlavor,
}

#[cfg(feature = "server")]
impl Default for ServerClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "server")]
impl ServerClientBuilder {
    pub fn new() -> Self {
        Self {
            config: ServerConfig::default(),
            flavor: ServerFlavor::SeekDb,
        }
    }

    /// Start from `SERVER_*` variables; fields can still be overridden.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            config: ServerConfig::from_env()?,
            flavor: ServerFlavor::SeekDb,
        })
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    pub fn tenant(mut self, tenant: impl Into<String>) -> Self {
        self.config.tenant = tenant.into();
        self
    }

    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.config.database = database.into();
        self
    }

    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.config.user = user.into();
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.config.password = password.into();
        self
    }

    pub fn max_connections(mut self, max_connections: u32) -> Self {
        self.config.max_connections = max_connections;
        self
    }

    pub fn connect_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    pub fn flavor(mut self, flavor: ServerFlavor) -> Self {
        self.flavor = flavor;
        self
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Nothing is connected until first use.
    pub fn build(self) -> ServerClient<MySqlBackend> {
        ServerClient::from_config(self.config, self.flavor)
    }
}

fn create_table_sql(table: &str, config: &HnswConfig, dialect: Dialect) -> String {
    let parser = if dialect.supports_fulltext_parser() {
        " WITH PARSER ik"
    } else {
        ""
    };
    let mut index_opts = vec![
        format!("distance={}", config.distance.as_str()),
        "type=hnsw".to_string(),
        "lib=vsag".to_string(),
    ];
    if let Some(m) = config.m {
        index_opts.push(format!("m={m}"));
    }
    if let Some(ef) = config.ef_construction {
        index_opts.push(format!("ef_construction={ef}"));
    }
    if let Some(ef) = config.ef_search {
        index_opts.push(format!("ef_search={ef}"));
    }
    format!(
        "CREATE TABLE `{table}` (
            {id} varbinary(512) PRIMARY KEY NOT NULL,
            {doc} text,
            {emb} vector({dimension}),
            {meta} json,
            FULLTEXT INDEX idx_fts({doc}){parser},
            VECTOR INDEX idx_vec ({emb}) with({opts})
        ) ORGANIZATION = HEAP",
        id = F::ID,
        doc = F::DOCUMENT,
        emb = F::EMBEDDING,
        meta = F::METADATA,
        dimension = config.dimension,
        opts = index_opts.join(", "),
    )
}

fn select_clause(include: Include) -> String {
    let mut fields = vec![F::ID.to_string()];
    if include.documents {
        fields.push(F::DOCUMENT.to_string());
    }
    if include.metadatas {
        // JSON columns decode reliably only as text
        fields.push(format!("CAST({m} AS CHAR) AS {m}", m = F::METADATA));
    }
    if include.embeddings {
        fields.push(F::EMBEDDING.to_string());
    }
    fields.join(", ")
}

/// Unranked records have no vector.
fn with_vector(mut sql_where: SqlWhere) -> SqlWhere {
    let cond = format!("{} IS NOT NULL", F::EMBEDDING);
    sql_where.clause = if sql_where.is_empty() {
        format!("WHERE {cond}")
    } else {
        format!("{} AND {cond}", sql_where.clause)
    };
    sql_where
}

fn limit_offset(limit: Option<usize>, offset: Option<usize>) -> String {
    match (limit, offset) {
        (None, None) => String::new(),
        (Some(limit), None) => format!(" LIMIT {limit}"),
        // MySQL has no OFFSET without LIMIT
        (None, Some(offset)) => format!(" LIMIT 18446744073709551615 OFFSET {offset}"),
        (Some(limit), Some(offset)) => format!(" LIMIT {limit} OFFSET {offset}"),
    }
}

fn metadata_param(rec: &RecordRef<'_>) -> Result<Value> {
    match rec.metadata {
        Some(meta) => Ok(Value::String(serde_json::to_string(meta)?)),
        None => Ok(Value::Null),
    }
}

/// Decode the stored fields of a row; `distance` is left at zero.
fn record_from_row(row: &Row, include: Include) -> Result<Hit> {
    let id = row
        .get_string(F::ID)
        .ok_or_else(|| SeekDbError::Format(format!("row without `{}`", F::ID)))?;
    let metadata = match include.metadatas.then(|| row.get_string(F::METADATA)).flatten() {
        Some(raw) => Some(serde_json::from_str(&raw).map_err(|e| {
            SeekDbError::Format(format!("metadata of `{id}` is not valid JSON: {e}"))
        })?),
        None => None,
    };
    let embedding = match include.embeddings.then(|| row.get_string(F::EMBEDDING)).flatten() {
        Some(raw) => Some(parse_vector_string(&raw)?),
        None => None,
    };
    Ok(Hit {
        document: include.documents.then(|| row.get_string(F::DOCUMENT)).flatten(),
        id,
        metadata,
        embedding,
        distance: 0.0,
    })
}

fn hit_from_row(row: &Row, include: Include) -> Result<Hit> {
    let mut hit = record_from_row(row, include)?;
    hit.distance = row.require_f64("distance")? as f32;
    Ok(hit)
}

/// Hybrid rows carry either a distance or a relevance score; scores are
/// negated so ascending order still means best first.
fn hybrid_hit_from_row(row: &Row, include: Include) -> Result<Hit> {
    let mut hit = record_from_row(row, include)?;
    if hit.embedding.is_none() && include.embeddings {
        hit.embedding = row
            .get_string("_embedding")
            .map(|s| parse_vector_string(&s))
            .transpose()?;
    }
    hit.distance = row
        .get_f64("distance")
        .or_else(|| row.get_f64("_distance"))
        .or_else(|| row.get_f64("_score").map(|s| -s))
        .or_else(|| row.get_f64("score").map(|s| -s))
        .ok_or_else(|| SeekDbError::Format(format!("hybrid row `{}` has no distance or score", hit.id)))?
        as f32;
    Ok(hit)
}

fn escape_identifier(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

pub(crate) fn vector_to_string(v: &[f32]) -> String {
    let inner = v.iter().map(|x| x.to_string()).collect::<Vec<_>>().join(",");
    format!("[{inner}]")
}

pub(crate) fn parse_vector_string(s: &str) -> Result<Embedding> {
    let inner = s.trim().trim_matches(['[', ']']).trim();
    if inner.is_empty() {
        return Ok(Vec::new());
    }
    inner
        .split(',')
        .map(|x| {
            x.trim()
                .parse::<f32>()
                .map_err(|_| SeekDbError::Format(format!("bad vector element `{}` in `{s}`", x.trim())))
        })
        .collect()
}

fn parse_dimension(type_str: &str) -> Option<u32> {
    let lower = type_str.to_lowercase();
    let start = lower.find("vector(")? + "vector(".len();
    let rest = &lower[start..];
    rest[..rest.find(')')?].trim().parse().ok()
}

fn parse_distance(create_stmt: &str) -> Option<DistanceMetric> {
    let lower = create_stmt.to_lowercase();
    let pos = lower.find("distance=")? + "distance=".len();
    let value: String = lower[pos..]
        .chars()
        .take_while(|c| c.is_alphanumeric() || *c == '_')
        .collect();
    value.parse().ok()
}
