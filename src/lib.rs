//! SeekDB client: one collection API over embedded, seekdb server and
//! OceanBase backends.

pub mod admin;
pub mod backend;
pub mod client;
pub mod collection;
pub mod config;
pub mod connection;
pub mod detect;
pub mod embedded;
pub mod embedding;
pub mod error;
pub mod filters;
pub mod hybrid;
pub mod memory;
pub mod meta;
#[cfg(feature = "embedding")]
mod onnx;
pub mod query_result;
pub mod server;
#[cfg(feature = "sync")]
pub mod sync;
pub mod types;
pub mod version;

pub use crate::admin::{AdminApi, AdminClient, DEFAULT_TENANT};
pub use crate::backend::{SqlBackend, Statement};
pub use crate::client::{BaseClient, Client, ClientApi, RecordBatch};
pub use crate::collection::{Collection, HybridSearch, Query};
pub use crate::config::{
    CollectionOptions, DistanceMetric, EmbeddedConfig, HnswConfig, ServerConfig,
};
pub use crate::connection::{BaseConnection, Cell, Row};
pub use crate::detect::{BackendKind, Dialect, detect_db_type_and_version};
pub use crate::embedded::{EmbeddedClient, EmbeddedEngine, StoredRecord};
pub use crate::embedding::{
    DefaultEmbedding, EmbeddingChoice, EmbeddingFunction, HashEmbedding,
    default_embedding_function,
};
pub use crate::error::{Result, SeekDbError};
pub use crate::filters::{DocFilter, Filter, RecordFilter, SqlWhere};
pub use crate::hybrid::HybridRank;
pub use crate::memory::MemoryEngine;
pub use crate::meta::{CollectionFieldNames, CollectionNames};
pub use crate::query_result::{Field, QueryItem, QueryResult};
pub use crate::server::{ServerClient, ServerFlavor};
#[cfg(feature = "server")]
pub use crate::server::ServerClientBuilder;
#[cfg(feature = "sync")]
pub use crate::sync::{SyncClient, SyncCollection};
pub use crate::types::{
    CollectionDescription, CollectionInfo, Database, Document, Documents, Embedding, Embeddings,
    GetResult, Include, IncludeField, Metadata,
};
pub use crate::version::Version;

#[cfg(feature = "server")]
pub use crate::backend::MySqlBackend;
