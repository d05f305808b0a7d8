use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::embedding::EmbeddingChoice;
use crate::error::{Result, SeekDbError};

pub const DEFAULT_PORT: u16 = 2881;
pub const DEFAULT_TENANT: &str = "sys";
pub const DEFAULT_DATABASE: &str = "test";
pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_EMBEDDED_PATH: &str = "./seekdb_store";
pub const DEFAULT_DISTANCE: DistanceMetric = DistanceMetric::Cosine;

/// Remote connection configuration for seekdb server or OceanBase over the MySQL protocol.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub tenant: String,
    pub database: String,
    pub user: String,
    pub password: String,
    pub max_connections: u32,
    pub connect_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: DEFAULT_PORT,
            tenant: DEFAULT_TENANT.into(),
            database: DEFAULT_DATABASE.into(),
            user: "root".into(),
            password: String::new(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl ServerConfig {
    /// Build configuration from environment variables:
    /// `SERVER_HOST`, `SERVER_PORT` (default 2881), `SERVER_TENANT` (default `sys`),
    /// `SERVER_DATABASE`, `SERVER_USER`, `SERVER_PASSWORD`,
    /// `SERVER_MAX_CONNECTIONS` (default 5), `SERVER_CONNECT_TIMEOUT_SECS` (default 10).
    pub fn from_env() -> Result<Self> {
        Self::from_env_with_prefix("SERVER")
    }

    /// Same keys as [`ServerConfig::from_env`] under another prefix, e.g. `OB_HOST`.
    pub fn from_env_with_prefix(prefix: &str) -> Result<Self> {
        let key = |name: &str| format!("{prefix}_{name}");

        let host = require_env(&key("HOST"))?;
        let port = parse_env(&key("PORT"))?.unwrap_or(DEFAULT_PORT);
        let tenant = env::var(key("TENANT")).unwrap_or_else(|_| DEFAULT_TENANT.to_string());
        let database = require_env(&key("DATABASE"))?;
        let user = require_env(&key("USER"))?;
        let password = env::var(key("PASSWORD")).unwrap_or_default();
        let max_connections =
            parse_env(&key("MAX_CONNECTIONS"))?.unwrap_or(DEFAULT_MAX_CONNECTIONS);
        let connect_timeout = parse_env::<u64>(&key("CONNECT_TIMEOUT_SECS"))?
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_CONNECT_TIMEOUT);

        Ok(Self {
            host,
            port,
            tenant,
            database,
            user,
            password,
            max_connections,
            connect_timeout,
        })
    }

    /// `host:port`, attached to connection errors.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Location of an embedded database.
#[derive(Clone, Debug)]
pub struct EmbeddedConfig {
    pub path: PathBuf,
    pub database: String,
}

impl Default for EmbeddedConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_EMBEDDED_PATH),
            database: DEFAULT_DATABASE.into(),
        }
    }
}

impl EmbeddedConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            database: DEFAULT_DATABASE.into(),
        }
    }

    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    /// `SEEKDB_PATH` (default `./seekdb_store`) and `SEEKDB_DATABASE` (default `test`).
    pub fn from_env() -> Self {
        let path = env::var("SEEKDB_PATH").unwrap_or_else(|_| DEFAULT_EMBEDDED_PATH.into());
        let database = env::var("SEEKDB_DATABASE").unwrap_or_else(|_| DEFAULT_DATABASE.into());
        Self {
            path: PathBuf::from(path),
            database,
        }
    }
}

/// Supported vector distance metrics.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    L2,
    #[default]
    Cosine,
    InnerProduct,
}

impl DistanceMetric {
    /// Name used in the vector index DDL.
    pub fn as_str(&self) -> &'static str {
        match self {
            DistanceMetric::L2 => "l2",
            DistanceMetric::Cosine => "cosine",
            DistanceMetric::InnerProduct => "inner_product",
        }
    }

    /// SQL function whose ascending order ranks closest first.
    pub fn sql_function(&self) -> &'static str {
        match self {
            DistanceMetric::L2 => "l2_distance",
            DistanceMetric::Cosine => "cosine_distance",
            DistanceMetric::InnerProduct => "negative_inner_product",
        }
    }

    /// Distance between two equal-length vectors; lower is closer.
    pub fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            DistanceMetric::L2 => a
                .iter()
                .zip(b)
                .map(|(x, y)| (x - y) * (x - y))
                .sum::<f32>()
                .sqrt(),
            DistanceMetric::Cosine => {
                let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
                let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
                let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
                if na == 0.0 || nb == 0.0 {
                    1.0
                } else {
                    1.0 - dot / (na * nb)
                }
            }
            DistanceMetric::InnerProduct => -a.iter().zip(b).map(|(x, y)| x * y).sum::<f32>(),
        }
    }
}

impl fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DistanceMetric {
    type Err = SeekDbError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "l2" | "euclidean" => Ok(DistanceMetric::L2),
            "cosine" => Ok(DistanceMetric::Cosine),
            "inner_product" | "ip" | "dot" => Ok(DistanceMetric::InnerProduct),
            other => Err(SeekDbError::InvalidArgument(format!(
                "unsupported distance metric: {other}"
            ))),
        }
    }
}

/// HNSW index settings resolved for collection creation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HnswConfig {
    pub dimension: u32,
    pub distance: DistanceMetric,
    /// Max neighbors per graph node.
    pub m: Option<u32>,
    pub ef_construction: Option<u32>,
    pub ef_search: Option<u32>,
}

impl HnswConfig {
    pub fn new(dimension: u32, distance: DistanceMetric) -> Self {
        Self {
            dimension,
            distance,
            m: None,
            ef_construction: None,
            ef_search: None,
        }
    }

    pub fn m(mut self, m: u32) -> Self {
        self.m = Some(m);
        self
    }

    pub fn ef_construction(mut self, ef: u32) -> Self {
        self.ef_construction = Some(ef);
        self
    }

    pub fn ef_search(mut self, ef: u32) -> Self {
        self.ef_search = Some(ef);
        self
    }
}

/// Options accepted by `create_collection`.
///
/// The dimension may come from `dimension`, from `configuration`, or from the
/// bound embedding function; whichever are present must agree.
#[derive(Clone, Debug, Default)]
pub struct CollectionOptions {
    pub dimension: Option<u32>,
    pub distance: Option<DistanceMetric>,
    pub configuration: Option<HnswConfig>,
    pub embedding_function: EmbeddingChoice,
}

impl CollectionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dimension(mut self, dimension: u32) -> Self {
        self.dimension = Some(dimension);
        self
    }

    pub fn distance(mut self, distance: DistanceMetric) -> Self {
        self.distance = Some(distance);
        self
    }

    pub fn configuration(mut self, configuration: HnswConfig) -> Self {
        self.configuration = Some(configuration);
        self
    }

    pub fn embedding_function(mut self, choice: EmbeddingChoice) -> Self {
        self.embedding_function = choice;
        self
    }
}

fn require_env(key: &str) -> Result<String> {
    env::var(key).map_err(|_| SeekDbError::Config(format!("missing env: {key}")))
}

fn parse_env<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
{
    match env::var(key) {
        Ok(v) => v
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| SeekDbError::Config(format!("invalid value for {key}: {v}"))),
        Err(_) => Ok(None),
    }
}
