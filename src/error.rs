use thiserror::Error;

/// Common result type used across the SDK.
pub type Result<T> = std::result::Result<T, SeekDbError>;

/// Unified error enum surfaced by all public APIs.
#[derive(Error, Debug)]
pub enum SeekDbError {
    #[error("invalid version format: {0}")]
    Format(String),
    #[error("missing dependency: {0}")]
    DependencyMissing(String),
    #[error("connection error ({endpoint}): {message}")]
    Connection { endpoint: String, message: String },
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("duplicate id: {0}")]
    DuplicateId(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("missing vector: {0}")]
    MissingVector(String),
    #[error("sql error: {0}")]
    Sql(String),
    #[error("config error: {0}")]
    Config(String),
    #[error("embedding error: {0}")]
    Embedding(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SeekDbError {
    /// Attach the collection name to backend-reported failures.
    pub fn in_collection(self, name: &str) -> Self {
        match self {
            SeekDbError::Sql(msg) => SeekDbError::Sql(format!("collection `{name}`: {msg}")),
            SeekDbError::NotFound(msg) => {
                SeekDbError::NotFound(format!("collection `{name}`: {msg}"))
            }
            other => other,
        }
    }
}

/// Map a driver error, keeping the endpoint so connection failures are diagnosable.
#[cfg(feature = "server")]
pub(crate) fn from_sqlx(err: sqlx::Error, endpoint: &str) -> SeekDbError {
    use sqlx::mysql::MySqlDatabaseError;

    match err {
        sqlx::Error::RowNotFound => SeekDbError::NotFound("row not found".into()),
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => SeekDbError::Connection {
            endpoint: endpoint.to_string(),
            message: err.to_string(),
        },
        sqlx::Error::Database(ref db) => {
            let number = db
                .try_downcast_ref::<MySqlDatabaseError>()
                .map(|e| e.number());
            let message = db.message().to_string();
            match number {
                // 1045: access denied
                Some(1045) => SeekDbError::Connection {
                    endpoint: endpoint.to_string(),
                    message,
                },
                Some(1146) | Some(1049) | Some(1008) => SeekDbError::NotFound(message),
                Some(1050) | Some(1007) => SeekDbError::AlreadyExists(message),
                Some(1062) => SeekDbError::DuplicateId(message),
                _ => SeekDbError::Sql(err.to_string()),
            }
        }
        other => SeekDbError::Sql(other.to_string()),
    }
}
