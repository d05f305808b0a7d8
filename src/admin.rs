use std::sync::Arc;

use async_trait::async_trait;

use crate::client::BaseClient;
use crate::error::{Result, SeekDbError};
use crate::types::Database;

pub use crate::config::DEFAULT_TENANT;

/// Database lifecycle, scoped to a tenant on multi-tenant backends.
///
/// `tenant: None` means the tenant the client is bound to.
#[async_trait]
pub trait AdminApi: Send + Sync {
    async fn create_database(&self, name: &str, tenant: Option<&str>) -> Result<()>;
    async fn get_database(&self, name: &str, tenant: Option<&str>) -> Result<Database>;
    async fn delete_database(&self, name: &str, tenant: Option<&str>) -> Result<()>;
    async fn list_databases(
        &self,
        limit: Option<u32>,
        offset: Option<u32>,
        tenant: Option<&str>,
    ) -> Result<Vec<Database>>;
}

/// Proxy exposing only the admin surface of any backend client.
#[derive(Clone)]
pub struct AdminClient {
    inner: Arc<dyn BaseClient>,
}

impl AdminClient {
    pub fn new(inner: Arc<dyn BaseClient>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl AdminApi for AdminClient {
    async fn create_database(&self, name: &str, tenant: Option<&str>) -> Result<()> {
        self.inner.create_database(name, tenant).await
    }

    async fn get_database(&self, name: &str, tenant: Option<&str>) -> Result<Database> {
        self.inner.get_database(name, tenant).await
    }

    async fn delete_database(&self, name: &str, tenant: Option<&str>) -> Result<()> {
        self.inner.delete_database(name, tenant).await
    }

    async fn list_databases(
        &self,
        limit: Option<u32>,
        offset: Option<u32>,
        tenant: Option<&str>,
    ) -> Result<Vec<Database>> {
        self.inner.list_databases(limit, offset, tenant).await
    }
}

/// A connection serves one tenant; asking for another is a caller error.
pub(crate) fn check_tenant(requested: Option<&str>, bound: &str) -> Result<()> {
    match requested {
        Some(t) if t != bound => Err(SeekDbError::InvalidArgument(format!(
            "tenant `{t}` does not match connection tenant `{bound}`"
        ))),
        _ => Ok(()),
    }
}

/// Database names follow the same character rules as collection names.
pub(crate) fn validate_database_name(name: &str) -> Result<()> {
    if name.is_empty() || !name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_') {
        return Err(SeekDbError::InvalidArgument(format!(
            "database name `{name}` must be non-empty and match [a-zA-Z0-9_]"
        )));
    }
    Ok(())
}

/// Apply `offset`/`limit` to an already ordered listing.
pub(crate) fn paginate<T>(items: Vec<T>, limit: Option<u32>, offset: Option<u32>) -> Vec<T> {
    let offset = offset.unwrap_or(0) as usize;
    let iter = items.into_iter().skip(offset);
    match limit {
        Some(limit) => iter.take(limit as usize).collect(),
        None => iter.collect(),
    }
}
