//! Collection naming and column layout shared by the remote and embedded backends.
use crate::error::{Result, SeekDbError};

pub struct CollectionNames;

impl CollectionNames {
    /// Physical table name prefix for collections.
    pub const TABLE_PREFIX: &'static str = "c$v1$";

    /// Limit on the full physical table name, prefix included.
    pub const MAX_TABLE_NAME_LEN: usize = 64;

    /// Validate a logical collection name: non-empty, `[a-zA-Z0-9_]`, and a
    /// physical name no longer than `MAX_TABLE_NAME_LEN`.
    pub fn validate(name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(SeekDbError::InvalidArgument(
                "collection name must not be empty".into(),
            ));
        }

        if Self::TABLE_PREFIX.len() + name.len() > Self::MAX_TABLE_NAME_LEN {
            return Err(SeekDbError::InvalidArgument(format!(
                "collection name `{name}` too long; physical table name exceeds {} characters",
                Self::MAX_TABLE_NAME_LEN
            )));
        }

        if !name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_') {
            return Err(SeekDbError::InvalidArgument(format!(
                "collection name `{name}` must match [a-zA-Z0-9_]"
            )));
        }

        Ok(())
    }

    pub fn table_name(name: &str) -> String {
        format!("{}{}", Self::TABLE_PREFIX, name)
    }

    /// Logical name for a physical table, `None` for non-collection tables.
    pub fn collection_name(table: &str) -> Option<&str> {
        table
            .strip_prefix(Self::TABLE_PREFIX)
            .filter(|name| !name.is_empty())
    }
}

/// Column names of a collection table.
pub struct CollectionFieldNames;

impl CollectionFieldNames {
    pub const ID: &'static str = "_id";
    pub const DOCUMENT: &'static str = "document";
    pub const EMBEDDING: &'static str = "embedding";
    pub const METADATA: &'static str = "metadata";
}
