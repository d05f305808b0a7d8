//! Backend identity detection and the dialect gates derived from it.
use std::fmt;
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::backend::SqlBackend;
use crate::error::{Result, SeekDbError};
use crate::version::Version;

/// Which product answers on the other side of a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    SeekDb,
    OceanBase,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::SeekDb => "seekdb",
            BackendKind::OceanBase => "oceanbase",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = SeekDbError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "seekdb" => Ok(BackendKind::SeekDb),
            "oceanbase" => Ok(BackendKind::OceanBase),
            other => Err(SeekDbError::InvalidArgument(format!(
                "unknown backend kind: {other}"
            ))),
        }
    }
}

/// SQL features gated on backend identity.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Dialect {
    pub kind: BackendKind,
    pub version: Version,
}

/// First OceanBase release whose full-text indexes accept `WITH PARSER ik`.
pub const OB_FULLTEXT_PARSER_MIN: Version = Version::new(4, 3, 5, 1);
/// First OceanBase release shipping `DBMS_HYBRID_SEARCH`.
pub const OB_HYBRID_SEARCH_MIN: Version = Version::new(4, 4, 1, 0);

impl Dialect {
    pub fn new(kind: BackendKind, version: Version) -> Self {
        Self { kind, version }
    }

    pub fn supports_fulltext_parser(&self) -> bool {
        match self.kind {
            BackendKind::SeekDb => true,
            BackendKind::OceanBase => self.version >= OB_FULLTEXT_PARSER_MIN,
        }
    }

    pub fn supports_native_hybrid_search(&self) -> bool {
        match self.kind {
            BackendKind::SeekDb => true,
            BackendKind::OceanBase => self.version >= OB_HYBRID_SEARCH_MIN,
        }
    }
}

static BRANDED_VERSION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(seekdb|oceanbase)[^0-9]*?v?(\d+\.\d+\.\d+(?:\.\d+)?)")
        .expect("valid branded version regex")
});

static BARE_VERSION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+\.\d+\.\d+(?:\.\d+)?)").expect("valid version regex"));

/// Classify a version banner such as `5.7.25-OceanBase_CE-v4.3.5.2` or
/// `OceanBase_CE 4.4.1.0 (r100...)`.
///
/// Returns the product and, when the banner names it, the product version
/// (never the MySQL-compatibility prefix).
pub fn parse_banner(banner: &str) -> Option<(BackendKind, Option<Version>)> {
    let lower = banner.to_ascii_lowercase();
    let kind = if lower.contains("seekdb") {
        BackendKind::SeekDb
    } else if lower.contains("oceanbase") {
        BackendKind::OceanBase
    } else {
        return None;
    };

    let version = BRANDED_VERSION
        .captures(banner)
        .and_then(|caps| caps.get(2))
        .and_then(|m| Version::parse(m.as_str()).ok());
    Some((kind, version))
}

/// First dotted version number in `text`.
pub fn parse_bare_version(text: &str) -> Option<Version> {
    BARE_VERSION
        .find(text)
        .and_then(|m| Version::parse(m.as_str()).ok())
}

/// Identify the backend behind `backend`, connecting first if needed.
///
/// Probes `SELECT VERSION()`, then `version_comment`, then `ob_version()` for
/// OceanBase builds whose banner omits the product version.
pub async fn detect_db_type_and_version<B>(backend: &B) -> Result<(BackendKind, Version)>
where
    B: SqlBackend + ?Sized,
{
    let rows = backend.fetch("SELECT VERSION() AS version", &[]).await?;
    let banner = rows
        .first()
        .and_then(|r| r.get_string_by_index(0))
        .unwrap_or_default();
    debug!(%banner, "version banner");

    let mut found = parse_banner(&banner);

    if found.as_ref().is_none_or(|(_, v)| v.is_none()) {
        let rows = backend
            .fetch("SHOW VARIABLES LIKE 'version_comment'", &[])
            .await?;
        let comment = rows
            .first()
            .and_then(|r| r.get_string("Value").or_else(|| r.get_string_by_index(1)))
            .unwrap_or_default();
        debug!(%comment, "version_comment");
        if let Some((kind, version)) = parse_banner(&comment) {
            let version = match &found {
                Some((_, Some(v))) => Some(*v),
                _ => version,
            };
            let kind = found.as_ref().map(|(k, _)| *k).unwrap_or(kind);
            found = Some((kind, version));
        }
    }

    match found {
        Some((kind, Some(version))) => Ok((kind, version)),
        Some((BackendKind::OceanBase, None)) => {
            let rows = backend.fetch("SELECT ob_version() AS version", &[]).await?;
            let raw = rows
                .first()
                .and_then(|r| r.get_string_by_index(0))
                .unwrap_or_default();
            let version = parse_bare_version(&raw).ok_or_else(|| {
                SeekDbError::Format(format!("cannot parse ob_version() result: {raw}"))
            })?;
            Ok((BackendKind::OceanBase, version))
        }
        Some((kind, None)) => Err(SeekDbError::Format(format!(
            "{kind} banner carries no version: {banner}"
        ))),
        None => Err(SeekDbError::Other(anyhow::anyhow!(
            "unrecognized backend at {}: version banner {banner:?}",
            backend.endpoint()
        ))),
    }
}
