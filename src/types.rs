use serde::{Deserialize, Serialize};

use crate::config::DistanceMetric;

pub type Document = String;
pub type Documents = Vec<Document>;
pub type Embedding = Vec<f32>;
pub type Embeddings = Vec<Embedding>;
pub type Metadata = serde_json::Value;

/// Database metadata returned by admin APIs.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Database {
    pub name: String,
    pub tenant: Option<String>,
    pub charset: Option<String>,
    pub collation: Option<String>,
}

/// Selects which fields to include in query/get responses. Ids are always returned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IncludeField {
    Documents,
    Metadatas,
    Distances,
    Embeddings,
}

/// Resolved include selector carried by read requests.
///
/// `Include::default()` matches an omitted selector: documents, metadatas
/// and distances, but not embeddings.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Include {
    pub documents: bool,
    pub metadatas: bool,
    pub distances: bool,
    pub embeddings: bool,
}

impl Default for Include {
    fn default() -> Self {
        Self {
            documents: true,
            metadatas: true,
            distances: true,
            embeddings: false,
        }
    }
}

impl Include {
    pub fn from_fields(fields: Option<&[IncludeField]>) -> Self {
        let Some(fields) = fields else {
            return Self::default();
        };
        let has = |f: IncludeField| fields.contains(&f);
        Self {
            documents: has(IncludeField::Documents),
            metadatas: has(IncludeField::Metadatas),
            distances: has(IncludeField::Distances),
            embeddings: has(IncludeField::Embeddings),
        }
    }

    pub fn all() -> Self {
        Self {
            documents: true,
            metadatas: true,
            distances: true,
            embeddings: true,
        }
    }
}

/// Raw per-query response in parallel-array form, as backends produce it.
///
/// Outer vectors have one entry per submitted query. Normalize with
/// [`QueryResult::from_raw`](crate::QueryResult::from_raw).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RawQueryResult {
    pub ids: Vec<Vec<String>>,
    pub documents: Option<Vec<Vec<Option<Document>>>>,
    pub metadatas: Option<Vec<Vec<Option<Metadata>>>>,
    pub embeddings: Option<Vec<Vec<Embedding>>>,
    pub distances: Option<Vec<Vec<f32>>>,
}

impl RawQueryResult {
    /// No groups yet; only the requested fields carry lists.
    pub fn empty(include: Include) -> Self {
        Self {
            ids: Vec::new(),
            documents: include.documents.then(Vec::new),
            metadatas: include.metadatas.then(Vec::new),
            embeddings: include.embeddings.then(Vec::new),
            distances: include.distances.then(Vec::new),
        }
    }

    /// Append one query's hits.
    pub fn push_group(&mut self, hits: Vec<Hit>) {
        let mut ids = Vec::with_capacity(hits.len());
        let mut docs = Vec::with_capacity(hits.len());
        let mut metas = Vec::with_capacity(hits.len());
        let mut embs = Vec::with_capacity(hits.len());
        let mut dists = Vec::with_capacity(hits.len());
        for hit in hits {
            ids.push(hit.id);
            docs.push(hit.document);
            metas.push(hit.metadata);
            embs.push(hit.embedding.unwrap_or_default());
            dists.push(hit.distance);
        }
        self.ids.push(ids);
        if let Some(all) = self.documents.as_mut() {
            all.push(docs);
        }
        if let Some(all) = self.metadatas.as_mut() {
            all.push(metas);
        }
        if let Some(all) = self.embeddings.as_mut() {
            all.push(embs);
        }
        if let Some(all) = self.distances.as_mut() {
            all.push(dists);
        }
    }
}

/// One ranked record as decoded from a backend response.
#[derive(Clone, Debug, Default)]
pub struct Hit {
    pub id: String,
    pub document: Option<Document>,
    pub metadata: Option<Metadata>,
    pub embedding: Option<Embedding>,
    pub distance: f32,
}

/// Result shape for get/peek calls.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct GetResult {
    pub ids: Vec<String>,
    pub documents: Option<Vec<Option<Document>>>,
    pub metadatas: Option<Vec<Option<Metadata>>>,
    pub embeddings: Option<Vec<Embedding>>,
}

impl GetResult {
    pub fn empty(include: Include) -> Self {
        Self {
            ids: Vec::new(),
            documents: include.documents.then(Vec::new),
            metadatas: include.metadatas.then(Vec::new),
            embeddings: include.embeddings.then(Vec::new),
        }
    }

    pub fn push(
        &mut self,
        id: String,
        document: Option<Document>,
        metadata: Option<Metadata>,
        embedding: Option<Embedding>,
    ) {
        self.ids.push(id);
        if let Some(docs) = self.documents.as_mut() {
            docs.push(document);
        }
        if let Some(metas) = self.metadatas.as_mut() {
            metas.push(metadata);
        }
        if let Some(embs) = self.embeddings.as_mut() {
            embs.push(embedding.unwrap_or_default());
        }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Schema-level facts about a collection, shared by handles and backends.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CollectionInfo {
    pub name: String,
    /// Backend-assigned identifier; remote backends address collections by name only.
    pub id: Option<String>,
    pub dimension: u32,
    pub distance: DistanceMetric,
}

/// Returned by `describe`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CollectionDescription {
    pub info: CollectionInfo,
    pub count: u64,
    /// Backend mode the description came from ("embedded", "server").
    pub mode: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_result_keeps_requested_lists_in_step() {
        let include = Include::from_fields(Some(&[IncludeField::Documents, IncludeField::Distances]));
        let mut raw = RawQueryResult::empty(include);
        assert!(raw.ids.is_empty());
        assert!(raw.metadatas.is_none() && raw.embeddings.is_none());

        raw.push_group(vec![Hit {
            id: "a".into(),
            document: Some("doc".into()),
            distance: 0.5,
            ..Hit::default()
        }]);
        raw.push_group(Vec::new());

        assert_eq!(raw.ids, vec![vec!["a".to_string()], Vec::new()]);
        assert_eq!(raw.documents, Some(vec![vec![Some("doc".to_string())], Vec::new()]));
        assert_eq!(raw.distances, Some(vec![vec![0.5], Vec::new()]));
        assert!(raw.metadatas.is_none());
    }
}
