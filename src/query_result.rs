//! Normalized similarity-search results.
//!
//! Backends answer in the parallel-array shape of [`RawQueryResult`]; this
//! module turns that into an ordered sequence of per-query lists of
//! [`QueryItem`]s whose optional fields carry an explicit
//! [`Field::NotIncluded`] state when the caller did not ask for them.

use std::ops::Index;

use serde::Serialize;

use crate::error::{Result, SeekDbError};
use crate::types::{Document, Embedding, Include, Metadata, RawQueryResult};

/// A result field that is either present or was not requested via `include`.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum Field<T> {
    Included(T),
    NotIncluded,
}

impl<T> Field<T> {
    pub fn is_included(&self) -> bool {
        matches!(self, Field::Included(_))
    }

    /// The value, or `None` when the field was not requested.
    pub fn included(&self) -> Option<&T> {
        match self {
            Field::Included(v) => Some(v),
            Field::NotIncluded => None,
        }
    }

    pub fn into_included(self) -> Option<T> {
        match self {
            Field::Included(v) => Some(v),
            Field::NotIncluded => None,
        }
    }

    fn when(on: bool, value: impl FnOnce() -> T) -> Self {
        if on {
            Field::Included(value())
        } else {
            Field::NotIncluded
        }
    }
}

/// One ranked record of a query.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct QueryItem {
    pub id: String,
    /// `Included(None)` means the record has no document.
    pub document: Field<Option<Document>>,
    pub metadata: Field<Option<Metadata>>,
    pub distance: Field<f32>,
    pub embedding: Field<Embedding>,
}

/// Ordered per-query result lists.
#[derive(Clone, Debug, Default, Serialize)]
pub struct QueryResult {
    groups: Vec<Vec<QueryItem>>,
}

impl QueryResult {
    /// Zip parallel arrays into items, honoring `include`.
    ///
    /// Fails when a requested array is missing or its shape disagrees with `ids`.
    pub fn from_raw(raw: RawQueryResult, include: Include) -> Result<Self> {
        let RawQueryResult {
            ids,
            documents,
            metadatas,
            embeddings,
            distances,
        } = raw;

        let queries = ids.len();
        let mut documents = take_groups(documents, include.documents, queries, "documents")?;
        let mut metadatas = take_groups(metadatas, include.metadatas, queries, "metadatas")?;
        let mut embeddings = take_groups(embeddings, include.embeddings, queries, "embeddings")?;
        let mut distances = take_groups(distances, include.distances, queries, "distances")?;

        let mut groups = Vec::with_capacity(queries);
        for (q, group_ids) in ids.into_iter().enumerate() {
            let n = group_ids.len();
            let mut docs = take_group(&mut documents, q, n, "documents")?;
            let mut metas = take_group(&mut metadatas, q, n, "metadatas")?;
            let mut embs = take_group(&mut embeddings, q, n, "embeddings")?;
            let mut dists = take_group(&mut distances, q, n, "distances")?;

            let items = group_ids
                .into_iter()
                .map(|id| QueryItem {
                    id,
                    document: Field::when(include.documents, || next(&mut docs).flatten()),
                    metadata: Field::when(include.metadatas, || next(&mut metas).flatten()),
                    distance: Field::when(include.distances, || {
                        next(&mut dists).unwrap_or_default()
                    }),
                    embedding: Field::when(include.embeddings, || {
                        next(&mut embs).unwrap_or_default()
                    }),
                })
                .collect();
            groups.push(items);
        }

        Ok(Self { groups })
    }

    /// Number of submitted queries.
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Hits for the `query`-th submitted query.
    pub fn get(&self, query: usize) -> Option<&[QueryItem]> {
        self.groups.get(query).map(Vec::as_slice)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Vec<QueryItem>> {
        self.groups.iter()
    }

    /// Ids per query, in rank order.
    pub fn ids(&self) -> Vec<Vec<&str>> {
        self.groups
            .iter()
            .map(|g| g.iter().map(|item| item.id.as_str()).collect())
            .collect()
    }

    /// Total hits across all queries.
    pub fn total_hits(&self) -> usize {
        self.groups.iter().map(Vec::len).sum()
    }

    pub fn into_groups(self) -> Vec<Vec<QueryItem>> {
        self.groups
    }
}

impl Index<usize> for QueryResult {
    type Output = [QueryItem];

    fn index(&self, query: usize) -> &Self::Output {
        &self.groups[query]
    }
}

impl IntoIterator for QueryResult {
    type Item = Vec<QueryItem>;
    type IntoIter = std::vec::IntoIter<Vec<QueryItem>>;

    fn into_iter(self) -> Self::IntoIter {
        self.groups.into_iter()
    }
}

impl<'a> IntoIterator for &'a QueryResult {
    type Item = &'a Vec<QueryItem>;
    type IntoIter = std::slice::Iter<'a, Vec<QueryItem>>;

    fn into_iter(self) -> Self::IntoIter {
        self.groups.iter()
    }
}

fn take_groups<T>(
    lists: Option<Vec<Vec<T>>>,
    requested: bool,
    queries: usize,
    field: &str,
) -> Result<Vec<std::vec::IntoIter<T>>> {
    if !requested {
        return Ok(Vec::new());
    }
    let lists = lists.ok_or_else(|| {
        SeekDbError::Format(format!("backend response is missing requested {field}"))
    })?;
    if lists.len() != queries {
        return Err(SeekDbError::Format(format!(
            "backend returned {} {field} groups for {queries} queries",
            lists.len()
        )));
    }
    Ok(lists.into_iter().map(Vec::into_iter).collect())
}

fn take_group<T>(
    groups: &mut [std::vec::IntoIter<T>],
    query: usize,
    expected: usize,
    field: &str,
) -> Result<std::vec::IntoIter<T>> {
    let Some(group) = groups.get_mut(query) else {
        return Ok(Vec::new().into_iter());
    };
    let group = std::mem::take(group);
    if group.len() != expected {
        return Err(SeekDbError::Format(format!(
            "backend returned {} {field} for {expected} ids in query {query}",
            group.len()
        )));
    }
    Ok(group)
}

fn next<T>(it: &mut std::vec::IntoIter<T>) -> Option<T> {
    it.next()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Hit, IncludeField};
    use serde_json::json;

    fn raw_two_queries(include: Include) -> RawQueryResult {
        let mut raw = RawQueryResult::empty(include);
        raw.push_group(vec![
            Hit {
                id: "a".into(),
                document: Some("doc a".into()),
                metadata: Some(json!({"k": 1})),
                embedding: Some(vec![1.0, 0.0]),
                distance: 0.1,
            },
            Hit {
                id: "b".into(),
                document: None,
                metadata: None,
                embedding: Some(vec![0.0, 1.0]),
                distance: 0.4,
            },
        ]);
        raw.push_group(Vec::new());
        raw
    }

    #[test]
    fn zips_parallel_arrays_per_query() {
        let include = Include::default();
        let qr = QueryResult::from_raw(raw_two_queries(include), include).unwrap();
        assert_eq!(qr.len(), 2);
        assert_eq!(qr.ids(), vec![vec!["a", "b"], vec![]]);

        let first = &qr[0][0];
        assert_eq!(first.document, Field::Included(Some("doc a".to_string())));
        assert_eq!(first.metadata.included(), Some(&Some(json!({"k": 1}))));
        assert_eq!(first.distance, Field::Included(0.1));
        assert_eq!(first.embedding, Field::NotIncluded);

        let second = &qr[0][1];
        assert_eq!(second.document, Field::Included(None));
    }

    #[test]
    fn empty_group_iterates_as_empty() {
        let include = Include::default();
        let qr = QueryResult::from_raw(raw_two_queries(include), include).unwrap();
        assert!(qr.get(1).unwrap().is_empty());
        assert_eq!(qr.iter().map(Vec::len).collect::<Vec<_>>(), vec![2, 0]);
        assert_eq!(qr.total_hits(), 2);
    }

    #[test]
    fn fields_not_requested_are_explicit() {
        let include = Include::from_fields(Some(&[IncludeField::Embeddings]));
        let qr = QueryResult::from_raw(raw_two_queries(include), include).unwrap();
        let item = &qr[0][0];
        assert_eq!(item.document, Field::NotIncluded);
        assert_eq!(item.metadata, Field::NotIncluded);
        assert_eq!(item.distance, Field::NotIncluded);
        assert_eq!(item.embedding.included(), Some(&vec![1.0, 0.0]));
    }

    #[test]
    fn missing_requested_array_is_an_error() {
        let raw = RawQueryResult {
            ids: vec![vec!["a".into()]],
            documents: None,
            metadatas: None,
            embeddings: None,
            distances: None,
        };
        let err = QueryResult::from_raw(raw, Include::default()).unwrap_err();
        assert!(matches!(err, SeekDbError::Format(_)));
    }

    #[test]
    fn ragged_arrays_are_rejected() {
        let raw = RawQueryResult {
            ids: vec![vec!["a".into(), "b".into()]],
            documents: None,
            metadatas: None,
            embeddings: None,
            distances: Some(vec![vec![0.5]]),
        };
        let include = Include::from_fields(Some(&[IncludeField::Distances]));
        let err = QueryResult::from_raw(raw, include).unwrap_err();
        assert!(matches!(err, SeekDbError::Format(_)));
    }
}
