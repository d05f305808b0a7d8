//! Native hybrid search parameters (`DBMS_HYBRID_SEARCH`).
//!
//! A search parameter carries a KNN branch, an optional full-text `query`
//! branch and a `rank` fusing the two. Filters are pushed into the KNN branch
//! so candidates are restricted before ranking.
use serde::Serialize;
use serde_json::{Map, Value, json};

use crate::error::{Result, SeekDbError};
use crate::filters::{DocFilter, Filter};
use crate::meta::CollectionFieldNames;

/// How the vector and keyword branches of a hybrid search are fused.
#[derive(Clone, Debug, PartialEq)]
pub enum HybridRank {
    /// Reciprocal Rank Fusion; unset fields use server defaults.
    Rrf {
        rank_window_size: Option<u32>,
        rank_constant: Option<u32>,
    },
    /// Rank JSON passed through untouched.
    Raw(Value),
}

impl HybridRank {
    pub fn rrf() -> Self {
        HybridRank::Rrf {
            rank_window_size: None,
            rank_constant: None,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            HybridRank::Rrf {
                rank_window_size,
                rank_constant,
            } => {
                let mut inner = Map::new();
                if let Some(w) = rank_window_size {
                    inner.insert("rank_window_size".into(), json!(w));
                }
                if let Some(c) = rank_constant {
                    inner.insert("rank_constant".into(), json!(c));
                }
                json!({ "rrf": inner })
            }
            HybridRank::Raw(v) => v.clone(),
        }
    }
}

#[derive(Serialize)]
struct SearchParm<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    query: Option<Value>,
    knn: KnnExpr<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    rank: Option<Value>,
    size: usize,
}

#[derive(Serialize)]
struct KnnExpr<'a> {
    field: &'static str,
    k: usize,
    query_vector: &'a [f32],
    #[serde(skip_serializing_if = "Vec::is_empty")]
    filter: Vec<Value>,
}

/// Build the JSON search parameter for one query vector.
///
/// Returns `None` when the filters cannot be expressed natively (document
/// regexes), in which case callers run a filtered KNN statement instead.
pub(crate) fn build_search_parm(
    query_vector: &[f32],
    query_text: Option<&str>,
    where_meta: Option<&Filter>,
    where_document: Option<&DocFilter>,
    n_results: usize,
    rank: Option<&HybridRank>,
) -> Result<Option<String>> {
    let doc_query = match where_document {
        Some(filter) => match document_query(filter) {
            Some(q) => Some(q),
            None => return Ok(None),
        },
        None => None,
    };
    let meta_terms = where_meta.map(metadata_terms).unwrap_or_default();

    let mut knn_filter = meta_terms.clone();
    knn_filter.extend(doc_query.clone());

    // the keyword branch must satisfy the document filter as well as the text
    let must: Vec<Value> = query_text.map(query_string).into_iter().chain(doc_query).collect();
    let query = match (must.len(), meta_terms.is_empty()) {
        (0, _) => None,
        (1, true) => must.into_iter().next(),
        (_, true) => Some(json!({ "bool": { "must": must } })),
        (_, false) => Some(json!({ "bool": { "must": must, "filter": meta_terms } })),
    };
    // fusion needs both branches
    let rank = query.as_ref().and(rank).map(HybridRank::to_value);

    let parm = SearchParm {
        query,
        knn: KnnExpr {
            field: CollectionFieldNames::EMBEDDING,
            k: n_results,
            query_vector,
            filter: knn_filter,
        },
        rank,
        size: n_results,
    };
    serde_json::to_string(&parm)
        .map(Some)
        .map_err(SeekDbError::Serialization)
}

/// Errors meaning the server rejected the search parameter itself.
pub(crate) fn is_invalid_argument(err: &SeekDbError) -> bool {
    match err {
        SeekDbError::Sql(msg) => {
            let lower = msg.to_lowercase();
            lower.contains("invalid argument") || lower.contains("1210")
        }
        _ => false,
    }
}

fn term_path(field: &str) -> String {
    format!(
        "(JSON_EXTRACT({}, '{}'))",
        CollectionFieldNames::METADATA,
        crate::filters::meta_path(field)
    )
}

fn metadata_terms(filter: &Filter) -> Vec<Value> {
    let single = |v: Value| vec![v];
    match filter {
        Filter::Eq { field, value } => single(json!({ "term": { term_path(field): value } })),
        Filter::Ne { field, value } => single(json!({
            "bool": { "must_not": [ { "term": { term_path(field): value } } ] }
        })),
        Filter::Gt { field, value } => single(json!({ "range": { term_path(field): { "gt": value } } })),
        Filter::Gte { field, value } => {
            single(json!({ "range": { term_path(field): { "gte": value } } }))
        }
        Filter::Lt { field, value } => single(json!({ "range": { term_path(field): { "lt": value } } })),
        Filter::Lte { field, value } => {
            single(json!({ "range": { term_path(field): { "lte": value } } }))
        }
        Filter::In { field, values } => single(json!({ "terms": { term_path(field): values } })),
        Filter::Nin { field, values } => single(json!({
            "bool": { "must_not": [ { "terms": { term_path(field): values } } ] }
        })),
        Filter::And(filters) => combine(filters, "must"),
        Filter::Or(filters) => combine(filters, "should"),
        Filter::Not(inner) => {
            let terms = metadata_terms(inner);
            if terms.is_empty() {
                Vec::new()
            } else {
                single(json!({ "bool": { "must_not": terms } }))
            }
        }
    }
}

fn combine(filters: &[Filter], occur: &str) -> Vec<Value> {
    let parts: Vec<Value> = filters
        .iter()
        .filter_map(|f| {
            let mut terms = metadata_terms(f);
            match terms.len() {
                0 => None,
                1 => terms.pop(),
                _ => Some(json!({ "bool": { "must": terms } })),
            }
        })
        .collect();
    if parts.is_empty() {
        Vec::new()
    } else {
        vec![json!({ "bool": { occur: parts } })]
    }
}

fn query_string(text: &str) -> Value {
    json!({
        "query_string": { "fields": [CollectionFieldNames::DOCUMENT], "query": text }
    })
}

/// Full-text form of a document filter; `None` if any branch is a regex.
fn document_query(filter: &DocFilter) -> Option<Value> {
    match filter {
        DocFilter::Contains(text) => Some(query_string(text)),
        DocFilter::Regex(_) => None,
        DocFilter::And(filters) => {
            let parts = filters.iter().map(document_query).collect::<Option<Vec<_>>>()?;
            Some(json!({ "bool": { "must": parts } }))
        }
        DocFilter::Or(filters) => {
            let parts = filters.iter().map(document_query).collect::<Option<Vec<_>>>()?;
            Some(json!({ "bool": { "should": parts } }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(parm: Option<String>) -> Value {
        serde_json::from_str(&parm.unwrap()).unwrap()
    }

    #[test]
    fn rrf_rank_omits_unset_fields() {
        assert_eq!(HybridRank::rrf().to_value(), json!({ "rrf": {} }));
        let rank = HybridRank::Rrf {
            rank_window_size: Some(60),
            rank_constant: None,
        };
        assert_eq!(rank.to_value(), json!({ "rrf": { "rank_window_size": 60 } }));
    }

    #[test]
    fn knn_only_parameter() {
        let v = parse(build_search_parm(&[1.0, 0.5], None, None, None, 3, None).unwrap());
        assert_eq!(
            v,
            json!({
                "knn": { "field": "embedding", "k": 3, "query_vector": [1.0, 0.5] },
                "size": 3
            })
        );
    }

    #[test]
    fn filters_restrict_the_knn_branch() {
        let meta = Filter::eq("category", "AI");
        let doc = DocFilter::contains("vector");
        let v = parse(
            build_search_parm(&[1.0], None, Some(&meta), Some(&doc), 5, Some(&HybridRank::rrf()))
                .unwrap(),
        );
        let filter = v["knn"]["filter"].as_array().unwrap();
        assert_eq!(filter.len(), 2);
        assert_eq!(
            filter[0],
            json!({ "term": { "(JSON_EXTRACT(metadata, '$.category'))": "AI" } })
        );
        // the document filter doubles as the keyword branch
        assert_eq!(v["query"]["bool"]["must"][0]["query_string"]["query"], "vector");
        assert_eq!(v["rank"], json!({ "rrf": {} }));
    }

    #[test]
    fn rank_is_dropped_without_keyword_branch() {
        let v = parse(
            build_search_parm(&[1.0], None, None, None, 2, Some(&HybridRank::rrf())).unwrap(),
        );
        assert!(v.get("rank").is_none());
        assert!(v.get("query").is_none());
    }

    #[test]
    fn keyword_branch_keeps_document_filter() {
        let doc = DocFilter::contains("alpha");
        let v = parse(
            build_search_parm(&[1.0], Some("beta"), None, Some(&doc), 2, Some(&HybridRank::rrf()))
                .unwrap(),
        );
        let must = v["query"]["bool"]["must"].as_array().unwrap();
        assert_eq!(must.len(), 2);
        assert_eq!(must[0]["query_string"]["query"], "beta");
        assert_eq!(must[1]["query_string"]["query"], "alpha");
        assert!(v["query"]["bool"]["filter"].is_null());
        assert_eq!(v["knn"]["filter"][0]["query_string"]["query"], "alpha");

        let meta = Filter::eq("k", 1);
        let v = parse(
            build_search_parm(&[1.0], Some("beta"), Some(&meta), Some(&doc), 2, None).unwrap(),
        );
        assert_eq!(v["query"]["bool"]["must"].as_array().unwrap().len(), 2);
        assert_eq!(v["query"]["bool"]["filter"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn regex_filters_are_not_expressible() {
        let doc = DocFilter::And(vec![DocFilter::contains("a"), DocFilter::regex("^b")]);
        assert!(build_search_parm(&[1.0], None, None, Some(&doc), 1, None)
            .unwrap()
            .is_none());
    }

    #[test]
    fn logical_metadata_terms() {
        let f = Filter::Or(vec![
            Filter::gte("year", 2020),
            Filter::Not(Box::new(Filter::is_in("tag", vec![json!("x")]))),
        ]);
        let terms = metadata_terms(&f);
        assert_eq!(terms.len(), 1);
        let should = terms[0]["bool"]["should"].as_array().unwrap();
        assert_eq!(should.len(), 2);
        assert!(should[1]["bool"]["must_not"][0]["terms"].is_object());
    }

    #[test]
    fn invalid_argument_detection() {
        assert!(is_invalid_argument(&SeekDbError::Sql("ERROR 1210: Invalid argument".into())));
        assert!(!is_invalid_argument(&SeekDbError::Sql("syntax error".into())));
        assert!(!is_invalid_argument(&SeekDbError::NotFound("x".into())));
    }
}
