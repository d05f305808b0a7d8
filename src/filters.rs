use std::cmp::Ordering;

use regex::Regex;
use serde_json::Value;

use crate::error::{Result, SeekDbError};
use crate::types::Metadata;

/// Metadata filter expressions.
#[derive(Clone, Debug, PartialEq)]
pub enum Filter {
    Eq { field: String, value: Metadata },
    Lt { field: String, value: Metadata },
    Gt { field: String, value: Metadata },
    Lte { field: String, value: Metadata },
    Gte { field: String, value: Metadata },
    Ne { field: String, value: Metadata },
    In { field: String, values: Vec<Metadata> },
    Nin { field: String, values: Vec<Metadata> },
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: impl Into<Metadata>) -> Self {
        Filter::Eq {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn ne(field: impl Into<String>, value: impl Into<Metadata>) -> Self {
        Filter::Ne {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn lt(field: impl Into<String>, value: impl Into<Metadata>) -> Self {
        Filter::Lt {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn lte(field: impl Into<String>, value: impl Into<Metadata>) -> Self {
        Filter::Lte {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn gt(field: impl Into<String>, value: impl Into<Metadata>) -> Self {
        Filter::Gt {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn gte(field: impl Into<String>, value: impl Into<Metadata>) -> Self {
        Filter::Gte {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn is_in(field: impl Into<String>, values: Vec<Metadata>) -> Self {
        Filter::In {
            field: field.into(),
            values,
        }
    }

    pub fn not_in(field: impl Into<String>, values: Vec<Metadata>) -> Self {
        Filter::Nin {
            field: field.into(),
            values,
        }
    }

    /// Parse a Mongo-style `where` document such as
    /// `{"$and": [{"age": {"$gte": 18}}, {"tag": "a"}]}`.
    ///
    /// A bare `{"field": value}` means equality; several keys in one object are ANDed.
    pub fn from_json(value: &Value) -> Result<Self> {
        let obj = value
            .as_object()
            .ok_or_else(|| invalid("where filter must be a JSON object"))?;
        let mut parts = Vec::with_capacity(obj.len());
        for (key, inner) in obj {
            let part = match key.as_str() {
                "$and" => Filter::And(parse_list(inner, Filter::from_json)?),
                "$or" => Filter::Or(parse_list(inner, Filter::from_json)?),
                "$not" => Filter::Not(Box::new(Filter::from_json(inner)?)),
                op if op.starts_with('$') => {
                    return Err(invalid(format!("unknown where operator {op}")));
                }
                field => parse_field(field, inner)?,
            };
            parts.push(part);
        }
        match parts.len() {
            0 => Err(invalid("where filter must not be empty")),
            1 => Ok(parts.remove(0)),
            _ => Ok(Filter::And(parts)),
        }
    }

    /// Reject field paths that cannot be embedded in a JSON path expression.
    pub fn validate(&self) -> Result<()> {
        match self {
            Filter::Eq { field, .. }
            | Filter::Lt { field, .. }
            | Filter::Gt { field, .. }
            | Filter::Lte { field, .. }
            | Filter::Gte { field, .. }
            | Filter::Ne { field, .. }
            | Filter::In { field, .. }
            | Filter::Nin { field, .. } => validate_field(field),
            Filter::And(filters) | Filter::Or(filters) => {
                filters.iter().try_for_each(Filter::validate)
            }
            Filter::Not(inner) => inner.validate(),
        }
    }

    /// Evaluate against a record's metadata.
    ///
    /// Two-valued: a leaf whose path is missing is false, and `Not` negates that.
    pub fn matches(&self, metadata: Option<&Metadata>) -> bool {
        let lookup = |field: &str| metadata.and_then(|m| lookup_path(m, field));
        match self {
            Filter::Eq { field, value } => lookup(field).is_some_and(|v| json_eq(v, value)),
            Filter::Ne { field, value } => lookup(field).is_some_and(|v| !json_eq(v, value)),
            Filter::Lt { field, value } => {
                compare_at(lookup(field), value, |o| o == Ordering::Less)
            }
            Filter::Lte { field, value } => {
                compare_at(lookup(field), value, |o| o != Ordering::Greater)
            }
            Filter::Gt { field, value } => {
                compare_at(lookup(field), value, |o| o == Ordering::Greater)
            }
            Filter::Gte { field, value } => {
                compare_at(lookup(field), value, |o| o != Ordering::Less)
            }
            Filter::In { field, values } => {
                lookup(field).is_some_and(|v| values.iter().any(|x| json_eq(v, x)))
            }
            Filter::Nin { field, values } => {
                lookup(field).is_some_and(|v| !values.iter().any(|x| json_eq(v, x)))
            }
            Filter::And(filters) => filters.iter().all(|f| f.matches(metadata)),
            Filter::Or(filters) => filters.iter().any(|f| f.matches(metadata)),
            Filter::Not(inner) => !inner.matches(metadata),
        }
    }
}

/// Document filter expressions.
#[derive(Clone, Debug, PartialEq)]
pub enum DocFilter {
    Contains(String),
    Regex(String),
    And(Vec<DocFilter>),
    Or(Vec<DocFilter>),
}

impl DocFilter {
    pub fn contains(text: impl Into<String>) -> Self {
        DocFilter::Contains(text.into())
    }

    pub fn regex(pattern: impl Into<String>) -> Self {
        DocFilter::Regex(pattern.into())
    }

    /// Parse `{"$contains": "..."}`, `{"$regex": "..."}`, `{"$and": [...]}`, `{"$or": [...]}`.
    pub fn from_json(value: &Value) -> Result<Self> {
        let obj = value
            .as_object()
            .ok_or_else(|| invalid("where_document filter must be a JSON object"))?;
        if obj.len() != 1 {
            return Err(invalid("where_document filter must have exactly one operator"));
        }
        let (op, inner) = obj
            .iter()
            .next()
            .ok_or_else(|| invalid("where_document filter must not be empty"))?;
        let text = |v: &Value| {
            v.as_str()
                .map(str::to_string)
                .ok_or_else(|| invalid(format!("{op} expects a string")))
        };
        match op.as_str() {
            "$contains" => Ok(DocFilter::Contains(text(inner)?)),
            "$regex" => Ok(DocFilter::Regex(text(inner)?)),
            "$and" => Ok(DocFilter::And(parse_list(inner, DocFilter::from_json)?)),
            "$or" => Ok(DocFilter::Or(parse_list(inner, DocFilter::from_json)?)),
            other => Err(invalid(format!("unknown where_document operator {other}"))),
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            DocFilter::Contains(_) => Ok(()),
            DocFilter::Regex(pattern) => Regex::new(pattern)
                .map(|_| ())
                .map_err(|e| invalid(format!("invalid document regex `{pattern}`: {e}"))),
            DocFilter::And(filters) | DocFilter::Or(filters) => {
                filters.iter().try_for_each(DocFilter::validate)
            }
        }
    }

    /// Evaluate against a record's document. Records without a document never match.
    ///
    /// `Contains` is a case-sensitive substring test; an invalid regex matches nothing.
    pub fn matches(&self, document: Option<&str>) -> bool {
        let Some(doc) = document else {
            return false;
        };
        match self {
            DocFilter::Contains(text) => doc.contains(text.as_str()),
            DocFilter::Regex(pattern) => Regex::new(pattern).is_ok_and(|re| re.is_match(doc)),
            DocFilter::And(filters) => filters.iter().all(|f| f.matches(document)),
            DocFilter::Or(filters) => filters.iter().any(|f| f.matches(document)),
        }
    }
}

/// Record selector shared by delete and get: id list, metadata and document filters, ANDed.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RecordFilter {
    pub ids: Option<Vec<String>>,
    pub where_meta: Option<Filter>,
    pub where_document: Option<DocFilter>,
}

impl RecordFilter {
    pub fn ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            ids: Some(ids.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    pub fn with_where(mut self, filter: Filter) -> Self {
        self.where_meta = Some(filter);
        self
    }

    pub fn with_where_document(mut self, filter: DocFilter) -> Self {
        self.where_document = Some(filter);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_none() && self.where_meta.is_none() && self.where_document.is_none()
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(filter) = &self.where_meta {
            filter.validate()?;
        }
        if let Some(doc) = &self.where_document {
            doc.validate()?;
        }
        Ok(())
    }

    pub fn matches(&self, id: &str, metadata: Option<&Metadata>, document: Option<&str>) -> bool {
        if let Some(ids) = &self.ids {
            if !ids.iter().any(|x| x == id) {
                return false;
            }
        }
        if let Some(filter) = &self.where_meta {
            if !filter.matches(metadata) {
                return false;
            }
        }
        if let Some(doc) = &self.where_document {
            if !doc.matches(document) {
                return false;
            }
        }
        true
    }

    pub fn to_sql(&self) -> SqlWhere {
        build_where_clause(
            self.where_meta.as_ref(),
            self.where_document.as_ref(),
            self.ids.as_deref(),
        )
    }
}

/// SQL WHERE clause + bound parameters.
#[derive(Clone, Debug, PartialEq)]
pub struct SqlWhere {
    pub clause: String,
    pub params: Vec<Metadata>,
}

impl SqlWhere {
    pub fn is_empty(&self) -> bool {
        self.clause.is_empty()
    }
}

/// Build a WHERE clause from metadata/doc filters and optional ids.
///
/// An empty id list matches nothing (`1 = 0`) rather than dropping the predicate.
pub fn build_where_clause(
    filter: Option<&Filter>,
    doc_filter: Option<&DocFilter>,
    ids: Option<&[String]>,
) -> SqlWhere {
    let mut clauses: Vec<String> = Vec::new();
    let mut params: Vec<Metadata> = Vec::new();

    if let Some(ids) = ids {
        if ids.is_empty() {
            clauses.push("1 = 0".to_string());
        } else {
            clauses.push(format!("_id IN ({})", placeholders(ids.len())));
            params.extend(ids.iter().map(|id| Metadata::String(id.clone())));
        }
    }

    if let Some(filter) = filter {
        let (clause, mut p) = build_meta_clause(filter);
        if !clause.is_empty() {
            clauses.push(clause);
            params.append(&mut p);
        }
    }

    if let Some(doc_filter) = doc_filter {
        let (clause, mut p) = build_doc_clause(doc_filter);
        if !clause.is_empty() {
            clauses.push(clause);
            params.append(&mut p);
        }
    }

    let clause = if clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", clauses.join(" AND "))
    };

    SqlWhere { clause, params }
}

/// JSON path for a metadata field, e.g. `a.b` → `$.a.b`.
pub(crate) fn meta_path(field: &str) -> String {
    format!("$.{field}")
}

fn build_meta_clause(filter: &Filter) -> (String, Vec<Metadata>) {
    let extract = |field: &str| format!("JSON_EXTRACT(metadata, '{}')", meta_path(field));
    let cmp = |field: &str, op: &str, value: &Metadata| {
        (format!("{} {op} ?", extract(field)), vec![value.clone()])
    };

    match filter {
        Filter::Eq { field, value } => cmp(field, "=", value),
        Filter::Lt { field, value } => cmp(field, "<", value),
        Filter::Gt { field, value } => cmp(field, ">", value),
        Filter::Lte { field, value } => cmp(field, "<=", value),
        Filter::Gte { field, value } => cmp(field, ">=", value),
        Filter::Ne { field, value } => cmp(field, "!=", value),
        // `x IN ()` is not valid SQL
        Filter::In { values, .. } if values.is_empty() => ("1 = 0".to_string(), Vec::new()),
        Filter::Nin { field, values } if values.is_empty() => {
            (format!("{} IS NOT NULL", extract(field)), Vec::new())
        }
        Filter::In { field, values } => (
            format!("{} IN ({})", extract(field), placeholders(values.len())),
            values.clone(),
        ),
        Filter::Nin { field, values } => (
            format!("{} NOT IN ({})", extract(field), placeholders(values.len())),
            values.clone(),
        ),
        Filter::And(filters) => join_clauses(filters, " AND ", build_meta_clause),
        Filter::Or(filters) => join_clauses(filters, " OR ", build_meta_clause),
        Filter::Not(f) => {
            let (c, p) = build_meta_clause(f);
            if c.is_empty() {
                (String::new(), Vec::new())
            } else {
                (format!("NOT ({c})"), p)
            }
        }
    }
}

fn build_doc_clause(filter: &DocFilter) -> (String, Vec<Metadata>) {
    match filter {
        DocFilter::Contains(text) => (
            "MATCH(document) AGAINST (? IN NATURAL LANGUAGE MODE)".to_string(),
            vec![Metadata::String(text.clone())],
        ),
        DocFilter::Regex(pattern) => (
            "document REGEXP ?".to_string(),
            vec![Metadata::String(pattern.clone())],
        ),
        DocFilter::And(filters) => join_clauses(filters, " AND ", build_doc_clause),
        DocFilter::Or(filters) => join_clauses(filters, " OR ", build_doc_clause),
    }
}

fn join_clauses<T>(
    filters: &[T],
    sep: &str,
    build: fn(&T) -> (String, Vec<Metadata>),
) -> (String, Vec<Metadata>) {
    let mut clauses = Vec::new();
    let mut params = Vec::new();
    for f in filters {
        let (c, mut p) = build(f);
        if !c.is_empty() {
            clauses.push(c);
            params.append(&mut p);
        }
    }
    if clauses.is_empty() {
        (String::new(), params)
    } else {
        (format!("({})", clauses.join(sep)), params)
    }
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

fn parse_list<T>(value: &Value, parse: fn(&Value) -> Result<T>) -> Result<Vec<T>> {
    value
        .as_array()
        .ok_or_else(|| invalid("logical operator expects a list"))?
        .iter()
        .map(parse)
        .collect()
}

fn parse_field(field: &str, value: &Value) -> Result<Filter> {
    let Some(ops) = value.as_object() else {
        return Ok(Filter::eq(field, value.clone()));
    };
    let mut parts = Vec::with_capacity(ops.len());
    for (op, operand) in ops {
        let list = || {
            operand
                .as_array()
                .cloned()
                .ok_or_else(|| invalid(format!("{op} expects a list")))
        };
        parts.push(match op.as_str() {
            "$eq" => Filter::eq(field, operand.clone()),
            "$ne" => Filter::ne(field, operand.clone()),
            "$lt" => Filter::lt(field, operand.clone()),
            "$lte" => Filter::lte(field, operand.clone()),
            "$gt" => Filter::gt(field, operand.clone()),
            "$gte" => Filter::gte(field, operand.clone()),
            "$in" => Filter::is_in(field, list()?),
            "$nin" => Filter::not_in(field, list()?),
            other => return Err(invalid(format!("unknown operator {other} on `{field}`"))),
        });
    }
    match parts.len() {
        0 => Err(invalid(format!("empty operator object on `{field}`"))),
        1 => Ok(parts.remove(0)),
        _ => Ok(Filter::And(parts)),
    }
}

fn validate_field(field: &str) -> Result<()> {
    let ok = !field.is_empty()
        && field
            .split('.')
            .all(|seg| !seg.is_empty() && seg.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_'));
    if ok {
        Ok(())
    } else {
        Err(invalid(format!("invalid metadata field path `{field}`")))
    }
}

fn lookup_path<'a>(metadata: &'a Metadata, field: &str) -> Option<&'a Metadata> {
    field
        .split('.')
        .try_fold(metadata, |cur, seg| cur.as_object()?.get(seg))
        .filter(|v| !v.is_null())
}

fn json_eq(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) if a.is_number() && b.is_number() => x == y,
        _ => a == b,
    }
}

fn compare_at(actual: Option<&Value>, expected: &Value, pred: impl Fn(Ordering) -> bool) -> bool {
    let Some(actual) = actual else {
        return false;
    };
    let ord = match (actual, expected) {
        (Value::Number(a), Value::Number(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => x.partial_cmp(&y),
            _ => None,
        },
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    };
    ord.is_some_and(pred)
}

fn invalid(msg: impl Into<String>) -> SeekDbError {
    SeekDbError::InvalidArgument(msg.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn where_clause_with_ids_meta_doc() {
        let filter = Filter::gte("age", 18);
        let doc = DocFilter::contains("hello");
        let ids = vec!["1".into(), "2".into(), "3".into()];

        let sql = build_where_clause(Some(&filter), Some(&doc), Some(&ids));
        assert_eq!(
            sql.clause,
            "WHERE _id IN (?, ?, ?) AND JSON_EXTRACT(metadata, '$.age') >= ? AND MATCH(document) AGAINST (? IN NATURAL LANGUAGE MODE)"
        );
        assert_eq!(
            sql.params,
            vec![json!("1"), json!("2"), json!("3"), json!(18), json!("hello")]
        );
    }

    #[test]
    fn doc_regex_or() {
        let doc = DocFilter::Or(vec![DocFilter::regex("^a.*"), DocFilter::regex("b$")]);
        let sql = build_where_clause(None, Some(&doc), None);
        assert_eq!(sql.clause, "WHERE (document REGEXP ? OR document REGEXP ?)");
        assert_eq!(sql.params, vec![json!("^a.*"), json!("b$")]);
    }

    #[test]
    fn empty_id_list_matches_nothing() {
        let sql = build_where_clause(None, None, Some(&[]));
        assert_eq!(sql.clause, "WHERE 1 = 0");
        assert!(sql.params.is_empty());
    }

    #[test]
    fn empty_in_list_is_valid_sql() {
        let sql = build_where_clause(Some(&Filter::is_in("tag", vec![])), None, None);
        assert_eq!(sql.clause, "WHERE 1 = 0");
    }

    #[test]
    fn parses_mongo_style_where() {
        let parsed = Filter::from_json(&json!({
            "$or": [{"age": {"$gte": 18, "$lt": 65}}, {"tag": "vip"}]
        }))
        .unwrap();
        assert_eq!(
            parsed,
            Filter::Or(vec![
                Filter::And(vec![Filter::gte("age", 18), Filter::lt("age", 65)]),
                Filter::eq("tag", "vip"),
            ])
        );
        assert!(Filter::from_json(&json!({"$xor": []})).is_err());
        assert!(Filter::from_json(&json!({"age": {"$in": 3}})).is_err());
    }

    #[test]
    fn parses_where_document() {
        let parsed = DocFilter::from_json(&json!({"$and": [{"$contains": "rust"}, {"$regex": "^a"}]}))
            .unwrap();
        assert_eq!(
            parsed,
            DocFilter::And(vec![DocFilter::contains("rust"), DocFilter::regex("^a")])
        );
        assert!(DocFilter::from_json(&json!({"$contains": 1})).is_err());
    }

    #[test]
    fn in_process_evaluation() {
        let meta = json!({"age": 30, "tag": "a", "nested": {"score": 0.5}});
        assert!(Filter::eq("age", 30.0).matches(Some(&meta)));
        assert!(Filter::gt("nested.score", 0.1).matches(Some(&meta)));
        assert!(Filter::is_in("tag", vec![json!("a"), json!("b")]).matches(Some(&meta)));
        assert!(!Filter::not_in("tag", vec![json!("a")]).matches(Some(&meta)));
        assert!(Filter::lte("tag", "b").matches(Some(&meta)));
        assert!(!Filter::lt("tag", 3).matches(Some(&meta)));
    }

    #[test]
    fn missing_path_is_false_and_not_negates() {
        let meta = json!({"age": 30});
        let missing = Filter::ne("city", "paris");
        assert!(!missing.matches(Some(&meta)));
        assert!(!missing.matches(None));
        assert!(Filter::Not(Box::new(missing)).matches(Some(&meta)));
    }

    #[test]
    fn document_evaluation() {
        assert!(DocFilter::contains("Rust").matches(Some("I like Rust")));
        assert!(!DocFilter::contains("rust").matches(Some("I like Rust")));
        assert!(DocFilter::regex("^I\\s").matches(Some("I like Rust")));
        assert!(!DocFilter::contains("x").matches(None));
    }

    #[test]
    fn validation_rejects_bad_fields_and_regex() {
        assert!(Filter::eq("a.b_c", 1).validate().is_ok());
        assert!(Filter::eq("a') OR 1=1 --", 1).validate().is_err());
        assert!(Filter::eq("a..b", 1).validate().is_err());
        assert!(DocFilter::regex("(").validate().is_err());

        let rf = RecordFilter::ids(["x"]).with_where_document(DocFilter::regex("["));
        assert!(rf.validate().is_err());
    }

    #[test]
    fn record_filter_ands_parts() {
        let rf = RecordFilter::ids(["a", "b"]).with_where(Filter::eq("k", 1));
        assert!(rf.matches("a", Some(&json!({"k": 1})), None));
        assert!(!rf.matches("a", Some(&json!({"k": 2})), None));
        assert!(!rf.matches("c", Some(&json!({"k": 1})), None));
        assert!(RecordFilter::default().is_empty());
    }
}
