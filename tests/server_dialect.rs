//! Remote client SQL generation, checked against a scripted transport.
//!
//! Each test scripts the server's answers and inspects the statements the
//! client sent, so dialect gates and fallbacks run without a live server.

use std::sync::Arc;

use anyhow::Result;
use parking_lot::Mutex;
use seekdb_client::{
    AdminApi, BaseClient, Cell, Collection, CollectionInfo, DistanceMetric, DocFilter, Filter,
    HnswConfig, HybridRank, HybridSearch, Query, RecordBatch, RecordFilter, Row, SeekDbError,
    ServerClient, ServerFlavor,
};
use serde_json::{Value, json};

mod common;
use common::{ScriptedBackend, banner_only, row, text};

type Server = ServerClient<ScriptedBackend>;

const SEEKDB: &str = "5.7.25-SeekDB-v1.0.0.0";
const OB_435: &str = "5.7.25-OceanBase_CE-v4.3.5.2";

fn server(backend: ScriptedBackend, flavor: ServerFlavor) -> Arc<Server> {
    Arc::new(ServerClient::new(backend, flavor, "sys", "test"))
}

fn collection(server: &Arc<Server>) -> Collection {
    let client: Arc<dyn BaseClient> = server.clone();
    Collection::new(
        client,
        CollectionInfo {
            name: "docs".into(),
            id: None,
            dimension: 3,
            distance: DistanceMetric::L2,
        },
        None,
    )
}

fn knn_row(id: &str, distance: f64) -> Row {
    row(&[
        ("_id", text(id)),
        ("document", text(&format!("doc {id}"))),
        ("distance", Cell::Float(distance)),
    ])
}

/// Answers identity probes with `banner`, KNN statements with two hits and
/// the native hybrid path with two scored hits.
fn search_script(
    banner: &'static str,
    parms: Arc<Mutex<Vec<String>>>,
    reject_native: bool,
) -> impl Fn(&str, &[Value]) -> seekdb_client::Result<Vec<Row>> + Send + Sync {
    let identity = banner_only(banner);
    move |sql, params| {
        if sql.contains("DBMS_HYBRID_SEARCH.GET_SQL") {
            if let Some(Value::String(parm)) = params.first() {
                parms.lock().push(parm.clone());
            }
            if reject_native {
                return Err(SeekDbError::Sql(
                    "1210 (HY000): Incorrect arguments to search".into(),
                ));
            }
            return Ok(vec![row(&[(
                "query_sql",
                text("SELECT _id, document, _score FROM hybrid_view"),
            )])]);
        }
        if sql.contains("hybrid_view") {
            return Ok(vec![
                row(&[("_id", text("h1")), ("document", text("x")), ("_score", Cell::Float(0.9))]),
                row(&[("_id", text("h2")), ("document", text("y")), ("_score", Cell::Float(0.4))]),
            ]);
        }
        if sql.contains("l2_distance") {
            return Ok(vec![knn_row("k1", 0.1), knn_row("k2", 0.2)]);
        }
        identity(sql, params)
    }
}

fn hybrid(rank: bool) -> HybridSearch {
    let search = HybridSearch::new(
        Query::embeddings(vec![vec![1.0, 0.0, 0.0]])
            .with_where(Filter::eq("category", "a"))
            .n_results(2),
    )
    .query_text("rust");
    if rank { search.rank(HybridRank::rrf()) } else { search }
}

#[tokio::test]
async fn fulltext_parser_follows_version() -> Result<()> {
    let cases = [
        ("5.7.25-OceanBase_CE-v4.3.4.0", false),
        ("5.7.25-OceanBase_CE-v4.3.5.1", true),
        (SEEKDB, true),
    ];
    for (banner, parser) in cases {
        let server = server(ScriptedBackend::new(banner_only(banner)), ServerFlavor::OceanBase);
        let info = server
            .create_collection("docs", &HnswConfig::new(3, DistanceMetric::L2))
            .await?;
        assert_eq!(info.dimension, 3);

        let statements = server.backend().statements();
        let ddl = statements
            .iter()
            .find(|s| s.starts_with("CREATE TABLE"))
            .ok_or_else(|| anyhow::anyhow!("no DDL sent for {banner}"))?;
        assert!(ddl.contains("`c$v1$docs`"));
        assert!(ddl.contains("distance=l2"));
        assert_eq!(ddl.contains("WITH PARSER ik"), parser, "banner {banner}");
    }
    Ok(())
}

#[tokio::test]
async fn create_reports_existing_table() -> Result<()> {
    let server = server(
        ScriptedBackend::new(|sql, params| {
            if sql.contains("information_schema.TABLES") {
                return Ok(vec![row(&[("1", Cell::Int(1))])]);
            }
            banner_only(SEEKDB)(sql, params)
        }),
        ServerFlavor::SeekDb,
    );
    let err = server
        .create_collection("docs", &HnswConfig::new(3, DistanceMetric::L2))
        .await
        .unwrap_err();
    assert!(matches!(err, SeekDbError::AlreadyExists(_)));
    assert_eq!(server.backend().count_matching("CREATE TABLE"), 0);
    Ok(())
}

#[tokio::test]
async fn ranked_hybrid_on_old_oceanbase_uses_vector_search() -> Result<()> {
    let parms = Arc::new(Mutex::new(Vec::new()));
    let server = server(
        ScriptedBackend::new(search_script(OB_435, parms.clone(), false)),
        ServerFlavor::OceanBase,
    );
    let res = collection(&server).hybrid_search(hybrid(true)).await?;
    assert_eq!(res.ids(), vec![vec!["k1", "k2"]]);
    assert_eq!(server.backend().count_matching("DBMS_HYBRID_SEARCH"), 0);

    let knn = server
        .backend()
        .statements()
        .into_iter()
        .find(|s| s.contains("l2_distance"))
        .ok_or_else(|| anyhow::anyhow!("no knn statement"))?;
    assert!(knn.contains("JSON_EXTRACT"));
    assert!(knn.contains("embedding IS NOT NULL"));
    assert!(knn.contains("LIMIT 2"));
    Ok(())
}

#[tokio::test]
async fn ranked_hybrid_on_seekdb_runs_native_search() -> Result<()> {
    let parms = Arc::new(Mutex::new(Vec::new()));
    let server = server(
        ScriptedBackend::new(search_script(SEEKDB, parms.clone(), false)),
        ServerFlavor::SeekDb,
    );
    let res = collection(&server).hybrid_search(hybrid(true)).await?;
    assert_eq!(res.ids(), vec![vec!["h1", "h2"]]);
    let first = &res[0][0];
    assert_eq!(first.distance.included().map(|d| (d + 0.9).abs() < 1e-6), Some(true));
    assert_eq!(server.backend().count_matching("l2_distance"), 0);
    assert_eq!(server.backend().count_matching("SET @"), 0);

    let parms = parms.lock();
    assert_eq!(parms.len(), 1);
    let parm: Value = serde_json::from_str(&parms[0])?;
    assert_eq!(parm["knn"]["k"], json!(2));
    assert_eq!(parm["knn"]["query_vector"], json!([1.0, 0.0, 0.0]));
    assert!(parm["rank"]["rrf"].is_object());
    assert!(parm["query"]["bool"]["must"].is_array());
    assert_eq!(parm["size"], json!(2));
    Ok(())
}

#[tokio::test]
async fn unranked_hybrid_stays_on_vector_search() -> Result<()> {
    let parms = Arc::new(Mutex::new(Vec::new()));
    let server = server(
        ScriptedBackend::new(search_script(SEEKDB, parms.clone(), false)),
        ServerFlavor::SeekDb,
    );
    let res = collection(&server).hybrid_search(hybrid(false)).await?;
    assert_eq!(res.ids(), vec![vec!["k1", "k2"]]);
    assert!(parms.lock().is_empty());
    Ok(())
}

#[tokio::test]
async fn rejected_search_parameter_falls_back() -> Result<()> {
    let parms = Arc::new(Mutex::new(Vec::new()));
    let server = server(
        ScriptedBackend::new(search_script(SEEKDB, parms.clone(), true)),
        ServerFlavor::SeekDb,
    );
    let res = collection(&server).hybrid_search(hybrid(true)).await?;
    assert_eq!(res.ids(), vec![vec!["k1", "k2"]]);
    assert_eq!(parms.lock().len(), 1);
    Ok(())
}

#[tokio::test]
async fn regex_document_filter_skips_native_search() -> Result<()> {
    let parms = Arc::new(Mutex::new(Vec::new()));
    let server = server(
        ScriptedBackend::new(search_script(SEEKDB, parms.clone(), false)),
        ServerFlavor::SeekDb,
    );
    let search = HybridSearch::new(
        Query::embeddings(vec![vec![1.0, 0.0, 0.0]])
            .with_where_document(DocFilter::regex("^ru")),
    )
    .rank(HybridRank::rrf());
    let res = collection(&server).hybrid_search(search).await?;
    assert_eq!(res.ids(), vec![vec!["k1", "k2"]]);
    assert!(parms.lock().is_empty());
    let knn = server.backend().statements().join("\n");
    assert!(knn.contains("REGEXP"));
    Ok(())
}

/// Script where `existing` ids are already stored in the collection.
fn dml_server(existing: &'static [&'static str]) -> Arc<Server> {
    server(
        ScriptedBackend::new(move |sql, params| {
            if sql.starts_with("SELECT _id FROM") {
                return Ok(params
                    .iter()
                    .filter_map(Value::as_str)
                    .filter(|id| existing.iter().any(|e| e == id))
                    .map(|id| row(&[("_id", text(id))]))
                    .collect());
            }
            if sql.starts_with("SELECT COUNT(*)") {
                return Ok(vec![row(&[("cnt", Cell::Int(existing.len() as i64))])]);
            }
            if sql.starts_with("DELETE") {
                return Ok(vec![Row::default(); 2]);
            }
            banner_only(SEEKDB)(sql, params)
        }),
        ServerFlavor::SeekDb,
    )
}

#[tokio::test]
async fn add_rejects_stored_ids() -> Result<()> {
    let server = dml_server(&["a"]);
    let coll = collection(&server);
    let err = coll
        .add(RecordBatch::new(["b", "a"]).with_embeddings(vec![vec![0.0; 3], vec![1.0; 3]]))
        .await
        .unwrap_err();
    assert!(matches!(err, SeekDbError::DuplicateId(ref id) if id == "a"));
    assert_eq!(server.backend().count_matching("INSERT"), 0);

    coll.add(RecordBatch::new(["b"]).with_embeddings(vec![vec![0.5; 3]]))
        .await?;
    assert_eq!(server.backend().count_matching("INSERT INTO `c$v1$docs`"), 1);
    Ok(())
}

#[tokio::test]
async fn update_writes_only_given_columns() -> Result<()> {
    let server = dml_server(&["a"]);
    let coll = collection(&server);
    coll.update(RecordBatch::new(["a"]).with_metadatas(vec![json!({"k": 1})]))
        .await?;
    let update = server
        .backend()
        .statements()
        .into_iter()
        .find(|s| s.starts_with("UPDATE"))
        .ok_or_else(|| anyhow::anyhow!("no update sent"))?;
    assert!(update.contains("SET metadata = ?"));
    assert!(!update.contains("embedding"));
    assert!(!update.contains("document"));

    let err = coll
        .update(RecordBatch::new(["zzz"]).with_metadatas(vec![json!({})]))
        .await
        .unwrap_err();
    assert!(matches!(err, SeekDbError::NotFound(_)));
    Ok(())
}

#[tokio::test]
async fn upsert_new_id_without_vector_sends_nothing() -> Result<()> {
    let server = dml_server(&["a"]);
    let coll = collection(&server);
    let err = coll
        .upsert(
            RecordBatch::new(["a", "fresh"])
                .with_metadatas(vec![json!({"k": 1}), json!({"k": 2})]),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, SeekDbError::MissingVector(_)));
    assert_eq!(server.backend().count_matching("UPDATE"), 0);
    assert_eq!(server.backend().count_matching("INSERT"), 0);

    coll.upsert(
        RecordBatch::new(["a", "fresh"]).with_embeddings(vec![vec![0.1; 3], vec![0.2; 3]]),
    )
    .await?;
    assert_eq!(server.backend().count_matching("UPDATE"), 1);
    assert_eq!(server.backend().count_matching("INSERT"), 1);
    Ok(())
}

#[tokio::test]
async fn delete_and_count_use_collection_table() -> Result<()> {
    let server = dml_server(&["a", "b"]);
    let coll = collection(&server);
    let deleted = coll
        .delete(RecordFilter::ids(["a", "b"]).with_where(Filter::eq("k", 1)))
        .await?;
    assert_eq!(deleted, 2);
    assert_eq!(coll.count().await?, 2);

    let delete = server
        .backend()
        .statements()
        .into_iter()
        .find(|s| s.starts_with("DELETE"))
        .ok_or_else(|| anyhow::anyhow!("no delete sent"))?;
    assert!(delete.starts_with("DELETE FROM `c$v1$docs` WHERE"));
    Ok(())
}

#[tokio::test]
async fn admin_checks_tenant_and_existing_databases() -> Result<()> {
    let server = server(
        ScriptedBackend::new(|sql, params| {
            if sql.contains("information_schema.SCHEMATA WHERE") {
                let exists = params.first().and_then(Value::as_str) == Some("present");
                return Ok(if exists {
                    vec![row(&[
                        ("SCHEMA_NAME", text("present")),
                        ("DEFAULT_CHARACTER_SET_NAME", text("utf8mb4")),
                        ("DEFAULT_COLLATION_NAME", text("utf8mb4_bin")),
                    ])]
                } else {
                    Vec::new()
                });
            }
            banner_only(SEEKDB)(sql, params)
        }),
        ServerFlavor::SeekDb,
    );

    let err = server.create_database("x", Some("other")).await.unwrap_err();
    assert!(matches!(err, SeekDbError::InvalidArgument(_)));

    let err = server.create_database("present", None).await.unwrap_err();
    assert!(matches!(err, SeekDbError::AlreadyExists(_)));

    server.create_database("fresh", Some("sys")).await?;
    assert_eq!(server.backend().count_matching("CREATE DATABASE `fresh`"), 1);

    let db = server.get_database("present", None).await?;
    assert_eq!(db.tenant.as_deref(), Some("sys"));
    assert_eq!(db.charset.as_deref(), Some("utf8mb4"));

    let err = server.delete_database("absent", None).await.unwrap_err();
    assert!(matches!(err, SeekDbError::NotFound(_)));
    Ok(())
}

#[tokio::test]
async fn malformed_server_rows_are_format_errors() -> Result<()> {
    let server = server(
        ScriptedBackend::new(|sql, params| {
            if sql.contains("l2_distance") {
                return Ok(vec![row(&[
                    ("_id", text("a")),
                    ("metadata", text("{broken")),
                    ("distance", Cell::Float(0.1)),
                ])]);
            }
            if sql.starts_with("SELECT COUNT(*)") {
                return Ok(vec![row(&[("cnt", text("many"))])]);
            }
            banner_only(SEEKDB)(sql, params)
        }),
        ServerFlavor::SeekDb,
    );
    let coll = collection(&server);

    let err = coll
        .query(Query::embeddings(vec![vec![1.0, 0.0, 0.0]]))
        .await
        .unwrap_err();
    assert!(matches!(err, SeekDbError::Format(_)), "{err}");

    let err = coll.count().await.unwrap_err();
    assert!(matches!(err, SeekDbError::Format(_)), "{err}");
    Ok(())
}
