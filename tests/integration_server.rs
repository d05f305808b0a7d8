//! Round trips against a real seekdb or OceanBase server.
//! These tests are skipped unless `SEEKDB_INTEGRATION=1` and SERVER_* env vars are set.
#![cfg(feature = "server")]

use anyhow::Result;
use seekdb_client::{
    AdminApi, Client, ClientApi, CollectionOptions, DistanceMetric, EmbeddingChoice, Filter,
    HybridRank, HybridSearch, Query, RecordBatch, RecordFilter,
};
use serde_json::json;

mod common;
use common::{load_config_for_integration, ts_suffix};

#[tokio::test]
async fn connect_detect_and_execute() -> Result<()> {
    let Some(config) = load_config_for_integration() else {
        return Ok(());
    };
    let client = Client::server(config);
    assert!(!client.is_connected());

    let rows = client.execute("SELECT 1").await?;
    assert_eq!(rows.len(), 1);
    let (kind, version) = client.detect_db_type_and_version().await?;
    eprintln!("connected to {kind} {version}");
    client.close().await?;
    Ok(())
}

#[tokio::test]
async fn database_admin_round_trip() -> Result<()> {
    let Some(config) = load_config_for_integration() else {
        return Ok(());
    };
    let tenant = config.tenant.clone();
    let client = Client::server(config);
    let admin = client.admin();
    let name = format!("test_db_{}", ts_suffix());

    admin.create_database(&name, Some(&tenant)).await?;
    let db = admin.get_database(&name, None).await?;
    assert_eq!(db.name, name);
    let all = admin.list_databases(None, None, None).await?;
    assert!(all.iter().any(|d| d.name == name));
    admin.delete_database(&name, None).await?;
    assert!(admin.get_database(&name, None).await.is_err());
    Ok(())
}

#[tokio::test]
async fn collection_round_trip() -> Result<()> {
    let Some(config) = load_config_for_integration() else {
        return Ok(());
    };
    let client = Client::server(config);
    let name = format!("test_coll_{}", ts_suffix());
    let coll = client
        .create_collection(
            &name,
            CollectionOptions::new()
                .dimension(3)
                .distance(DistanceMetric::L2)
                .embedding_function(EmbeddingChoice::Disabled),
        )
        .await?;

    coll.add(
        RecordBatch::new(["a", "b", "c"])
            .with_embeddings(vec![
                vec![1.0, 0.0, 0.0],
                vec![0.0, 1.0, 0.0],
                vec![0.0, 0.0, 1.0],
            ])
            .with_documents(["rust ownership", "tokio runtime", "sql joins"])
            .with_metadatas(vec![
                json!({"topic": "lang"}),
                json!({"topic": "async"}),
                json!({"topic": "db"}),
            ]),
    )
    .await?;
    assert_eq!(coll.count().await?, 3);

    let reopened = client.get_collection(&name).await?;
    assert_eq!(reopened.dimension(), 3);
    assert_eq!(reopened.distance(), DistanceMetric::L2);

    let res = coll
        .query(Query::embeddings(vec![vec![1.0, 0.0, 0.0]]).n_results(2))
        .await?;
    assert_eq!(res[0][0].id, "a");

    let res = coll
        .query(
            Query::embeddings(vec![vec![1.0, 0.0, 0.0]])
                .with_where(Filter::eq("topic", "db")),
        )
        .await?;
    assert_eq!(res.ids(), vec![vec!["c"]]);

    let res = coll
        .hybrid_search(
            HybridSearch::new(Query::embeddings(vec![vec![0.0, 1.0, 0.0]]).n_results(2))
                .query_text("tokio")
                .rank(HybridRank::rrf()),
        )
        .await?;
    assert!(res.ids()[0].contains(&"b"));

    coll.update(RecordBatch::new(["a"]).with_metadatas(vec![json!({"topic": "systems"})]))
        .await?;
    let got = coll.get(RecordFilter::ids(["a"]), None, None, None).await?;
    assert_eq!(got.metadatas, Some(vec![Some(json!({"topic": "systems"}))]));

    assert_eq!(coll.delete(RecordFilter::ids(["a", "b"])).await?, 2);
    assert_eq!(coll.count().await?, 1);

    client.delete_collection(&name).await?;
    assert!(!client.has_collection(&name).await?);
    Ok(())
}
