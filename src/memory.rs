//! In-process [`EmbeddedEngine`] holding everything in memory.
//!
//! Search is an exact scan: filters first, then distance, ties by id.
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;

use crate::client::RecordBatch;
use crate::config::HnswConfig;
use crate::connection::{Cell, Row};
use crate::embedded::{EmbeddedEngine, StoredRecord};
use crate::error::{Result, SeekDbError};
use crate::filters::RecordFilter;
use crate::types::CollectionInfo;
use crate::version::Version;

#[derive(Default)]
struct State {
    path: Option<PathBuf>,
    databases: BTreeMap<String, BTreeMap<String, MemCollection>>,
    next_collection_id: u64,
}

struct MemCollection {
    info: CollectionInfo,
    /// Insertion order.
    records: Vec<StoredRecord>,
}

impl MemCollection {
    fn position(&self, id: &str) -> Option<usize> {
        self.records.iter().position(|r| r.id == id)
    }

    fn matching<'a>(&'a self, filter: &'a RecordFilter) -> impl Iterator<Item = &'a StoredRecord> {
        self.records.iter().filter(move |r| {
            filter.matches(&r.id, r.metadata.as_ref(), r.document.as_deref())
        })
    }
}

#[derive(Default)]
pub struct MemoryEngine {
    state: RwLock<State>,
}

impl MemoryEngine {
    pub const VERSION: Version = Version::new(1, 0, 0, 0);

    pub fn new() -> Self {
        Self::default()
    }

    /// Directory the engine was opened on, if open.
    pub fn path(&self) -> Option<PathBuf> {
        self.state.read().path.clone()
    }

    fn read_collection<T>(
        &self,
        database: &str,
        name: &str,
        f: impl FnOnce(&MemCollection) -> Result<T>,
    ) -> Result<T> {
        let state = self.state.read();
        let db = open_database(&state, database)?;
        let coll = db
            .get(name)
            .ok_or_else(|| SeekDbError::NotFound(format!("collection `{name}`")))?;
        f(coll)
    }

    fn write_collection<T>(
        &self,
        database: &str,
        name: &str,
        f: impl FnOnce(&mut MemCollection) -> Result<T>,
    ) -> Result<T> {
        let mut state = self.state.write();
        ensure_open(&state)?;
        let db = state
            .databases
            .get_mut(database)
            .ok_or_else(|| SeekDbError::NotFound(format!("database `{database}`")))?;
        let coll = db
            .get_mut(name)
            .ok_or_else(|| SeekDbError::NotFound(format!("collection `{name}`")))?;
        f(coll)
    }
}

fn ensure_open(state: &State) -> Result<()> {
    match state.path {
        Some(_) => Ok(()),
        None => Err(SeekDbError::Connection {
            endpoint: "memory".into(),
            message: "engine is not open".into(),
        }),
    }
}

fn open_database<'a>(
    state: &'a State,
    database: &str,
) -> Result<&'a BTreeMap<String, MemCollection>> {
    ensure_open(state)?;
    state
        .databases
        .get(database)
        .ok_or_else(|| SeekDbError::NotFound(format!("database `{database}`")))
}

fn is_liveness_probe(statement: &str) -> bool {
    let stmt = statement.trim().trim_end_matches(';').trim();
    stmt.eq_ignore_ascii_case("select 1")
}

impl EmbeddedEngine for MemoryEngine {
    fn open(&self, path: &Path) -> Result<()> {
        let mut state = self.state.write();
        if state.path.is_none() {
            state.path = Some(path.to_path_buf());
        }
        Ok(())
    }

    fn close(&self) -> Result<()> {
        self.state.write().path = None;
        Ok(())
    }

    fn version(&self) -> Result<Version> {
        Ok(Self::VERSION)
    }

    fn execute(&self, database: &str, statement: &str) -> Result<Vec<Row>> {
        open_database(&self.state.read(), database)?;
        if !is_liveness_probe(statement) {
            return Err(SeekDbError::InvalidArgument(format!(
                "memory engine only answers `SELECT 1`, got `{statement}`"
            )));
        }
        Ok(vec![Row::new(vec![("1".into(), Cell::Int(1))])])
    }

    fn create_database(&self, name: &str) -> Result<()> {
        let mut state = self.state.write();
        ensure_open(&state)?;
        if state.databases.contains_key(name) {
            return Err(SeekDbError::AlreadyExists(format!("database `{name}`")));
        }
        state.databases.insert(name.to_string(), BTreeMap::new());
        Ok(())
    }

    fn has_database(&self, name: &str) -> Result<bool> {
        let state = self.state.read();
        ensure_open(&state)?;
        Ok(state.databases.contains_key(name))
    }

    fn delete_database(&self, name: &str) -> Result<()> {
        let mut state = self.state.write();
        ensure_open(&state)?;
        state
            .databases
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| SeekDbError::NotFound(format!("database `{name}`")))
    }

    fn list_databases(&self) -> Result<Vec<String>> {
        let state = self.state.read();
        ensure_open(&state)?;
        Ok(state.databases.keys().cloned().collect())
    }

    fn create_collection(
        &self,
        database: &str,
        name: &str,
        config: &HnswConfig,
    ) -> Result<CollectionInfo> {
        let mut state = self.state.write();
        ensure_open(&state)?;
        state.next_collection_id += 1;
        let id = state.next_collection_id.to_string();
        let db = state
            .databases
            .get_mut(database)
            .ok_or_else(|| SeekDbError::NotFound(format!("database `{database}`")))?;
        if db.contains_key(name) {
            return Err(SeekDbError::AlreadyExists(format!("collection `{name}`")));
        }
        let info = CollectionInfo {
            name: name.to_string(),
            id: Some(id),
            dimension: config.dimension,
            distance: config.distance,
        };
        db.insert(
            name.to_string(),
            MemCollection {
                info: info.clone(),
                records: Vec::new(),
            },
        );
        Ok(info)
    }

    fn get_collection(&self, database: &str, name: &str) -> Result<CollectionInfo> {
        self.read_collection(database, name, |c| Ok(c.info.clone()))
    }

    fn delete_collection(&self, database: &str, name: &str) -> Result<()> {
        let mut state = self.state.write();
        ensure_open(&state)?;
        state
            .databases
            .get_mut(database)
            .ok_or_else(|| SeekDbError::NotFound(format!("database `{database}`")))?
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| SeekDbError::NotFound(format!("collection `{name}`")))
    }

    fn list_collections(&self, database: &str) -> Result<Vec<CollectionInfo>> {
        let state = self.state.read();
        Ok(open_database(&state, database)?
            .values()
            .map(|c| c.info.clone())
            .collect())
    }

    fn insert(&self, database: &str, collection: &str, batch: &RecordBatch) -> Result<()> {
        self.write_collection(database, collection, |coll| {
            for rec in batch.records() {
                if coll.position(rec.id).is_some() {
                    return Err(SeekDbError::DuplicateId(rec.id.to_string()));
                }
                if rec.embedding.is_none() {
                    return Err(SeekDbError::MissingVector(format!("record `{}`", rec.id)));
                }
            }
            coll.records.extend(batch.records().map(|rec| StoredRecord {
                id: rec.id.to_string(),
                document: rec.document.map(str::to_string),
                metadata: rec.metadata.cloned(),
                embedding: rec.embedding.map(<[f32]>::to_vec),
            }));
            Ok(())
        })
    }

    fn update(&self, database: &str, collection: &str, batch: &RecordBatch) -> Result<()> {
        self.write_collection(database, collection, |coll| {
            let positions = batch
                .records()
                .map(|rec| {
                    coll.position(rec.id)
                        .ok_or_else(|| SeekDbError::NotFound(format!("record `{}`", rec.id)))
                })
                .collect::<Result<Vec<_>>>()?;
            for (pos, rec) in positions.into_iter().zip(batch.records()) {
                apply(&mut coll.records[pos], &rec);
            }
            Ok(())
        })
    }

    fn upsert(&self, database: &str, collection: &str, batch: &RecordBatch) -> Result<()> {
        self.write_collection(database, collection, |coll| {
            let positions: Vec<Option<usize>> =
                batch.records().map(|rec| coll.position(rec.id)).collect();
            for (pos, rec) in positions.iter().zip(batch.records()) {
                if pos.is_none() && rec.embedding.is_none() {
                    return Err(SeekDbError::MissingVector(format!(
                        "new record `{}` has no vector",
                        rec.id
                    )));
                }
            }
            for (pos, rec) in positions.into_iter().zip(batch.records()) {
                match pos {
                    Some(pos) => apply(&mut coll.records[pos], &rec),
                    None => {
                        let mut record = StoredRecord {
                            id: rec.id.to_string(),
                            ..StoredRecord::default()
                        };
                        apply(&mut record, &rec);
                        coll.records.push(record);
                    }
                }
            }
            Ok(())
        })
    }

    fn delete(&self, database: &str, collection: &str, filter: &RecordFilter) -> Result<u64> {
        self.write_collection(database, collection, |coll| {
            let before = coll.records.len();
            coll.records
                .retain(|r| !filter.matches(&r.id, r.metadata.as_ref(), r.document.as_deref()));
            Ok((before - coll.records.len()) as u64)
        })
    }

    fn get(
        &self,
        database: &str,
        collection: &str,
        filter: &RecordFilter,
        limit: Option<usize>,
        offset: Option<usize>,
    ) -> Result<Vec<StoredRecord>> {
        self.read_collection(database, collection, |coll| {
            let iter = coll.matching(filter).skip(offset.unwrap_or(0)).cloned();
            Ok(match limit {
                Some(limit) => iter.take(limit).collect(),
                None => iter.collect(),
            })
        })
    }

    fn search(
        &self,
        database: &str,
        collection: &str,
        vector: &[f32],
        k: usize,
        filter: &RecordFilter,
    ) -> Result<Vec<(StoredRecord, f32)>> {
        self.read_collection(database, collection, |coll| {
            let metric = coll.info.distance;
            let mut scored: Vec<(&StoredRecord, f32)> = coll
                .matching(filter)
                .filter_map(|r| {
                    let emb = r.embedding.as_deref()?;
                    Some((r, metric.distance(vector, emb)))
                })
                .collect();
            scored.sort_by(|(a, da), (b, db)| {
                da.partial_cmp(db)
                    .unwrap_or(Ordering::Equal)
                    .then_with(|| a.id.cmp(&b.id))
            });
            Ok(scored
                .into_iter()
                .take(k)
                .map(|(r, d)| (r.clone(), d))
                .collect())
        })
    }

    fn count(&self, database: &str, collection: &str) -> Result<u64> {
        self.read_collection(database, collection, |c| Ok(c.records.len() as u64))
    }
}

fn apply(record: &mut StoredRecord, rec: &crate::client::RecordRef<'_>) {
    if let Some(emb) = rec.embedding {
        record.embedding = Some(emb.to_vec());
    }
    if let Some(meta) = rec.metadata {
        record.metadata = Some(meta.clone());
    }
    if let Some(doc) = rec.document {
        record.document = Some(doc.to_string());
    }
}
