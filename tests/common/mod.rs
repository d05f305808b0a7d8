#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use parking_lot::Mutex;
use seekdb_client::{
    Cell, Client, EmbeddedConfig, EmbeddingFunction, Embeddings, Result, Row, SeekDbError,
    ServerConfig, SqlBackend, Statement,
};
use serde_json::Value;

/// Load ServerConfig from environment when `SEEKDB_INTEGRATION=1` is set.
/// Returns None and prints a SKIP message otherwise.
pub fn load_config_for_integration() -> Option<ServerConfig> {
    if std::env::var("SEEKDB_INTEGRATION").ok().as_deref() != Some("1") {
        eprintln!("SKIP: set SEEKDB_INTEGRATION=1 and SERVER_* env vars to run integration tests");
        return None;
    }
    ServerConfig::from_env().ok()
}

/// Millisecond timestamp string used to make database/collection names unique.
pub fn ts_suffix() -> String {
    let ts = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    ts.to_string()
}

/// In-memory embedded client rooted in a fresh temp directory.
pub fn memory_client() -> anyhow::Result<(Client, tempfile::TempDir)> {
    let dir = tempfile::tempdir()?;
    let client = Client::in_memory(EmbeddedConfig::new(dir.path().join("seekdb")));
    Ok((client, dir))
}

/// Returns the same vector for every input.
pub struct ConstantEmbedding {
    pub value: f32,
    pub dim: usize,
}

#[async_trait]
impl EmbeddingFunction for ConstantEmbedding {
    async fn embed_documents(&self, docs: &[String]) -> Result<Embeddings> {
        Ok(docs.iter().map(|_| vec![self.value; self.dim]).collect())
    }

    fn dimension(&self) -> Result<usize> {
        Ok(self.dim)
    }
}

/// Build a row from `(column, cell)` pairs.
pub fn row(cells: &[(&str, Cell)]) -> Row {
    Row::new(
        cells
            .iter()
            .map(|(name, cell)| (name.to_string(), cell.clone()))
            .collect(),
    )
}

pub fn text(s: &str) -> Cell {
    Cell::Text(s.to_string())
}

type Handler = Box<dyn Fn(&str, &[Value]) -> Result<Vec<Row>> + Send + Sync>;

/// `SqlBackend` double answering from a script and recording every statement.
pub struct ScriptedBackend {
    handler: Handler,
    log: Mutex<Vec<String>>,
    connected: AtomicBool,
    generation: AtomicU64,
}

impl ScriptedBackend {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&str, &[Value]) -> Result<Vec<Row>> + Send + Sync + 'static,
    {
        Self {
            handler: Box::new(handler),
            log: Mutex::new(Vec::new()),
            connected: AtomicBool::new(false),
            generation: AtomicU64::new(0),
        }
    }

    /// Statements seen so far, in order.
    pub fn statements(&self) -> Vec<String> {
        self.log.lock().clone()
    }

    pub fn count_matching(&self, needle: &str) -> usize {
        self.log.lock().iter().filter(|s| s.contains(needle)).count()
    }

    /// Simulate a dropped transport; the next call reconnects.
    pub fn drop_connection(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    fn run(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        self.log.lock().push(sql.to_string());
        (self.handler)(sql, params)
    }

    fn ensure(&self) {
        if !self.connected.swap(true, Ordering::SeqCst) {
            self.generation.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl SqlBackend for ScriptedBackend {
    async fn connect(&self) -> Result<()> {
        self.ensure();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    async fn fetch(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        self.ensure();
        self.run(sql, params)
    }

    async fn exec(&self, sql: &str, params: &[Value]) -> Result<u64> {
        self.ensure();
        self.run(sql, params).map(|rows| rows.len() as u64)
    }

    async fn exec_batch(&self, statements: &[Statement]) -> Result<u64> {
        self.ensure();
        let mut affected = 0;
        for stmt in statements {
            self.run(&stmt.sql, &stmt.params)?;
            affected += 1;
        }
        Ok(affected)
    }

    async fn close(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn endpoint(&self) -> String {
        "scripted:2881".into()
    }

    fn mode(&self) -> &'static str {
        "server"
    }
}

/// Answers identity probes with `banner` and catalog probes with "absent".
pub fn banner_only(banner: &'static str) -> impl Fn(&str, &[Value]) -> Result<Vec<Row>> + Send + Sync {
    move |sql, _| {
        if sql.starts_with("SELECT VERSION()") {
            return Ok(vec![row(&[("version", text(banner))])]);
        }
        if sql.starts_with("SHOW VARIABLES") {
            return Ok(Vec::new());
        }
        if sql.contains("ob_version()") {
            return Err(SeekDbError::Sql("unexpected ob_version probe".into()));
        }
        Ok(Vec::new())
    }
}
