use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
#[cfg(feature = "embedding")]
use once_cell::sync::OnceCell;
use sha2::{Digest, Sha256};

use crate::error::{Result, SeekDbError};
use crate::types::Embeddings;

/// Converts text into fixed-dimension vectors.
///
/// Implementations return one vector per input, in input order, and `[]` for
/// `[]`. `dimension` must not change over the lifetime of an instance.
#[async_trait]
pub trait EmbeddingFunction: Send + Sync {
    async fn embed_documents(&self, docs: &[String]) -> Result<Embeddings>;

    /// Single-document input shape; returns a one-element list.
    async fn embed_document(&self, doc: &str) -> Result<Embeddings> {
        self.embed_documents(&[doc.to_string()]).await
    }

    fn dimension(&self) -> Result<usize>;
}

#[async_trait]
impl<T: EmbeddingFunction + ?Sized> EmbeddingFunction for Arc<T> {
    async fn embed_documents(&self, docs: &[String]) -> Result<Embeddings> {
        (**self).embed_documents(docs).await
    }

    fn dimension(&self) -> Result<usize> {
        (**self).dimension()
    }
}

#[async_trait]
impl<T: EmbeddingFunction + ?Sized> EmbeddingFunction for Box<T> {
    async fn embed_documents(&self, docs: &[String]) -> Result<Embeddings> {
        (**self).embed_documents(docs).await
    }

    fn dimension(&self) -> Result<usize> {
        (**self).dimension()
    }
}

/// Which embedding function a collection binds.
#[derive(Clone, Default)]
pub enum EmbeddingChoice {
    /// The process-wide [`default_embedding_function`].
    #[default]
    Default,
    /// No embedding function; writes and queries must carry vectors.
    Disabled,
    Custom(Arc<dyn EmbeddingFunction>),
}

impl EmbeddingChoice {
    pub fn custom<E: EmbeddingFunction + 'static>(ef: E) -> Self {
        EmbeddingChoice::Custom(Arc::new(ef))
    }

    pub fn resolve(&self) -> Option<Arc<dyn EmbeddingFunction>> {
        match self {
            EmbeddingChoice::Default => Some(default_embedding_function()),
            EmbeddingChoice::Disabled => None,
            EmbeddingChoice::Custom(ef) => Some(Arc::clone(ef)),
        }
    }
}

impl fmt::Debug for EmbeddingChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EmbeddingChoice::Default => f.write_str("Default"),
            EmbeddingChoice::Disabled => f.write_str("Disabled"),
            EmbeddingChoice::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

pub const DEFAULT_MODEL: &str = "sentence-transformers/all-MiniLM-L6-v2";

#[cfg(feature = "embedding")]
const PROBE: &str = "test";

static DEFAULT_EMBEDDING: Lazy<Arc<DefaultEmbedding>> =
    Lazy::new(|| Arc::new(DefaultEmbedding::new()));

/// Shared default embedding function; the model itself loads on first use.
pub fn default_embedding_function() -> Arc<dyn EmbeddingFunction> {
    DEFAULT_EMBEDDING.clone()
}

/// Sentence-embedding model loaded lazily on first `embed_documents`/`dimension` call.
///
/// Construction does no I/O. A failed load is retried on the next call. Without the
/// `embedding` feature every call fails with [`SeekDbError::DependencyMissing`].
pub struct DefaultEmbedding {
    model_name: String,
    #[cfg(feature = "embedding")]
    model: OnceCell<(crate::onnx::OnnxModel, usize)>,
}

impl Default for DefaultEmbedding {
    fn default() -> Self {
        Self::new()
    }
}

impl DefaultEmbedding {
    pub fn new() -> Self {
        Self::with_model(DEFAULT_MODEL)
    }

    /// Use another hf-hub sentence-transformers repo with an ONNX export.
    pub fn with_model(model_name: impl Into<String>) -> Self {
        Self {
            model_name: model_name.into(),
            #[cfg(feature = "embedding")]
            model: OnceCell::new(),
        }
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    /// Whether the model has been loaded yet.
    pub fn is_loaded(&self) -> bool {
        #[cfg(feature = "embedding")]
        {
            self.model.get().is_some()
        }
        #[cfg(not(feature = "embedding"))]
        {
            false
        }
    }

    #[cfg(feature = "embedding")]
    fn loaded(&self) -> Result<&(crate::onnx::OnnxModel, usize)> {
        self.model.get_or_try_init(|| {
            let model = crate::onnx::OnnxModel::load(&self.model_name)?;
            let dimension = model
                .embed(&[PROBE.to_string()])?
                .first()
                .map(Vec::len)
                .filter(|d| *d > 0)
                .ok_or_else(|| {
                    SeekDbError::Embedding(format!(
                        "model {} produced no embedding for probe input",
                        self.model_name
                    ))
                })?;
            tracing::info!(model = %self.model_name, dimension, "default embedding model loaded");
            Ok((model, dimension))
        })
    }

    #[cfg(not(feature = "embedding"))]
    fn missing(&self) -> SeekDbError {
        SeekDbError::DependencyMissing(format!(
            "default embedding model {} requires the `embedding` feature \
             (seekdb-client = {{ features = [\"embedding\"] }}); \
             bind a custom EmbeddingFunction or disable embeddings instead",
            self.model_name
        ))
    }
}

#[async_trait]
impl EmbeddingFunction for DefaultEmbedding {
    async fn embed_documents(&self, docs: &[String]) -> Result<Embeddings> {
        if docs.is_empty() {
            return Ok(Vec::new());
        }
        #[cfg(feature = "embedding")]
        {
            let (model, _) = self.loaded()?;
            model.embed(docs)
        }
        #[cfg(not(feature = "embedding"))]
        {
            Err(self.missing())
        }
    }

    fn dimension(&self) -> Result<usize> {
        #[cfg(feature = "embedding")]
        {
            self.loaded().map(|(_, dim)| *dim)
        }
        #[cfg(not(feature = "embedding"))]
        {
            Err(self.missing())
        }
    }
}

/// Deterministic embedding derived from the SHA-256 digest of the text.
///
/// Digest bytes are scaled to `[0, 1]` and cycled to fill `dimension`. Needs no
/// model, so it suits tests and offline setups.
#[derive(Clone, Debug)]
pub struct HashEmbedding {
    dimension: usize,
}

impl HashEmbedding {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let digest = Sha256::digest(text.as_bytes());
        digest
            .iter()
            .cycle()
            .take(self.dimension)
            .map(|b| f32::from(*b) / 255.0)
            .collect()
    }
}

#[async_trait]
impl EmbeddingFunction for HashEmbedding {
    async fn embed_documents(&self, docs: &[String]) -> Result<Embeddings> {
        Ok(docs.iter().map(|d| self.embed_one(d)).collect())
    }

    fn dimension(&self) -> Result<usize> {
        Ok(self.dimension)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hash_embedding_is_deterministic_and_sized() {
        let ef = HashEmbedding::new(40);
        let a = ef.embed_documents(&["hello".into(), "world".into()]).await.unwrap();
        let b = ef.embed_documents(&["hello".into()]).await.unwrap();
        assert_eq!(a.len(), 2);
        assert_eq!(a[0], b[0]);
        assert_ne!(a[0], a[1]);
        assert!(a.iter().all(|v| v.len() == 40));
        // 32 digest bytes, then the cycle restarts
        assert_eq!(a[0][32], a[0][0]);
        assert!(a[0].iter().all(|x| (0.0..=1.0).contains(x)));
    }

    #[tokio::test]
    async fn single_and_list_inputs_agree() {
        let ef = HashEmbedding::new(8);
        let one = ef.embed_document("doc").await.unwrap();
        let list = ef.embed_documents(&["doc".into()]).await.unwrap();
        assert_eq!(one, list);
        assert!(ef.embed_documents(&[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn default_embedding_is_lazy() {
        let ef = DefaultEmbedding::new();
        assert!(!ef.is_loaded());
        assert!(ef.embed_documents(&[]).await.unwrap().is_empty());
        assert!(!ef.is_loaded());
        assert_eq!(ef.model_name(), DEFAULT_MODEL);
    }

    #[cfg(not(feature = "embedding"))]
    #[tokio::test]
    async fn default_embedding_without_feature_reports_missing_dependency() {
        let ef = DefaultEmbedding::new();
        let err = ef.embed_document("x").await.unwrap_err();
        assert!(matches!(err, SeekDbError::DependencyMissing(_)));
        assert!(matches!(ef.dimension(), Err(SeekDbError::DependencyMissing(_))));
    }

    #[test]
    fn choice_resolution() {
        assert!(EmbeddingChoice::Disabled.resolve().is_none());
        let custom = EmbeddingChoice::custom(HashEmbedding::new(3));
        let ef = custom.resolve().unwrap();
        assert_eq!(ef.dimension().unwrap(), 3);
        let a = default_embedding_function();
        let b = default_embedding_function();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(format!("{:?}", EmbeddingChoice::default()), "Default");
    }
}
