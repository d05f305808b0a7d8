//! ONNX Runtime sentence-embedding model backing [`DefaultEmbedding`](crate::DefaultEmbedding).
use std::path::PathBuf;

use parking_lot::Mutex;
use tokenizers::utils::padding::{PaddingParams, PaddingStrategy};
use tokenizers::utils::truncation::TruncationParams;

use crate::error::{Result, SeekDbError};
use crate::types::Embeddings;

pub(crate) const MAX_LENGTH: usize = 256;

pub(crate) struct OnnxModel {
    tokenizer: tokenizers::Tokenizer,
    session: Mutex<ort::session::Session>,
}

impl OnnxModel {
    /// Resolve model files (local dir or hf-hub cache) and build the session.
    pub(crate) fn load(repo_id: &str) -> Result<Self> {
        let (model_path, tokenizer_path) = resolve_model_paths(repo_id)?;

        let mut tokenizer = tokenizers::Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| embed_err(format!("failed to load tokenizer: {e}")))?;
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: MAX_LENGTH,
                ..Default::default()
            }))
            .map_err(|e| embed_err(format!("failed to set truncation: {e}")))?;
        tokenizer.with_padding(Some(PaddingParams {
            strategy: PaddingStrategy::BatchLongest,
            ..Default::default()
        }));

        let session = ort::session::Session::builder()
            .map_err(|e| embed_err(format!("failed to create session builder: {e}")))?
            .with_optimization_level(ort::session::builder::GraphOptimizationLevel::Level1)
            .map_err(|e| embed_err(format!("failed to set optimization level: {e}")))?
            .commit_from_file(&model_path)
            .map_err(|e| {
                embed_err(format!(
                    "failed to load onnx model from {}: {e}",
                    model_path.display()
                ))
            })?;

        Ok(Self {
            tokenizer,
            session: Mutex::new(session),
        })
    }

    pub(crate) fn embed(&self, docs: &[String]) -> Result<Embeddings> {
        if docs.is_empty() {
            return Ok(Vec::new());
        }

        let encodings = self
            .tokenizer
            .encode_batch(docs.to_vec(), true)
            .map_err(|e| embed_err(format!("tokenization failed: {e}")))?;

        let seq_len = encodings.first().map(|e| e.get_ids().len()).unwrap_or(0);
        if seq_len == 0 {
            return Err(embed_err("tokenization produced empty sequence"));
        }

        let batch = encodings.len();
        let mut input_ids: Vec<i64> = Vec::with_capacity(batch * seq_len);
        let mut attention_mask: Vec<i64> = Vec::with_capacity(batch * seq_len);
        for enc in &encodings {
            if enc.get_ids().len() != seq_len || enc.get_attention_mask().len() != seq_len {
                return Err(embed_err("tokenization produced inconsistent sequence lengths"));
            }
            input_ids.extend(enc.get_ids().iter().map(|id| *id as i64));
            attention_mask.extend(enc.get_attention_mask().iter().map(|m| *m as i64));
        }
        let token_type_ids = vec![0_i64; batch * seq_len];

        let shape = vec![batch as i64, seq_len as i64];
        let tensor = |name: &str, data: Vec<i64>| {
            ort::value::Tensor::<i64>::from_array((shape.clone(), data))
                .map_err(|e| embed_err(format!("failed to build {name} tensor: {e}")))
        };
        let input_ids = tensor("input_ids", input_ids)?;
        let attention = tensor("attention_mask", attention_mask.clone())?;
        let token_types = tensor("token_type_ids", token_type_ids)?;

        let mut session = self.session.lock();
        let outputs = session
            .run(ort::inputs![
                "input_ids" => input_ids,
                "attention_mask" => attention,
                "token_type_ids" => token_types
            ])
            .map_err(|e| embed_err(format!("onnx run failed: {e}")))?;

        if outputs.len() == 0 {
            return Err(embed_err("onnx model returned no outputs"));
        }
        let (out_shape, out_data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| embed_err(format!("failed to extract tensor: {e}")))?;

        if out_shape.len() != 3 {
            return Err(embed_err(format!("unexpected output shape: {out_shape:?}")));
        }
        let (out_batch, out_seq, hidden) = (
            out_shape[0] as usize,
            out_shape[1] as usize,
            out_shape[2] as usize,
        );
        if out_batch != batch || out_seq != seq_len || hidden == 0 {
            return Err(embed_err(format!(
                "unexpected output dims {out_batch}x{out_seq}x{hidden}, expected {batch}x{seq_len}xH"
            )));
        }

        mean_pool(out_data, &attention_mask, batch, seq_len, hidden)
    }
}

fn cache_root() -> PathBuf {
    if let Ok(dir) = std::env::var("SEEKDB_ONNX_CACHE_DIR") {
        return PathBuf::from(dir);
    }
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(".cache/seekdb/onnx_models")
}

fn resolve_model_paths(default_repo: &str) -> Result<(PathBuf, PathBuf)> {
    use hf_hub::api::sync::ApiBuilder;
    use hf_hub::{Repo, RepoType};

    let model_rel =
        std::env::var("SEEKDB_ONNX_MODEL_PATH").unwrap_or_else(|_| "onnx/model.onnx".to_string());
    let tokenizer_rel = std::env::var("SEEKDB_ONNX_TOKENIZER_PATH")
        .unwrap_or_else(|_| "tokenizer.json".to_string());

    // A local model directory skips the network entirely.
    if let Ok(dir) = std::env::var("SEEKDB_ONNX_MODEL_DIR") {
        let root = PathBuf::from(dir);
        let model_path = root.join(&model_rel);
        let tokenizer_path = root.join(&tokenizer_rel);
        for (path, what) in [(&model_path, "model"), (&tokenizer_path, "tokenizer")] {
            if !path.exists() {
                return Err(embed_err(format!("{what} file not found at {}", path.display())));
            }
        }
        return Ok((model_path, tokenizer_path));
    }

    let api = ApiBuilder::from_env()
        .with_cache_dir(cache_root())
        .with_progress(false)
        .build()
        .map_err(|e| embed_err(format!("failed to create hf-hub api: {e}")))?;

    let repo_id = std::env::var("SEEKDB_ONNX_REPO_ID").unwrap_or_else(|_| default_repo.to_string());
    let revision = std::env::var("SEEKDB_ONNX_REVISION").unwrap_or_else(|_| "main".to_string());
    let repo = api.repo(Repo::with_revision(repo_id, RepoType::Model, revision));

    let fetch = |rel: &str| {
        repo.get(rel)
            .map_err(|e| embed_err(format!("failed to get {rel} from hf-hub: {e}")))
    };
    Ok((fetch(&model_rel)?, fetch(&tokenizer_rel)?))
}

/// Average token vectors over the attention mask.
fn mean_pool(
    data: &[f32],
    attention_mask: &[i64],
    batch: usize,
    seq_len: usize,
    hidden: usize,
) -> Result<Embeddings> {
    if attention_mask.len() != batch * seq_len {
        return Err(embed_err(
            "attention mask length does not match batch and sequence length",
        ));
    }
    if data.len() != batch * seq_len * hidden {
        return Err(embed_err("model output size does not match expected dimensions"));
    }

    let pooled = (0..batch)
        .map(|b| {
            let mut acc = vec![0f32; hidden];
            let mut count = 0usize;
            for t in 0..seq_len {
                if attention_mask[b * seq_len + t] == 0 {
                    continue;
                }
                count += 1;
                let offset = (b * seq_len + t) * hidden;
                for (slot, v) in acc.iter_mut().zip(&data[offset..offset + hidden]) {
                    *slot += v;
                }
            }
            let denom = count.max(1) as f32;
            acc.iter_mut().for_each(|v| *v /= denom);
            acc
        })
        .collect();
    Ok(pooled)
}

fn embed_err(msg: impl Into<String>) -> SeekDbError {
    SeekDbError::Embedding(msg.into())
}
