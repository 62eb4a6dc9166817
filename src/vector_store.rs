use async_trait::async_trait;
use eyre::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;
use tokio::fs;

/// The only shape a vector store accepts: an id and its dense values.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StoreEntry {
    pub id: String,
    pub values: Vec<f32>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    #[default]
    Cosine,
    Euclidean,
    Dotproduct,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    pub name: String,
    pub dimension: usize,
    pub metric: Metric,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct QueryRequest {
    pub vector: Vec<f32>,
    pub top_k: usize,
    pub include_values: bool,
    pub include_metadata: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct QueryMatch {
    pub id: String,
    pub score: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<f32>>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct QueryResponse {
    #[serde(default)]
    pub matches: Vec<QueryMatch>,
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("index `{0}` already exists")]
    IndexExists(String),
    #[error("index `{0}` not found")]
    IndexMissing(String),
    #[error("index dimension must be positive")]
    ZeroDimension,
    #[error("vector `{id}` has dimension {actual}, index `{index}` expects {expected}")]
    DimensionMismatch {
        index: String,
        id: String,
        expected: usize,
        actual: usize,
    },
    #[error("vector store request failed ({status}): {body}")]
    Status { status: u16, body: String },
    #[error("API key is missing or not a valid header value")]
    InvalidApiKey,
    #[error("index `{0}` did not become ready in time")]
    NotReady(String),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Operations the pipeline needs from a vector database.
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn create_index(&self, spec: &IndexSpec) -> Result<(), StoreError>;

    async fn delete_index(&self, name: &str) -> Result<(), StoreError>;

    /// Inserts or overwrites entries by id; returns the number written.
    async fn upsert(&self, index: &str, entries: &[StoreEntry]) -> Result<usize, StoreError>;

    async fn query(&self, index: &str, request: &QueryRequest) -> Result<QueryResponse, StoreError>;
}

#[derive(Serialize, Deserialize, Debug, Clone)]
struct LocalIndex {
    dimension: usize,
    metric: Metric,
    vectors: BTreeMap<String, Vec<f32>>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
struct LocalIndexes {
    indexes: BTreeMap<String, LocalIndex>,
}

/// File-backed store kept as pretty JSON. A mutation becomes visible only
/// after it was written to disk.
#[derive(Debug)]
pub struct LocalStore {
    path: PathBuf,
    state: tokio::sync::Mutex<LocalIndexes>,
}

impl LocalStore {
    pub async fn load(path: PathBuf) -> Result<Self> {
        let state = if path.exists() {
            let content = fs::read_to_string(&path).await?;
            serde_json::from_str(&content)?
        } else {
            LocalIndexes::default()
        };
        Ok(Self {
            path,
            state: tokio::sync::Mutex::new(state),
        })
    }

    pub async fn index_names(&self) -> Vec<String> {
        self.state.lock().await.indexes.keys().cloned().collect()
    }

    #[cfg(test)]
    async fn len(&self, index: &str) -> Option<usize> {
        self.state
            .lock()
            .await
            .indexes
            .get(index)
            .map(|i| i.vectors.len())
    }

    async fn save(&self, state: &LocalIndexes) -> Result<(), StoreError> {
        let content = serde_json::to_string_pretty(state)?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }
        fs::write(&self.path, content).await?;
        Ok(())
    }

    async fn commit(&self, state: &mut LocalIndexes, next: LocalIndexes) -> Result<(), StoreError> {
        self.save(&next).await?;
        *state = next;
        Ok(())
    }
}

#[async_trait]
impl VectorStore for LocalStore {
    async fn create_index(&self, spec: &IndexSpec) -> Result<(), StoreError> {
        if spec.dimension == 0 {
            return Err(StoreError::ZeroDimension);
        }
        let mut state = self.state.lock().await;
        if state.indexes.contains_key(&spec.name) {
            return Err(StoreError::IndexExists(spec.name.clone()));
        }
        let mut next = state.clone();
        next.indexes.insert(
            spec.name.clone(),
            LocalIndex {
                dimension: spec.dimension,
                metric: spec.metric,
                vectors: BTreeMap::new(),
            },
        );
        self.commit(&mut state, next).await
    }

    async fn delete_index(&self, name: &str) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let mut next = state.clone();
        if next.indexes.remove(name).is_none() {
            return Err(StoreError::IndexMissing(name.to_string()));
        }
        self.commit(&mut state, next).await
    }

    async fn upsert(&self, index: &str, entries: &[StoreEntry]) -> Result<usize, StoreError> {
        let mut state = self.state.lock().await;
        let mut next = state.clone();
        let target = next
            .indexes
            .get_mut(index)
            .ok_or_else(|| StoreError::IndexMissing(index.to_string()))?;
        if let Some(bad) = entries.iter().find(|e| e.values.len() != target.dimension) {
            return Err(StoreError::DimensionMismatch {
                index: index.to_string(),
                id: bad.id.clone(),
                expected: target.dimension,
                actual: bad.values.len(),
            });
        }
        for entry in entries {
            target.vectors.insert(entry.id.clone(), entry.values.clone());
        }
        self.commit(&mut state, next).await?;
        Ok(entries.len())
    }

    async fn query(&self, index: &str, request: &QueryRequest) -> Result<QueryResponse, StoreError> {
        let state = self.state.lock().await;
        let target = state
            .indexes
            .get(index)
            .ok_or_else(|| StoreError::IndexMissing(index.to_string()))?;
        if request.vector.len() != target.dimension {
            return Err(StoreError::DimensionMismatch {
                index: index.to_string(),
                id: "<query>".to_string(),
                expected: target.dimension,
                actual: request.vector.len(),
            });
        }

        let mut scored: Vec<(&String, &Vec<f32>, f32)> = target
            .vectors
            .iter()
            .map(|(id, values)| (id, values, score(target.metric, values, &request.vector)))
            .collect();

        // Higher is closer for every metric as scored here; ties break by id.
        scored.sort_by(|a, b| {
            b.2.partial_cmp(&a.2)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(b.0))
        });
        scored.truncate(request.top_k);

        let matches = scored
            .into_iter()
            .map(|(id, values, score)| QueryMatch {
                id: id.clone(),
                score,
                values: request.include_values.then(|| values.clone()),
            })
            .collect();
        Ok(QueryResponse { matches })
    }
}

fn score(metric: Metric, a: &[f32], b: &[f32]) -> f32 {
    match metric {
        Metric::Cosine => cosine_similarity(a, b),
        Metric::Dotproduct => a.iter().zip(b).map(|(x, y)| x * y).sum(),
        Metric::Euclidean => {
            let dist: f32 = a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum();
            -dist.sqrt()
        }
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot_product: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let magnitude_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let magnitude_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if magnitude_a == 0.0 || magnitude_b == 0.0 {
        0.0
    } else {
        dot_product / (magnitude_a * magnitude_b)
    }
}
