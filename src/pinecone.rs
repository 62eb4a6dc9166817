use crate::vector_store::{
    IndexSpec, Metric, QueryRequest, QueryResponse, StoreEntry, StoreError, VectorStore,
};
use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{Instant, sleep};

const API_VERSION: &str = "2024-07";

#[derive(Debug, Clone)]
pub struct PineconeSettings {
    pub api_key: String,
    pub controller_url: String,
    pub cloud: String,
    pub region: String,
    pub timeout: Duration,
    pub ready_timeout: Duration,
    pub ready_poll: Duration,
}

pub struct PineconeStore {
    client: Client,
    settings: PineconeSettings,
    hosts: Mutex<HashMap<String, String>>,
}

#[derive(Serialize)]
struct CreateIndexRequest<'a> {
    name: &'a str,
    dimension: usize,
    metric: Metric,
    spec: ServerlessSpec<'a>,
}

#[derive(Serialize)]
struct ServerlessSpec<'a> {
    serverless: CloudRegion<'a>,
}

#[derive(Serialize)]
struct CloudRegion<'a> {
    cloud: &'a str,
    region: &'a str,
}

#[derive(Deserialize, Debug)]
struct IndexDescription {
    host: Option<String>,
    #[serde(default)]
    status: IndexStatus,
}

#[derive(Deserialize, Debug, Default)]
struct IndexStatus {
    #[serde(default)]
    ready: bool,
    #[serde(default)]
    state: Option<String>,
}

#[derive(Serialize)]
struct UpsertRequest<'a> {
    vectors: &'a [StoreEntry],
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpsertResponse {
    #[serde(default)]
    upserted_count: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireQuery<'a> {
    vector: &'a [f32],
    top_k: usize,
    include_values: bool,
    include_metadata: bool,
}

impl PineconeStore {
    pub fn new(settings: PineconeSettings) -> Result<Self, StoreError> {
        let mut headers = HeaderMap::new();
        let key =
            HeaderValue::from_str(settings.api_key.trim()).map_err(|_| StoreError::InvalidApiKey)?;
        headers.insert("Api-Key", key);
        headers.insert(
            "X-Pinecone-API-Version",
            HeaderValue::from_static(API_VERSION),
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .timeout(settings.timeout)
            .default_headers(headers)
            .build()?;
        Ok(Self {
            client,
            settings: PineconeSettings {
                controller_url: settings.controller_url.trim_end_matches('/').to_string(),
                ..settings
            },
            hosts: Mutex::new(HashMap::new()),
        })
    }

    fn index_url(&self, name: &str) -> String {
        format!("{}/indexes/{}", self.settings.controller_url, name)
    }

    async fn describe(&self, name: &str) -> Result<IndexDescription, StoreError> {
        let resp = self.client.get(self.index_url(name)).send().await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Err(StoreError::IndexMissing(name.to_string()));
        }
        Ok(check(resp).await?.json().await?)
    }

    /// Polls the control plane until the index reports ready, then caches
    /// its data-plane host.
    async fn wait_ready(&self, name: &str) -> Result<String, StoreError> {
        let deadline = Instant::now() + self.settings.ready_timeout;
        loop {
            let description = self.describe(name).await?;
            match description.host {
                Some(host) if description.status.ready => {
                    let base = data_plane_base(&host);
                    self.hosts
                        .lock()
                        .await
                        .insert(name.to_string(), base.clone());
                    return Ok(base);
                }
                _ => {
                    log::debug!(
                        "Index `{}` not ready yet (state {:?})",
                        name,
                        description.status.state
                    );
                }
            }
            if Instant::now() >= deadline {
                return Err(StoreError::NotReady(name.to_string()));
            }
            sleep(self.settings.ready_poll).await;
        }
    }

    async fn host(&self, name: &str) -> Result<String, StoreError> {
        if let Some(host) = self.hosts.lock().await.get(name) {
            return Ok(host.clone());
        }
        self.wait_ready(name).await
    }
}

fn data_plane_base(host: &str) -> String {
    let host = host.trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("https://{host}")
    }
}

async fn check(resp: reqwest::Response) -> Result<reqwest::Response, StoreError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp
        .text()
        .await
        .unwrap_or_else(|_| "<body unavailable>".to_string());
    Err(StoreError::Status {
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl VectorStore for PineconeStore {
    async fn create_index(&self, spec: &IndexSpec) -> Result<(), StoreError> {
        if spec.dimension == 0 {
            return Err(StoreError::ZeroDimension);
        }
        let body = CreateIndexRequest {
            name: &spec.name,
            dimension: spec.dimension,
            metric: spec.metric,
            spec: ServerlessSpec {
                serverless: CloudRegion {
                    cloud: &self.settings.cloud,
                    region: &self.settings.region,
                },
            },
        };
        let resp = self
            .client
            .post(format!("{}/indexes", self.settings.controller_url))
            .json(&body)
            .send()
            .await?;
        if resp.status() == StatusCode::CONFLICT {
            return Err(StoreError::IndexExists(spec.name.clone()));
        }
        check(resp).await?;

        // The index exists from here on; the caller only owns it once ready.
        match self.wait_ready(&spec.name).await {
            Ok(host) => {
                log::info!("Index `{}` ready at {}", spec.name, host);
                Ok(())
            }
            Err(err) => {
                log::warn!(
                    "Index `{}` was accepted but never became usable, deleting it: {}",
                    spec.name,
                    err
                );
                if let Err(cleanup) = self.delete_index(&spec.name).await {
                    log::error!("Failed to delete index `{}`: {}", spec.name, cleanup);
                }
                Err(err)
            }
        }
    }

    async fn delete_index(&self, name: &str) -> Result<(), StoreError> {
        let resp = self.client.delete(self.index_url(name)).send().await?;
        self.hosts.lock().await.remove(name);
        if resp.status() == StatusCode::NOT_FOUND {
            return Err(StoreError::IndexMissing(name.to_string()));
        }
        check(resp).await?;
        Ok(())
    }

    async fn upsert(&self, index: &str, entries: &[StoreEntry]) -> Result<usize, StoreError> {
        let host = self.host(index).await?;
        let resp = self
            .client
            .post(format!("{host}/vectors/upsert"))
            .json(&UpsertRequest { vectors: entries })
            .send()
            .await?;
        let payload: UpsertResponse = check(resp).await?.json().await?;
        Ok(payload.upserted_count)
    }

    async fn query(&self, index: &str, request: &QueryRequest) -> Result<QueryResponse, StoreError> {
        let host = self.host(index).await?;
        let body = WireQuery {
            vector: &request.vector,
            top_k: request.top_k,
            include_values: request.include_values,
            include_metadata: request.include_metadata,
        };
        let resp = self
            .client
            .post(format!("{host}/query"))
            .json(&body)
            .send()
            .await?;
        Ok(check(resp).await?.json().await?)
    }
}
