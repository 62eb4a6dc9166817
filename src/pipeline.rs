//! The movie-to-index pipeline as an explicit task graph.
//!
//! ```text
//! parse_records >> vectorize >> create_index >> convert_to_store_format
//!     >> ingest_vectors >> query_index >> delete_index
//! ```

use crate::config::{AppConfig, Backend, PipelineConfig};
use crate::convert::{self, Conversion, DroppedRecord, VectorizedRecord};
use crate::dag::{GraphError, GraphRun, Task, TaskGraph, TaskReport};
use crate::index::{IndexHandle, IndexLifecycle, IndexState};
use crate::ingest::{self, ParseReport, SkippedLine};
use crate::pinecone::{PineconeSettings, PineconeStore};
use crate::storage::SourceFingerprint;
use crate::vector_store::{LocalStore, QueryMatch, QueryRequest, QueryResponse, VectorStore};
use crate::vectorize::TfidfVectorizer;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use eyre::{Result, WrapErr, bail, eyre};
use log::{debug, info, warn};
use serde::Serialize;
use std::sync::Arc;

pub const PARSE_RECORDS: &str = "parse_records";
pub const VECTORIZE: &str = "vectorize";
pub const CREATE_INDEX: &str = "create_index";
pub const CONVERT: &str = "convert_to_store_format";
pub const INGEST: &str = "ingest_vectors";
pub const QUERY: &str = "query_index";
pub const DELETE_INDEX: &str = "delete_index";

/// Everything one run reads and produces, handed from task to task.
pub struct PipelineContext {
    pub settings: PipelineConfig,
    pub store: Arc<dyn VectorStore>,
    pub source: Option<SourceFingerprint>,
    pub parsed: Option<ParseReport>,
    pub vectorized: Vec<VectorizedRecord>,
    pub dimension: Option<usize>,
    pub index: IndexLifecycle,
    pub handle: Option<IndexHandle>,
    pub conversion: Option<Conversion>,
    pub ingested: usize,
    pub response: Option<QueryResponse>,
}

impl PipelineContext {
    pub fn new(settings: PipelineConfig, store: Arc<dyn VectorStore>) -> Self {
        Self {
            settings,
            store,
            source: None,
            parsed: None,
            vectorized: Vec::new(),
            dimension: None,
            index: IndexLifecycle::default(),
            handle: None,
            conversion: None,
            ingested: 0,
            response: None,
        }
    }
}

struct ParseRecords;
struct Vectorize;
struct CreateIndex;
struct ConvertToStoreFormat;
struct IngestVectors;
struct QueryIndex;
struct DeleteIndex;

#[async_trait]
impl Task<PipelineContext> for ParseRecords {
    async fn run(&self, ctx: &mut PipelineContext) -> Result<()> {
        let path = ctx.settings.input_path.clone();
        let report = ingest::parse_file(&path).await?;
        ctx.source = report.source.clone();
        if report.skipped_count() > 0 {
            warn!(
                "Skipped {} malformed line(s) in {}",
                report.skipped_count(),
                path.display()
            );
        }
        info!("Parsed {} record(s) from {}", report.records.len(), path.display());
        ctx.parsed = Some(report);
        Ok(())
    }
}

#[async_trait]
impl Task<PipelineContext> for Vectorize {
    async fn run(&self, ctx: &mut PipelineContext) -> Result<()> {
        let report = ctx.parsed.as_ref().ok_or_else(|| eyre!("No parsed records to vectorize"))?;
        let descriptions = report.descriptions();
        let (vectorizer, vectors) = TfidfVectorizer::fit_transform(&descriptions)
            .wrap_err("Failed to vectorize descriptions")?;
        ctx.dimension = Some(vectorizer.dimension());
        ctx.vectorized = convert::attach_vectors(report.records.clone(), vectors);
        info!(
            "Vectorized {} description(s) into dimension {}",
            ctx.vectorized.len(),
            vectorizer.dimension()
        );
        Ok(())
    }
}

#[async_trait]
impl Task<PipelineContext> for CreateIndex {
    async fn run(&self, ctx: &mut PipelineContext) -> Result<()> {
        let dimension = ctx.dimension.ok_or_else(|| eyre!("Vector dimension is unknown"))?;
        let handle = ctx
            .index
            .create(
                ctx.store.as_ref(),
                &ctx.settings.index_name,
                dimension,
                ctx.settings.metric,
            )
            .await?;
        ctx.handle = Some(handle);
        Ok(())
    }
}

#[async_trait]
impl Task<PipelineContext> for ConvertToStoreFormat {
    async fn run(&self, ctx: &mut PipelineContext) -> Result<()> {
        let records = std::mem::take(&mut ctx.vectorized);
        let conversion = convert::to_store_entries(records);
        if !conversion.dropped.is_empty() {
            warn!(
                "Dropped {} record(s) without a usable vector",
                conversion.dropped.len()
            );
            for dropped in &conversion.dropped {
                debug!("Dropped {}: {:?}", dropped.id, dropped.reason);
            }
        }
        ctx.conversion = Some(conversion);
        Ok(())
    }
}

#[async_trait]
impl Task<PipelineContext> for IngestVectors {
    async fn run(&self, ctx: &mut PipelineContext) -> Result<()> {
        let handle = ctx.handle.as_ref().ok_or_else(|| eyre!("Index was not created"))?;
        let conversion = ctx.conversion.as_ref().ok_or_else(|| eyre!("No store entries to ingest"))?;
        let batch_size = ctx.settings.upsert_batch_size.max(1);

        for (n, batch) in conversion.entries.chunks(batch_size).enumerate() {
            let written = ctx
                .store
                .upsert(&handle.name, batch)
                .await
                .wrap_err_with(|| format!("Upsert of batch {} into `{}` failed", n, handle.name))?;
            ctx.ingested += written;
            debug!("Batch {}: upserted {} vector(s)", n, written);
        }
        ctx.index.mark(IndexState::Populated)?;
        info!("Ingested {} vector(s) into `{}`", ctx.ingested, handle.name);
        Ok(())
    }
}

#[async_trait]
impl Task<PipelineContext> for QueryIndex {
    async fn run(&self, ctx: &mut PipelineContext) -> Result<()> {
        let handle = ctx.handle.as_ref().ok_or_else(|| eyre!("Index was not created"))?;
        let conversion = ctx.conversion.as_ref().ok_or_else(|| eyre!("No store entries to probe"))?;
        let Some(probe) = conversion.entries.first() else {
            bail!("Nothing was ingested into `{}`; no probe vector", handle.name);
        };

        let request = QueryRequest {
            vector: probe.values.clone(),
            top_k: ctx.settings.top_k,
            include_values: ctx.settings.include_values,
            include_metadata: ctx.settings.include_metadata,
        };
        let response = ctx.store.query(&handle.name, &request).await?;
        info!(
            "Query probe {} returned {} match(es)",
            probe.id,
            response.matches.len()
        );
        for m in &response.matches {
            info!("  {} score={:.4}", m.id, m.score);
        }
        ctx.index.mark(IndexState::Queried)?;
        ctx.response = Some(response);
        Ok(())
    }
}

#[async_trait]
impl Task<PipelineContext> for DeleteIndex {
    async fn run(&self, ctx: &mut PipelineContext) -> Result<()> {
        ctx.index
            .delete(ctx.store.as_ref(), &ctx.settings.index_name)
            .await?;
        Ok(())
    }
}

pub fn build_graph() -> Result<TaskGraph<PipelineContext>, GraphError> {
    let mut graph = TaskGraph::new();
    let parse = graph.add_task(PARSE_RECORDS, ParseRecords)?;
    let vectorize = graph.add_task(VECTORIZE, Vectorize)?;
    let create = graph.add_task(CREATE_INDEX, CreateIndex)?;
    let convert = graph.add_task(CONVERT, ConvertToStoreFormat)?;
    let ingest = graph.add_task(INGEST, IngestVectors)?;
    let query = graph.add_task(QUERY, QueryIndex)?;
    let delete = graph.add_task(DELETE_INDEX, DeleteIndex)?;

    graph.chain(&[parse, vectorize, create, convert, ingest, query, delete])?;
    graph.as_teardown(delete, create)?;
    Ok(graph)
}

#[derive(Serialize, Debug, Clone)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub index_name: String,
    pub source: Option<SourceFingerprint>,
    pub parsed: usize,
    pub skipped: Vec<SkippedLine>,
    pub dimension: Option<usize>,
    pub ingested: usize,
    pub dropped: Vec<DroppedRecord>,
    pub matches: Vec<QueryMatch>,
    pub index_state: IndexState,
    pub tasks: Vec<TaskReport>,
}

impl RunReport {
    fn assemble(started_at: DateTime<Utc>, ctx: PipelineContext, run: GraphRun) -> Self {
        let (parsed, skipped) = ctx
            .parsed
            .map(|p| (p.records.len(), p.skipped))
            .unwrap_or_default();
        Self {
            started_at,
            finished_at: Utc::now(),
            index_name: ctx.settings.index_name,
            source: ctx.source,
            parsed,
            skipped,
            dimension: ctx.dimension,
            ingested: ctx.ingested,
            dropped: ctx.conversion.map(|c| c.dropped).unwrap_or_default(),
            matches: ctx.response.map(|r| r.matches).unwrap_or_default(),
            index_state: ctx.index.state(),
            tasks: run.tasks,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.tasks
            .iter()
            .all(|t| t.state == crate::dag::TaskState::Success)
    }
}

/// Runs the whole graph once. Task failures land in the report; an `Err`
/// means the graph itself could not be built.
pub async fn run(settings: PipelineConfig, store: Arc<dyn VectorStore>) -> Result<RunReport> {
    let started_at = Utc::now();
    let graph = build_graph().wrap_err("Failed to build pipeline graph")?;
    let mut ctx = PipelineContext::new(settings, store);
    let run = graph.execute(&mut ctx).await?;

    match run.first_failure() {
        Some((task, err)) => warn!("Pipeline failed at `{}`: {}", task, err),
        None => info!("Pipeline finished"),
    }
    Ok(RunReport::assemble(started_at, ctx, run))
}

pub async fn open_store(cfg: &AppConfig) -> Result<Arc<dyn VectorStore>> {
    match cfg.store.backend {
        Backend::Local => {
            let store = LocalStore::load(cfg.store.local_path.clone())
                .await
                .wrap_err_with(|| {
                    format!("Failed to load local store {}", cfg.store.local_path.display())
                })?;
            Ok(Arc::new(store))
        }
        Backend::Pinecone => {
            let pc = &cfg.pinecone;
            let api_key = pc
                .resolved_api_key()
                .ok_or_else(|| eyre!("No API key configured for the pinecone backend"))?;
            let store = PineconeStore::new(PineconeSettings {
                api_key,
                controller_url: pc.controller_url.clone(),
                cloud: pc.cloud.clone(),
                region: pc.region.clone(),
                timeout: pc.timeout(),
                ready_timeout: pc.ready_timeout(),
                ready_poll: pc.ready_poll(),
            })?;
            Ok(Arc::new(store))
        }
    }
}
